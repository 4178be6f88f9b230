pub mod layout;
pub mod sorter;
pub mod splitter;

pub use layout::{copy_file, count_files, empty_dir, list_files, DatasetLayout};
pub use sorter::{sample_id_of, sort_dataset};
pub use splitter::{split_data, split_rng};
