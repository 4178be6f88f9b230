pub mod model_metadata;
pub mod model_storage;
pub mod config;

pub use model_metadata::{ModelMetadata, WeightPrecision};
pub use model_storage::{save_model_with_metadata, load_metadata, load_model_with_metadata, print_metadata_info, compression_for};
pub use config::{AppConfig, DeviceType, ModelArchitecture, ModelSettings, OptimizationMode, TrainingSettings, ExportSettings, PathSettings, SplitSettings};
