#![recursion_limit = "256"]

pub mod types;
pub mod error;
pub mod csv_loader;

// データセット準備
pub mod dataset;
pub mod dicom;
pub mod pipeline;
pub mod metrics_report;

// 設定・モデル保存形式
pub mod model;
#[cfg(feature = "ml")]
pub mod ml;

pub use error::{PipelineError, Result};
pub use types::{DatasetCounts, Diagnosis, SortReport, SplitReport};
