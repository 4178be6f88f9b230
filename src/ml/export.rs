//! 学習済みモデルのエクスポート
//!
//! 最適化方針ごとの違い:
//! - storage: 半精度の重み + 最大圧縮
//! - latency: 単精度の重み + 無圧縮
//! - default: 単精度の重み + 標準圧縮

use std::path::{Path, PathBuf};

use burn::tensor::backend::Backend;
use tracing::info;

use crate::error::{PipelineError, Result};
use crate::ml::{model_to_bytes, LesionClassifier};
use crate::model::{compression_for, save_model_with_metadata, ModelMetadata, OptimizationMode};

/// モデルを1つの tar.gz に書き出し、保存先を返す
pub fn export_model<B: Backend>(
    model: LesionClassifier<B>,
    metadata: &ModelMetadata,
    mode: OptimizationMode,
    output_path: &Path,
) -> Result<PathBuf> {
    if metadata.optimization != mode {
        return Err(PipelineError::Export(format!(
            "metadata was built for '{}' but export requested '{}'",
            metadata.optimization, mode
        )));
    }

    let model_binary = model_to_bytes(model, metadata.precision)?;
    let path = save_model_with_metadata(output_path, metadata, &model_binary, compression_for(mode))?;

    let size = std::fs::metadata(&path)
        .map_err(|e| PipelineError::io(&path, e))?
        .len();
    info!(
        "モデルをエクスポートしました: {} ({} bytes, mode: {})",
        path.display(),
        size,
        mode
    );
    Ok(path)
}
