//! モデルとメタデータの永続化
//!
//! Tar.gz形式でモデルとメタデータを1ファイルに統合して保存・読み込みします。
//!
//! ファイル構成（tar.gz内部）:
//! - metadata.json   - メタデータ（クラス順序、入力サイズなど）
//! - model.bin       - モデルの重み（バイナリ）

use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use tar::{Archive, Builder};
use tracing::info;

use crate::error::{PipelineError, Result};
use crate::model::config::OptimizationMode;
use crate::model::model_metadata::ModelMetadata;

const METADATA_ENTRY: &str = "metadata.json";
const MODEL_ENTRY: &str = "model.bin";

/// 最適化方針に対応するgzip圧縮レベル
pub fn compression_for(mode: OptimizationMode) -> Compression {
    match mode {
        OptimizationMode::Storage => Compression::best(),
        OptimizationMode::Latency => Compression::none(),
        OptimizationMode::Default => Compression::default(),
    }
}

/// 出力パスを .tar.gz に揃える
pub fn bundle_path(output_path: &Path) -> PathBuf {
    if output_path.extension().and_then(|s| s.to_str()) == Some("gz") {
        output_path.to_path_buf()
    } else {
        output_path.with_extension("tar.gz")
    }
}

fn export_err(path: &Path, what: &str, e: impl std::fmt::Display) -> PipelineError {
    PipelineError::Export(format!("{} ({}): {}", what, path.display(), e))
}

fn append_entry<W: std::io::Write>(
    builder: &mut Builder<W>,
    path: &Path,
    name: &str,
    bytes: &[u8],
) -> Result<()> {
    let mut header = tar::Header::new_gnu();
    header
        .set_path(name)
        .map_err(|e| export_err(path, "invalid entry name", e))?;
    header.set_size(bytes.len() as u64);
    header.set_mode(0o644);
    header.set_cksum();
    builder
        .append(&header, bytes)
        .map_err(|e| export_err(path, &format!("failed to add {}", name), e))
}

/// メタデータと共にモデルをTar.gz形式で保存し、実際の保存先を返す
pub fn save_model_with_metadata(
    output_path: &Path,
    metadata: &ModelMetadata,
    model_binary: &[u8],
    compression: Compression,
) -> Result<PathBuf> {
    let tar_gz_path = bundle_path(output_path);

    if let Some(parent) = tar_gz_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| PipelineError::io(parent, e))?;
        }
    }

    let tar_gz_file = File::create(&tar_gz_path).map_err(|e| PipelineError::io(&tar_gz_path, e))?;
    let encoder = GzEncoder::new(tar_gz_file, compression);
    let mut tar_builder = Builder::new(encoder);

    let json_str = metadata.to_json_string()?;
    append_entry(&mut tar_builder, &tar_gz_path, METADATA_ENTRY, json_str.as_bytes())?;
    append_entry(&mut tar_builder, &tar_gz_path, MODEL_ENTRY, model_binary)?;

    let encoder = tar_builder
        .into_inner()
        .map_err(|e| export_err(&tar_gz_path, "failed to finalize tar archive", e))?;
    encoder
        .finish()
        .map_err(|e| export_err(&tar_gz_path, "failed to finalize gzip stream", e))?;

    Ok(tar_gz_path)
}

fn open_archive(tar_gz_path: &Path) -> Result<Archive<GzDecoder<File>>> {
    let tar_gz_file = File::open(tar_gz_path).map_err(|e| PipelineError::io(tar_gz_path, e))?;
    Ok(Archive::new(GzDecoder::new(tar_gz_file)))
}

/// メタデータとモデルバイナリを読み込む。`want_model` が false ならmodel.binは読まない
fn read_bundle(tar_gz_path: &Path, want_model: bool) -> Result<(Option<ModelMetadata>, Option<Vec<u8>>)> {
    let mut archive = open_archive(tar_gz_path)?;
    let corrupt = |e: std::io::Error| PipelineError::format(tar_gz_path, format!("corrupt archive: {}", e));

    let mut metadata = None;
    let mut model_binary = None;

    for entry in archive.entries().map_err(corrupt)? {
        let mut entry = entry.map_err(corrupt)?;
        let name = entry.path().map_err(corrupt)?.to_string_lossy().to_string();

        match name.as_str() {
            METADATA_ENTRY => {
                let mut json_str = String::new();
                entry.read_to_string(&mut json_str).map_err(corrupt)?;
                metadata = Some(ModelMetadata::from_json_string(&json_str)?);
                if !want_model {
                    break;
                }
            }
            MODEL_ENTRY if want_model => {
                let mut buffer = Vec::new();
                entry.read_to_end(&mut buffer).map_err(corrupt)?;
                model_binary = Some(buffer);
            }
            _ => {}
        }
    }

    Ok((metadata, model_binary))
}

/// Tar.gzからモデルメタデータを読み込む
pub fn load_metadata(tar_gz_path: &Path) -> Result<ModelMetadata> {
    read_bundle(tar_gz_path, false)?
        .0
        .ok_or_else(|| PipelineError::format(tar_gz_path, "metadata.json not found in tar.gz archive"))
}

/// メタデータとモデルバイナリを共に読み込む
pub fn load_model_with_metadata(tar_gz_path: &Path) -> Result<(ModelMetadata, Vec<u8>)> {
    match read_bundle(tar_gz_path, true)? {
        (Some(metadata), Some(binary)) => Ok((metadata, binary)),
        (None, _) => Err(PipelineError::format(tar_gz_path, "metadata.json not found in tar.gz archive")),
        (_, None) => Err(PipelineError::format(tar_gz_path, "model.bin not found in tar.gz archive")),
    }
}

/// メタデータをログに出す
pub fn print_metadata_info(metadata: &ModelMetadata) {
    info!("=== モデルメタデータ ===");
    info!("クラス: {}", metadata.class_labels.join(", "));
    info!("構成: {:?}", metadata.architecture);
    info!("モデル入力サイズ: {}x{}", metadata.image_size, metadata.image_size);
    info!("学習エポック数: {}", metadata.num_epochs);
    info!("最適化: {} ({:?})", metadata.optimization, metadata.precision);
    if let Some(acc) = metadata.final_val_accuracy {
        info!("検証精度: {:.4}", acc);
    }
    info!("学習日時: {}", metadata.trained_at);
}
