//! DICOM画像をラスター画像へ変換する
//!
//! 画素値を負の値だけ0に切り上げ、最大値が255になるよう線形にスケールする。
//! 最小値を0に合わせる正規化ではない点に注意。
//! カラー（3サンプル）の場合も全チャンネル共通の最大値でスケールする。

use std::fs;
use std::path::{Path, PathBuf};

use dicom_object::open_file;
use dicom_pixeldata::{ConvertOptions, ModalityLutOption, PixelDecoder, PlanarConfiguration, VoiLutOption};
use image::{DynamicImage, GrayImage, RgbImage};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::dataset::layout::list_files;
use crate::error::{PipelineError, Result};

/// 8bitのラスター画像。モノクロは `ImageLuma8`、カラーは `ImageRgb8`
pub type RasterImage = DynamicImage;

/// 変換後の保存形式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RasterFormat {
    Jpg,
    Png,
}

impl RasterFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            RasterFormat::Jpg => "jpg",
            RasterFormat::Png => "png",
        }
    }
}

impl Default for RasterFormat {
    fn default() -> Self {
        RasterFormat::Jpg
    }
}

/// `floor(max(v, 0) / max * 255)` を全サンプルに適用する
fn rescale_samples(source: &Path, samples: &[f64], expected: usize) -> Result<Vec<u8>> {
    if samples.len() != expected {
        return Err(PipelineError::format(
            source,
            format!("sample count {} does not match expected {}", samples.len(), expected),
        ));
    }

    let max = samples.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !(max > 0.0) {
        return Err(PipelineError::decode(
            source,
            format!("maximum pixel value is {}, cannot rescale", max),
        ));
    }

    Ok(samples
        .iter()
        .map(|&v| ((v.max(0.0) / max) * 255.0).floor() as u8)
        .collect())
}

/// 1サンプル/画素の配列を8bitグレースケールへ変換する
///
/// 最大値が0以下（全画素0など）の場合はDecodeエラー。
pub fn rescale_to_gray(
    source: &Path,
    pixels: &[f64],
    width: u32,
    height: u32,
) -> Result<GrayImage> {
    let data = rescale_samples(source, pixels, width as usize * height as usize)?;
    GrayImage::from_raw(width, height, data).ok_or_else(|| {
        PipelineError::format(source, "pixel buffer does not fit image dimensions")
    })
}

/// RGBインターリーブの配列を8bitカラーへ変換する。最大値は3チャンネル共通
pub fn rescale_to_rgb(
    source: &Path,
    samples: &[f64],
    width: u32,
    height: u32,
) -> Result<RgbImage> {
    let data = rescale_samples(source, samples, width as usize * height as usize * 3)?;
    RgbImage::from_raw(width, height, data).ok_or_else(|| {
        PipelineError::format(source, "pixel buffer does not fit image dimensions")
    })
}

/// RRR..GGG..BBB.. を RGBRGB.. に並べ替える
fn interleave_planes(planar: &[u8], pixel_count: usize) -> Vec<f64> {
    let mut out = Vec::with_capacity(pixel_count * 3);
    for i in 0..pixel_count {
        for plane in 0..3 {
            out.push(planar.get(plane * pixel_count + i).copied().unwrap_or(0) as f64);
        }
    }
    out
}

/// DICOMファイルの最初のフレームを読み込んでラスター画像にする
///
/// 格納値をそのまま使う（Modality LUT / VOI LUT は適用しない）。
/// リサイズやチャンネル変換は行わない。
pub fn decode_to_raster(source_path: &Path) -> Result<RasterImage> {
    if !source_path.is_file() {
        return Err(PipelineError::FileNotFound(source_path.to_path_buf()));
    }

    let object = open_file(source_path)
        .map_err(|e| PipelineError::format(source_path, format!("not a DICOM file: {}", e)))?;

    let decoded = object
        .decode_pixel_data()
        .map_err(|e| PipelineError::format(source_path, format!("pixel data: {}", e)))?;

    let width = decoded.columns();
    let height = decoded.rows();
    let options = ConvertOptions::new()
        .with_modality_lut(ModalityLutOption::None)
        .with_voi_lut(VoiLutOption::Identity);
    let conversion_err =
        |e: dicom_pixeldata::Error| PipelineError::format(source_path, format!("pixel conversion: {}", e));

    match decoded.samples_per_pixel() {
        1 => {
            let pixels: Vec<f64> = decoded
                .to_vec_frame_with_options(0, &options)
                .map_err(conversion_err)?;
            Ok(DynamicImage::ImageLuma8(rescale_to_gray(source_path, &pixels, width, height)?))
        }
        3 => {
            let samples: Vec<f64> = match decoded.planar_configuration() {
                PlanarConfiguration::Standard => decoded
                    .to_vec_frame_with_options(0, &options)
                    .map_err(conversion_err)?,
                PlanarConfiguration::PixelFirst => {
                    if decoded.bits_allocated() != 8 {
                        return Err(PipelineError::format(
                            source_path,
                            format!(
                                "planar colour data with {} bits allocated is not supported",
                                decoded.bits_allocated()
                            ),
                        ));
                    }
                    let planar = decoded.frame_data(0).map_err(conversion_err)?;
                    interleave_planes(planar, width as usize * height as usize)
                }
            };
            Ok(DynamicImage::ImageRgb8(rescale_to_rgb(source_path, &samples, width, height)?))
        }
        samples => Err(PipelineError::format(
            source_path,
            format!("unsupported samples per pixel: {}", samples),
        )),
    }
}

/// ディレクトリ内の `.dcm` を全て変換し `<名前>.<拡張子>` で保存する
///
/// 変換に失敗したファイルは警告を出して飛ばし、失敗一覧として返す。
pub fn convert_directory(
    source_dir: &Path,
    output_dir: &Path,
    format: RasterFormat,
) -> Result<(Vec<PathBuf>, Vec<(PathBuf, PipelineError)>)> {
    fs::create_dir_all(output_dir).map_err(|e| PipelineError::io(output_dir, e))?;

    let mut written = Vec::new();
    let mut failures = Vec::new();

    for path in list_files(source_dir)? {
        let is_dicom = path
            .extension()
            .map(|ext| ext.to_string_lossy().eq_ignore_ascii_case("dcm"))
            .unwrap_or(false);
        if !is_dicom {
            continue;
        }

        let raster = match decode_to_raster(&path) {
            Ok(raster) => raster,
            Err(e) => {
                warn!("変換失敗: {}", e);
                failures.push((path, e));
                continue;
            }
        };

        let Some(stem) = path.file_stem() else {
            continue;
        };
        let mut file_name = stem.to_os_string();
        file_name.push(".");
        file_name.push(format.extension());
        let target = output_dir.join(file_name);
        raster.save(&target).map_err(|e| PipelineError::Io {
            path: target.clone(),
            source: std::io::Error::new(std::io::ErrorKind::Other, e),
        })?;
        written.push(target);
    }

    info!(
        "{} を変換しました: 成功 {} 件, 失敗 {} 件",
        source_dir.display(),
        written.len(),
        failures.len()
    );

    Ok((written, failures))
}
