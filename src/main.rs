//! lesion_trainer - 皮膚病変画像の分類モデル学習パイプライン
//!
//! サブコマンド:
//! - sort:    正解表に従って未分類画像を benign/malignant に振り分け
//! - split:   学習/検証ディレクトリを空にして分割し直す
//! - decode:  DICOM ディレクトリを JPG/PNG に変換
//! - train:   分割済みデータで学習しエクスポート
//! - predict: エクスポート済みモデルで画像を分類
//! - run:     振り分け以外の全段階を実行

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use lesion_trainer_lib::dataset::split_rng;
use lesion_trainer_lib::dicom::{convert_directory, RasterFormat};
use lesion_trainer_lib::model::AppConfig;
use lesion_trainer_lib::pipeline;

#[derive(Parser, Debug)]
#[command(name = "lesion_trainer")]
#[command(about = "Dermoscopy dataset preparation and lesion classifier training")]
#[command(version)]
struct Args {
    /// 設定ファイル（存在しなければデフォルト設定）
    #[arg(short, long, global = true, default_value = "pipeline.json")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sort unsorted images into class folders using the ground-truth table
    Sort,
    /// Clear the training/validation folders and re-split each class
    Split {
        /// Override the configured seed
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Convert every .dcm file in a directory to a raster image
    Decode {
        source: PathBuf,
        destination: PathBuf,
        #[arg(long, value_enum, default_value = "jpg")]
        format: FormatArg,
    },
    /// Train on the split folders and export the model
    #[cfg(feature = "ml")]
    Train,
    /// Classify images with an exported model
    #[cfg(feature = "ml")]
    Predict {
        /// Exported model (.tar.gz); defaults to export.output_path
        #[arg(long)]
        model: Option<PathBuf>,
        images: Vec<PathBuf>,
    },
    /// Split, train and export
    #[cfg(feature = "ml")]
    Run,
    /// Write the effective configuration to the config path
    InitConfig,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum FormatArg {
    Jpg,
    Png,
}

impl From<FormatArg> for RasterFormat {
    fn from(arg: FormatArg) -> Self {
        match arg {
            FormatArg::Jpg => RasterFormat::Jpg,
            FormatArg::Png => RasterFormat::Png,
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lesion_trainer=info,lesion_trainer_lib=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let config = AppConfig::load_or_default(&args.config)
        .with_context(|| format!("Failed to load config {}", args.config.display()))?;

    match args.command {
        Command::Sort => {
            let report = pipeline::prepare_dataset(&config).context("Failed to sort dataset")?;
            info!(
                "benign {} 件, malignant {} 件, スキップ {} 件",
                report.benign,
                report.malignant,
                report.skipped.len()
            );
        }
        Command::Split { seed } => {
            let mut rng = split_rng(seed.or(config.split.seed));
            pipeline::reset_dirs(&config, &mut rng).context("Failed to split dataset")?;
        }
        Command::Decode {
            source,
            destination,
            format,
        } => {
            let (written, failed) = convert_directory(&source, &destination, format.into())
                .with_context(|| format!("Failed to convert {}", source.display()))?;
            for (path, e) in &failed {
                warn!("変換失敗 {}: {}", path.display(), e);
            }
            info!("{} 件変換しました ({} 件失敗)", written.len(), failed.len());
        }
        #[cfg(feature = "ml")]
        Command::Train => {
            config.display();
            let path = pipeline::train(&config).context("Training failed")?;
            info!("保存先: {}", path.display());
        }
        #[cfg(feature = "ml")]
        Command::Predict { model, images } => {
            let model_path = model.unwrap_or_else(|| config.export.output_path.clone());
            let engine = lesion_trainer_lib::ml::InferenceEngine::load(&model_path)
                .with_context(|| format!("Failed to load model {}", model_path.display()))?;
            for image in &images {
                let prediction = engine
                    .classify_image(image)
                    .with_context(|| format!("Failed to classify {}", image.display()))?;
                println!(
                    "{}\t{}\t{:.4}",
                    image.display(),
                    prediction.label,
                    prediction.malignant_probability
                );
            }
        }
        #[cfg(feature = "ml")]
        Command::Run => {
            let path = pipeline::run(&config).context("Pipeline failed")?;
            info!("保存先: {}", path.display());
        }
        Command::InitConfig => {
            config.save(&args.config)?;
            info!("設定ファイルを書き出しました: {}", args.config.display());
        }
    }

    Ok(())
}
