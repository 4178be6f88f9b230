//! パイプラインの各段階
//!
//! 1. `prepare_dataset`: 正解表に従って未分類画像を images/{benign,malignant} へ振り分け
//! 2. `reset_dirs`: 学習/検証ディレクトリを空にして分割し直す
//! 3. `run`: 分割 → 学習 → 履歴出力 → エクスポート

use rand::Rng;
use tracing::info;

use crate::csv_loader::build_label_index;
use crate::dataset::{sort_dataset, split_data, split_rng, DatasetLayout};
use crate::error::Result;
use crate::model::AppConfig;
use crate::types::{DatasetCounts, Diagnosis, SortReport, SplitReport};

/// 正解表を読み込み、未分類画像をクラスごとのディレクトリへコピーする
pub fn prepare_dataset(config: &AppConfig) -> Result<SortReport> {
    let paths = &config.paths;
    let layout = DatasetLayout::from_settings(paths);

    let label_index = build_label_index(&paths.labels_csv)?;
    info!(
        "正解表: {} 件 (benign {}, malignant {})",
        label_index.len(),
        label_index.count(Diagnosis::Benign),
        label_index.count(Diagnosis::Malignant)
    );

    sort_dataset(
        &paths.unsorted_dir,
        &label_index,
        &layout.source_dir(Diagnosis::Benign),
        &layout.source_dir(Diagnosis::Malignant),
    )
}

/// 学習/検証ディレクトリを空にし、各クラスを分割し直して件数を返す
pub fn reset_dirs<R: Rng + ?Sized>(config: &AppConfig, rng: &mut R) -> Result<DatasetCounts> {
    let layout = DatasetLayout::from_settings(&config.paths);
    layout.ensure_dirs()?;

    let removed = layout.clear_splits()?;
    if removed > 0 {
        info!("以前の分割結果を {} 件削除しました", removed);
    }

    for diagnosis in Diagnosis::ALL {
        let report: SplitReport = split_data(
            &layout.source_dir(diagnosis),
            &layout.training_dir(diagnosis),
            &layout.validation_dir(diagnosis),
            config.split.ratio,
            rng,
        )?;
        let (training, validation) = report.counts();
        info!(
            "{}: 学習 {} 件, 検証 {} 件, 空ファイル {} 件",
            diagnosis,
            training,
            validation,
            report.skipped_empty.len()
        );
    }

    let counts = layout.counts()?;
    log_counts(&counts);
    Ok(counts)
}

fn log_counts(counts: &DatasetCounts) {
    info!("benign 画像数: {}", counts.source_benign);
    info!("malignant 画像数: {}", counts.source_malignant);
    info!("学習用 benign: {}", counts.training_benign);
    info!("学習用 malignant: {}", counts.training_malignant);
    info!("検証用 benign: {}", counts.validation_benign);
    info!("検証用 malignant: {}", counts.validation_malignant);
}

#[cfg(feature = "ml")]
pub use self::ml_stage::{run, train, train_and_export, training_job};

#[cfg(feature = "ml")]
mod ml_stage {
    use std::path::PathBuf;

    use burn::tensor::backend::{AutodiffBackend, Backend};
    use tracing::info;

    use super::reset_dirs;
    use crate::dataset::{split_rng, DatasetLayout};
    use crate::error::Result;
    use crate::metrics_report::{log_history, write_history_csv};
    use crate::ml::{export_model, fit, train_model, TrainedModel, TrainingJob};
    use crate::model::{print_metadata_info, AppConfig, ModelMetadata};

    pub fn training_job(config: &AppConfig) -> TrainingJob {
        let layout = DatasetLayout::from_settings(&config.paths);
        TrainingJob {
            training_dir: layout.training_root,
            validation_dir: layout.validation_root,
            model: config.model.clone(),
            training: config.training.clone(),
            device_type: config.device_type,
        }
    }

    /// 履歴を書き出してモデルをエクスポートする
    fn export_trained<B: Backend>(config: &AppConfig, trained: TrainedModel<B>) -> Result<PathBuf> {
        log_history(&trained.history);
        write_history_csv(&trained.history, &config.training.history_csv)?;

        let metadata = ModelMetadata::new(
            config.model.architecture,
            config.model.image_size,
            trained.history.len(),
            config.export.mode,
            trained.history.last().map(|m| m.val_accuracy),
        );
        print_metadata_info(&metadata);

        export_model(trained.model, &metadata, config.export.mode, &config.export.output_path)
    }

    /// 分割済みのディレクトリで学習してエクスポートする（任意のバックエンド）
    pub fn train_and_export<B: AutodiffBackend>(config: &AppConfig, device: B::Device) -> Result<PathBuf> {
        let trained = fit::<B>(&training_job(config), device)?;
        export_trained(config, trained)
    }

    /// 分割済みのディレクトリで学習してエクスポートする（WGPU バックエンド）
    pub fn train(config: &AppConfig) -> Result<PathBuf> {
        let trained = train_model(&training_job(config))?;
        export_trained(config, trained)
    }

    /// 分割 → 学習 → エクスポート
    pub fn run(config: &AppConfig) -> Result<PathBuf> {
        config.display();

        let mut rng = split_rng(config.split.seed);
        reset_dirs(config, &mut rng)?;

        let path = train(config)?;
        info!("パイプラインが完了しました: {}", path.display());
        Ok(path)
    }
}

/// 振り分けから分割までを実行する（学習なし）
pub fn prepare_and_split(config: &AppConfig) -> Result<DatasetCounts> {
    let report = prepare_dataset(config)?;
    info!(
        "振り分け: benign {}, malignant {}, スキップ {}",
        report.benign,
        report.malignant,
        report.skipped.len()
    );
    let mut rng = split_rng(config.split.seed);
    reset_dirs(config, &mut rng)
}
