//! パイプライン設定管理モジュール
//!
//! パスや分割比率、学習設定などをJSON形式で保存・読み込みします。
//! 各処理には呼び出し時にこの設定から必要な値を渡します。

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::error::{PipelineError, Result};

/// 畳み込み4段 + プーリング後に特徴マップが残る最小サイズ
pub const MIN_IMAGE_SIZE: usize = 46;

/// 計算デバイスの種類
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DeviceType {
    /// WGPU (GPU) バックエンド
    Wgpu,
    /// WGPU の CPU デバイス
    Cpu,
}

impl Default for DeviceType {
    fn default() -> Self {
        DeviceType::Wgpu
    }
}

impl std::fmt::Display for DeviceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DeviceType::Wgpu => write!(f, "WGPU (GPU)"),
            DeviceType::Cpu => write!(f, "WGPU (CPU)"),
        }
    }
}

/// モデル構成
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ModelArchitecture {
    /// 畳み込み層から全て学習する
    Scratch,
    /// 学習済みの畳み込み層を凍結し、分類ヘッドのみ学習する
    Transfer,
}

impl Default for ModelArchitecture {
    fn default() -> Self {
        ModelArchitecture::Scratch
    }
}

/// エクスポート時の最適化方針
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OptimizationMode {
    /// ファイルサイズ優先（半精度 + 最大圧縮）
    Storage,
    /// 読み込み速度優先（単精度 + 無圧縮）
    Latency,
    /// 単精度 + 標準圧縮
    Default,
}

impl Default for OptimizationMode {
    fn default() -> Self {
        OptimizationMode::Latency
    }
}

impl std::fmt::Display for OptimizationMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OptimizationMode::Storage => write!(f, "storage"),
            OptimizationMode::Latency => write!(f, "latency"),
            OptimizationMode::Default => write!(f, "default"),
        }
    }
}

/// ディレクトリ・ファイルのパス
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathSettings {
    /// 未分類の画像プール
    pub unsorted_dir: PathBuf,
    /// 正解表CSV
    pub labels_csv: PathBuf,
    /// 振り分け済みプール（<images_root>/{benign,malignant}）
    pub images_root: PathBuf,
    pub training_root: PathBuf,
    pub validation_root: PathBuf,
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            unsorted_dir: PathBuf::from("images"),
            labels_csv: PathBuf::from("ISIC_2020_Training_GroundTruth_v2.csv"),
            images_root: PathBuf::from("images"),
            training_root: PathBuf::from("training"),
            validation_root: PathBuf::from("validation"),
        }
    }
}

/// 学習/検証分割の設定
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SplitSettings {
    /// 学習用に回す割合 (0, 1)
    pub ratio: f64,
    /// 乱数シード。未指定なら実行ごとに異なる分割
    pub seed: Option<u64>,
}

impl Default for SplitSettings {
    fn default() -> Self {
        Self {
            ratio: 0.8,
            seed: None,
        }
    }
}

/// モデル設定
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    pub architecture: ModelArchitecture,
    /// Transfer 時に畳み込み層を読み込む学習済みモデル（tar.gz）
    pub pretrained_path: Option<PathBuf>,
    /// ドロップアウト率
    pub dropout: f64,
    /// 入力画像サイズ（正方形）
    pub image_size: usize,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            architecture: ModelArchitecture::default(),
            pretrained_path: None,
            dropout: 0.2,
            image_size: 224,
        }
    }
}

/// トレーニング設定
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingSettings {
    /// エポック数
    pub num_epochs: usize,
    /// バッチサイズ
    pub batch_size: usize,
    /// 学習率
    pub learning_rate: f64,
    /// ランダムシード（モデル初期化・データ拡張）
    pub seed: u64,
    /// 学習精度がこの値を超えたら打ち切る
    pub target_accuracy: f64,
    /// エポックごとの指標を書き出すCSV
    pub history_csv: PathBuf,
}

impl Default for TrainingSettings {
    fn default() -> Self {
        Self {
            num_epochs: 50,
            batch_size: 128,
            learning_rate: 3e-4,
            seed: 42,
            target_accuracy: 0.99,
            history_csv: PathBuf::from("training_history.csv"),
        }
    }
}

/// エクスポート設定
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportSettings {
    pub mode: OptimizationMode,
    pub output_path: PathBuf,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            mode: OptimizationMode::default(),
            output_path: PathBuf::from("models/lesion_classifier.tar.gz"),
        }
    }
}

/// アプリケーション設定
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// 計算デバイスの種類
    #[serde(default)]
    pub device_type: DeviceType,
    #[serde(default)]
    pub paths: PathSettings,
    #[serde(default)]
    pub split: SplitSettings,
    #[serde(default)]
    pub model: ModelSettings,
    #[serde(default)]
    pub training: TrainingSettings,
    #[serde(default)]
    pub export: ExportSettings,
}

impl AppConfig {
    /// 設定ファイルのデフォルトパス
    pub fn default_path() -> PathBuf {
        PathBuf::from("pipeline.json")
    }

    /// 設定を読み込む
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| PipelineError::io(path, e))?;
        let config: AppConfig = serde_json::from_str(&content)
            .map_err(|e| PipelineError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// 設定を読み込む。存在しない場合はデフォルト設定を返す
    ///
    /// 壊れた設定ファイルは黙って無視せずエラーにする。
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            let config = Self::load(path)?;
            info!("設定ファイルを読み込みました: {}", path.display());
            Ok(config)
        } else {
            warn!(
                "設定ファイルが存在しません ({})。デフォルト設定を使用します",
                path.display()
            );
            Ok(Self::default())
        }
    }

    /// 設定を保存する
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| PipelineError::Config(e.to_string()))?;
        fs::write(path, content).map_err(|e| PipelineError::io(path, e))?;
        Ok(())
    }

    /// 値の範囲チェック
    pub fn validate(&self) -> Result<()> {
        crate::dataset::splitter::validate_ratio(self.split.ratio)?;

        if self.training.batch_size == 0 {
            return Err(PipelineError::Config("training.batch_size must be > 0".into()));
        }
        if self.model.image_size < MIN_IMAGE_SIZE {
            return Err(PipelineError::Config(format!(
                "model.image_size must be at least {}, got {}",
                MIN_IMAGE_SIZE,
                self.model.image_size
            )));
        }
        if self.model.architecture == ModelArchitecture::Transfer && self.model.pretrained_path.is_none() {
            return Err(PipelineError::Config(
                "model.pretrained_path is required when model.architecture is \"transfer\"".into(),
            ));
        }
        if !(0.0..1.0).contains(&self.model.dropout) {
            return Err(PipelineError::Config(format!(
                "model.dropout must be in [0, 1), got {}",
                self.model.dropout
            )));
        }
        Ok(())
    }

    /// 設定情報をログに出す
    pub fn display(&self) {
        info!("=== パイプライン設定 ===");
        info!("計算デバイス: {}", self.device_type);
        info!("未分類画像: {}", self.paths.unsorted_dir.display());
        info!("正解表: {}", self.paths.labels_csv.display());
        info!("学習/検証: {} / {}", self.paths.training_root.display(), self.paths.validation_root.display());
        info!("分割比率: {} (seed: {:?})", self.split.ratio, self.split.seed);
        info!("モデル: {:?}, 入力サイズ: {}", self.model.architecture, self.model.image_size);
        info!(
            "エポック数: {}, バッチサイズ: {}, 学習率: {}",
            self.training.num_epochs, self.training.batch_size, self.training.learning_rate
        );
        info!("エクスポート: {} ({})", self.export.output_path.display(), self.export.mode);
    }
}
