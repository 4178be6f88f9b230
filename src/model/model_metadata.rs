//! モデルメタデータの定義
//!
//! エクスポートしたtar.gzに metadata.json として同梱し、推論時に
//! 入力サイズやクラス順序を復元するために使います。

use serde::{Deserialize, Serialize};

use crate::error::{PipelineError, Result};
use crate::model::config::{ModelArchitecture, OptimizationMode};
use crate::types::Diagnosis;

/// 重みの保存精度
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WeightPrecision {
    Full,
    Half,
}

/// モデルメタデータ
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelMetadata {
    /// クラスIDの順に並んだラベル
    /// 例: ["benign", "malignant"]
    pub class_labels: Vec<String>,

    pub architecture: ModelArchitecture,

    /// モデル入力サイズ（正方形、通常224）
    pub image_size: usize,

    /// 実際に学習したエポック数（早期終了した場合は設定値より少ない）
    pub num_epochs: usize,

    pub optimization: OptimizationMode,

    pub precision: WeightPrecision,

    /// 最終エポックの検証精度
    #[serde(default)]
    pub final_val_accuracy: Option<f64>,

    /// モデルの学習時刻（ISO8601形式）
    pub trained_at: String,
}

impl ModelMetadata {
    /// 新しいメタデータを作成
    pub fn new(
        architecture: ModelArchitecture,
        image_size: usize,
        num_epochs: usize,
        optimization: OptimizationMode,
        final_val_accuracy: Option<f64>,
    ) -> Self {
        let precision = match optimization {
            OptimizationMode::Storage => WeightPrecision::Half,
            OptimizationMode::Latency | OptimizationMode::Default => WeightPrecision::Full,
        };

        Self {
            class_labels: Diagnosis::ALL.iter().map(|d| d.dir_name().to_string()).collect(),
            architecture,
            image_size,
            num_epochs,
            optimization,
            precision,
            final_val_accuracy,
            trained_at: chrono::Local::now().to_rfc3339(),
        }
    }

    pub fn num_classes(&self) -> usize {
        self.class_labels.len()
    }

    /// クラスインデックスからラベルを取得
    pub fn class_index_to_label(&self, index: usize) -> Option<&str> {
        self.class_labels.get(index).map(String::as_str)
    }

    /// メタデータをJSON文字列に変換
    pub fn to_json_string(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| PipelineError::Export(format!("failed to serialize metadata: {}", e)))
    }

    /// JSON文字列からメタデータを生成
    pub fn from_json_string(json: &str) -> Result<Self> {
        serde_json::from_str(json)
            .map_err(|e| PipelineError::Export(format!("failed to deserialize metadata: {}", e)))
    }
}
