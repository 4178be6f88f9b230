use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// 診断ラベル（振り分けに使う2クラス）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Diagnosis {
    Benign,
    Malignant,
}

impl Diagnosis {
    /// 学習時のクラス順序。インデックスがクラスIDになる
    pub const ALL: [Diagnosis; 2] = [Diagnosis::Benign, Diagnosis::Malignant];

    /// 正解表の文字列から変換（完全一致のみ）
    pub fn from_label(label: &str) -> Option<Self> {
        match label {
            "benign" => Some(Diagnosis::Benign),
            "malignant" => Some(Diagnosis::Malignant),
            _ => None,
        }
    }

    /// クラスフォルダ名
    pub fn dir_name(&self) -> &'static str {
        match self {
            Diagnosis::Benign => "benign",
            Diagnosis::Malignant => "malignant",
        }
    }

    pub fn class_id(&self) -> usize {
        match self {
            Diagnosis::Benign => 0,
            Diagnosis::Malignant => 1,
        }
    }

    pub fn from_class_id(id: usize) -> Option<Self> {
        Self::ALL.get(id).copied()
    }
}

impl std::fmt::Display for Diagnosis {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.dir_name())
    }
}

/// 正解表の1行（サンプルID → 診断文字列）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelRecord {
    pub sample_id: String,
    pub label: String,
}

/// 振り分け結果
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SortReport {
    pub benign: usize,
    pub malignant: usize,
    /// ラベルが無い、または未知のラベルだったファイル
    pub skipped: Vec<PathBuf>,
}

/// 学習/検証分割の結果
///
/// ファイル名は OS のバイト列のまま保持する。表示するときだけ `display()` で変換する。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SplitReport {
    pub training: Vec<PathBuf>,
    pub validation: Vec<PathBuf>,
    /// サイズ0で除外したファイル名
    pub skipped_empty: Vec<PathBuf>,
}

impl SplitReport {
    pub fn training_count(&self) -> usize {
        self.training.len()
    }

    pub fn validation_count(&self) -> usize {
        self.validation.len()
    }

    pub fn counts(&self) -> (usize, usize) {
        (self.training_count(), self.validation_count())
    }
}

/// 各ディレクトリのファイル数
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DatasetCounts {
    pub source_benign: usize,
    pub source_malignant: usize,
    pub training_benign: usize,
    pub training_malignant: usize,
    pub validation_benign: usize,
    pub validation_malignant: usize,
}
