//! 正解表（ground truth CSV）の読み込み

use crate::error::{PipelineError, Result};
use crate::types::{Diagnosis, LabelRecord};
use csv::ReaderBuilder;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, warn};

/// サンプルID列
pub const SAMPLE_ID_COLUMN: usize = 0;
/// 診断（benign/malignant）列
pub const LABEL_COLUMN: usize = 7;

/// サンプルID → 診断文字列の索引。構築後は変更しない
#[derive(Debug, Clone, Default)]
pub struct LabelIndex {
    labels: HashMap<String, String>,
}

impl LabelIndex {
    /// 行の並びから索引を作る。IDが重複した場合は後の行が勝つ
    pub fn from_records<I>(records: I) -> Self
    where
        I: IntoIterator<Item = LabelRecord>,
    {
        let mut labels = HashMap::new();
        for record in records {
            labels.insert(record.sample_id, record.label);
        }
        Self { labels }
    }

    /// 正解表に書かれた診断文字列をそのまま返す
    pub fn get(&self, sample_id: &str) -> Option<&str> {
        self.labels.get(sample_id).map(String::as_str)
    }

    /// 振り分け可能な診断を返す。未知ラベルはNone
    pub fn diagnosis(&self, sample_id: &str) -> Option<Diagnosis> {
        self.get(sample_id).and_then(Diagnosis::from_label)
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.labels.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// 指定した診断のサンプル数
    pub fn count(&self, diagnosis: Diagnosis) -> usize {
        self.labels
            .values()
            .filter(|label| Diagnosis::from_label(label) == Some(diagnosis))
            .count()
    }
}

/// 正解表から索引を構築する
///
/// 先頭行はヘッダーとして読み飛ばす。列数が足りない行は飛ばさずFormatエラー。
pub fn build_label_index(table_path: &Path) -> Result<LabelIndex> {
    if !table_path.is_file() {
        return Err(PipelineError::FileNotFound(table_path.to_path_buf()));
    }

    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(table_path)
        .map_err(|e| PipelineError::Csv {
            path: table_path.to_path_buf(),
            source: e,
        })?;

    let mut labels: HashMap<String, String> = HashMap::new();

    for result in reader.records() {
        let record = result.map_err(|e| PipelineError::Csv {
            path: table_path.to_path_buf(),
            source: e,
        })?;
        let line = record.position().map(|p| p.line()).unwrap_or_default();

        if record.len() <= LABEL_COLUMN {
            return Err(PipelineError::format(
                table_path,
                format!(
                    "line {} has {} columns, expected at least {}",
                    line,
                    record.len(),
                    LABEL_COLUMN + 1
                ),
            ));
        }

        let sample_id = record[SAMPLE_ID_COLUMN].to_string();
        let label = record[LABEL_COLUMN].to_string();

        if let Some(previous) = labels.insert(sample_id.clone(), label.clone()) {
            warn!(
                "サンプルIDが重複しています（line {}）: {} ({} -> {})",
                line, sample_id, previous, label
            );
        }
    }

    debug!("正解表を読み込みました: {} ({}件)", table_path.display(), labels.len());

    Ok(LabelIndex { labels })
}
