//! 学習履歴の出力
//!
//! エポックごとの精度・損失をCSVに書き出し、推移をログに出します。

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{PipelineError, Result};

/// 1エポック分の指標
///
/// precision / recall / auc は malignant を陽性クラスとして計算する。
/// 定義できない場合（陽性予測なし、片方のクラスのみ等）は 0.0。
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct EpochMetrics {
    pub epoch: usize,
    pub accuracy: f64,
    pub val_accuracy: f64,
    pub loss: f64,
    pub val_loss: f64,
    pub precision: f64,
    pub val_precision: f64,
    pub recall: f64,
    pub val_recall: f64,
    pub auc: f64,
    pub val_auc: f64,
}

/// 1エポック分の予測を集計する
#[derive(Debug, Default)]
pub struct EpochTally {
    loss_sum: f64,
    count: usize,
    correct: usize,
    true_positive: usize,
    false_positive: usize,
    false_negative: usize,
    /// (陽性スコア, 正解が陽性か)
    scores: Vec<(f64, bool)>,
}

impl EpochTally {
    /// バッチ平均の損失を件数で重み付けして加算する
    pub fn record_loss(&mut self, mean_loss: f64, batch_size: usize) {
        self.loss_sum += mean_loss * batch_size as f64;
    }

    /// 1サンプル分の予測を記録する
    pub fn record_sample(&mut self, positive_score: f64, predicted_positive: bool, actual_positive: bool) {
        self.count += 1;
        if predicted_positive == actual_positive {
            self.correct += 1;
        }
        match (predicted_positive, actual_positive) {
            (true, true) => self.true_positive += 1,
            (true, false) => self.false_positive += 1,
            (false, true) => self.false_negative += 1,
            (false, false) => {}
        }
        self.scores.push((positive_score, actual_positive));
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn accuracy(&self) -> f64 {
        ratio(self.correct, self.count)
    }

    pub fn loss(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.loss_sum / self.count as f64
        }
    }

    pub fn precision(&self) -> f64 {
        ratio(self.true_positive, self.true_positive + self.false_positive)
    }

    pub fn recall(&self) -> f64 {
        ratio(self.true_positive, self.true_positive + self.false_negative)
    }

    pub fn auc(&self) -> f64 {
        roc_auc(&self.scores).unwrap_or(0.0)
    }
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

/// ROC曲線下面積（順位和による計算、同順位は平均順位）
///
/// 陽性・陰性のどちらかが無い場合は `None`。
pub fn roc_auc(scores: &[(f64, bool)]) -> Option<f64> {
    let positives = scores.iter().filter(|(_, p)| *p).count();
    let negatives = scores.len() - positives;
    if positives == 0 || negatives == 0 {
        return None;
    }

    let mut sorted: Vec<(f64, bool)> = scores.to_vec();
    sorted.sort_by(|a, b| a.0.total_cmp(&b.0));

    let mut positive_rank_sum = 0.0;
    let mut i = 0;
    while i < sorted.len() {
        let mut j = i;
        while j + 1 < sorted.len() && sorted[j + 1].0 == sorted[i].0 {
            j += 1;
        }
        // 順位は1始まり
        let average_rank = (i + j) as f64 / 2.0 + 1.0;
        positive_rank_sum += sorted[i..=j].iter().filter(|(_, p)| *p).count() as f64 * average_rank;
        i = j + 1;
    }

    let p = positives as f64;
    let n = negatives as f64;
    Some((positive_rank_sum - p * (p + 1.0) / 2.0) / (p * n))
}

impl EpochMetrics {
    pub fn from_tallies(epoch: usize, train: &EpochTally, valid: &EpochTally) -> Self {
        Self {
            epoch,
            accuracy: train.accuracy(),
            val_accuracy: valid.accuracy(),
            loss: train.loss(),
            val_loss: valid.loss(),
            precision: train.precision(),
            val_precision: valid.precision(),
            recall: train.recall(),
            val_recall: valid.recall(),
            auc: train.auc(),
            val_auc: valid.auc(),
        }
    }
}

/// エポック順の学習履歴
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricHistory {
    epochs: Vec<EpochMetrics>,
}

impl MetricHistory {
    pub fn push(&mut self, metrics: EpochMetrics) {
        self.epochs.push(metrics);
    }

    pub fn epochs(&self) -> &[EpochMetrics] {
        &self.epochs
    }

    pub fn len(&self) -> usize {
        self.epochs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.epochs.is_empty()
    }

    pub fn last(&self) -> Option<&EpochMetrics> {
        self.epochs.last()
    }

    /// 検証精度が最も高かったエポック
    pub fn best_val_accuracy(&self) -> Option<&EpochMetrics> {
        self.epochs
            .iter()
            .max_by(|a, b| a.val_accuracy.total_cmp(&b.val_accuracy))
    }
}

/// 履歴をCSVに書き出す
///
/// 列: epoch,accuracy,val_accuracy,loss,val_loss,precision,val_precision,recall,val_recall,auc,val_auc
pub fn write_history_csv(history: &MetricHistory, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(|e| PipelineError::io(parent, e))?;
        }
    }

    let csv_err = |source| PipelineError::Csv {
        path: path.to_path_buf(),
        source,
    };

    let mut writer = csv::Writer::from_path(path).map_err(csv_err)?;
    for metrics in history.epochs() {
        writer.serialize(metrics).map_err(csv_err)?;
    }
    writer.flush().map_err(|e| PipelineError::io(path, e))?;

    info!("学習履歴を保存しました: {}", path.display());
    Ok(())
}

/// 書き出した履歴CSVを読み戻す
pub fn read_history_csv(path: &Path) -> Result<MetricHistory> {
    if !path.exists() {
        return Err(PipelineError::FileNotFound(path.to_path_buf()));
    }
    let csv_err = |source| PipelineError::Csv {
        path: path.to_path_buf(),
        source,
    };

    let mut reader = csv::Reader::from_path(path).map_err(csv_err)?;
    let mut history = MetricHistory::default();
    for row in reader.deserialize() {
        history.push(row.map_err(csv_err)?);
    }
    Ok(history)
}

/// 精度と損失の推移をログに出す
pub fn log_history(history: &MetricHistory) {
    if history.is_empty() {
        info!("学習履歴はありません");
        return;
    }

    info!("=== 学習履歴 ===");
    info!("epoch | accuracy | val_accuracy |   loss   | val_loss | val_precision | val_recall | val_auc");
    for m in history.epochs() {
        info!(
            "{:>5} | {:>8.4} | {:>12.4} | {:>8.4} | {:>8.4} | {:>13.4} | {:>10.4} | {:>7.4}",
            m.epoch, m.accuracy, m.val_accuracy, m.loss, m.val_loss, m.val_precision, m.val_recall, m.val_auc
        );
    }
    if let Some(best) = history.best_val_accuracy() {
        info!("最高検証精度: {:.4} (epoch {})", best.val_accuracy, best.epoch);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics(epoch: usize, accuracy: f64, val_accuracy: f64, loss: f64, val_loss: f64) -> EpochMetrics {
        EpochMetrics {
            epoch,
            accuracy,
            val_accuracy,
            loss,
            val_loss,
            precision: 0.5,
            val_precision: 0.25,
            recall: 1.0,
            val_recall: 0.75,
            auc: 0.875,
            val_auc: 0.625,
        }
    }

    fn history() -> MetricHistory {
        let mut history = MetricHistory::default();
        history.push(metrics(1, 0.6, 0.55, 0.7, 0.69));
        history.push(metrics(2, 0.8, 0.75, 0.5, 0.52));
        history.push(metrics(3, 0.9, 0.7, 0.3, 0.6));
        history
    }

    #[test]
    fn test_best_val_accuracy() {
        assert_eq!(history().best_val_accuracy().unwrap().epoch, 2);
        assert!(MetricHistory::default().best_val_accuracy().is_none());
    }

    #[test]
    fn test_history_csv_header_and_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out/history.csv");
        write_history_csv(&history(), &path).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let mut lines = content.lines();
        assert_eq!(
            lines.next(),
            Some("epoch,accuracy,val_accuracy,loss,val_loss,precision,val_precision,recall,val_recall,auc,val_auc")
        );
        assert_eq!(lines.next(), Some("1,0.6,0.55,0.7,0.69,0.5,0.25,1.0,0.75,0.875,0.625"));
        assert_eq!(content.lines().count(), 4);

        assert_eq!(read_history_csv(&path).unwrap(), history());
    }

    #[test]
    fn test_read_missing_history() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            read_history_csv(&dir.path().join("none.csv")),
            Err(PipelineError::FileNotFound(_))
        ));
    }

    #[test]
    fn test_tally_precision_recall() {
        let mut tally = EpochTally::default();
        // TP, TP, FP, FN, TN
        tally.record_sample(0.9, true, true);
        tally.record_sample(0.8, true, true);
        tally.record_sample(0.7, true, false);
        tally.record_sample(0.2, false, true);
        tally.record_sample(0.1, false, false);
        tally.record_loss(0.5, 5);

        assert_eq!(tally.count(), 5);
        assert!((tally.accuracy() - 0.6).abs() < 1e-12);
        assert!((tally.precision() - 2.0 / 3.0).abs() < 1e-12);
        assert!((tally.recall() - 2.0 / 3.0).abs() < 1e-12);
        assert!((tally.loss() - 0.5).abs() < 1e-12);
        // 陽性(0.9, 0.8, 0.2) と陰性(0.7, 0.1) の9組中7組が正しく並ぶ
        assert!((tally.auc() - 5.0 / 6.0).abs() < 1e-12);
    }

    #[test]
    fn test_empty_tally_is_zero() {
        let tally = EpochTally::default();
        assert_eq!(tally.accuracy(), 0.0);
        assert_eq!(tally.precision(), 0.0);
        assert_eq!(tally.recall(), 0.0);
        assert_eq!(tally.auc(), 0.0);
    }

    #[test]
    fn test_roc_auc() {
        assert_eq!(roc_auc(&[(0.1, false), (0.9, true)]), Some(1.0));
        assert_eq!(roc_auc(&[(0.9, false), (0.1, true)]), Some(0.0));
        // 同点は0.5として数える
        assert_eq!(roc_auc(&[(0.5, false), (0.5, true)]), Some(0.5));
        assert_eq!(roc_auc(&[(0.5, true), (0.7, true)]), None);
    }
}
