//! 正解表に従って未分類の画像をクラスフォルダへ振り分ける

use std::fs;
use std::path::Path;

use tracing::{debug, info};

use crate::csv_loader::LabelIndex;
use crate::dataset::layout::{copy_file, list_files};
use crate::error::{PipelineError, Result};
use crate::types::{Diagnosis, SortReport};

/// ファイル名からサンプルIDを取り出す（最初の`.`以降を落とす）
pub fn sample_id_of(path: &Path) -> Option<&str> {
    let name = path.file_name()?.to_str()?;
    name.split('.').next()
}

/// 未分類プールの各ファイルを benign / malignant フォルダへコピーする
///
/// - 元ファイルは変更しない（コピーのみ）
/// - ラベルが無い、または未知のラベルのファイルは黙って飛ばす
/// - コピー先の既存ファイルは確認せず上書きする。再実行前にコピー先を空にすること
/// - コピーに失敗した時点で中断する
pub fn sort_dataset(
    unsorted_dir: &Path,
    label_index: &LabelIndex,
    benign_dir: &Path,
    malignant_dir: &Path,
) -> Result<SortReport> {
    let files = list_files(unsorted_dir)?;

    for dir in [benign_dir, malignant_dir] {
        fs::create_dir_all(dir).map_err(|e| PipelineError::io(dir, e))?;
    }

    let mut report = SortReport::default();

    for source in files {
        let diagnosis = sample_id_of(&source).and_then(|id| label_index.diagnosis(id));

        let (target_dir, counter) = match diagnosis {
            Some(Diagnosis::Benign) => (benign_dir, &mut report.benign),
            Some(Diagnosis::Malignant) => (malignant_dir, &mut report.malignant),
            None => {
                debug!("ラベル無しのため振り分けません: {}", source.display());
                report.skipped.push(source);
                continue;
            }
        };

        // list_filesが返すのはファイルなので名前は必ずある
        let Some(file_name) = source.file_name() else {
            continue;
        };
        copy_file(&source, &target_dir.join(file_name))?;
        *counter += 1;
    }

    info!(
        "振り分け完了: benign {} 件, malignant {} 件, スキップ {} 件",
        report.benign,
        report.malignant,
        report.skipped.len()
    );

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::LabelRecord;

    fn index(rows: &[(&str, &str)]) -> LabelIndex {
        LabelIndex::from_records(rows.iter().map(|(id, label)| LabelRecord {
            sample_id: id.to_string(),
            label: label.to_string(),
        }))
    }

    #[test]
    fn test_sample_id_strips_extension() {
        assert_eq!(sample_id_of(Path::new("images/ISIC_0001.dcm")), Some("ISIC_0001"));
        assert_eq!(sample_id_of(Path::new("ISIC_0002.tar.gz")), Some("ISIC_0002"));
        assert_eq!(sample_id_of(Path::new("ISIC_0003")), Some("ISIC_0003"));
    }

    #[test]
    fn test_routes_by_label() {
        let root = tempfile::tempdir().unwrap();
        let unsorted = root.path().join("images");
        let benign = unsorted.join("benign");
        let malignant = unsorted.join("malignant");
        fs::create_dir_all(&benign).unwrap();
        fs::create_dir_all(&malignant).unwrap();

        fs::write(unsorted.join("ISIC_0001.dcm"), b"benign bytes").unwrap();
        fs::write(unsorted.join("ISIC_0002.dcm"), b"malignant bytes").unwrap();
        fs::write(unsorted.join("ISIC_0003.dcm"), b"unknown label").unwrap();
        fs::write(unsorted.join("ISIC_0004.dcm"), b"not in table").unwrap();

        let labels = index(&[
            ("ISIC_0001", "benign"),
            ("ISIC_0002", "malignant"),
            ("ISIC_0003", "indeterminate"),
        ]);

        let report = sort_dataset(&unsorted, &labels, &benign, &malignant).unwrap();
        assert_eq!(report.benign, 1);
        assert_eq!(report.malignant, 1);
        assert_eq!(report.skipped.len(), 2);

        assert_eq!(fs::read(benign.join("ISIC_0001.dcm")).unwrap(), b"benign bytes");
        assert!(!malignant.join("ISIC_0001.dcm").exists());
        assert_eq!(fs::read(malignant.join("ISIC_0002.dcm")).unwrap(), b"malignant bytes");
        for skipped in ["ISIC_0003.dcm", "ISIC_0004.dcm"] {
            assert!(!benign.join(skipped).exists());
            assert!(!malignant.join(skipped).exists());
        }

        // 元ファイルは残る
        assert!(unsorted.join("ISIC_0001.dcm").exists());
        assert!(report.skipped.contains(&unsorted.join("ISIC_0004.dcm")));
    }

    #[test]
    fn test_missing_unsorted_dir() {
        let root = tempfile::tempdir().unwrap();
        let err = sort_dataset(
            &root.path().join("nope"),
            &LabelIndex::default(),
            &root.path().join("b"),
            &root.path().join("m"),
        )
        .unwrap_err();
        assert!(matches!(err, PipelineError::FileNotFound(_)));
    }
}
