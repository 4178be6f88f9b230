//! クラスフォルダを学習用と検証用にランダム分割する

use std::fs;
use std::path::{Path, PathBuf};

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use tracing::{info, warn};

use crate::dataset::layout::{copy_file, list_files};
use crate::error::{PipelineError, Result};
use crate::types::SplitReport;

/// 分割用の乱数生成器。シード指定なしなら実行ごとに異なる分割になる
pub fn split_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

/// 学習用の件数 floor(n × ratio)
pub fn training_len(candidates: usize, split_ratio: f64) -> usize {
    (candidates as f64 * split_ratio).floor() as usize
}

pub fn validate_ratio(split_ratio: f64) -> Result<()> {
    if split_ratio > 0.0 && split_ratio < 1.0 {
        Ok(())
    } else {
        Err(PipelineError::InvalidArgument(format!(
            "split ratio must be in (0, 1), got {}",
            split_ratio
        )))
    }
}

/// source_dir のファイルを学習用と検証用にコピーする
///
/// サイズ0のファイルはどちらにも入れず `skipped_empty` で報告する。
/// 候補はファイル名順に並べてからシャッフルするので、同じシードなら同じ分割になる。
/// コピー先は事前に空にしておくこと（`DatasetLayout::clear_splits`）。
pub fn split_data<R: Rng + ?Sized>(
    source_dir: &Path,
    training_dir: &Path,
    validation_dir: &Path,
    split_ratio: f64,
    rng: &mut R,
) -> Result<SplitReport> {
    validate_ratio(split_ratio)?;

    let mut report = SplitReport::default();
    let mut candidates = Vec::new();

    for path in list_files(source_dir)? {
        let size = fs::metadata(&path)
            .map_err(|e| PipelineError::io(&path, e))?
            .len();
        let file_name = match path.file_name() {
            Some(name) => PathBuf::from(name),
            None => continue,
        };

        if size == 0 {
            warn!("{} はサイズ0のため除外します", path.display());
            report.skipped_empty.push(file_name);
        } else {
            candidates.push(file_name);
        }
    }

    candidates.shuffle(rng);

    let split_point = training_len(candidates.len(), split_ratio);
    let validation = candidates.split_off(split_point);
    let training = candidates;

    for (names, target_dir) in [(&training, training_dir), (&validation, validation_dir)] {
        fs::create_dir_all(target_dir).map_err(|e| PipelineError::io(target_dir, e))?;
        for name in names {
            copy_file(&source_dir.join(name), &target_dir.join(name))?;
        }
    }

    info!(
        "{}: 学習 {} 件, 検証 {} 件, 除外 {} 件",
        source_dir.display(),
        training.len(),
        validation.len(),
        report.skipped_empty.len()
    );

    report.training = training;
    report.validation = validation;
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    struct Dirs {
        _root: tempfile::TempDir,
        source: PathBuf,
        training: PathBuf,
        validation: PathBuf,
    }

    fn setup(non_empty: usize, empty: usize) -> Dirs {
        let root = tempfile::tempdir().unwrap();
        let source = root.path().join("images/benign");
        let training = root.path().join("training/benign");
        let validation = root.path().join("validation/benign");
        fs::create_dir_all(&source).unwrap();

        for i in 0..non_empty {
            fs::write(source.join(format!("ISIC_{:04}.dcm", i)), format!("pixels {}", i)).unwrap();
        }
        for i in 0..empty {
            fs::write(source.join(format!("EMPTY_{:04}.dcm", i)), b"").unwrap();
        }

        Dirs {
            _root: root,
            source,
            training,
            validation,
        }
    }

    fn names_in(dir: &Path) -> BTreeSet<String> {
        list_files(dir)
            .unwrap()
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect()
    }

    #[test]
    fn test_ten_files_two_empty() {
        let dirs = setup(8, 2);
        let mut rng = split_rng(Some(7));

        let report = split_data(&dirs.source, &dirs.training, &dirs.validation, 0.8, &mut rng).unwrap();

        assert_eq!(report.counts(), (6, 2));
        assert_eq!(report.skipped_empty.len(), 2);
        assert_eq!(names_in(&dirs.training).len(), 6);
        assert_eq!(names_in(&dirs.validation).len(), 2);
    }

    #[test]
    fn test_partition_is_disjoint_and_complete() {
        let dirs = setup(23, 3);
        let mut rng = split_rng(Some(1));
        split_data(&dirs.source, &dirs.training, &dirs.validation, 0.7, &mut rng).unwrap();

        let training = names_in(&dirs.training);
        let validation = names_in(&dirs.validation);
        assert!(training.is_disjoint(&validation));

        let union: BTreeSet<String> = training.union(&validation).cloned().collect();
        let expected: BTreeSet<String> = (0..23).map(|i| format!("ISIC_{:04}.dcm", i)).collect();
        assert_eq!(union, expected);
        assert_eq!(training.len(), training_len(23, 0.7));

        // 元ファイルは残る
        assert_eq!(names_in(&dirs.source).len(), 26);
    }

    #[test]
    fn test_same_seed_same_partition() {
        let first = setup(30, 0);
        let second = setup(30, 0);

        let a = split_data(&first.source, &first.training, &first.validation, 0.5, &mut split_rng(Some(99))).unwrap();
        let b = split_data(&second.source, &second.training, &second.validation, 0.5, &mut split_rng(Some(99))).unwrap();

        assert_eq!(a.training, b.training);
        assert_eq!(names_in(&first.training), names_in(&second.training));
    }

    #[test]
    fn test_copies_are_byte_identical() {
        let dirs = setup(4, 0);
        let report = split_data(&dirs.source, &dirs.training, &dirs.validation, 0.5, &mut split_rng(Some(3))).unwrap();
        for name in &report.training {
            assert_eq!(
                fs::read(dirs.training.join(name)).unwrap(),
                fs::read(dirs.source.join(name)).unwrap()
            );
        }
    }

    #[test]
    fn test_empty_source() {
        let dirs = setup(0, 0);
        let report = split_data(&dirs.source, &dirs.training, &dirs.validation, 0.8, &mut split_rng(None)).unwrap();
        assert_eq!(report.counts(), (0, 0));
    }

    #[test]
    fn test_extreme_ratio_may_leave_split_empty() {
        let dirs = setup(3, 0);
        let report = split_data(&dirs.source, &dirs.training, &dirs.validation, 0.1, &mut split_rng(Some(5))).unwrap();
        assert_eq!(report.counts(), (0, 3));
    }

    #[cfg(unix)]
    #[test]
    fn test_non_utf8_file_name_is_copied() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let dirs = setup(0, 0);
        let name = OsStr::from_bytes(b"bad\xff.dcm");
        fs::write(dirs.source.join(name), b"pixels").unwrap();
        fs::write(dirs.source.join("ISIC_0001.dcm"), b"pixels").unwrap();

        let report = split_data(&dirs.source, &dirs.training, &dirs.validation, 0.5, &mut split_rng(Some(4))).unwrap();
        assert_eq!(report.counts(), (1, 1));

        let copied: Vec<&PathBuf> = report.training.iter().chain(&report.validation).collect();
        assert!(copied.iter().any(|n| n.as_os_str() == name));
        for dir in [&dirs.training, &dirs.validation] {
            for file in list_files(dir).unwrap() {
                assert_eq!(fs::read(&file).unwrap(), b"pixels");
            }
        }
        assert_eq!(list_files(&dirs.training).unwrap().len() + list_files(&dirs.validation).unwrap().len(), 2);
    }

    #[test]
    fn test_invalid_ratio() {
        let dirs = setup(2, 0);
        for ratio in [0.0, 1.0, -0.5, 1.5, f64::NAN] {
            let err = split_data(&dirs.source, &dirs.training, &dirs.validation, ratio, &mut split_rng(Some(0)))
                .unwrap_err();
            assert!(matches!(err, PipelineError::InvalidArgument(_)));
        }
        assert!(!dirs.training.exists());
    }
}
