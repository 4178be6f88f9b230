//! データセットのディレクトリ構成
//!
//! ```text
//! images/{benign,malignant}/       振り分け済みプール
//! training/{benign,malignant}/     学習用
//! validation/{benign,malignant}/   検証用
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{PipelineError, Result};
use crate::model::config::PathSettings;
use crate::types::{DatasetCounts, Diagnosis};

/// 各ルートディレクトリ
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetLayout {
    pub images_root: PathBuf,
    pub training_root: PathBuf,
    pub validation_root: PathBuf,
}

impl DatasetLayout {
    pub fn new(
        images_root: impl Into<PathBuf>,
        training_root: impl Into<PathBuf>,
        validation_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            images_root: images_root.into(),
            training_root: training_root.into(),
            validation_root: validation_root.into(),
        }
    }

    pub fn from_settings(paths: &PathSettings) -> Self {
        Self::new(&paths.images_root, &paths.training_root, &paths.validation_root)
    }

    /// 振り分け済みプール（images/<class>）
    pub fn source_dir(&self, diagnosis: Diagnosis) -> PathBuf {
        self.images_root.join(diagnosis.dir_name())
    }

    pub fn training_dir(&self, diagnosis: Diagnosis) -> PathBuf {
        self.training_root.join(diagnosis.dir_name())
    }

    pub fn validation_dir(&self, diagnosis: Diagnosis) -> PathBuf {
        self.validation_root.join(diagnosis.dir_name())
    }

    /// 全クラスのディレクトリを作成
    pub fn ensure_dirs(&self) -> Result<()> {
        for diagnosis in Diagnosis::ALL {
            for dir in [
                self.source_dir(diagnosis),
                self.training_dir(diagnosis),
                self.validation_dir(diagnosis),
            ] {
                fs::create_dir_all(&dir).map_err(|e| PipelineError::io(&dir, e))?;
            }
        }
        Ok(())
    }

    /// 学習/検証ディレクトリの中身を空にする
    pub fn clear_splits(&self) -> Result<usize> {
        let mut removed = 0;
        for diagnosis in Diagnosis::ALL {
            removed += empty_dir(&self.training_dir(diagnosis))?;
            removed += empty_dir(&self.validation_dir(diagnosis))?;
        }
        Ok(removed)
    }

    pub fn counts(&self) -> Result<DatasetCounts> {
        Ok(DatasetCounts {
            source_benign: count_files(&self.source_dir(Diagnosis::Benign))?,
            source_malignant: count_files(&self.source_dir(Diagnosis::Malignant))?,
            training_benign: count_files(&self.training_dir(Diagnosis::Benign))?,
            training_malignant: count_files(&self.training_dir(Diagnosis::Malignant))?,
            validation_benign: count_files(&self.validation_dir(Diagnosis::Benign))?,
            validation_malignant: count_files(&self.validation_dir(Diagnosis::Malignant))?,
        })
    }
}

/// ディレクトリ直下の通常ファイルをファイル名順で返す
///
/// シンボリックリンクはリンク先で判定する。リンク切れは無視する。
pub fn list_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = fs::read_dir(dir).map_err(|e| PipelineError::io(dir, e))?;

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| PipelineError::io(dir, e))?;
        let path = entry.path();
        let metadata = match fs::metadata(&path) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("リンク先が存在しません: {}", path.display());
                continue;
            }
            Err(e) => return Err(PipelineError::io(&path, e)),
        };
        if metadata.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// バイト単位でそのままコピーする。コピー先は上書き
pub fn copy_file(from: &Path, to: &Path) -> Result<u64> {
    fs::copy(from, to).map_err(|e| PipelineError::Copy {
        from: from.to_path_buf(),
        to: to.to_path_buf(),
        source: e,
    })
}

pub fn count_files(dir: &Path) -> Result<usize> {
    if !dir.exists() {
        return Ok(0);
    }
    Ok(list_files(dir)?.len())
}

/// ディレクトリ直下のファイルを全て削除する。存在しなければ何もしない
pub fn empty_dir(dir: &Path) -> Result<usize> {
    if !dir.exists() {
        return Ok(0);
    }

    let files = list_files(dir)?;
    for file in &files {
        fs::remove_file(file).map_err(|e| PipelineError::io(file, e))?;
    }

    if !files.is_empty() {
        debug!("{} から {} 件削除しました", dir.display(), files.len());
    }
    Ok(files.len())
}
