//! パイプライン共通のエラー定義

use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// データセット準備・学習・エクスポートで発生するエラー
///
/// どのバリアントも問題のファイルや行を含むため、利用者が元データを直せる。
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("file or directory not found: {}", .0.display())]
    FileNotFound(PathBuf),
    #[error("malformed data in {}: {reason}", path.display())]
    Format { path: PathBuf, reason: String },
    #[error("I/O failure on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to copy {} to {}: {source}", from.display(), to.display())]
    Copy {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("cannot decode {}: {reason}", path.display())]
    Decode { path: PathBuf, reason: String },
    #[error("csv error in {}: {source}", path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("configuration error: {0}")]
    Config(String),
    #[error("training failed: {0}")]
    Training(String),
    #[error("export failed: {0}")]
    Export(String),
}

pub type Result<T> = std::result::Result<T, PipelineError>;

impl PipelineError {
    /// I/Oエラーをパス付きで包む。NotFoundはFileNotFoundに寄せる
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        let path = path.into();
        if source.kind() == io::ErrorKind::NotFound {
            PipelineError::FileNotFound(path)
        } else {
            PipelineError::Io { path, source }
        }
    }

    pub fn format(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        PipelineError::Format {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn decode(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        PipelineError::Decode {
            path: path.into(),
            reason: reason.into(),
        }
    }
}
