/// Build system error types
use std::path::PathBuf;
use thiserror::Error;

pub type BuildResult<T> = Result<T, BuildError>;

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("path reservation conflict: {path}")]
    PathConflict { path: String },

    #[error("tried to make {path} a directory but {prefix} is already a file")]
    PrefixIsFile { path: String, prefix: String },

    #[error("path contains forbidden segment '{segment}'")]
    ForbiddenSegment { segment: String },

    #[error("write for {path} needs exactly one of data, a source file, or a symlink target")]
    MissingWriteSource { path: String },

    #[error("symlinks are not supported on this platform: {path}")]
    SymlinkUnsupported { path: String },

    #[error("cannot copy specific paths as a single symlink: {path}")]
    SymlinkSpecificFiles { path: String },

    #[error("previous build was for {previous}, this builder is for {current}")]
    PreviousPathMismatch { previous: PathBuf, current: PathBuf },

    #[error("invalid ignore pattern '{pattern}': {reason}")]
    InvalidIgnorePattern { pattern: String, reason: String },

    #[error("build failed: {0}")]
    BuildFailed(String),

    #[error("failed to serialize {path}: {error}")]
    Serialize {
        path: String,
        error: serde_json::Error,
    },

    #[error("I/O error at {path}: {error}")]
    IoAt {
        path: PathBuf,
        error: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BuildError {
    /// Create an I/O error with path context
    pub fn io(path: impl Into<PathBuf>, error: std::io::Error) -> Self {
        Self::IoAt {
            path: path.into(),
            error,
        }
    }

    /// Create a path reservation conflict error
    pub fn conflict(path: impl Into<String>) -> Self {
        Self::PathConflict { path: path.into() }
    }
}
