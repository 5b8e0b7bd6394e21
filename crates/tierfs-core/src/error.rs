//! Error types for the shared data model.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Error variants for the shared value types.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A FID string could not be parsed.
    #[error("invalid fid string: {0:?}")]
    InvalidFid(String),

    /// An extent value does not fit a signed width.
    #[error("extent value {0} overflows i64")]
    ExtentOverflow(u64),

    /// A mount root path does not name a directory.
    #[error("not a directory: {0}")]
    NotADirectory(PathBuf),

    /// A mount root path could not be resolved.
    #[error("cannot resolve mount root {path}: {source}")]
    BadMountRoot {
        /// The path that failed to resolve.
        path: PathBuf,
        /// The underlying I/O error.
        source: std::io::Error,
    },
}
