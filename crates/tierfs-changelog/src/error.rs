//! Error types for changelog access.

use thiserror::Error;

/// Result type alias for changelog operations.
pub type ChangelogResult<T> = Result<T, ChangelogError>;

/// Error variants for changelog operations.
#[derive(Debug, Error)]
pub enum ChangelogError {
    /// A record could not be decoded from its wire bytes.
    #[error("bad changelog record: {0}")]
    BadRecord(String),

    /// A record buffer ended before the advertised content.
    #[error("truncated changelog record: {what} needs {need} bytes, have {have}")]
    Truncated {
        /// What was being decoded.
        what: &'static str,
        /// Bytes required.
        need: usize,
        /// Bytes available.
        have: usize,
    },

    /// The handle or follower has been closed.
    #[error("changelog closed")]
    Closed,

    /// Wraps standard I/O errors from the record source.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
