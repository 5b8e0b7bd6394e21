//! Error types for the kernel interface layer.

use thiserror::Error;

/// Result type alias for kernel interface operations.
pub type SysResult<T> = Result<T, SysError>;

/// Error variants for kernel interface operations.
#[derive(Debug, Error)]
pub enum SysError {
    /// Wraps standard I/O errors (ioctl, read, xattr).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A kernel-user channel message failed validation.
    #[error("bad channel message: {0}")]
    BadMessage(String),

    /// A wire structure was shorter than its declared length.
    #[error("truncated {what}: need {need} bytes, have {have}")]
    Truncated {
        /// What was being decoded.
        what: &'static str,
        /// Bytes required.
        need: usize,
        /// Bytes available.
        have: usize,
    },

    /// A layout blob carried an unknown magic value.
    #[error("unknown layout magic {0:#x}")]
    BadLayoutMagic(u32),

    /// An extended attribute value did not have the expected shape.
    #[error("bad xattr value for {name}: {reason}")]
    BadXattr {
        /// Attribute name.
        name: &'static str,
        /// What was wrong with it.
        reason: &'static str,
    },
}

impl SysError {
    /// True if the underlying error is `EAGAIN`/`EWOULDBLOCK`.
    pub fn is_would_block(&self) -> bool {
        matches!(self, SysError::Io(e) if e.kind() == std::io::ErrorKind::WouldBlock)
    }
}
