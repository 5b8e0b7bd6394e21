//! Error types for the HSM coordinator client.

use thiserror::Error;
use tierfs_core::Fid;
use tierfs_sys::SysError;

/// Result type alias for HSM operations.
pub type HsmResult<T> = Result<T, HsmError>;

/// Error variants for HSM operations.
#[derive(Debug, Error)]
pub enum HsmError {
    /// Coordinator registration or unregistration failed. Fatal to the
    /// coordinator instance.
    #[error("coordinator registration failed for {mount}: {source}")]
    Registration {
        /// The mount the registration was for.
        mount: String,
        /// The underlying kernel error.
        #[source]
        source: SysError,
    },

    /// A non-blocking receive found no pending batch. Expected; retry
    /// after the descriptor signals readiness again.
    #[error("no action batch pending")]
    WouldBlock,

    /// The coordinator or agent has been torn down.
    #[error("coordinator closed")]
    Closed,

    /// The kernel channel produced something unintelligible. The
    /// connection is in an unknown state; fatal to the agent loop.
    #[error("coordinator protocol error: {0}")]
    Protocol(String),

    /// A fid or MDT-index lookup failed.
    #[error("cannot resolve {fid}: {source}")]
    Resolution {
        /// The fid that could not be resolved.
        fid: Fid,
        /// The underlying kernel error.
        #[source]
        source: SysError,
    },

    /// Wraps standard I/O errors.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<SysError> for HsmError {
    fn from(e: SysError) -> Self {
        match e {
            SysError::Io(io) if io.kind() == std::io::ErrorKind::WouldBlock => HsmError::WouldBlock,
            SysError::Io(io) if io.kind() == std::io::ErrorKind::NotConnected => HsmError::Closed,
            SysError::Io(io) => HsmError::Io(io),
            SysError::BadMessage(msg) => HsmError::Protocol(msg),
            other => HsmError::Protocol(other.to_string()),
        }
    }
}

impl HsmError {
    /// True if the error is the retryable no-data case.
    pub fn is_would_block(&self) -> bool {
        matches!(self, HsmError::WouldBlock)
    }
}
