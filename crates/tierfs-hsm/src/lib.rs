//! Client for the filesystem's HSM coordinator.
//!
//! Archive backends register with the coordinator through a
//! [`Coordinator`], receive work through an [`Agent`] that buffers
//! bursts of [`ActionItem`]s, and walk each item through its
//! begin/progress/end protocol via [`ActionHandle`]. Users on the
//! other side of the coordinator submit bulk archive, restore,
//! release, remove, and cancel requests with the [`request`]
//! functions.
//!
//! ```no_run
//! use tierfs_core::MountPoint;
//! use tierfs_hsm::{Agent, Coordinator};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let mount = MountPoint::new("/mnt/tierfs")?;
//! let agent = Agent::start(Coordinator::connect(&mount, true)?);
//! while let Some(item) = agent.next_action().await {
//!     let handle = item.begin(0, false)?;
//!     // ... move the data, reporting progress ...
//!     handle.end(0, 0, 0, 0)?;
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod action;
pub mod agent;
pub mod coordinator;
pub mod error;
pub mod mock;
pub mod relay;
pub mod request;
pub mod transport;

pub use action::{ActionHandle, ActionItem};
pub use agent::Agent;
pub use coordinator::Coordinator;
pub use error::{HsmError, HsmResult};
pub use relay::ActionRelay;
pub use request::{
    request_archive, request_cancel, request_release, request_remove, request_restore, submit,
    SubmitCount, MAX_REQUEST_BATCH,
};
pub use transport::{CopyAction, Copytool, KernelCopytool};

pub use tierfs_sys::state::{hsm_state, HsmFileState};
