#![warn(missing_docs)]

//! TierFS kernel interface.
//!
//! Everything in this crate talks to the filesystem through its
//! user-visible kernel surfaces: ioctls on the mount descriptor, the
//! kernel-user message channel the coordinator pushes action lists
//! through, and named extended attributes. The structures here mirror
//! the kernel ABI and are decoded into the owned types from
//! `tierfs-core` before anything above this crate sees them.

pub mod copytool;
pub mod error;
pub mod fid;
pub mod ioctl;
pub mod kuc;
pub mod layout;
pub mod request;
pub mod state;
pub mod wire;
pub mod xattr;

pub use copytool::{CopyActionState, CopytoolHandle};
pub use error::{SysError, SysResult};
pub use wire::{ActionBatch, ActionRecord};
