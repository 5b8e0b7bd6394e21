#![warn(missing_docs)]

//! TierFS shared value types.
//!
//! This crate holds the data model shared by every TierFS client
//! subsystem: file identifiers ([`Fid`]), byte extents ([`Extent`]),
//! mount roots ([`MountPoint`]) and the HSM action/request enums.
//! It performs no kernel I/O; the `tierfs-sys` crate owns that.

pub mod action;
pub mod error;
pub mod extent;
pub mod fid;
pub mod mount;

pub use action::{ActionKind, RequestKind};
pub use error::{CoreError, CoreResult};
pub use extent::Extent;
pub use fid::Fid;
pub use mount::MountPoint;
