//! Metadata changelog access.
//!
//! Each metadata server keeps an ordered log of namespace mutations.
//! This crate decodes the log's wire records ([`record`]) and streams
//! them continuously through a [`Follower`] that transparently
//! re-opens a drained log at the next index.

#![warn(missing_docs)]

pub mod error;
pub mod follower;
pub mod record;

pub use error::{ChangelogError, ChangelogResult};
pub use follower::{Follower, RecordSource, DEFAULT_POLL_INTERVAL};
pub use record::{decode_record, HsmEvent, Record, RecordKind, RecordPayload};
