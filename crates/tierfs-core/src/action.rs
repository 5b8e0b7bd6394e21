//! HSM action and request kinds.
//!
//! Two distinct enums exist because the kernel uses two distinct
//! numbering schemes: [`ActionKind`] is what the coordinator hands to
//! an agent, [`RequestKind`] is what a user submits to the coordinator.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Kind of action assigned to an agent by the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum ActionKind {
    /// No action.
    None = 10,
    /// Copy file data into the archive backend.
    Archive = 20,
    /// Copy file data back from the archive backend.
    Restore = 21,
    /// Remove the copy held by the archive backend.
    Remove = 22,
    /// Cancel an in-flight action.
    Cancel = 23,
}

impl ActionKind {
    /// Decodes the kernel wire value, falling back to `None` for
    /// anything unrecognized.
    pub fn from_wire(value: u32) -> Self {
        match value {
            20 => ActionKind::Archive,
            21 => ActionKind::Restore,
            22 => ActionKind::Remove,
            23 => ActionKind::Cancel,
            _ => ActionKind::None,
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ActionKind::None => "NOOP",
            ActionKind::Archive => "ARCHIVE",
            ActionKind::Restore => "RESTORE",
            ActionKind::Remove => "REMOVE",
            ActionKind::Cancel => "CANCEL",
        };
        f.write_str(name)
    }
}

/// Kind of bulk request a user submits to the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum RequestKind {
    /// Archive the listed files.
    Archive = 10,
    /// Restore the listed files.
    Restore = 11,
    /// Release the primary-storage copy of the listed files.
    Release = 12,
    /// Remove the archived copy of the listed files.
    Remove = 13,
    /// Cancel outstanding requests for the listed files.
    Cancel = 14,
}

impl fmt::Display for RequestKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RequestKind::Archive => "ARCHIVE",
            RequestKind::Restore => "RESTORE",
            RequestKind::Release => "RELEASE",
            RequestKind::Remove => "REMOVE",
            RequestKind::Cancel => "CANCEL",
        };
        f.write_str(name)
    }
}
