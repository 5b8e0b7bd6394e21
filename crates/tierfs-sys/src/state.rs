//! Per-file HSM status.

use std::fmt;
use std::fs::OpenOptions;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;
use std::path::Path;

use crate::error::{SysError, SysResult};
use crate::ioctl;
use crate::wire::RawUserState;

/// The file has a copy in an archive backend (possibly stale).
pub const HS_EXISTS: u32 = 0x0000_0001;
/// Primary data changed since the last archive.
pub const HS_DIRTY: u32 = 0x0000_0002;
/// Primary data has been evicted; only the placeholder remains.
pub const HS_RELEASED: u32 = 0x0000_0004;
/// The archive copy is up to date.
pub const HS_ARCHIVED: u32 = 0x0000_0008;
/// The file must never be released.
pub const HS_NORELEASE: u32 = 0x0000_0010;
/// The file must never be archived.
pub const HS_NOARCHIVE: u32 = 0x0000_0020;
/// The archive copy is gone while the file was released.
pub const HS_LOST: u32 = 0x0000_0040;

/// HSM status of one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HsmFileState {
    /// State flag bits (`HS_*`).
    pub states: u32,
    /// Archive backend holding the copy, zero if none.
    pub archive_id: u32,
}

impl HsmFileState {
    /// True if `flag` is set.
    pub fn has(&self, flag: u32) -> bool {
        self.states & flag != 0
    }

    /// True if the file's data has been evicted from primary storage.
    pub fn is_released(&self) -> bool {
        self.has(HS_RELEASED)
    }

    /// True if an up-to-date archive copy exists.
    pub fn is_archived(&self) -> bool {
        self.has(HS_ARCHIVED)
    }
}

impl fmt::Display for HsmFileState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(u32, &str); 7] = [
            (HS_EXISTS, "exists"),
            (HS_DIRTY, "dirty"),
            (HS_RELEASED, "released"),
            (HS_ARCHIVED, "archived"),
            (HS_NORELEASE, "no_release"),
            (HS_NOARCHIVE, "no_archive"),
            (HS_LOST, "lost"),
        ];
        let mut first = true;
        for (flag, name) in NAMES {
            if self.has(flag) {
                if !first {
                    f.write_str(" ")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        if first {
            f.write_str("none")?;
        }
        if self.archive_id != 0 {
            write!(f, " archive:{}", self.archive_id)?;
        }
        Ok(())
    }
}

/// Queries the HSM status of `path`.
///
/// The file is opened non-blocking so that statting a released file
/// does not trigger an implicit restore.
pub fn hsm_state(path: &Path) -> SysResult<HsmFileState> {
    let file = OpenOptions::new()
        .read(true)
        .custom_flags(libc::O_NONBLOCK)
        .open(path)
        .map_err(SysError::Io)?;

    let mut raw = RawUserState::default();
    unsafe {
        ioctl::ioctl_arg(file.as_raw_fd(), ioctl::hsm_state_get_request(), &mut raw)
            .map_err(SysError::Io)?;
    }
    Ok(HsmFileState {
        states: raw.hus_states,
        archive_id: raw.hus_archive_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_lists_set_flags() {
        let st = HsmFileState {
            states: HS_EXISTS | HS_ARCHIVED | HS_RELEASED,
            archive_id: 3,
        };
        assert_eq!(st.to_string(), "exists released archived archive:3");
        assert!(st.is_released());
        assert!(st.is_archived());
    }

    #[test]
    fn display_handles_empty_state() {
        let st = HsmFileState {
            states: 0,
            archive_id: 0,
        };
        assert_eq!(st.to_string(), "none");
    }
}
