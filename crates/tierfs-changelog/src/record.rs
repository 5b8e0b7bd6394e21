//! Changelog record wire decoding.
//!
//! A record arrives as one variable-length buffer: a 64-byte fixed
//! header, an optional rename extension, an optional job-id extension,
//! then the name region. Which extensions are present is encoded in
//! the header's flag word. The rename payload shares storage with the
//! plain-target payload on the wire; here it is a tagged variant so a
//! caller can never read source fields off a non-rename record.

use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tierfs_core::Fid;

use crate::error::{ChangelogError, ChangelogResult};

/// Size of the fixed record header.
pub const RECORD_HEADER_LEN: usize = 64;
/// Size of the rename extension (source fid + source parent fid).
pub const RENAME_EXT_LEN: usize = 32;
/// Size of the job-id extension (NUL-padded identifier).
pub const JOBID_EXT_LEN: usize = 32;

/// Record carries a rename extension.
pub const CLF_RENAME: u16 = 0x2000;
/// Record carries a job-id extension.
pub const CLF_JOBID: u16 = 0x4000;
/// Bits of the flag word that hold per-kind flags.
pub const CLF_FLAGMASK: u16 = 0x0fff;

/// Unlink removed the last hardlink.
pub const CLF_UNLINK_LAST: u16 = 0x0001;
/// Unlinked file may still have an archived copy.
pub const CLF_UNLINK_HSM_EXISTS: u16 = 0x0002;
/// Rename moved the last hardlink.
pub const CLF_RENAME_LAST: u16 = 0x0001;
/// Renamed-over file may still have an archived copy.
pub const CLF_RENAME_LAST_EXISTS: u16 = 0x0002;

const CLF_HSM_EVENT_SHIFT: u16 = 7;
const CLF_HSM_EVENT_MASK: u16 = 0x7;
const CLF_HSM_FLAG_SHIFT: u16 = 10;
const CLF_HSM_FLAG_MASK: u16 = 0x3;
const CLF_HSM_DIRTY: u16 = 0x1;

/// What kind of metadata mutation a record describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordKind {
    /// Bookkeeping marker.
    Mark,
    /// Regular file created.
    Create,
    /// Directory created.
    Mkdir,
    /// Hardlink added.
    Hardlink,
    /// Symlink created.
    Softlink,
    /// Device node created.
    Mknod,
    /// File unlinked.
    Unlink,
    /// Directory removed.
    Rmdir,
    /// File or directory renamed.
    Rename,
    /// Rename target side on a remote MDT.
    RenameExt,
    /// File opened.
    Open,
    /// File closed.
    Close,
    /// Data layout changed.
    Layout,
    /// File truncated.
    Truncate,
    /// Attributes changed.
    Setattr,
    /// Extended attribute changed.
    Xattr,
    /// HSM state event.
    Hsm,
    /// Modification time changed.
    Mtime,
    /// Change time changed.
    Ctime,
    /// Access time changed.
    Atime,
    /// Unrecognized kind, raw wire value preserved.
    Other(u32),
}

impl RecordKind {
    /// Decodes the kernel wire value.
    pub fn from_wire(value: u32) -> Self {
        match value {
            0 => RecordKind::Mark,
            1 => RecordKind::Create,
            2 => RecordKind::Mkdir,
            3 => RecordKind::Hardlink,
            4 => RecordKind::Softlink,
            5 => RecordKind::Mknod,
            6 => RecordKind::Unlink,
            7 => RecordKind::Rmdir,
            8 => RecordKind::Rename,
            9 => RecordKind::RenameExt,
            10 => RecordKind::Open,
            11 => RecordKind::Close,
            12 => RecordKind::Layout,
            13 => RecordKind::Truncate,
            14 => RecordKind::Setattr,
            15 => RecordKind::Xattr,
            16 => RecordKind::Hsm,
            17 => RecordKind::Mtime,
            18 => RecordKind::Ctime,
            19 => RecordKind::Atime,
            other => RecordKind::Other(other),
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RecordKind::Mark => "MARK",
            RecordKind::Create => "CREAT",
            RecordKind::Mkdir => "MKDIR",
            RecordKind::Hardlink => "HLINK",
            RecordKind::Softlink => "SLINK",
            RecordKind::Mknod => "MKNOD",
            RecordKind::Unlink => "UNLNK",
            RecordKind::Rmdir => "RMDIR",
            RecordKind::Rename => "RENME",
            RecordKind::RenameExt => "RNMTO",
            RecordKind::Open => "OPEN",
            RecordKind::Close => "CLOSE",
            RecordKind::Layout => "LYOUT",
            RecordKind::Truncate => "TRUNC",
            RecordKind::Setattr => "SATTR",
            RecordKind::Xattr => "XATTR",
            RecordKind::Hsm => "HSM",
            RecordKind::Mtime => "MTIME",
            RecordKind::Ctime => "CTIME",
            RecordKind::Atime => "ATIME",
            RecordKind::Other(v) => return write!(f, "TYPE{v}"),
        };
        f.write_str(name)
    }
}

/// HSM event reported in an [`RecordKind::Hsm`] record's flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HsmEvent {
    /// File archived.
    Archive,
    /// File restored.
    Restore,
    /// Action cancelled.
    Cancel,
    /// Primary copy released.
    Release,
    /// Archive copy removed.
    Remove,
    /// HSM state flags changed.
    StateChange,
    /// Unrecognized event value.
    Other(u16),
}

impl HsmEvent {
    fn from_wire(value: u16) -> Self {
        match value {
            0 => HsmEvent::Archive,
            1 => HsmEvent::Restore,
            2 => HsmEvent::Cancel,
            3 => HsmEvent::Release,
            4 => HsmEvent::Remove,
            5 => HsmEvent::StateChange,
            other => HsmEvent::Other(other),
        }
    }
}

/// Payload that differs between rename and non-rename records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordPayload {
    /// Plain record: the target fid in the header is the whole story.
    Target,
    /// Rename record: where the entry came from.
    Rename {
        /// Fid of the renamed file.
        source_fid: Fid,
        /// Fid of the directory the file was renamed out of.
        source_parent_fid: Fid,
        /// Name the file had there.
        source_name: String,
    },
}

/// One decoded changelog record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Position in the log; strictly increasing per MDT.
    pub index: u64,
    /// Mutation kind.
    pub kind: RecordKind,
    /// Per-kind flag bits ([`CLF_FLAGMASK`] portion of the flag word).
    pub flags: u16,
    /// Seconds since the epoch when the mutation happened.
    pub time_secs: u64,
    /// Fid the mutation applied to.
    pub target_fid: Fid,
    /// Fid of the parent directory.
    pub parent_fid: Fid,
    /// Entry name under the parent, empty when not applicable.
    pub name: String,
    /// Job identifier of the causing process, if recorded.
    pub job_id: Option<String>,
    /// Rename payload when present.
    pub payload: RecordPayload,
}

impl Record {
    /// The mutation time as a [`SystemTime`].
    pub fn time(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(self.time_secs)
    }

    /// Source fid of a rename, `None` for any other record.
    pub fn source_fid(&self) -> Option<Fid> {
        match &self.payload {
            RecordPayload::Rename { source_fid, .. } => Some(*source_fid),
            RecordPayload::Target => None,
        }
    }

    /// Source parent fid of a rename, `None` for any other record.
    pub fn source_parent_fid(&self) -> Option<Fid> {
        match &self.payload {
            RecordPayload::Rename {
                source_parent_fid, ..
            } => Some(*source_parent_fid),
            RecordPayload::Target => None,
        }
    }

    /// Source name of a rename, `None` for any other record.
    pub fn source_name(&self) -> Option<&str> {
        match &self.payload {
            RecordPayload::Rename { source_name, .. } => Some(source_name),
            RecordPayload::Target => None,
        }
    }

    /// For an unlink: whether the last hardlink went away, and whether
    /// an archived copy may still exist.
    pub fn unlink_disposition(&self) -> Option<(bool, bool)> {
        (self.kind == RecordKind::Unlink).then(|| {
            (
                self.flags & CLF_UNLINK_LAST != 0,
                self.flags & CLF_UNLINK_HSM_EXISTS != 0,
            )
        })
    }

    /// For a rename: whether the last hardlink of the replaced file
    /// went away, and whether an archived copy may still exist.
    pub fn rename_disposition(&self) -> Option<(bool, bool)> {
        (self.kind == RecordKind::Rename).then(|| {
            (
                self.flags & CLF_RENAME_LAST != 0,
                self.flags & CLF_RENAME_LAST_EXISTS != 0,
            )
        })
    }

    /// The HSM event of an [`RecordKind::Hsm`] record.
    pub fn hsm_event(&self) -> Option<HsmEvent> {
        (self.kind == RecordKind::Hsm).then(|| {
            HsmEvent::from_wire((self.flags >> CLF_HSM_EVENT_SHIFT) & CLF_HSM_EVENT_MASK)
        })
    }

    /// True for an HSM record that left the file dirty.
    pub fn hsm_dirty(&self) -> bool {
        self.kind == RecordKind::Hsm
            && (self.flags >> CLF_HSM_FLAG_SHIFT) & CLF_HSM_FLAG_MASK & CLF_HSM_DIRTY != 0
    }
}

impl fmt::Display for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} t={} {:#x} {}/{}",
            self.index, self.kind, self.time_secs, self.flags, self.parent_fid, self.target_fid
        )?;
        if let Some(job) = &self.job_id {
            write!(f, " job={job}")?;
        }
        if let RecordPayload::Rename { source_name, .. } = &self.payload {
            write!(f, " {source_name}->")?;
        } else if !self.name.is_empty() {
            f.write_str(" ")?;
        }
        f.write_str(&self.name)
    }
}

fn read_u16(buf: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([buf[at], buf[at + 1]])
}

fn read_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

fn read_u64(buf: &[u8], at: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[at..at + 8]);
    u64::from_le_bytes(bytes)
}

fn read_fid(buf: &[u8], at: usize) -> Fid {
    Fid::new(
        read_u64(buf, at),
        read_u32(buf, at + 8),
        read_u32(buf, at + 12),
    )
}

fn trimmed_string(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

/// Decodes one record from its wire buffer.
pub fn decode_record(buf: &[u8]) -> ChangelogResult<Record> {
    if buf.len() < RECORD_HEADER_LEN {
        return Err(ChangelogError::Truncated {
            what: "record header",
            need: RECORD_HEADER_LEN,
            have: buf.len(),
        });
    }

    let namelen = read_u16(buf, 0) as usize;
    let raw_flags = read_u16(buf, 2);
    let kind = RecordKind::from_wire(read_u32(buf, 4));
    let index = read_u64(buf, 8);
    // cr_prev at offset 16 is unused here.
    let time_secs = read_u64(buf, 24) >> 30;
    let target_fid = read_fid(buf, 32);
    let parent_fid = read_fid(buf, 48);

    let mut at = RECORD_HEADER_LEN;

    let rename_ext = if raw_flags & CLF_RENAME != 0 {
        if buf.len() < at + RENAME_EXT_LEN {
            return Err(ChangelogError::Truncated {
                what: "rename extension",
                need: at + RENAME_EXT_LEN,
                have: buf.len(),
            });
        }
        let ext = (read_fid(buf, at), read_fid(buf, at + 16));
        at += RENAME_EXT_LEN;
        Some(ext)
    } else {
        None
    };

    let job_id = if raw_flags & CLF_JOBID != 0 {
        if buf.len() < at + JOBID_EXT_LEN {
            return Err(ChangelogError::Truncated {
                what: "job-id extension",
                need: at + JOBID_EXT_LEN,
                have: buf.len(),
            });
        }
        let job = trimmed_string(&buf[at..at + JOBID_EXT_LEN]);
        at += JOBID_EXT_LEN;
        (!job.is_empty()).then_some(job)
    } else {
        None
    };

    if buf.len() < at + namelen {
        return Err(ChangelogError::Truncated {
            what: "name region",
            need: at + namelen,
            have: buf.len(),
        });
    }
    let name_region = &buf[at..at + namelen];
    let name = trimmed_string(name_region);

    let payload = match rename_ext {
        Some((source_fid, source_parent_fid)) => {
            // The source name follows the target name's terminator
            // inside the same region.
            let source_name = if name.len() + 1 < name_region.len() {
                trimmed_string(&name_region[name.len() + 1..])
            } else {
                String::new()
            };
            RecordPayload::Rename {
                source_fid,
                source_parent_fid,
                source_name,
            }
        }
        None => RecordPayload::Target,
    };

    Ok(Record {
        index,
        kind,
        flags: raw_flags & CLF_FLAGMASK,
        time_secs,
        target_fid,
        parent_fid,
        name,
        job_id,
        payload,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push_fid(buf: &mut Vec<u8>, fid: Fid) {
        buf.extend_from_slice(&fid.seq.to_le_bytes());
        buf.extend_from_slice(&fid.oid.to_le_bytes());
        buf.extend_from_slice(&fid.ver.to_le_bytes());
    }

    fn encode(
        kind: u32,
        flags: u16,
        index: u64,
        tfid: Fid,
        pfid: Fid,
        rename: Option<(Fid, Fid)>,
        job: Option<&str>,
        names: &[u8],
    ) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&(names.len() as u16).to_le_bytes());
        buf.extend_from_slice(&flags.to_le_bytes());
        buf.extend_from_slice(&kind.to_le_bytes());
        buf.extend_from_slice(&index.to_le_bytes());
        buf.extend_from_slice(&0u64.to_le_bytes());
        buf.extend_from_slice(&(1_700_000_000u64 << 30).to_le_bytes());
        push_fid(&mut buf, tfid);
        push_fid(&mut buf, pfid);
        if let Some((sfid, spfid)) = rename {
            push_fid(&mut buf, sfid);
            push_fid(&mut buf, spfid);
        }
        if let Some(job) = job {
            let mut ext = [0u8; JOBID_EXT_LEN];
            ext[..job.len()].copy_from_slice(job.as_bytes());
            buf.extend_from_slice(&ext);
        }
        buf.extend_from_slice(names);
        buf
    }

    fn fid(oid: u32) -> Fid {
        Fid::new(0x200000401, oid, 0)
    }

    #[test]
    fn decodes_plain_create() {
        let buf = encode(1, 0, 42, fid(7), fid(1), None, None, b"newfile\0");
        let rec = decode_record(&buf).unwrap();
        assert_eq!(rec.index, 42);
        assert_eq!(rec.kind, RecordKind::Create);
        assert_eq!(rec.target_fid, fid(7));
        assert_eq!(rec.parent_fid, fid(1));
        assert_eq!(rec.name, "newfile");
        assert_eq!(rec.time_secs, 1_700_000_000);
        assert_eq!(rec.payload, RecordPayload::Target);
        assert_eq!(rec.source_fid(), None);
        assert_eq!(rec.job_id, None);
    }

    #[test]
    fn decodes_rename_with_both_names() {
        let buf = encode(
            8,
            CLF_RENAME | CLF_RENAME_LAST,
            43,
            fid(9),
            fid(2),
            Some((fid(9), fid(3))),
            None,
            b"after\0before\0",
        );
        let rec = decode_record(&buf).unwrap();
        assert_eq!(rec.kind, RecordKind::Rename);
        assert_eq!(rec.name, "after");
        assert_eq!(rec.source_name(), Some("before"));
        assert_eq!(rec.source_fid(), Some(fid(9)));
        assert_eq!(rec.source_parent_fid(), Some(fid(3)));
        assert_eq!(rec.rename_disposition(), Some((true, false)));
        // Extension flag bits are stripped from the public flags.
        assert_eq!(rec.flags, CLF_RENAME_LAST);
    }

    #[test]
    fn decodes_jobid_extension() {
        let buf = encode(11, CLF_JOBID, 44, fid(5), fid(1), None, Some("tar.12345"), b"");
        let rec = decode_record(&buf).unwrap();
        assert_eq!(rec.kind, RecordKind::Close);
        assert_eq!(rec.job_id.as_deref(), Some("tar.12345"));
        assert_eq!(rec.name, "");
    }

    #[test]
    fn decodes_hsm_event_bits() {
        // Event value 3 (release) in bits 7..10, dirty bit in bits 10..12.
        let flags = (3 << 7) | (1 << 10);
        let buf = encode(16, flags, 45, fid(6), fid(1), None, None, b"");
        let rec = decode_record(&buf).unwrap();
        assert_eq!(rec.hsm_event(), Some(HsmEvent::Release));
        assert!(rec.hsm_dirty());

        let buf = encode(16, 0 << 7, 46, fid(6), fid(1), None, None, b"");
        let rec = decode_record(&buf).unwrap();
        assert_eq!(rec.hsm_event(), Some(HsmEvent::Archive));
        assert!(!rec.hsm_dirty());
    }

    #[test]
    fn non_hsm_record_has_no_event() {
        let buf = encode(6, CLF_UNLINK_LAST | CLF_UNLINK_HSM_EXISTS, 47, fid(8), fid(1), None, None, b"gone\0");
        let rec = decode_record(&buf).unwrap();
        assert_eq!(rec.hsm_event(), None);
        assert_eq!(rec.unlink_disposition(), Some((true, true)));
        assert_eq!(rec.rename_disposition(), None);
    }

    #[test]
    fn truncated_buffers_are_rejected() {
        let buf = encode(1, 0, 48, fid(7), fid(1), None, None, b"file\0");
        assert!(matches!(
            decode_record(&buf[..32]),
            Err(ChangelogError::Truncated { what: "record header", .. })
        ));
        assert!(matches!(
            decode_record(&buf[..buf.len() - 2]),
            Err(ChangelogError::Truncated { what: "name region", .. })
        ));

        let buf = encode(8, CLF_RENAME, 49, fid(9), fid(2), None, None, b"");
        // Flags promise a rename extension the buffer does not carry.
        assert!(matches!(
            decode_record(&buf),
            Err(ChangelogError::Truncated { what: "rename extension", .. })
        ));
    }

    #[test]
    fn unknown_kind_is_preserved() {
        let buf = encode(99, 0, 50, fid(7), fid(1), None, None, b"");
        let rec = decode_record(&buf).unwrap();
        assert_eq!(rec.kind, RecordKind::Other(99));
        assert_eq!(rec.kind.to_string(), "TYPE99");
    }

    #[test]
    fn display_shows_rename_arrow() {
        let buf = encode(
            8,
            CLF_RENAME,
            51,
            fid(9),
            fid(2),
            Some((fid(9), fid(3))),
            None,
            b"after\0before\0",
        );
        let rec = decode_record(&buf).unwrap();
        let s = rec.to_string();
        assert!(s.contains("before->after"), "{s}");
    }
}
