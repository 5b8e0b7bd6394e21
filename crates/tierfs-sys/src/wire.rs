//! Kernel ABI structures and action-list decoding.
//!
//! The `Raw*` types mirror `tierfs_user.h` byte for byte and are only
//! handed to ioctls or decoded out of channel messages; everything else
//! in the library works with the owned [`ActionBatch`]/[`ActionRecord`]
//! forms built here.

use tierfs_core::{ActionKind, Extent, Fid};

use crate::error::{SysError, SysResult};

/// On-wire fid.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C)]
pub struct RawFid {
    /// Sequence number.
    pub seq: u64,
    /// Object id.
    pub oid: u32,
    /// Version.
    pub ver: u32,
}

impl From<Fid> for RawFid {
    fn from(fid: Fid) -> Self {
        Self {
            seq: fid.seq,
            oid: fid.oid,
            ver: fid.ver,
        }
    }
}

impl From<RawFid> for Fid {
    fn from(raw: RawFid) -> Self {
        Fid::new(raw.seq, raw.oid, raw.ver)
    }
}

/// On-wire byte extent.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C)]
pub struct RawExtent {
    /// Start offset.
    pub offset: u64,
    /// Length; `u64::MAX` means to end of file.
    pub length: u64,
}

impl From<Extent> for RawExtent {
    fn from(e: Extent) -> Self {
        Self {
            offset: e.offset,
            length: e.length,
        }
    }
}

/// Registration block passed to the copytool-start ioctl.
#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct KernelComm {
    /// Write end of the message pipe (kernel side).
    pub lk_wfd: u32,
    /// Read end of the message pipe (client side).
    pub lk_rfd: u32,
    /// Registering uid.
    pub lk_uid: u32,
    /// Message group to subscribe to.
    pub lk_group: u32,
    /// Group-private data (archive mask).
    pub lk_data: u32,
    /// Registration flags.
    pub lk_flags: u32,
}

/// Message group carrying HSM action lists.
pub const KUC_GRP_HSM: u32 = 0x02;
/// Registration flag asking the kernel to tear the channel down.
pub const LK_FLG_STOP: u32 = 0x01;

/// Fixed header of an on-wire action list.
#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct RawActionListHeader {
    /// Protocol version.
    pub hal_version: u32,
    /// Number of items that follow.
    pub hal_count: u32,
    /// Compound request id shared by the batch.
    pub hal_compound_id: u64,
    /// Batch flags.
    pub hal_flags: u64,
    /// Archive backend the batch is addressed to.
    pub hal_archive_id: u32,
    /// Reserved.
    pub padding: u32,
    // NUL-terminated filesystem name follows, then 8-aligned items.
}

/// One on-wire action item.
#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct RawActionItem {
    /// Total item length including trailing request data.
    pub hai_len: u32,
    /// Action kind (kernel numbering).
    pub hai_action: u32,
    /// Target file.
    pub hai_fid: RawFid,
    /// Data file (filled by the kernel at copy-start).
    pub hai_dfid: RawFid,
    /// Byte range the action covers.
    pub hai_extent: RawExtent,
    /// Completion cookie.
    pub hai_cookie: u64,
    /// Restore exclusivity-lock group id.
    pub hai_gid: u64,
    // Opaque request data follows.
}

/// Argument block for the copy-start and copy-end ioctls.
#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct RawCopy {
    /// Data version captured at copy-start.
    pub hc_data_version: u64,
    /// Copy flags.
    pub hc_flags: u16,
    /// Error value (positive errno) for a failed action.
    pub hc_errval: u16,
    /// Reserved.
    pub padding: u32,
    /// The item this copy acts on.
    pub hc_hai: RawActionItem,
}

/// Argument block for the progress ioctl.
#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct RawProgress {
    /// Target file.
    pub hp_fid: RawFid,
    /// Completion cookie of the action being reported on.
    pub hp_cookie: u64,
    /// Range completed so far.
    pub hp_extent: RawExtent,
    /// Progress flags.
    pub hp_flags: u16,
    /// Error value, zero while the action is healthy.
    pub hp_errval: u16,
    /// Reserved.
    pub padding: u32,
}

/// Argument block for the file-state query ioctl.
#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct RawUserState {
    /// State flag bits.
    pub hus_states: u32,
    /// Archive backend holding the copy.
    pub hus_archive_id: u32,
    /// States being set by an in-progress action.
    pub hus_in_progress_state: u32,
    /// Kind of the in-progress action.
    pub hus_in_progress_action: u32,
    /// Range the in-progress action has reached.
    pub hus_in_progress_location: RawExtent,
}

/// Fixed header of a bulk user request.
#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct RawRequestHeader {
    /// Request kind (user numbering).
    pub hr_action: u32,
    /// Archive backend id.
    pub hr_archive_id: u32,
    /// Request flags.
    pub hr_flags: u64,
    /// Number of items that follow.
    pub hr_itemcount: u32,
    /// Bytes of opaque data after the items.
    pub hr_data_len: u32,
}

/// One target of a bulk user request.
#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct RawUserItem {
    /// Target file.
    pub hui_fid: RawFid,
    /// Byte range the request covers.
    pub hui_extent: RawExtent,
}

/// Header of the fid-to-path translation ioctl, followed by the
/// path buffer.
#[derive(Debug, Clone, Copy, Default)]
#[repr(C)]
pub struct Fid2PathHeader {
    /// Fid to translate.
    pub gf_fid: RawFid,
    /// Link rotation cursor, updated by the kernel.
    pub gf_recno: u64,
    /// Hard-link index, updated by the kernel.
    pub gf_linkno: u32,
    /// Capacity of the trailing path buffer.
    pub gf_pathlen: u32,
}

/// Expected `hal_version`.
pub const HAL_VERSION: u32 = 1;

/// One decoded unit of HSM work, plus the batch metadata it arrived with.
#[derive(Debug, Clone)]
pub struct ActionRecord {
    /// What to do.
    pub action: ActionKind,
    /// The file to do it to.
    pub fid: Fid,
    /// The byte range to do it over.
    pub extent: Extent,
    /// Completion cookie, unique per outstanding action.
    pub cookie: u64,
    /// Restore lock group id.
    pub gid: u64,
    /// Opaque request payload agreed between initiator and backend.
    pub data: Vec<u8>,
    /// Batch flags (from the list header).
    pub hal_flags: u64,
    /// Archive backend id (from the list header).
    pub archive_id: u32,
}

impl ActionRecord {
    /// Re-encodes the fixed part for the copy-start/end ioctls.
    pub fn to_raw(&self) -> RawActionItem {
        RawActionItem {
            hai_len: (std::mem::size_of::<RawActionItem>() + self.data.len()) as u32,
            hai_action: self.action as u32,
            hai_fid: self.fid.into(),
            hai_dfid: RawFid::default(),
            hai_extent: self.extent.into(),
            hai_cookie: self.cookie,
            hai_gid: self.gid,
        }
    }
}

/// A decoded batch of action items sharing one list header.
#[derive(Debug, Clone)]
pub struct ActionBatch {
    /// Protocol version.
    pub version: u32,
    /// Compound request id.
    pub compound_id: u64,
    /// Batch flags.
    pub flags: u64,
    /// Archive backend id.
    pub archive_id: u32,
    /// Name of the filesystem the batch belongs to.
    pub fs_name: String,
    /// The items, in coordinator order.
    pub items: Vec<ActionRecord>,
}

struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, n: usize, what: &'static str) -> SysResult<&'a [u8]> {
        let end = self.pos.checked_add(n).ok_or(SysError::Truncated {
            what,
            need: n,
            have: self.buf.len() - self.pos,
        })?;
        if end > self.buf.len() {
            return Err(SysError::Truncated {
                what,
                need: n,
                have: self.buf.len() - self.pos,
            });
        }
        let out = &self.buf[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn u32(&mut self, what: &'static str) -> SysResult<u32> {
        let b = self.take(4, what)?;
        Ok(u32::from_ne_bytes(b.try_into().unwrap()))
    }

    fn u64(&mut self, what: &'static str) -> SysResult<u64> {
        let b = self.take(8, what)?;
        Ok(u64::from_ne_bytes(b.try_into().unwrap()))
    }

    fn fid(&mut self, what: &'static str) -> SysResult<Fid> {
        let seq = self.u64(what)?;
        let oid = self.u32(what)?;
        let ver = self.u32(what)?;
        Ok(Fid::new(seq, oid, ver))
    }

    fn align8(&mut self) {
        self.pos = (self.pos + 7) & !7;
    }
}

/// Decodes an on-wire action list into its owned form.
///
/// Items are 8-byte aligned after the NUL-terminated filesystem name;
/// each `hai_len` covers the fixed item plus its trailing data.
pub fn decode_action_list(buf: &[u8]) -> SysResult<ActionBatch> {
    let mut cur = Cursor::new(buf);

    let version = cur.u32("action list header")?;
    let count = cur.u32("action list header")?;
    let compound_id = cur.u64("action list header")?;
    let flags = cur.u64("action list header")?;
    let archive_id = cur.u32("action list header")?;
    let _padding = cur.u32("action list header")?;

    if version != HAL_VERSION {
        return Err(SysError::BadMessage(format!(
            "unsupported action list version {version}"
        )));
    }

    // fs name: NUL-terminated, items start at the next 8-byte boundary.
    let name_start = cur.pos;
    let nul = buf[name_start..]
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| SysError::BadMessage("unterminated fs name".into()))?;
    let fs_name = String::from_utf8_lossy(&buf[name_start..name_start + nul]).into_owned();
    cur.pos = name_start + nul + 1;
    cur.align8();

    let mut items = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let item_start = cur.pos;
        let hai_len = cur.u32("action item")? as usize;
        if hai_len < FIXED_ITEM_LEN {
            return Err(SysError::BadMessage(format!(
                "action item length {hai_len} below fixed size"
            )));
        }
        let action = cur.u32("action item")?;
        let fid = cur.fid("action item")?;
        let _dfid = cur.fid("action item")?;
        let offset = cur.u64("action item")?;
        let length = cur.u64("action item")?;
        let cookie = cur.u64("action item")?;
        let gid = cur.u64("action item")?;
        let data = cur.take(hai_len - FIXED_ITEM_LEN, "action item data")?.to_vec();

        items.push(ActionRecord {
            action: ActionKind::from_wire(action),
            fid,
            extent: Extent::new(offset, length),
            cookie,
            gid,
            data,
            hal_flags: flags,
            archive_id,
        });

        cur.pos = item_start + ((hai_len + 7) & !7).min(buf.len() - item_start);
    }

    Ok(ActionBatch {
        version,
        compound_id,
        flags,
        archive_id,
        fs_name,
        items,
    })
}

const FIXED_ITEM_LEN: usize = std::mem::size_of::<RawActionItem>();

#[cfg(test)]
mod tests {
    use super::*;

    fn push_u32(buf: &mut Vec<u8>, v: u32) {
        buf.extend_from_slice(&v.to_ne_bytes());
    }

    fn push_u64(buf: &mut Vec<u8>, v: u64) {
        buf.extend_from_slice(&v.to_ne_bytes());
    }

    fn push_fid(buf: &mut Vec<u8>, fid: Fid) {
        push_u64(buf, fid.seq);
        push_u32(buf, fid.oid);
        push_u32(buf, fid.ver);
    }

    fn push_item(buf: &mut Vec<u8>, action: u32, fid: Fid, cookie: u64, data: &[u8]) {
        let hai_len = FIXED_ITEM_LEN + data.len();
        push_u32(buf, hai_len as u32);
        push_u32(buf, action);
        push_fid(buf, fid);
        push_fid(buf, Fid::zero());
        push_u64(buf, 0); // offset
        push_u64(buf, u64::MAX); // length: EOF
        push_u64(buf, cookie);
        push_u64(buf, 0); // gid
        buf.extend_from_slice(data);
        while buf.len() % 8 != 0 {
            buf.push(0);
        }
    }

    fn list_with(items: &[(u32, Fid, u64, &[u8])]) -> Vec<u8> {
        let mut buf = Vec::new();
        push_u32(&mut buf, HAL_VERSION);
        push_u32(&mut buf, items.len() as u32);
        push_u64(&mut buf, 0x42); // compound id
        push_u64(&mut buf, 0); // flags
        push_u32(&mut buf, 7); // archive id
        push_u32(&mut buf, 0); // padding
        buf.extend_from_slice(b"tierfs\0");
        while buf.len() % 8 != 0 {
            buf.push(0);
        }
        for (action, fid, cookie, data) in items {
            push_item(&mut buf, *action, *fid, *cookie, data);
        }
        buf
    }

    #[test]
    fn decodes_two_items_with_data() {
        let f1 = Fid::new(0x200000401, 1, 0);
        let f2 = Fid::new(0x200000401, 2, 0);
        let buf = list_with(&[(20, f1, 100, b"backend-key"), (21, f2, 101, b"")]);

        let batch = decode_action_list(&buf).unwrap();
        assert_eq!(batch.fs_name, "tierfs");
        assert_eq!(batch.archive_id, 7);
        assert_eq!(batch.compound_id, 0x42);
        assert_eq!(batch.items.len(), 2);

        let a = &batch.items[0];
        assert_eq!(a.action, ActionKind::Archive);
        assert_eq!(a.fid, f1);
        assert_eq!(a.cookie, 100);
        assert_eq!(a.data, b"backend-key");
        assert!(a.extent.is_unbounded());

        let r = &batch.items[1];
        assert_eq!(r.action, ActionKind::Restore);
        assert_eq!(r.cookie, 101);
        assert!(r.data.is_empty());
    }

    #[test]
    fn empty_list_is_ok() {
        let buf = list_with(&[]);
        let batch = decode_action_list(&buf).unwrap();
        assert!(batch.items.is_empty());
    }

    #[test]
    fn rejects_wrong_version() {
        let mut buf = list_with(&[]);
        buf[0] = 99;
        assert!(matches!(
            decode_action_list(&buf),
            Err(SysError::BadMessage(_))
        ));
    }

    #[test]
    fn rejects_truncated_item() {
        let f1 = Fid::new(0x200000401, 1, 0);
        let mut buf = list_with(&[(20, f1, 100, b"")]);
        buf.truncate(buf.len() - 16);
        assert!(decode_action_list(&buf).is_err());
    }

    #[test]
    fn raw_item_round_trip_keeps_cookie_and_extent() {
        let rec = ActionRecord {
            action: ActionKind::Restore,
            fid: Fid::new(0x200000401, 9, 0),
            extent: Extent::whole_file(),
            cookie: 0xdead,
            gid: 3,
            data: vec![1, 2, 3],
            hal_flags: 0,
            archive_id: 1,
        };
        let raw = rec.to_raw();
        assert_eq!(raw.hai_cookie, 0xdead);
        assert_eq!(raw.hai_extent.length, u64::MAX);
        assert_eq!(raw.hai_len as usize, FIXED_ITEM_LEN + 3);
    }
}
