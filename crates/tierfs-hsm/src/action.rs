//! Per-action protocol state machine.
//!
//! Each item handed out by the coordinator moves through exactly one
//! acknowledged lifetime: [`ActionItem::begin`] consumes the item and
//! yields an [`ActionHandle`]; progress reports repeat at will; the
//! handle's [`end`](ActionHandle::end) consumes it in turn. Both
//! transitions take `self` by value, so beginning or ending twice does
//! not compile.

use std::fmt;
use std::fs::File;
use std::sync::Weak;

use parking_lot::Mutex;

use tierfs_core::{extent, ActionKind, Extent, Fid};
use tierfs_sys::copytool::LOV_DELAY_CREATE;
use tierfs_sys::ActionRecord;

use crate::error::{HsmError, HsmResult};
use crate::transport::{CopyAction, Copytool};

/// One action received from the coordinator, not yet acknowledged.
///
/// Holds a weak reference to its transport: once the coordinator is
/// closed and dropped, a leftover item fails with [`HsmError::Closed`]
/// instead of keeping the registration alive.
pub struct ActionItem {
    transport: Weak<dyn Copytool>,
    record: ActionRecord,
}

impl ActionItem {
    pub(crate) fn new(transport: Weak<dyn Copytool>, record: ActionRecord) -> Self {
        Self { transport, record }
    }

    /// What the coordinator wants done.
    pub fn action(&self) -> ActionKind {
        self.record.action
    }

    /// Fid of the file the action targets.
    pub fn fid(&self) -> Fid {
        self.record.fid
    }

    /// Coordinator-assigned identifier for this action.
    pub fn cookie(&self) -> u64 {
        self.record.cookie
    }

    /// Archive the action belongs to.
    pub fn archive_id(&self) -> u32 {
        self.record.archive_id
    }

    /// Byte range the action covers.
    pub fn extent(&self) -> Extent {
        self.record.extent
    }

    /// Start offset of the action's extent.
    pub fn offset(&self) -> u64 {
        self.record.extent.offset
    }

    /// Length of the action's extent (EOF sentinel preserved).
    pub fn length(&self) -> u64 {
        self.record.extent.length
    }

    /// Opaque per-request payload supplied at submission time.
    pub fn data(&self) -> &[u8] {
        &self.record.data
    }

    /// Raw per-item flags from the batch.
    pub fn hal_flags(&self) -> u64 {
        self.record.hal_flags
    }

    /// Acknowledges the action and acquires its copy resource.
    ///
    /// For a restore (unless `is_error` announces an immediate
    /// failure), the owning MDT is resolved first and the data file is
    /// opened with delayed layout creation so the canonical striping
    /// can be copied onto it; the copy itself is best effort. An MDT
    /// lookup failure aborts before anything is acquired and no
    /// completion is sent. If the acknowledgement itself fails, a
    /// failing completion is issued so the coordinator releases the
    /// action, and the original error is returned.
    pub fn begin(self, open_flags: i32, is_error: bool) -> HsmResult<ActionHandle> {
        let Some(transport) = self.transport.upgrade() else {
            return Err(HsmError::Closed);
        };
        if transport.is_closed() {
            return Err(HsmError::Closed);
        }

        let mut mdt_index = -1;
        let mut open_flags = open_flags;
        let mut set_layout = false;
        if self.record.action == ActionKind::Restore && !is_error {
            mdt_index = transport.mdt_index(&self.record.fid)? as i32;
            open_flags = LOV_DELAY_CREATE;
            set_layout = true;
        }

        let copy = match transport.begin(&self.record, mdt_index, open_flags, is_error) {
            Ok(copy) => copy,
            Err(e) => {
                tracing::debug!(cookie = self.record.cookie, error = %e, "begin failed");
                transport.fail_begin(&self.record);
                return Err(e);
            }
        };

        if set_layout {
            if let Err(e) = copy.clone_layout_from_primary() {
                tracing::warn!(
                    fid = %self.record.fid,
                    error = %e,
                    "striping layout not copied to data file"
                );
            }
        }

        Ok(ActionHandle {
            record: self.record,
            copy: Mutex::new(copy),
        })
    }

    /// Rejects the action outright with `errval`, running the full
    /// acknowledge-then-complete cycle so the coordinator's bookkeeping
    /// stays consistent. Best effort: if the action cannot even be
    /// begun, nothing further is signalled.
    pub fn fail_immediately(self, errval: i32) {
        let cookie = self.record.cookie;
        match self.begin(0, true) {
            Ok(handle) => {
                if let Err(e) = handle.end(0, 0, 0, errval) {
                    tracing::debug!(cookie, error = %e, "immediate failure not completed");
                }
            }
            Err(e) => {
                tracing::debug!(cookie, error = %e, "immediate failure not begun");
            }
        }
    }
}

impl fmt::Display for ActionItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "AI: {:x} {} {} {},{}",
            self.record.cookie,
            self.record.action,
            self.record.fid,
            self.record.extent.offset,
            extent::length_str(self.record.extent.length)
        )
    }
}

impl fmt::Debug for ActionItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// An acknowledged, in-flight action.
///
/// Progress and completion go through an internal lock, so the handle
/// can be shared behind a reference across the threads doing the data
/// movement while the copy resource itself is never entered twice.
pub struct ActionHandle {
    record: ActionRecord,
    copy: Mutex<Box<dyn CopyAction>>,
}

impl ActionHandle {
    /// What the coordinator wants done.
    pub fn action(&self) -> ActionKind {
        self.record.action
    }

    /// Fid of the file the action targets.
    pub fn fid(&self) -> Fid {
        self.record.fid
    }

    /// Coordinator-assigned identifier for this action.
    pub fn cookie(&self) -> u64 {
        self.record.cookie
    }

    /// Archive the action belongs to.
    pub fn archive_id(&self) -> u32 {
        self.record.archive_id
    }

    /// Byte range the action covers.
    pub fn extent(&self) -> Extent {
        self.record.extent
    }

    /// Start offset of the action's extent.
    pub fn offset(&self) -> u64 {
        self.record.extent.offset
    }

    /// Length of the action's extent (EOF sentinel preserved).
    pub fn length(&self) -> u64 {
        self.record.extent.length
    }

    /// Opaque per-request payload supplied at submission time.
    pub fn data(&self) -> &[u8] {
        &self.record.data
    }

    /// Reports progress over `length` bytes at `offset`.
    ///
    /// Also serves as the liveness heartbeat: the coordinator abandons
    /// actions that stay silent past its timeout window, so long copies
    /// should report at a period comfortably inside it.
    pub fn progress(&self, offset: u64, length: u64, total_length: u64, flags: u16) -> HsmResult<()> {
        self.copy
            .lock()
            .progress(Extent::new(offset, length), total_length, flags)
    }

    /// Completes the action with `errval` (0 for success), consuming
    /// the handle.
    ///
    /// Any descriptor obtained from [`data_fd`](Self::data_fd) must be
    /// flushed and closed first; for a restore the coordinator swaps
    /// the data file into place at this point.
    pub fn end(self, offset: u64, length: u64, flags: u16, errval: i32) -> HsmResult<()> {
        let mut copy = self.copy.into_inner();
        copy.end(Extent::new(offset, length), flags, errval)
    }

    /// Fid of the file all data movement for this action must target.
    ///
    /// For a restore this is the volatile data file, not the canonical
    /// one; writing to the canonical fid would race the swap-in.
    pub fn data_fid(&self) -> HsmResult<Fid> {
        self.copy.lock().data_fid()
    }

    /// Opens a descriptor for the data file.
    pub fn data_fd(&self) -> HsmResult<File> {
        self.copy.lock().data_fd()
    }
}

impl fmt::Display for ActionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "AI: {:x} {} {} {},{}",
            self.record.cookie,
            self.record.action,
            self.record.fid,
            self.record.extent.offset,
            extent::length_str(self.record.extent.length)
        )
    }
}

impl fmt::Debug for ActionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{mock_record, MockCopytool, MockEvent};
    use std::sync::Arc;

    fn fid(oid: u32) -> Fid {
        Fid::new(0x200000401, oid, 0)
    }

    fn item(transport: &Arc<MockCopytool>, action: ActionKind, cookie: u64) -> ActionItem {
        let weak: Weak<MockCopytool> = Arc::downgrade(transport);
        let weak: Weak<dyn Copytool> = weak;
        ActionItem::new(weak, mock_record(action, fid(cookie as u32), cookie))
    }

    #[test]
    fn archive_begin_skips_mdt_lookup() {
        let mock = Arc::new(MockCopytool::new());
        let handle = item(&mock, ActionKind::Archive, 7).begin(0, false).unwrap();
        assert_eq!(mock.mdt_lookups(), 0);
        assert_eq!(
            mock.events(),
            vec![MockEvent::Begin {
                cookie: 7,
                mdt_index: -1,
                open_flags: 0,
                is_error: false,
            }]
        );
        handle.end(0, 0, 0, 0).unwrap();
    }

    #[test]
    fn restore_begin_resolves_mdt_and_copies_layout() {
        let mock = Arc::new(MockCopytool::new());
        mock.set_mdt_index(3);
        let handle = item(&mock, ActionKind::Restore, 9).begin(0, false).unwrap();
        assert_eq!(
            mock.events(),
            vec![
                MockEvent::MdtLookup { fid: fid(9) },
                MockEvent::Begin {
                    cookie: 9,
                    mdt_index: 3,
                    open_flags: LOV_DELAY_CREATE,
                    is_error: false,
                },
                MockEvent::LayoutClone { cookie: 9 },
            ]
        );
        handle.end(0, 0, 0, 0).unwrap();
    }

    #[test]
    fn restore_mdt_lookup_failure_acquires_nothing() {
        let mock = Arc::new(MockCopytool::new());
        mock.fail_mdt_lookup_for(fid(4));
        let err = item(&mock, ActionKind::Restore, 4).begin(0, false).unwrap_err();
        assert!(matches!(err, HsmError::Resolution { .. }));
        // Only the lookup happened: no begin, no completion of any kind.
        assert_eq!(mock.events(), vec![MockEvent::MdtLookup { fid: fid(4) }]);
    }

    #[test]
    fn restore_with_error_flag_skips_lookup_and_layout() {
        let mock = Arc::new(MockCopytool::new());
        let handle = item(&mock, ActionKind::Restore, 5).begin(0, true).unwrap();
        assert_eq!(mock.mdt_lookups(), 0);
        assert!(!mock
            .events()
            .iter()
            .any(|e| matches!(e, MockEvent::LayoutClone { .. })));
        handle.end(0, 0, 0, -5).unwrap();
    }

    #[test]
    fn layout_clone_failure_does_not_fail_begin() {
        let mock = Arc::new(MockCopytool::new());
        mock.fail_layout_clones(true);
        let handle = item(&mock, ActionKind::Restore, 6).begin(0, false).unwrap();
        handle.end(0, 0, 0, 0).unwrap();
        assert!(mock
            .events()
            .iter()
            .any(|e| matches!(e, MockEvent::End { cookie: 6, errval: 0 })));
    }

    #[test]
    fn begin_failure_issues_failing_completion() {
        let mock = Arc::new(MockCopytool::new());
        mock.fail_begins(true);
        let err = item(&mock, ActionKind::Archive, 8).begin(0, false).unwrap_err();
        assert!(matches!(err, HsmError::Io(_)));
        assert_eq!(
            mock.events(),
            vec![
                MockEvent::Begin {
                    cookie: 8,
                    mdt_index: -1,
                    open_flags: 0,
                    is_error: false,
                },
                MockEvent::FailedCompletion { cookie: 8 },
            ]
        );
    }

    #[test]
    fn fail_immediately_runs_full_cycle() {
        let mock = Arc::new(MockCopytool::new());
        item(&mock, ActionKind::Restore, 11).fail_immediately(-libc::ENOENT);
        // An error begin never resolves the MDT.
        assert_eq!(mock.mdt_lookups(), 0);
        assert_eq!(
            mock.events(),
            vec![
                MockEvent::Begin {
                    cookie: 11,
                    mdt_index: -1,
                    open_flags: 0,
                    is_error: true,
                },
                MockEvent::End {
                    cookie: 11,
                    errval: -libc::ENOENT,
                },
            ]
        );
    }

    #[test]
    fn fail_immediately_swallows_begin_failure() {
        let mock = Arc::new(MockCopytool::new());
        mock.fail_begins(true);
        item(&mock, ActionKind::Archive, 14).fail_immediately(-1);
        assert!(!mock
            .events()
            .iter()
            .any(|e| matches!(e, MockEvent::End { .. })));
    }

    #[test]
    fn begin_after_transport_dropped_is_closed() {
        let mock = Arc::new(MockCopytool::new());
        let it = item(&mock, ActionKind::Archive, 2);
        drop(mock);
        assert!(matches!(it.begin(0, false), Err(HsmError::Closed)));
    }

    #[test]
    fn begin_after_close_is_closed() {
        let mock = Arc::new(MockCopytool::new());
        let it = item(&mock, ActionKind::Archive, 3);
        mock.close();
        assert!(matches!(it.begin(0, false), Err(HsmError::Closed)));
    }

    #[test]
    fn progress_then_end_in_order() {
        let mock = Arc::new(MockCopytool::new());
        let handle = item(&mock, ActionKind::Archive, 12).begin(0, false).unwrap();
        handle.progress(0, 1 << 20, 4 << 20, 0).unwrap();
        handle.progress(1 << 20, 1 << 20, 4 << 20, 0).unwrap();
        handle.end(0, 4 << 20, 0, 0).unwrap();
        let events = mock.events();
        assert_eq!(events.len(), 4);
        assert!(matches!(events[1], MockEvent::Progress { cookie: 12, offset: 0, .. }));
        assert!(matches!(
            events[3],
            MockEvent::End {
                cookie: 12,
                errval: 0
            }
        ));
        assert!(!mock.overlap_detected());
    }

    #[test]
    fn concurrent_progress_calls_are_serialized() {
        let mock = Arc::new(MockCopytool::new());
        let handle = item(&mock, ActionKind::Archive, 15).begin(0, false).unwrap();

        std::thread::scope(|s| {
            for t in 0..8u64 {
                let handle = &handle;
                s.spawn(move || {
                    for i in 0..50u64 {
                        handle.progress(t * 50 + i, 1, 4 << 20, 0).unwrap();
                    }
                });
            }
        });
        handle.end(0, 4 << 20, 0, 0).unwrap();

        assert!(!mock.overlap_detected());
        // One begin, 400 progress reports, one end.
        assert_eq!(mock.events().len(), 402);
    }

    #[test]
    fn handle_exposes_extent_parts() {
        let mock = Arc::new(MockCopytool::new());
        let handle = item(&mock, ActionKind::Archive, 16).begin(0, false).unwrap();
        assert_eq!(handle.offset(), 0);
        assert_eq!(handle.length(), tierfs_core::extent::EOF_LENGTH);
        assert_eq!(handle.extent(), Extent::whole_file());
        handle.end(0, 0, 0, 0).unwrap();
    }

    #[test]
    fn display_renders_eof_not_a_number() {
        let mock = Arc::new(MockCopytool::new());
        let it = item(&mock, ActionKind::Archive, 0xbeef);
        let s = it.to_string();
        assert!(s.starts_with("AI: beef ARCHIVE"), "{s}");
        assert!(s.ends_with("0,EOF"), "{s}");
        assert!(!s.contains('-'), "{s}");
    }

    #[test]
    fn data_fid_differs_from_target() {
        let mock = Arc::new(MockCopytool::new());
        let handle = item(&mock, ActionKind::Restore, 13).begin(0, false).unwrap();
        assert_ne!(handle.data_fid().unwrap(), handle.fid());
        handle.end(0, 0, 0, 0).unwrap();
    }
}
