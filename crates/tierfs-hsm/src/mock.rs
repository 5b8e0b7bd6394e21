//! In-memory coordinator for tests and backend development.
//!
//! `MockCopytool` implements the same transport seam as the kernel
//! channel but serves scripted batches and records every call it sees,
//! so backend drivers and this crate's own tests can exercise the full
//! receive/begin/progress/end cycle without a mounted filesystem.

use std::collections::VecDeque;
use std::fs::File;
use std::io;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use tierfs_core::{ActionKind, Extent, Fid};
use tierfs_sys::{ActionBatch, ActionRecord};

use crate::error::{HsmError, HsmResult};
use crate::transport::{CopyAction, Copytool};

/// Everything the mock observed, in call order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockEvent {
    /// An owning-MDT lookup for `fid`.
    MdtLookup {
        /// Looked-up fid.
        fid: Fid,
    },
    /// A begin call.
    Begin {
        /// Cookie of the item begun.
        cookie: u64,
        /// MDT index passed through (-1 when not resolved).
        mdt_index: i32,
        /// Open flags passed through.
        open_flags: i32,
        /// Whether the begin announced a failure.
        is_error: bool,
    },
    /// A failing completion issued for a failed begin.
    FailedCompletion {
        /// Cookie of the item.
        cookie: u64,
    },
    /// A layout copy onto the data file.
    LayoutClone {
        /// Cookie of the action.
        cookie: u64,
    },
    /// A progress report.
    Progress {
        /// Cookie of the action.
        cookie: u64,
        /// Reported offset.
        offset: u64,
        /// Reported length.
        length: u64,
    },
    /// A completion.
    End {
        /// Cookie of the action.
        cookie: u64,
        /// Final error value (0 on success).
        errval: i32,
    },
}

#[derive(Default)]
struct MockShared {
    events: Mutex<Vec<MockEvent>>,
    busy: AtomicBool,
    overlap: AtomicBool,
    layout_fails: AtomicBool,
}

impl MockShared {
    fn record(&self, event: MockEvent) {
        self.events.lock().push(event);
    }

    // Guards a non-reentrant section the way the kernel resource would
    // misbehave if entered twice; overlap is remembered, not panicked
    // on, so tests can assert it.
    fn enter(&self) {
        if self.busy.swap(true, Ordering::SeqCst) {
            self.overlap.store(true, Ordering::SeqCst);
        }
        std::thread::yield_now();
    }

    fn exit(&self) {
        self.busy.store(false, Ordering::SeqCst);
    }
}

/// Scripted, observable coordinator transport.
pub struct MockCopytool {
    queue: Mutex<VecDeque<ActionBatch>>,
    notify: Notify,
    closed: AtomicBool,
    compound_seq: AtomicU64,
    mdt_index_value: AtomicU32,
    mdt_failures: Mutex<Vec<Fid>>,
    begin_fails: AtomicBool,
    shared: Arc<MockShared>,
}

impl MockCopytool {
    /// Creates an empty mock with MDT index 0 for every fid.
    pub fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
            compound_seq: AtomicU64::new(1),
            mdt_index_value: AtomicU32::new(0),
            mdt_failures: Mutex::new(Vec::new()),
            begin_fails: AtomicBool::new(false),
            shared: Arc::new(MockShared::default()),
        }
    }

    /// Queues one batch of `items` for delivery.
    pub fn push_batch(&self, items: Vec<ActionRecord>) {
        let batch = ActionBatch {
            version: tierfs_sys::wire::HAL_VERSION,
            compound_id: self.compound_seq.fetch_add(1, Ordering::Relaxed),
            flags: 0,
            archive_id: 1,
            fs_name: "tierfs-test".to_string(),
            items,
        };
        self.queue.lock().push_back(batch);
        self.notify.notify_one();
    }

    /// The MDT index returned by successful lookups.
    pub fn set_mdt_index(&self, index: u32) {
        self.mdt_index_value.store(index, Ordering::Relaxed);
    }

    /// Makes MDT lookups for `fid` fail.
    pub fn fail_mdt_lookup_for(&self, fid: Fid) {
        self.mdt_failures.lock().push(fid);
    }

    /// Makes every subsequent begin call fail.
    pub fn fail_begins(&self, fail: bool) {
        self.begin_fails.store(fail, Ordering::Relaxed);
    }

    /// Makes layout clones fail (begin must still succeed).
    pub fn fail_layout_clones(&self, fail: bool) {
        self.shared.layout_fails.store(fail, Ordering::Relaxed);
    }

    /// Snapshot of everything observed so far.
    pub fn events(&self) -> Vec<MockEvent> {
        self.shared.events.lock().clone()
    }

    /// Number of MDT lookups observed.
    pub fn mdt_lookups(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, MockEvent::MdtLookup { .. }))
            .count()
    }

    /// True if two progress/end calls ever overlapped on one action.
    pub fn overlap_detected(&self) -> bool {
        self.shared.overlap.load(Ordering::SeqCst)
    }
}

impl Default for MockCopytool {
    fn default() -> Self {
        Self::new()
    }
}

/// Builds an action record the way a received batch would carry it.
pub fn mock_record(action: ActionKind, fid: Fid, cookie: u64) -> ActionRecord {
    ActionRecord {
        action,
        fid,
        extent: Extent::whole_file(),
        cookie,
        gid: 0,
        data: Vec::new(),
        hal_flags: 0,
        archive_id: 1,
    }
}

#[async_trait]
impl Copytool for MockCopytool {
    async fn recv_batch(&self) -> HsmResult<ActionBatch> {
        loop {
            let mut notified = std::pin::pin!(self.notify.notified());
            notified.as_mut().enable();
            {
                if self.is_closed() {
                    return Err(HsmError::Closed);
                }
                if let Some(batch) = self.queue.lock().pop_front() {
                    return Ok(batch);
                }
            }
            notified.await;
        }
    }

    fn try_recv(&self) -> HsmResult<ActionBatch> {
        if self.is_closed() {
            return Err(HsmError::Closed);
        }
        self.queue.lock().pop_front().ok_or(HsmError::WouldBlock)
    }

    fn begin(
        &self,
        record: &ActionRecord,
        mdt_index: i32,
        open_flags: i32,
        is_error: bool,
    ) -> HsmResult<Box<dyn CopyAction>> {
        if self.is_closed() {
            return Err(HsmError::Closed);
        }
        self.shared.record(MockEvent::Begin {
            cookie: record.cookie,
            mdt_index,
            open_flags,
            is_error,
        });
        if self.begin_fails.load(Ordering::Relaxed) {
            return Err(HsmError::Io(io::Error::other("injected begin failure")));
        }
        Ok(Box::new(MockCopyAction {
            cookie: record.cookie,
            fid: record.fid,
            shared: self.shared.clone(),
        }))
    }

    fn fail_begin(&self, record: &ActionRecord) {
        self.shared.record(MockEvent::FailedCompletion {
            cookie: record.cookie,
        });
    }

    fn mdt_index(&self, fid: &Fid) -> HsmResult<u32> {
        self.shared.record(MockEvent::MdtLookup { fid: *fid });
        if self.mdt_failures.lock().contains(fid) {
            return Err(HsmError::Resolution {
                fid: *fid,
                source: tierfs_sys::SysError::Io(io::ErrorKind::NotFound.into()),
            });
        }
        Ok(self.mdt_index_value.load(Ordering::Relaxed))
    }

    fn raw_fd(&self) -> Option<RawFd> {
        None
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.notify.notify_waiters();
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

struct MockCopyAction {
    cookie: u64,
    fid: Fid,
    shared: Arc<MockShared>,
}

impl CopyAction for MockCopyAction {
    fn progress(&mut self, extent: Extent, _total_length: u64, _flags: u16) -> HsmResult<()> {
        self.shared.enter();
        self.shared.record(MockEvent::Progress {
            cookie: self.cookie,
            offset: extent.offset,
            length: extent.length,
        });
        self.shared.exit();
        Ok(())
    }

    fn end(&mut self, _extent: Extent, _flags: u16, errval: i32) -> HsmResult<()> {
        self.shared.enter();
        self.shared.record(MockEvent::End {
            cookie: self.cookie,
            errval,
        });
        self.shared.exit();
        Ok(())
    }

    fn data_fid(&self) -> HsmResult<Fid> {
        // The data file is distinct from the target; a bumped version
        // keeps the two distinguishable in assertions.
        Ok(Fid::new(self.fid.seq, self.fid.oid, self.fid.ver + 1))
    }

    fn data_fd(&self) -> HsmResult<File> {
        File::open("/dev/null").map_err(HsmError::Io)
    }

    fn clone_layout_from_primary(&self) -> HsmResult<()> {
        if self.shared.layout_fails.load(Ordering::Relaxed) {
            return Err(HsmError::Io(io::Error::other("injected layout failure")));
        }
        self.shared.record(MockEvent::LayoutClone {
            cookie: self.cookie,
        });
        Ok(())
    }
}
