//! Coordinator transport seam.
//!
//! The agent pipeline and the action state machine talk to the
//! coordinator through these traits so the kernel channel and the
//! in-memory mock (`mock.rs`) are interchangeable. The kernel
//! implementation wraps `tierfs_sys::CopytoolHandle` and drives its
//! descriptor with `AsyncFd`.

use std::fs::File;
use std::os::unix::io::RawFd;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::unix::AsyncFd;

use tierfs_core::{Extent, Fid, MountPoint};
use tierfs_sys::copytool::CopyActionState;
use tierfs_sys::{ActionBatch, ActionRecord, CopytoolHandle};

use crate::error::{HsmError, HsmResult};

/// A live registration with the coordinator.
#[async_trait]
pub trait Copytool: Send + Sync + 'static {
    /// Waits for and returns the next action batch.
    ///
    /// Resolves with [`HsmError::Closed`] once the registration is
    /// torn down; any other error leaves the connection in an unknown
    /// state and is fatal to the caller's receive loop.
    async fn recv_batch(&self) -> HsmResult<ActionBatch>;

    /// Non-blocking receive. [`HsmError::WouldBlock`] means no batch
    /// is pending; retry after the descriptor signals readiness.
    fn try_recv(&self) -> HsmResult<ActionBatch>;

    /// Acknowledges `record` to the coordinator and prepares its data
    /// access, returning the per-action copy resource.
    fn begin(
        &self,
        record: &ActionRecord,
        mdt_index: i32,
        open_flags: i32,
        is_error: bool,
    ) -> HsmResult<Box<dyn CopyAction>>;

    /// Best-effort failing completion (offset 0, length 0, flags 0,
    /// errval -1) for a record whose begin failed, releasing whatever
    /// the coordinator had already set aside.
    fn fail_begin(&self, record: &ActionRecord);

    /// Index of the metadata server owning `fid`.
    fn mdt_index(&self, fid: &Fid) -> HsmResult<u32>;

    /// The readable-event descriptor, if one exists (kernel channel
    /// in non-blocking mode).
    fn raw_fd(&self) -> Option<RawFd>;

    /// Tears the registration down. Idempotent.
    fn close(&self);

    /// True once [`close`](Copytool::close) has run.
    fn is_closed(&self) -> bool;
}

/// The copy resource of one begun action. Not reentrant: callers must
/// serialize progress/end, which [`crate::action::ActionHandle`] does
/// with its internal lock.
pub trait CopyAction: Send {
    /// Reports progress over `extent`; doubles as the liveness
    /// heartbeat the coordinator watches.
    fn progress(&mut self, extent: Extent, total_length: u64, flags: u16) -> HsmResult<()>;

    /// Completes the action. Exactly once per resource.
    fn end(&mut self, extent: Extent, flags: u16, errval: i32) -> HsmResult<()>;

    /// Fid of the data file all I/O for this action should target.
    fn data_fid(&self) -> HsmResult<Fid>;

    /// Opens a descriptor for the data file. The caller owns it and
    /// must close it before ending the action.
    fn data_fd(&self) -> HsmResult<File>;

    /// Copies the canonical file's striping layout onto the data file
    /// with the released bit cleared.
    fn clone_layout_from_primary(&self) -> HsmResult<()>;
}

/// Kernel-backed coordinator transport.
pub struct KernelCopytool {
    handle: Mutex<CopytoolHandle>,
    async_fd: Option<AsyncFd<RawFd>>,
    mount: MountPoint,
    mount_fd: RawFd,
    closed: AtomicBool,
}

impl KernelCopytool {
    /// Registers with the coordinator for `mount`.
    ///
    /// `non_blocking` leaves the channel descriptor pollable and is
    /// required for use under an [`crate::agent::Agent`].
    pub fn register(mount: &MountPoint, non_blocking: bool) -> HsmResult<Self> {
        let handle =
            CopytoolHandle::register(mount, non_blocking).map_err(|source| {
                HsmError::Registration {
                    mount: mount.to_string(),
                    source,
                }
            })?;

        let raw_fd = handle.raw_fd();
        let mount_fd = handle.mount_raw_fd();
        let async_fd = if non_blocking {
            let fd = raw_fd.ok_or(HsmError::Closed)?;
            Some(AsyncFd::new(fd).map_err(HsmError::Io)?)
        } else {
            None
        };

        Ok(Self {
            handle: Mutex::new(handle),
            async_fd,
            mount: mount.clone(),
            mount_fd,
            closed: AtomicBool::new(false),
        })
    }

    /// The mount this transport serves.
    pub fn mount(&self) -> &MountPoint {
        &self.mount
    }
}

#[async_trait]
impl Copytool for KernelCopytool {
    async fn recv_batch(&self) -> HsmResult<ActionBatch> {
        let Some(async_fd) = self.async_fd.as_ref() else {
            return Err(HsmError::Protocol(
                "recv_batch requires a non-blocking registration".into(),
            ));
        };
        loop {
            if self.is_closed() {
                return Err(HsmError::Closed);
            }
            let mut guard = async_fd.readable().await.map_err(HsmError::Io)?;
            match self.try_recv() {
                Err(HsmError::WouldBlock) => {
                    guard.clear_ready();
                    continue;
                }
                other => return other,
            }
        }
    }

    fn try_recv(&self) -> HsmResult<ActionBatch> {
        if self.is_closed() {
            return Err(HsmError::Closed);
        }
        match self.handle.lock().recv() {
            Ok(Some(batch)) => Ok(batch),
            Ok(None) => {
                // Kernel-initiated shutdown message.
                self.close();
                Err(HsmError::Closed)
            }
            Err(e) => Err(e.into()),
        }
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
        let state = self
            .handle
            .lock()
            .copy_start(record, mdt_index, open_flags, is_error)?;
        Ok(Box::new(KernelCopyAction {
            state: Some(state),
        }))
    }

    fn fail_begin(&self, record: &ActionRecord) {
        if let Err(e) = self.handle.lock().copy_end_failed(record) {
            tracing::warn!(cookie = record.cookie, error = %e, "failing completion not delivered");
        }
    }

    fn mdt_index(&self, fid: &Fid) -> HsmResult<u32> {
        tierfs_sys::fid::mdt_index(self.mount_fd, fid).map_err(|source| HsmError::Resolution {
            fid: *fid,
            source,
        })
    }

    fn raw_fd(&self) -> Option<RawFd> {
        self.handle.lock().raw_fd()
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.handle.lock().close();
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

struct KernelCopyAction {
    state: Option<CopyActionState>,
}

impl KernelCopyAction {
    fn state(&self) -> HsmResult<&CopyActionState> {
        self.state.as_ref().ok_or(HsmError::Closed)
    }
}

impl CopyAction for KernelCopyAction {
    fn progress(&mut self, extent: Extent, total_length: u64, flags: u16) -> HsmResult<()> {
        self.state()?
            .progress(extent, total_length, flags)
            .map_err(Into::into)
    }

    fn end(&mut self, extent: Extent, flags: u16, errval: i32) -> HsmResult<()> {
        let state = self.state.take().ok_or(HsmError::Closed)?;
        state.end(extent, flags, errval).map_err(Into::into)
    }

    fn data_fid(&self) -> HsmResult<Fid> {
        Ok(self.state()?.data_fid())
    }

    fn data_fd(&self) -> HsmResult<File> {
        self.state()?.data_fd().map_err(Into::into)
    }

    fn clone_layout_from_primary(&self) -> HsmResult<()> {
        self.state()?.clone_layout_from_primary().map_err(Into::into)
    }
}
