//! Copytool registration and the copy-action ioctls.
//!
//! A registered copytool owns two kernel resources: the mount
//! descriptor it issues action ioctls on, and the read end of the
//! message pipe the coordinator pushes action lists through. Both are
//! torn down by [`CopytoolHandle::close`], which is idempotent.

use std::fs::{File, OpenOptions};
use std::io::ErrorKind;
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::sync::atomic::{AtomicU64, Ordering};

use tierfs_core::{ActionKind, Extent, Fid, MountPoint};

use crate::error::{SysError, SysResult};
use crate::ioctl;
use crate::kuc;
use crate::wire::{self, ActionBatch, ActionRecord, KernelComm, RawCopy, RawProgress};
use crate::{fid, layout};

/// Open flag requesting delayed layout instantiation, so a restore can
/// stamp the original striping onto the data file before first write.
pub const LOV_DELAY_CREATE: i32 = libc::O_NOCTTY | libc::O_ASYNC;

static VOLATILE_SEQ: AtomicU64 = AtomicU64::new(0);

/// One live copytool registration.
#[derive(Debug)]
pub struct CopytoolHandle {
    mount: MountPoint,
    mount_file: File,
    channel: Option<File>,
    comm: KernelComm,
}

impl CopytoolHandle {
    /// Registers a copytool for the filesystem mounted at `mount`.
    ///
    /// With `non_blocking` the channel descriptor is left non-blocking
    /// so it can sit in a readiness multiplexer; otherwise
    /// [`recv`](Self::recv) blocks until a batch arrives.
    pub fn register(mount: &MountPoint, non_blocking: bool) -> SysResult<Self> {
        let mount_file = OpenOptions::new()
            .read(true)
            .custom_flags(libc::O_DIRECTORY)
            .open(mount.path())
            .map_err(SysError::Io)?;

        let mut fds = [0 as libc::c_int; 2];
        let rc = unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) };
        if rc < 0 {
            return Err(SysError::Io(std::io::Error::last_os_error()));
        }
        // Ownership of both ends, so error paths below close them.
        let read_end = unsafe { OwnedFd::from_raw_fd(fds[0]) };
        let write_end = unsafe { OwnedFd::from_raw_fd(fds[1]) };

        if non_blocking {
            set_nonblocking(read_end.as_raw_fd())?;
        }

        let mut comm = KernelComm {
            lk_wfd: write_end.as_raw_fd() as u32,
            lk_rfd: read_end.as_raw_fd() as u32,
            lk_uid: unsafe { libc::getuid() },
            lk_group: wire::KUC_GRP_HSM,
            lk_data: 0, // all archive backends
            lk_flags: 0,
        };
        unsafe {
            ioctl::ioctl_arg(
                mount_file.as_raw_fd(),
                ioctl::hsm_ct_start_request(),
                &mut comm,
            )
            .map_err(SysError::Io)?;
        }
        // The kernel holds its own reference to the write end now.
        drop(write_end);

        tracing::debug!(mount = %mount, non_blocking, "copytool registered");
        Ok(Self {
            mount: mount.clone(),
            mount_file,
            channel: Some(File::from(read_end)),
            comm,
        })
    }

    /// The mount this registration belongs to.
    pub fn mount(&self) -> &MountPoint {
        &self.mount
    }

    /// The readable-event descriptor of the message channel.
    pub fn raw_fd(&self) -> Option<RawFd> {
        self.channel.as_ref().map(|f| f.as_raw_fd())
    }

    /// The mount descriptor action ioctls are issued on.
    pub fn mount_raw_fd(&self) -> RawFd {
        self.mount_file.as_raw_fd()
    }

    /// Receives the next action batch.
    ///
    /// Returns `Ok(None)` when the kernel sent a shutdown message. A
    /// `WouldBlock` I/O error means no batch is pending (non-blocking
    /// registration only).
    pub fn recv(&self) -> SysResult<Option<ActionBatch>> {
        let Some(channel) = self.channel.as_ref() else {
            return Err(SysError::Io(ErrorKind::NotConnected.into()));
        };
        // `&File` is `Read`, so receiving borrows the channel immutably
        // and can run alongside ioctls on the mount descriptor.
        let mut reader: &File = channel;
        let (header, payload) = kuc::read_message(&mut reader)?;
        if header.transport != kuc::KUC_TRANSPORT_HSM {
            return Err(SysError::BadMessage(format!(
                "unexpected transport {}",
                header.transport
            )));
        }
        match header.msgtype {
            kuc::HMT_ACTION_LIST => Ok(Some(wire::decode_action_list(&payload)?)),
            kuc::HMT_SHUTDOWN => Ok(None),
            other => Err(SysError::BadMessage(format!("unexpected message type {other}"))),
        }
    }

    /// Unregisters from the coordinator. Safe to call repeatedly.
    pub fn close(&mut self) {
        if self.channel.take().is_none() {
            return;
        }
        let mut comm = self.comm;
        comm.lk_flags = wire::LK_FLG_STOP;
        let rc = unsafe {
            ioctl::ioctl_arg(
                self.mount_file.as_raw_fd(),
                ioctl::hsm_ct_start_request(),
                &mut comm,
            )
        };
        if let Err(e) = rc {
            tracing::warn!(mount = %self.mount, error = %e, "copytool unregister failed");
        } else {
            tracing::debug!(mount = %self.mount, "copytool unregistered");
        }
    }

    /// True once [`close`](Self::close) has run.
    pub fn is_closed(&self) -> bool {
        self.channel.is_none()
    }

    /// Acknowledges `record` to the coordinator and prepares its data
    /// file, returning the per-action copy state.
    ///
    /// For a restore (`mdt_index`/`LOV_DELAY_CREATE` supplied by the
    /// caller) a volatile data file is created first so the original
    /// layout can be stamped on before instantiation.
    pub fn copy_start(
        &self,
        record: &ActionRecord,
        mdt_index: i32,
        open_flags: i32,
        is_error: bool,
    ) -> SysResult<CopyActionState> {
        if self.channel.is_none() {
            return Err(SysError::Io(ErrorKind::NotConnected.into()));
        }

        let mut raw = RawCopy {
            hc_hai: record.to_raw(),
            ..RawCopy::default()
        };

        let mut data_file = None;
        if record.action == ActionKind::Restore && !is_error {
            let file = self.create_volatile(mdt_index, open_flags)?;
            let dfid = fid::fid_of_fd(file.as_raw_fd())?;
            raw.hc_hai.hai_dfid = dfid.into();
            data_file = Some(file);
        }

        unsafe {
            ioctl::ioctl_arg(
                self.mount_file.as_raw_fd(),
                ioctl::hsm_copy_start_request(),
                &mut raw,
            )
            .map_err(SysError::Io)?;
        }

        Ok(CopyActionState {
            mount: self.mount.clone(),
            mount_file: self.mount_file.try_clone().map_err(SysError::Io)?,
            raw,
            cookie: record.cookie,
            fid: record.fid,
            data_file,
        })
    }

    /// Reports a failing completion for a record whose copy-start never
    /// produced usable state, releasing coordinator-side resources.
    pub fn copy_end_failed(&self, record: &ActionRecord) -> SysResult<()> {
        let mut raw = RawCopy {
            hc_hai: record.to_raw(),
            hc_errval: 1, // EPERM-class generic failure; coordinator only needs non-zero
            ..RawCopy::default()
        };
        raw.hc_hai.hai_extent = Extent::new(0, 0).into();
        unsafe {
            ioctl::ioctl_arg(
                self.mount_file.as_raw_fd(),
                ioctl::hsm_copy_end_request(),
                &mut raw,
            )
            .map_err(SysError::Io)?;
        }
        Ok(())
    }

    fn create_volatile(&self, mdt_index: i32, open_flags: i32) -> SysResult<File> {
        let seq = VOLATILE_SEQ.fetch_add(1, Ordering::Relaxed);
        let name = volatile_name(mdt_index, std::process::id(), seq);
        let path = self.mount.path().join(name);
        OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .mode(0o600)
            .custom_flags(libc::O_NOFOLLOW | open_flags)
            .open(path)
            .map_err(SysError::Io)
    }
}

impl Drop for CopytoolHandle {
    fn drop(&mut self) {
        self.close();
    }
}

fn volatile_name(mdt_index: i32, pid: u32, seq: u64) -> String {
    // The leading marker tells the filesystem the file is unlinked-on-
    // close scratch space; the mdt index steers placement.
    format!(".tfs_volatile:{:04x}:{:08x}:{:08x}", mdt_index.max(0), pid, seq)
}

fn set_nonblocking(fd: RawFd) -> SysResult<()> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(SysError::Io(std::io::Error::last_os_error()));
    }
    let rc = unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) };
    if rc < 0 {
        return Err(SysError::Io(std::io::Error::last_os_error()));
    }
    Ok(())
}

/// Kernel-side state of one begun copy action.
#[derive(Debug)]
pub struct CopyActionState {
    mount: MountPoint,
    mount_file: File,
    raw: RawCopy,
    cookie: u64,
    fid: Fid,
    data_file: Option<File>,
}

impl CopyActionState {
    /// The fid of the data file for this action.
    pub fn data_fid(&self) -> Fid {
        self.raw.hc_hai.hai_dfid.into()
    }

    /// Opens (or duplicates) a descriptor for the data file.
    ///
    /// The caller owns the descriptor and must close it before the
    /// action is ended.
    pub fn data_fd(&self) -> SysResult<File> {
        if let Some(file) = self.data_file.as_ref() {
            return file.try_clone().map_err(SysError::Io);
        }
        let dfid = self.data_fid();
        let target = if dfid.is_zero() { self.fid } else { dfid };
        File::open(self.mount.fid_path(&target)).map_err(SysError::Io)
    }

    /// Reports progress over `extent` to the coordinator.
    pub fn progress(&self, extent: Extent, total_length: u64, flags: u16) -> SysResult<()> {
        tracing::trace!(
            cookie = self.cookie,
            %extent,
            total_length,
            "progress report"
        );
        let mut raw = RawProgress {
            hp_fid: self.fid.into(),
            hp_cookie: self.cookie,
            hp_extent: extent.into(),
            hp_flags: flags,
            hp_errval: 0,
            ..RawProgress::default()
        };
        unsafe {
            ioctl::ioctl_arg(
                self.mount_file.as_raw_fd(),
                ioctl::hsm_progress_request(),
                &mut raw,
            )
            .map_err(SysError::Io)?;
        }
        Ok(())
    }

    /// Completes the action.
    ///
    /// For a successful restore the filesystem swaps the data file's
    /// layout into the canonical file and drops the exclusivity lock;
    /// all writes to the data file must be flushed before this call.
    pub fn end(mut self, extent: Extent, flags: u16, errval: i32) -> SysResult<()> {
        // The volatile descriptor must not outlive the swap.
        self.data_file.take();

        let mut raw = self.raw;
        raw.hc_hai.hai_extent = extent.into();
        raw.hc_flags = flags;
        raw.hc_errval = errval.unsigned_abs().min(u16::MAX as u32) as u16;
        unsafe {
            ioctl::ioctl_arg(
                self.mount_file.as_raw_fd(),
                ioctl::hsm_copy_end_request(),
                &mut raw,
            )
            .map_err(SysError::Io)?;
        }
        Ok(())
    }

    /// Copies the striping layout of the canonical (released) file onto
    /// the data file, clearing the released bit.
    pub fn clone_layout_from_primary(&self) -> SysResult<()> {
        let src = self.mount.fid_path(&self.fid);
        let Some(data) = self.data_file.as_ref() else {
            return Err(SysError::Io(ErrorKind::InvalidInput.into()));
        };
        layout::copy_layout(&src, data.as_raw_fd())
    }
}
