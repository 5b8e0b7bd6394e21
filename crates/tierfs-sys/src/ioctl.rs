//! ioctl request numbers and a checked ioctl wrapper.
//!
//! Request numbers follow the usual Linux `_IOC` encoding under the
//! filesystem's `'f'` magic. The numeric slots match the kernel's
//! `tierfs_user.h`.

use std::io;
use std::os::unix::io::RawFd;

const IOC_NRBITS: u32 = 8;
const IOC_TYPEBITS: u32 = 8;
const IOC_SIZEBITS: u32 = 14;

const IOC_NRSHIFT: u32 = 0;
const IOC_TYPESHIFT: u32 = IOC_NRSHIFT + IOC_NRBITS;
const IOC_SIZESHIFT: u32 = IOC_TYPESHIFT + IOC_TYPEBITS;
const IOC_DIRSHIFT: u32 = IOC_SIZESHIFT + IOC_SIZEBITS;

const IOC_WRITE: u32 = 1;
const IOC_READ: u32 = 2;

const fn ioc(dir: u32, nr: u32, size: usize) -> libc::c_ulong {
    ((dir << IOC_DIRSHIFT)
        | ((b'f' as u32) << IOC_TYPESHIFT)
        | (nr << IOC_NRSHIFT)
        | ((size as u32) << IOC_SIZESHIFT)) as libc::c_ulong
}

/// `_IOR('f', nr, T)`
pub const fn ior<T>(nr: u32) -> libc::c_ulong {
    ioc(IOC_READ, nr, std::mem::size_of::<T>())
}

/// `_IOW('f', nr, T)`
pub const fn iow<T>(nr: u32) -> libc::c_ulong {
    ioc(IOC_WRITE, nr, std::mem::size_of::<T>())
}

/// `_IOWR('f', nr, T)`
pub const fn iowr<T>(nr: u32) -> libc::c_ulong {
    ioc(IOC_READ | IOC_WRITE, nr, std::mem::size_of::<T>())
}

/// Issues an ioctl carrying `arg`, mapping a negative return to the
/// thread's errno.
///
/// # Safety
///
/// `request` must describe the layout of `T` and the kernel side must
/// not write beyond `arg`.
pub unsafe fn ioctl_arg<T>(fd: RawFd, request: libc::c_ulong, arg: *mut T) -> io::Result<i32> {
    let rc = libc::ioctl(fd, request, arg);
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(rc)
}

/// Fid-for-open-file request (`wire::RawFid`).
pub const fn fid_of_fd_request() -> libc::c_ulong {
    ior::<crate::wire::RawFid>(173)
}

/// Fid-to-path translation request (`wire::Fid2PathHeader` + buffer).
pub const fn fid2path_request() -> libc::c_ulong {
    iowr::<crate::wire::Fid2PathHeader>(150)
}

/// HSM file state query (`wire::RawUserState`).
pub const fn hsm_state_get_request() -> libc::c_ulong {
    ior::<crate::wire::RawUserState>(211)
}

/// Copytool registration (`wire::KernelComm`).
pub const fn hsm_ct_start_request() -> libc::c_ulong {
    iow::<crate::wire::KernelComm>(213)
}

/// Copy-action begin (`wire::RawCopy`).
pub const fn hsm_copy_start_request() -> libc::c_ulong {
    iow::<crate::wire::RawCopy>(214)
}

/// Copy-action end (`wire::RawCopy`).
pub const fn hsm_copy_end_request() -> libc::c_ulong {
    iow::<crate::wire::RawCopy>(215)
}

/// Copy-action progress report (`wire::RawProgress`).
pub const fn hsm_progress_request() -> libc::c_ulong {
    iow::<crate::wire::RawProgress>(216)
}

/// Bulk user request submission (`wire::RawRequestHeader` + items).
pub const fn hsm_request_request() -> libc::c_ulong {
    iow::<crate::wire::RawRequestHeader>(217)
}

/// Owning-MDT index lookup for a fid (`wire::RawFid`, index in return value).
pub const fn get_mdt_index_request() -> libc::c_ulong {
    ior::<crate::wire::RawFid>(247)
}
