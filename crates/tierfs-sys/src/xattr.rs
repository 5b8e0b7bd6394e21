//! Extended-attribute wrappers.
//!
//! Thin checked wrappers over the libc xattr calls; the filesystem
//! exposes fids and striping layouts through named attributes.

use std::ffi::CString;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::io::RawFd;
use std::path::Path;

/// How a set operation treats an existing attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetMode {
    /// Create or replace.
    Any,
    /// Fail with `EEXIST` if the attribute already exists.
    Create,
    /// Fail with `ENODATA` if the attribute does not exist.
    Replace,
}

impl SetMode {
    fn flags(self) -> libc::c_int {
        match self {
            SetMode::Any => 0,
            SetMode::Create => libc::XATTR_CREATE,
            SetMode::Replace => libc::XATTR_REPLACE,
        }
    }
}

fn cpath(path: &Path) -> io::Result<CString> {
    CString::new(path.as_os_str().as_bytes())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "path contains NUL"))
}

fn cname(name: &str) -> io::Result<CString> {
    CString::new(name).map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "name contains NUL"))
}

/// Reads `name` from `path` without following a final symlink.
pub fn lget(path: &Path, name: &str, buf: &mut [u8]) -> io::Result<usize> {
    let cpath = cpath(path)?;
    let cname = cname(name)?;
    let rc = unsafe {
        libc::lgetxattr(
            cpath.as_ptr(),
            cname.as_ptr(),
            buf.as_mut_ptr().cast(),
            buf.len(),
        )
    };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(rc as usize)
}

/// Reads `name` from an open descriptor.
pub fn fget(fd: RawFd, name: &str, buf: &mut [u8]) -> io::Result<usize> {
    let cname = cname(name)?;
    let rc = unsafe { libc::fgetxattr(fd, cname.as_ptr(), buf.as_mut_ptr().cast(), buf.len()) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(rc as usize)
}

/// Writes `name` on `path`.
pub fn lset(path: &Path, name: &str, value: &[u8], mode: SetMode) -> io::Result<()> {
    let cpath = cpath(path)?;
    let cname = cname(name)?;
    let rc = unsafe {
        libc::lsetxattr(
            cpath.as_ptr(),
            cname.as_ptr(),
            value.as_ptr().cast(),
            value.len(),
            mode.flags(),
        )
    };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Writes `name` on an open descriptor.
pub fn fset(fd: RawFd, name: &str, value: &[u8], mode: SetMode) -> io::Result<()> {
    let cname = cname(name)?;
    let rc = unsafe {
        libc::fsetxattr(
            fd,
            cname.as_ptr(),
            value.as_ptr().cast(),
            value.len(),
            mode.flags(),
        )
    };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}
