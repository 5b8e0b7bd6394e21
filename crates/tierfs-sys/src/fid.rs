//! Fid lookup and path resolution.
//!
//! Fids can be read straight out of the `trusted.tierfs.lma` attribute
//! (cheap, no server round trip) with an ioctl fallback for files the
//! attribute cannot be read from. The reverse mapping walks hard links
//! through the fid-to-path ioctl on the mount descriptor.

use std::fs::File;
use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::Path;

use tierfs_core::Fid;

use crate::error::{SysError, SysResult};
use crate::ioctl;
use crate::wire::{Fid2PathHeader, RawFid};
use crate::xattr;

/// Attribute carrying the metadata-attributes block, fid included.
pub const LMA_XATTR: &str = "trusted.tierfs.lma";

const LMA_HEADER_LEN: usize = 8; // compat + incompat flags
const LMA_FID_LEN: usize = 16;

/// Extracts the self-fid from a raw metadata-attributes blob.
///
/// The blob is stored little-endian on disk regardless of host order.
pub fn fid_from_lma(buf: &[u8]) -> SysResult<Fid> {
    if buf.len() < LMA_HEADER_LEN + LMA_FID_LEN {
        return Err(SysError::BadXattr {
            name: LMA_XATTR,
            reason: "too short for a fid",
        });
    }
    let fid = &buf[LMA_HEADER_LEN..LMA_HEADER_LEN + LMA_FID_LEN];
    Ok(Fid::new(
        u64::from_le_bytes(fid[0..8].try_into().unwrap()),
        u32::from_le_bytes(fid[8..12].try_into().unwrap()),
        u32::from_le_bytes(fid[12..16].try_into().unwrap()),
    ))
}

/// Returns the fid for `path`.
///
/// Fast path is the lma attribute; falls back to opening the file and
/// asking through the fid ioctl.
pub fn fid_of_path(path: &Path) -> SysResult<Fid> {
    let mut buf = [0u8; 64];
    match xattr::lget(path, LMA_XATTR, &mut buf) {
        Ok(n) => fid_from_lma(&buf[..n]),
        Err(e) => {
            tracing::debug!("lma lookup for {} failed ({}), using ioctl", path.display(), e);
            let file = File::open(path).map_err(SysError::Io)?;
            fid_of_fd(file.as_raw_fd())
        }
    }
}

/// Returns the fid for an open descriptor.
pub fn fid_of_fd(fd: RawFd) -> SysResult<Fid> {
    let mut buf = [0u8; 64];
    if let Ok(n) = xattr::fget(fd, LMA_XATTR, &mut buf) {
        return fid_from_lma(&buf[..n]);
    }
    let mut raw = RawFid::default();
    unsafe { ioctl::ioctl_arg(fd, ioctl::fid_of_fd_request(), &mut raw) }.map_err(SysError::Io)?;
    Ok(raw.into())
}

/// Resolves one pathname for `fid`, relative to the mount root.
///
/// `recno` and `linkno` are the kernel's iteration cursor: pass zeros
/// for the first link, then feed back the updated values to walk the
/// remaining hard links.
pub fn fid_to_path(
    mount_fd: RawFd,
    fid: &Fid,
    recno: &mut u64,
    linkno: &mut u32,
) -> SysResult<String> {
    const PATH_BUF: usize = 4096;
    let header_len = std::mem::size_of::<Fid2PathHeader>();
    let mut buf = vec![0u8; header_len + PATH_BUF];

    let header = Fid2PathHeader {
        gf_fid: (*fid).into(),
        gf_recno: *recno,
        gf_linkno: *linkno,
        gf_pathlen: PATH_BUF as u32,
    };
    unsafe {
        std::ptr::write(buf.as_mut_ptr().cast::<Fid2PathHeader>(), header);
        ioctl::ioctl_arg(
            mount_fd,
            ioctl::fid2path_request(),
            buf.as_mut_ptr().cast::<Fid2PathHeader>(),
        )
        .map_err(SysError::Io)?;
    }

    let updated = unsafe { std::ptr::read(buf.as_ptr().cast::<Fid2PathHeader>()) };
    *recno = updated.gf_recno;
    *linkno = updated.gf_linkno;

    let path_bytes = &buf[header_len..];
    let end = path_bytes
        .iter()
        .position(|&b| b == 0)
        .unwrap_or(path_bytes.len());
    Ok(String::from_utf8_lossy(&path_bytes[..end]).into_owned())
}

/// Returns every pathname referencing `fid` (one per hard link),
/// relative to the mount root.
pub fn fid_paths(mount_fd: RawFd, fid: &Fid) -> SysResult<Vec<String>> {
    let mut paths = Vec::new();
    let mut recno = 0u64;
    let mut linkno = 0u32;
    let mut prev = None;
    while prev != Some(linkno) {
        prev = Some(linkno);
        match fid_to_path(mount_fd, fid, &mut recno, &mut linkno) {
            Ok(p) => paths.push(p),
            Err(SysError::Io(e)) if e.raw_os_error() == Some(libc::ENOENT) && !paths.is_empty() => {
                break
            }
            Err(e) => return Err(e),
        }
    }
    Ok(paths)
}

/// Returns the index of the metadata server owning `fid`.
pub fn mdt_index(mount_fd: RawFd, fid: &Fid) -> SysResult<u32> {
    let mut raw: RawFid = (*fid).into();
    let rc = unsafe { ioctl::ioctl_arg(mount_fd, ioctl::get_mdt_index_request(), &mut raw) }
        .map_err(SysError::Io)?;
    Ok(rc as u32)
}

/// Convenience that surfaces `NotFound` for callers that care.
pub fn fid_of_path_checked(path: &Path) -> SysResult<Fid> {
    match fid_of_path(path) {
        Err(SysError::Io(e)) if e.kind() == io::ErrorKind::NotFound => Err(SysError::Io(
            io::Error::new(io::ErrorKind::NotFound, format!("{}: no fid", path.display())),
        )),
        other => other,
    }
}
