//! Bulk user request submission.
//!
//! A user request is one variable-length ioctl argument: a fixed
//! header, then one item per target fid, then optional opaque data for
//! the archive backend.

use std::fs::{File, OpenOptions};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::AsRawFd;

use tierfs_core::{Extent, Fid, MountPoint, RequestKind};

use crate::error::{SysError, SysResult};
use crate::ioctl;
use crate::wire::{RawRequestHeader, RawUserItem};

/// Encodes a user request covering `fids` into an ioctl argument
/// buffer.
pub fn encode_user_request(kind: RequestKind, archive_id: u32, fids: &[Fid]) -> Vec<u8> {
    let header = RawRequestHeader {
        hr_action: kind as u32,
        hr_archive_id: archive_id,
        hr_flags: 0,
        hr_itemcount: fids.len() as u32,
        hr_data_len: 0,
    };

    let header_len = std::mem::size_of::<RawRequestHeader>();
    let item_len = std::mem::size_of::<RawUserItem>();
    let mut buf = vec![0u8; header_len + item_len * fids.len()];
    unsafe {
        std::ptr::write(buf.as_mut_ptr().cast::<RawRequestHeader>(), header);
        let mut item_ptr = buf.as_mut_ptr().add(header_len).cast::<RawUserItem>();
        for fid in fids {
            std::ptr::write(
                item_ptr,
                RawUserItem {
                    hui_fid: (*fid).into(),
                    hui_extent: Extent::whole_file().into(),
                },
            );
            item_ptr = item_ptr.add(1);
        }
    }
    buf
}

/// Submits one coordinator request covering all of `fids`.
pub fn submit(mount: &MountPoint, kind: RequestKind, archive_id: u32, fids: &[Fid]) -> SysResult<()> {
    let file: File = OpenOptions::new()
        .read(true)
        .custom_flags(libc::O_DIRECTORY)
        .open(mount.path())
        .map_err(SysError::Io)?;

    let mut buf = encode_user_request(kind, archive_id, fids);
    unsafe {
        ioctl::ioctl_arg(
            file.as_raw_fd(),
            ioctl::hsm_request_request(),
            buf.as_mut_ptr().cast::<RawRequestHeader>(),
        )
        .map_err(SysError::Io)?;
    }
    tracing::debug!(mount = %mount, %kind, archive_id, count = fids.len(), "request submitted");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoded_request_shape() {
        let fids = [Fid::new(0x200000401, 1, 0), Fid::new(0x200000401, 2, 0)];
        let buf = encode_user_request(RequestKind::Archive, 5, &fids);

        let header_len = std::mem::size_of::<RawRequestHeader>();
        let item_len = std::mem::size_of::<RawUserItem>();
        assert_eq!(buf.len(), header_len + 2 * item_len);

        let header = unsafe { std::ptr::read(buf.as_ptr().cast::<RawRequestHeader>()) };
        assert_eq!(header.hr_action, RequestKind::Archive as u32);
        assert_eq!(header.hr_archive_id, 5);
        assert_eq!(header.hr_itemcount, 2);

        let first = unsafe { std::ptr::read(buf.as_ptr().add(header_len).cast::<RawUserItem>()) };
        assert_eq!(Fid::from(first.hui_fid), fids[0]);
        assert_eq!(first.hui_extent.length, u64::MAX);
    }
}
