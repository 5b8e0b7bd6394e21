//! Bulk request submission to the coordinator.
//!
//! Users hand over arbitrarily long fid lists; the coordinator's ioctl
//! takes a bounded batch, so the list is filtered down to usable fids
//! and split into chunks of [`MAX_REQUEST_BATCH`] before submission.

use tierfs_core::{Fid, MountPoint, RequestKind};

use crate::error::HsmResult;

/// Largest number of fids submitted in one coordinator request.
pub const MAX_REQUEST_BATCH: usize = 50;

/// Outcome of a bulk submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmitCount {
    /// Fids the caller asked for.
    pub requested: usize,
    /// Fids actually submitted after filtering.
    pub submitted: usize,
}

/// Submits `kind` for every usable fid in `fids`, in chunks.
///
/// The zero fid and the reserved internal directory are skipped with a
/// warning rather than failing the whole request; directory scans pick
/// both up routinely. A chunk failure aborts the remainder, so
/// `submitted` counts only what the coordinator accepted.
pub fn submit(
    mount: &MountPoint,
    kind: RequestKind,
    archive_id: u32,
    fids: &[Fid],
) -> HsmResult<SubmitCount> {
    submit_with(kind, fids, |chunk| {
        tierfs_sys::request::submit(mount, kind, archive_id, chunk).map_err(Into::into)
    })
}

/// Archives `fids` into `archive_id`.
pub fn request_archive(mount: &MountPoint, archive_id: u32, fids: &[Fid]) -> HsmResult<SubmitCount> {
    submit(mount, RequestKind::Archive, archive_id, fids)
}

/// Restores `fids` from their archive.
pub fn request_restore(mount: &MountPoint, archive_id: u32, fids: &[Fid]) -> HsmResult<SubmitCount> {
    submit(mount, RequestKind::Restore, archive_id, fids)
}

/// Releases the primary-storage copies of `fids`.
pub fn request_release(mount: &MountPoint, archive_id: u32, fids: &[Fid]) -> HsmResult<SubmitCount> {
    submit(mount, RequestKind::Release, archive_id, fids)
}

/// Removes the archived copies of `fids`.
pub fn request_remove(mount: &MountPoint, archive_id: u32, fids: &[Fid]) -> HsmResult<SubmitCount> {
    submit(mount, RequestKind::Remove, archive_id, fids)
}

/// Cancels outstanding requests for `fids`.
pub fn request_cancel(mount: &MountPoint, archive_id: u32, fids: &[Fid]) -> HsmResult<SubmitCount> {
    submit(mount, RequestKind::Cancel, archive_id, fids)
}

fn submit_with<F>(kind: RequestKind, fids: &[Fid], mut send: F) -> HsmResult<SubmitCount>
where
    F: FnMut(&[Fid]) -> HsmResult<()>,
{
    let requested = fids.len();
    let usable: Vec<Fid> = fids
        .iter()
        .copied()
        .filter(|fid| {
            if fid.is_usable() {
                true
            } else {
                tracing::warn!(%fid, %kind, "skipping unusable fid");
                false
            }
        })
        .collect();

    let mut submitted = 0;
    for chunk in usable.chunks(MAX_REQUEST_BATCH) {
        send(chunk)?;
        submitted += chunk.len();
    }
    tracing::debug!(%kind, requested, submitted, "bulk request done");
    Ok(SubmitCount {
        requested,
        submitted,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HsmError;

    fn fid(oid: u32) -> Fid {
        Fid::new(0x200000401, oid, 0)
    }

    #[test]
    fn unusable_fids_are_filtered_not_fatal() {
        let dot: Fid = "[0x200000002:0x1:0x0]".parse().unwrap();
        let fids = vec![fid(1), Fid::zero(), dot, fid(2)];
        let mut chunks = Vec::new();
        let count = submit_with(RequestKind::Archive, &fids, |chunk| {
            chunks.push(chunk.to_vec());
            Ok(())
        })
        .unwrap();
        assert_eq!(count, SubmitCount { requested: 4, submitted: 2 });
        assert_eq!(chunks, vec![vec![fid(1), fid(2)]]);
    }

    #[test]
    fn long_lists_are_chunked() {
        let fids: Vec<Fid> = (1..=120).map(fid).collect();
        let mut sizes = Vec::new();
        let count = submit_with(RequestKind::Release, &fids, |chunk| {
            sizes.push(chunk.len());
            Ok(())
        })
        .unwrap();
        assert_eq!(sizes, vec![50, 50, 20]);
        assert_eq!(count.submitted, 120);
    }

    #[test]
    fn empty_list_submits_nothing() {
        let mut calls = 0;
        let count = submit_with(RequestKind::Restore, &[], |_| {
            calls += 1;
            Ok(())
        })
        .unwrap();
        assert_eq!(calls, 0);
        assert_eq!(count, SubmitCount { requested: 0, submitted: 0 });
    }

    #[test]
    fn chunk_failure_aborts_remainder() {
        let fids: Vec<Fid> = (1..=120).map(fid).collect();
        let mut calls = 0;
        let err = submit_with(RequestKind::Remove, &fids, |_| {
            calls += 1;
            if calls == 2 {
                Err(HsmError::Protocol("request rejected".into()))
            } else {
                Ok(())
            }
        })
        .unwrap_err();
        assert!(matches!(err, HsmError::Protocol(_)));
        assert_eq!(calls, 2);
    }
}
