//! Mount roots.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::fid::Fid;

/// Name of the reserved fid-access directory at the filesystem root.
pub const DOT_TIERFS_DIR: &str = ".tierfs";

/// A validated TierFS mount root.
///
/// All fid-to-path translation is relative to a mount root; callers
/// construct one once and hand it to the coordinator/agent layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountPoint {
    root: PathBuf,
}

impl MountPoint {
    /// Creates a mount root from a directory path.
    ///
    /// The path is canonicalized so later joins cannot escape through
    /// symlinks. Whether the directory is actually a TierFS mount is
    /// discovered on first kernel call, not here.
    pub fn new(root: impl AsRef<Path>) -> Result<Self, crate::CoreError> {
        let root = root.as_ref();
        let canonical = root
            .canonicalize()
            .map_err(|source| crate::CoreError::BadMountRoot {
                path: root.to_path_buf(),
                source,
            })?;
        if !canonical.is_dir() {
            return Err(crate::CoreError::NotADirectory(canonical));
        }
        Ok(Self { root: canonical })
    }

    /// The root directory path.
    pub fn path(&self) -> &Path {
        &self.root
    }

    /// The open-by-fid path for `fid` under this mount.
    pub fn fid_path(&self, fid: &Fid) -> PathBuf {
        self.root.join(fid_relative_path(fid))
    }
}

impl fmt::Display for MountPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.root.display())
    }
}

/// The open-by-fid path for `fid`, relative to a mount root.
pub fn fid_relative_path(fid: &Fid) -> PathBuf {
    Path::new(DOT_TIERFS_DIR).join("fid").join(fid.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fid_path_layout() {
        let fid = Fid::new(0x200000401, 0x15, 0);
        let rel = fid_relative_path(&fid);
        assert_eq!(
            rel,
            Path::new(".tierfs/fid/[0x200000401:0x15:0x0]").to_path_buf()
        );
    }

    #[test]
    fn mount_point_requires_directory() {
        let mnt = MountPoint::new("/tmp").unwrap();
        assert!(mnt.path().is_absolute());
        assert!(MountPoint::new("/definitely/not/here").is_err());
    }
}
