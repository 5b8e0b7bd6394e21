//! Striping layout blobs.
//!
//! A file's striping layout travels as an opaque blob in the
//! `tierfs.lov` extended attribute. Restore needs to read the layout
//! of the released primary file, clear its released bit, and stamp the
//! result onto the freshly opened data file before any bytes land.

use std::io;
use std::os::unix::io::RawFd;
use std::path::Path;

use crate::error::{SysError, SysResult};
use crate::xattr;

/// Attribute name carrying the striping layout.
pub const LOV_XATTR: &str = "tierfs.lov";

/// Layout blob magic, plain variant.
pub const LOV_MAGIC_V1: u32 = 0x0bd1_0bd0;
/// Layout blob magic, variant with a pool name.
pub const LOV_MAGIC_V3: u32 = 0x0bd3_0bd0;

/// Default striping pattern.
pub const PATTERN_RAID0: u32 = 0x001;
/// Pattern bit marking a file whose data has been evicted.
pub const PATTERN_RELEASED: u32 = 0x8000_0000;

/// Stripe-offset value meaning "let the allocator choose".
pub const STRIPE_OFFSET_ANY: u16 = u16::MAX;

/// Maximum pool name length, including no terminator.
pub const POOL_NAME_LEN: usize = 16;

const V1_LEN: usize = 32;
const V3_LEN: usize = V1_LEN + POOL_NAME_LEN;

/// A decoded striping layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StripeLayout {
    /// Striping pattern bits (see `PATTERN_*`).
    pub pattern: u32,
    /// Bytes per stripe.
    pub stripe_size: u32,
    /// Number of stripes.
    pub stripe_count: u16,
    /// Starting target index, [`STRIPE_OFFSET_ANY`] for unspecified.
    pub stripe_offset: u16,
    /// Target pool restriction, if any.
    pub pool: Option<String>,
}

impl StripeLayout {
    /// True if the released pattern bit is set.
    pub fn is_released(&self) -> bool {
        self.pattern & PATTERN_RELEASED != 0
    }

    /// Clears the released bit and resets the stripe offset to
    /// "unspecified", the shape a restore target must start with.
    pub fn clear_released(&mut self) {
        self.pattern &= !PATTERN_RELEASED;
        self.stripe_offset = STRIPE_OFFSET_ANY;
    }

    /// Decodes a layout blob.
    pub fn decode(buf: &[u8]) -> SysResult<Self> {
        if buf.len() < V1_LEN {
            return Err(SysError::Truncated {
                what: "layout blob",
                need: V1_LEN,
                have: buf.len(),
            });
        }
        let magic = u32::from_ne_bytes(buf[0..4].try_into().unwrap());
        let pattern = u32::from_ne_bytes(buf[4..8].try_into().unwrap());
        // object id/seq at 8..24 are kernel-owned; skipped.
        let stripe_size = u32::from_ne_bytes(buf[24..28].try_into().unwrap());
        let stripe_count = u16::from_ne_bytes(buf[28..30].try_into().unwrap());
        let stripe_offset = u16::from_ne_bytes(buf[30..32].try_into().unwrap());

        let pool = match magic {
            LOV_MAGIC_V1 => None,
            LOV_MAGIC_V3 => {
                if buf.len() < V3_LEN {
                    return Err(SysError::Truncated {
                        what: "layout pool name",
                        need: V3_LEN,
                        have: buf.len(),
                    });
                }
                let raw = &buf[V1_LEN..V3_LEN];
                let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
                if end == 0 {
                    None
                } else {
                    Some(String::from_utf8_lossy(&raw[..end]).into_owned())
                }
            }
            other => return Err(SysError::BadLayoutMagic(other)),
        };

        Ok(Self {
            pattern,
            stripe_size,
            stripe_count,
            stripe_offset,
            pool,
        })
    }

    /// Encodes the layout for the `tierfs.lov` attribute.
    ///
    /// Only the header is written; per-target entries are allocated by
    /// the filesystem when the layout is instantiated.
    pub fn encode(&self) -> Vec<u8> {
        let v3 = self.pool.is_some();
        let mut buf = vec![0u8; if v3 { V3_LEN } else { V1_LEN }];
        let magic = if v3 { LOV_MAGIC_V3 } else { LOV_MAGIC_V1 };
        buf[0..4].copy_from_slice(&magic.to_ne_bytes());
        buf[4..8].copy_from_slice(&self.pattern.to_ne_bytes());
        buf[24..28].copy_from_slice(&self.stripe_size.to_ne_bytes());
        buf[28..30].copy_from_slice(&self.stripe_count.to_ne_bytes());
        buf[30..32].copy_from_slice(&self.stripe_offset.to_ne_bytes());
        if let Some(pool) = &self.pool {
            let bytes = pool.as_bytes();
            let n = bytes.len().min(POOL_NAME_LEN - 1);
            buf[V1_LEN..V1_LEN + n].copy_from_slice(&bytes[..n]);
        }
        buf
    }
}

/// Reads the striping layout of `path`.
pub fn get_layout(path: &Path) -> SysResult<StripeLayout> {
    // Large enough for either header plus maximum per-target entries.
    let mut buf = vec![0u8; 4096];
    let n = xattr::lget(path, LOV_XATTR, &mut buf).map_err(SysError::Io)?;
    StripeLayout::decode(&buf[..n])
}

/// Stamps `layout` onto a freshly created file that has none yet.
pub fn set_layout_fd(fd: RawFd, layout: &StripeLayout) -> SysResult<()> {
    xattr::fset(fd, LOV_XATTR, &layout.encode(), xattr::SetMode::Create).map_err(SysError::Io)
}

/// Copies the layout of `src` onto the open descriptor `dst_fd`,
/// clearing the released bit on the way.
pub fn copy_layout(src: &Path, dst_fd: RawFd) -> SysResult<()> {
    let mut layout = get_layout(src)?;
    layout.clear_released();
    set_layout_fd(dst_fd, &layout)
}

/// Convenience for callers that only need the error text.
pub fn layout_io_error(e: SysError) -> io::Error {
    match e {
        SysError::Io(e) => e,
        other => io::Error::new(io::ErrorKind::InvalidData, other.to_string()),
    }
}
