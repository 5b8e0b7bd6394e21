//! File identifiers.
//!
//! A [`Fid`] names a file independently of its path: a 64-bit sequence,
//! a 32-bit object id within the sequence, and a 32-bit version. The
//! textual form is `[0x<seq>:0x<oid>:0x<ver>]`, matching what the
//! filesystem prints in its own tooling.

use std::fmt;
use std::str::FromStr;

use serde::de::{self, Deserialize, Deserializer, Visitor};
use serde::{Serialize, Serializer};

use crate::error::CoreError;

/// Fixed-size opaque file identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Fid {
    /// Sequence number, allocated per metadata server.
    pub seq: u64,
    /// Object id within the sequence.
    pub oid: u32,
    /// Version of the object.
    pub ver: u32,
}

/// The reserved `.tierfs` directory fid.
const DOT_TIERFS: Fid = Fid {
    seq: 0x2_0000_0002,
    oid: 0x1,
    ver: 0x0,
};

impl Fid {
    /// Creates a fid from its raw parts.
    pub fn new(seq: u64, oid: u32, ver: u32) -> Self {
        Self { seq, oid, ver }
    }

    /// The distinguished "no file" identifier (all fields zero).
    pub fn zero() -> Self {
        Self::default()
    }

    /// True if this is the "no file" identifier.
    pub fn is_zero(&self) -> bool {
        self.seq == 0 && self.oid == 0 && self.ver == 0
    }

    /// True if this is the reserved `.tierfs` internal directory.
    pub fn is_dot_tierfs(&self) -> bool {
        *self == DOT_TIERFS
    }

    /// True if the fid names a regular, user-visible file.
    ///
    /// The zero fid and the reserved internal directory are not usable
    /// targets for HSM requests.
    pub fn is_usable(&self) -> bool {
        !self.is_zero() && !self.is_dot_tierfs()
    }
}

impl fmt::Display for Fid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[0x{:x}:0x{:x}:0x{:x}]", self.seq, self.oid, self.ver)
    }
}

impl FromStr for Fid {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let inner = s
            .strip_prefix('[')
            .and_then(|rest| rest.strip_suffix(']'))
            .unwrap_or(s);

        let mut parts = inner.split(':');
        let seq = parse_hex_u64(parts.next(), s)?;
        let oid = parse_hex_u64(parts.next(), s)?;
        let ver = parse_hex_u64(parts.next(), s)?;
        if parts.next().is_some() {
            return Err(CoreError::InvalidFid(s.to_string()));
        }
        if oid > u64::from(u32::MAX) || ver > u64::from(u32::MAX) {
            return Err(CoreError::InvalidFid(s.to_string()));
        }
        Ok(Fid {
            seq,
            oid: oid as u32,
            ver: ver as u32,
        })
    }
}

fn parse_hex_u64(part: Option<&str>, whole: &str) -> Result<u64, CoreError> {
    let part = part.ok_or_else(|| CoreError::InvalidFid(whole.to_string()))?;
    let digits = part.strip_prefix("0x").unwrap_or(part);
    u64::from_str_radix(digits, 16).map_err(|_| CoreError::InvalidFid(whole.to_string()))
}

impl Serialize for Fid {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Fid {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct FidVisitor;

        impl Visitor<'_> for FidVisitor {
            type Value = Fid;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a fid string like [0x200000401:0x1:0x0]")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Fid, E> {
                v.parse().map_err(de::Error::custom)
            }
        }

        deserializer.deserialize_str(FidVisitor)
    }
}
