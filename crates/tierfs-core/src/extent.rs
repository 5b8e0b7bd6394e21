//! Byte extents.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Length sentinel meaning "to end of file".
///
/// The coordinator uses the maximum representable length to mean
/// "unbounded"; it must never be interpreted as a numeric length or
/// pushed through a signed conversion where it would turn negative.
pub const EOF_LENGTH: u64 = u64::MAX;

/// A byte range within a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Extent {
    /// Start offset in bytes.
    pub offset: u64,
    /// Length in bytes; [`EOF_LENGTH`] means "to end of file".
    pub length: u64,
}

impl Extent {
    /// Creates an extent covering `length` bytes from `offset`.
    pub fn new(offset: u64, length: u64) -> Self {
        Self { offset, length }
    }

    /// An extent covering a whole file from offset zero.
    pub fn whole_file() -> Self {
        Self {
            offset: 0,
            length: EOF_LENGTH,
        }
    }

    /// True if the length is the "to end of file" sentinel.
    pub fn is_unbounded(&self) -> bool {
        self.length == EOF_LENGTH
    }

    /// Converts the length to a signed width, preserving the sentinel.
    ///
    /// The EOF sentinel maps to `i64::MAX`; any other value that does
    /// not fit in an `i64` is an error rather than a wrapped negative.
    pub fn signed_length(&self) -> Result<i64, CoreError> {
        signed_extent_value(self.length)
    }
}

/// Converts an unsigned extent field to `i64`, mapping the EOF
/// sentinel to `i64::MAX` instead of letting it wrap negative.
pub fn signed_extent_value(value: u64) -> Result<i64, CoreError> {
    if value == EOF_LENGTH {
        return Ok(i64::MAX);
    }
    i64::try_from(value).map_err(|_| CoreError::ExtentOverflow(value))
}

/// Renders an extent length, using `EOF` for the unbounded sentinel.
pub fn length_str(length: u64) -> String {
    if length == EOF_LENGTH {
        "EOF".to_string()
    } else {
        length.to_string()
    }
}

impl fmt::Display for Extent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.offset, length_str(self.length))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn eof_sentinel_renders_as_eof() {
        let ext = Extent::whole_file();
        assert!(ext.is_unbounded());
        assert_eq!(ext.to_string(), "0,EOF");
        assert_eq!(length_str(EOF_LENGTH), "EOF");
    }

    #[test]
    fn eof_sentinel_survives_signed_conversion() {
        assert_eq!(signed_extent_value(EOF_LENGTH).unwrap(), i64::MAX);
    }

    #[test]
    fn oversized_length_is_an_error_not_negative() {
        let err = signed_extent_value(u64::MAX - 1).unwrap_err();
        assert!(matches!(err, CoreError::ExtentOverflow(_)));
    }

    #[test]
    fn bounded_extent_renders_numerically() {
        assert_eq!(Extent::new(4096, 1 << 20).to_string(), "4096,1048576");
    }

    proptest! {
        #[test]
        fn signed_conversion_never_negative(len in 0u64..=u64::MAX) {
            match signed_extent_value(len) {
                Ok(v) => prop_assert!(v >= 0),
                Err(CoreError::ExtentOverflow(v)) => prop_assert_eq!(v, len),
                Err(_) => prop_assert!(false, "unexpected error kind"),
            }
        }
    }
}
