//! `Range` header parsing.
//!
//! Only single byte ranges are served. Anything that cannot be turned into
//! a non-empty window inside the object is answered with 416.

use chunkstream_common::{ByteWindow, Error, Result};

/// A parsed `Range: bytes=...` value, before the object size is known.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeSpec {
    /// `bytes=start-end` or `bytes=start-`.
    From { start: u64, end: Option<u64> },
    /// `bytes=-length`: the last `length` bytes.
    Suffix(u64),
}

impl RangeSpec {
    /// Parse a header value. `None` means the value is malformed.
    pub fn parse(value: &str) -> Option<Self> {
        let ranges = value.trim().strip_prefix("bytes=")?;
        if ranges.contains(',') {
            return None;
        }

        let (start_str, end_str) = ranges.split_once('-')?;
        let start_str = start_str.trim();
        let end_str = end_str.trim();

        if start_str.is_empty() {
            let length = parse_position(end_str)?;
            if length == 0 {
                return None;
            }
            return Some(Self::Suffix(length));
        }

        let start = parse_position(start_str)?;
        let end = if end_str.is_empty() {
            None
        } else {
            Some(parse_position(end_str)?)
        };

        Some(Self::From { start, end })
    }

    /// Resolve against an object of `object_size` bytes.
    ///
    /// Ends past the object are clamped; a suffix longer than the object
    /// selects the whole object.
    pub fn resolve(self, object_size: u64) -> Result<ByteWindow> {
        if object_size == 0 {
            return Err(Error::range_not_satisfiable(object_size));
        }
        let last = object_size - 1;

        match self {
            Self::From { start, end } => {
                if start > last {
                    return Err(Error::range_not_satisfiable(object_size));
                }
                let end = end.map_or(last, |end| end.min(last));
                if end < start {
                    return Err(Error::range_not_satisfiable(object_size));
                }
                Ok(ByteWindow::new(start, end))
            }
            Self::Suffix(length) => {
                let start = object_size.saturating_sub(length);
                Ok(ByteWindow::new(start, last))
            }
        }
    }
}

/// Decimal digits only, no sign.
fn parse_position(value: &str) -> Option<u64> {
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    value.parse().ok()
}

/// Resolve an optional raw header against the object size.
///
/// Returns `Ok(None)` when no range was requested.
pub fn resolve_range_header(value: Option<&str>, object_size: u64) -> Result<Option<ByteWindow>> {
    match value {
        None => Ok(None),
        Some(raw) => RangeSpec::parse(raw)
            .ok_or_else(|| Error::range_not_satisfiable(object_size))?
            .resolve(object_size)
            .map(Some),
    }
}
