//! Line checksum validation and field extraction
//!
//! Every line inside a frame carries a one-byte checksum in its last position.
//! Two encodings exist and neither carries a version tag, so the encoding is
//! guessed from which checksum span matches:
//!
//! - **Historic**: the checksum covers everything except the last two bytes (the
//!   separator before the checksum and the checksum itself).
//! - **Standard**: the checksum covers everything except the checksum byte.
//!
//! The historic test runs first. A line can pass both tests by coincidence, so the
//! detected encoding is informational only.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Line encoding inferred from the checksum span
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LineEncoding {
    /// Checksum excludes the trailing separator
    Historic,
    /// Checksum includes the trailing separator
    Standard,
}

impl fmt::Display for LineEncoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LineEncoding::Historic => write!(f, "historic"),
            LineEncoding::Standard => write!(f, "standard"),
        }
    }
}

/// Result of decoding a single line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineOutcome {
    /// Checksum and shape both valid
    Field {
        name: String,
        value: String,
        encoding: LineEncoding,
    },
    /// Blank line (frames start with a line feed)
    Empty,
    /// Neither checksum span matched
    BadChecksum,
    /// Checksum matched but the line is not `NAME SEP VALUE SEP C`
    Malformed,
}

/// Teleinfo checksum of a byte span
///
/// Sum of the bytes, masked to six bits, shifted into the printable range.
pub fn checksum(span: &[u8]) -> u8 {
    let sum = span.iter().fold(0u32, |acc, b| acc.wrapping_add(u32::from(*b)));
    ((sum & 0x3F) as u8) + 0x20
}

/// Find which encoding (if any) validates this line
pub fn detect_encoding(line: &[u8]) -> Option<LineEncoding> {
    let (&check, body) = line.split_last()?;

    if let Some(span) = body.len().checked_sub(1).map(|n| &body[..n]) {
        if checksum(span) == check {
            return Some(LineEncoding::Historic);
        }
    }

    if checksum(body) == check {
        return Some(LineEncoding::Standard);
    }

    None
}

/// Validate a line and extract its field
///
/// `line` must already have its trailing carriage return removed.
pub fn decode_line(line: &[u8]) -> LineOutcome {
    if line.is_empty() {
        return LineOutcome::Empty;
    }

    let encoding = match detect_encoding(line) {
        Some(encoding) => encoding,
        None => return LineOutcome::BadChecksum,
    };

    match split_fields(line) {
        Some((name, value)) => LineOutcome::Field {
            name: String::from_utf8_lossy(name).into_owned(),
            value: String::from_utf8_lossy(value).into_owned(),
            encoding,
        },
        None => LineOutcome::Malformed,
    }
}

/// Split `NAME SEP VALUE SEP C` into name and value
///
/// The name ends at the first separator; the value runs up to the separator that
/// precedes the checksum byte and may itself contain separators.
fn split_fields(line: &[u8]) -> Option<(&[u8], &[u8])> {
    let name_end = line.iter().position(|b| is_separator(*b))?;
    if name_end == 0 {
        return None;
    }

    let last_sep = line.len().checked_sub(2)?;
    if last_sep <= name_end || !is_separator(line[last_sep]) {
        // The separator after the name doubles as the one before the checksum
        // only when there is no value at all, which the shape does not allow.
        return None;
    }

    Some((&line[..name_end], &line[name_end + 1..last_sep]))
}

fn is_separator(b: u8) -> bool {
    b == b' ' || b == b'\t'
}
