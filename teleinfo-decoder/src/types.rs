//! Core types for the teleinfo decoder library
//!
//! This module defines the fundamental types the decoder emits when processing a
//! teleinfo byte stream. The decoder only turns bytes into field maps - it does not
//! track counters across frames or decide where energy goes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Timestamp type used throughout the decoder
pub type Timestamp = DateTime<Utc>;

/// Result type for decoder operations
pub type Result<T> = std::result::Result<T, DecoderError>;

/// Start-of-frame marker (STX)
pub const FRAME_START: u8 = 0x02;

/// End-of-frame marker (ETX)
pub const FRAME_END: u8 = 0x03;

/// Errors that can occur while reading frames
///
/// Line-level noise (bad checksum, unexpected shape) is not an error: such lines are
/// dropped and counted in [`crate::DecodeStats`].
#[derive(Debug, thiserror::Error)]
pub enum DecoderError {
    #[error("Frame exceeded {limit} bytes without an end marker ({len} bytes buffered)")]
    FrameTooLarge { len: usize, limit: usize },

    #[error("Transport reached end of stream")]
    EndOfStream,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl DecoderError {
    /// True if the reader can keep going after this error
    ///
    /// An oversized frame has already been discarded and the reader is hunting for
    /// the next start marker; everything else means the transport is gone.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, DecoderError::FrameTooLarge { .. })
    }
}

/// Raw frame content between the start and end markers (both excluded)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    bytes: Vec<u8>,
}

impl Frame {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Iterate over the newline-delimited lines of the frame
    ///
    /// Trailing carriage control (`\r`) is stripped from each line.
    pub fn lines(&self) -> impl Iterator<Item = &[u8]> {
        self.bytes.split(|b| *b == b'\n').map(|line| match line {
            [head @ .., b'\r'] => head,
            _ => line,
        })
    }
}

/// Field name → value pairs decoded from one frame
///
/// Built once per frame and never mutated afterwards. When a name appears twice in
/// the same frame the later line wins.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FieldMap {
    fields: BTreeMap<String, String>,
}

impl FieldMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the value of a field
    pub fn get(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Iterate over fields in name order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl FromIterator<(String, String)> for FieldMap {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        let mut fields = BTreeMap::new();
        for (name, value) in iter {
            fields.insert(name, value);
        }
        Self { fields }
    }
}

impl fmt::Display for FieldMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{")?;
        for (i, (name, value)) in self.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}={:?}", name, value)?;
        }
        write!(f, "}}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_lines_strip_carriage_return() {
        let frame = Frame::new(b"\nADCO 1 I\r\nPTEC HP..  \r".to_vec());
        let lines: Vec<&[u8]> = frame.lines().collect();
        assert_eq!(lines, vec![&b""[..], &b"ADCO 1 I"[..], &b"PTEC HP..  "[..]]);
    }

    #[test]
    fn test_field_map_last_wins() {
        let map: FieldMap = vec![
            ("PTEC".to_string(), "HC..".to_string()),
            ("PTEC".to_string(), "HP..".to_string()),
        ]
        .into_iter()
        .collect();

        assert_eq!(map.len(), 1);
        assert_eq!(map.get("PTEC"), Some("HP.."));
        assert!(!map.contains("HCHC"));
    }

    #[test]
    fn test_field_map_display() {
        let map: FieldMap = vec![("BASE".to_string(), "0001".to_string())]
            .into_iter()
            .collect();
        assert_eq!(format!("{}", map), "{BASE=\"0001\"}");
    }

    #[test]
    fn test_error_recoverability() {
        assert!(DecoderError::FrameTooLarge { len: 10, limit: 5 }.is_recoverable());
        assert!(!DecoderError::EndOfStream.is_recoverable());
    }
}
