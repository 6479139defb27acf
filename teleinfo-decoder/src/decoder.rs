//! Main decoder API
//!
//! This module provides the primary interface for the decoder library.
//! [`Decoder`] wraps a byte transport and yields one [`FieldMap`] per frame;
//! [`FrameDecoder`] does the per-line work for callers that frame bytes themselves.

use crate::config::FramerConfig;
use crate::framer::{FrameReader, FramerStats};
use crate::line::{decode_line, LineOutcome};
use crate::types::{DecoderError, FieldMap, Frame, Result};
use std::io::Read;

/// Counters describing how lines were handled
///
/// Dropped lines are expected on a live serial link, so they only show up here.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecodeStats {
    /// Frames folded into field maps
    pub frames: u64,
    /// Frames that produced no field at all
    pub frames_empty: u64,
    /// Lines that became fields
    pub lines_accepted: u64,
    /// Lines dropped on checksum mismatch
    pub lines_bad_checksum: u64,
    /// Lines dropped on shape mismatch despite a valid checksum
    pub lines_malformed: u64,
}

/// Folds the lines of a frame into a field map
#[derive(Debug, Default)]
pub struct FrameDecoder {
    stats: DecodeStats,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> DecodeStats {
        self.stats
    }

    /// Decode every line of a frame
    ///
    /// Invalid lines are skipped. A field appearing twice keeps the later value.
    pub fn decode_frame(&mut self, frame: &Frame) -> FieldMap {
        let mut fields = Vec::new();

        for line in frame.lines() {
            match decode_line(line) {
                LineOutcome::Field { name, value, encoding } => {
                    log::trace!("{} = {:?} ({})", name, value, encoding);
                    self.stats.lines_accepted += 1;
                    fields.push((name, value));
                }
                LineOutcome::Empty => {}
                LineOutcome::BadChecksum => {
                    log::trace!("Dropping line with bad checksum: {:?}", String::from_utf8_lossy(line));
                    self.stats.lines_bad_checksum += 1;
                }
                LineOutcome::Malformed => {
                    log::trace!("Dropping malformed line: {:?}", String::from_utf8_lossy(line));
                    self.stats.lines_malformed += 1;
                }
            }
        }

        let map: FieldMap = fields.into_iter().collect();
        self.stats.frames += 1;
        if map.is_empty() {
            self.stats.frames_empty += 1;
        }
        map
    }
}

/// Decodes a teleinfo byte stream into field maps
pub struct Decoder<R> {
    frames: FrameReader<R>,
    lines: FrameDecoder,
    finished: bool,
}

impl<R: Read> Decoder<R> {
    /// Create a decoder over a transport
    ///
    /// # Example
    /// ```
    /// use teleinfo_decoder::{Decoder, FramerConfig};
    /// use std::io::Cursor;
    ///
    /// let stream = b"\x02\nHCHC 004070290 \\\r\nHCHP 006438891 :\r\x03".to_vec();
    /// let mut decoder = Decoder::new(Cursor::new(stream), FramerConfig::new());
    /// let fields = decoder.next_fields().unwrap();
    /// assert_eq!(fields.get("HCHC"), Some("004070290"));
    /// ```
    pub fn new(reader: R, config: FramerConfig) -> Self {
        Self {
            frames: FrameReader::new(reader, config),
            lines: FrameDecoder::new(),
            finished: false,
        }
    }

    /// Block until a frame with at least one valid field arrives
    ///
    /// Frames whose lines were all dropped are skipped. Oversized frames are
    /// reported as [`DecoderError::FrameTooLarge`]; the decoder stays usable.
    pub fn next_fields(&mut self) -> Result<FieldMap> {
        loop {
            let frame = self.frames.next_frame()?;
            let fields = self.lines.decode_frame(&frame);
            if !fields.is_empty() {
                return Ok(fields);
            }
            log::debug!("Frame of {} bytes had no valid line", frame.len());
        }
    }

    pub fn framer_stats(&self) -> FramerStats {
        self.frames.stats()
    }

    pub fn decode_stats(&self) -> DecodeStats {
        self.lines.stats()
    }

    pub fn into_inner(self) -> R {
        self.frames.into_inner()
    }
}

/// Iterates field maps until the transport ends
///
/// Oversized frames are yielded as errors and iteration continues. The first
/// transport error is yielded once, then iteration stops.
impl<R: Read> Iterator for Decoder<R> {
    type Item = Result<FieldMap>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.next_fields() {
            Ok(fields) => Some(Ok(fields)),
            Err(DecoderError::EndOfStream) => {
                self.finished = true;
                None
            }
            Err(e) => {
                if !e.is_recoverable() {
                    self.finished = true;
                }
                Some(Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const SAMPLE: &[u8] = b"\x02\nADCO 811775412275 I\r\nOPTARIF HC.. <\r\nISOUSC 45 ?\r\nHCHC 004070290 \\\r\nHCHP 006438891 :\r\nPTEC HP..  \r\nIINST 004 [\r\nIMAX 090 H\r\nPAPP 01090 +\r\nHHPHC A ,\r\nMOTDETAT 000000 B\r\x03";

    #[test]
    fn test_decode_sample_frame() {
        let mut decoder = Decoder::new(Cursor::new(SAMPLE.to_vec()), FramerConfig::new());
        let fields = decoder.next_fields().unwrap();

        assert_eq!(fields.len(), 11);
        assert_eq!(fields.get("ADCO"), Some("811775412275"));
        assert_eq!(fields.get("OPTARIF"), Some("HC.."));
        assert_eq!(fields.get("PTEC"), Some("HP.."));
        assert_eq!(fields.get("MOTDETAT"), Some("000000"));

        let stats = decoder.decode_stats();
        assert_eq!(stats.lines_accepted, 11);
        assert_eq!(stats.lines_bad_checksum, 0);
    }

    #[test]
    fn test_noisy_lines_are_counted() {
        let frame = Frame::new(b"\nHCHC 004070290 \\\r\nHCHP 006438891 ;\r\nGARBAGE\r".to_vec());
        let mut lines = FrameDecoder::new();
        let fields = lines.decode_frame(&frame);

        assert_eq!(fields.len(), 1);
        assert!(fields.contains("HCHC"));
        assert_eq!(lines.stats().lines_bad_checksum, 2);
    }

    #[test]
    fn test_empty_frames_are_skipped() {
        let stream = b"\x02\nJUNK 1 !\r\x03\x02\nHCHP 006438891 :\r\x03".to_vec();
        let mut decoder = Decoder::new(Cursor::new(stream), FramerConfig::new());
        let fields = decoder.next_fields().unwrap();

        assert_eq!(fields.get("HCHP"), Some("006438891"));
        assert_eq!(decoder.decode_stats().frames_empty, 1);
        assert_eq!(decoder.framer_stats().frames, 2);
    }

    /// Transport that fails every read, like an unplugged serial adapter
    struct Unplugged;

    impl Read for Unplugged {
        fn read(&mut self, _buf: &mut [u8]) -> std::io::Result<usize> {
            Err(std::io::Error::new(std::io::ErrorKind::Other, "EIO"))
        }
    }

    #[test]
    fn test_iterator_stops_after_transport_error() {
        let mut decoder = Decoder::new(Unplugged, FramerConfig::new());
        assert!(matches!(decoder.next(), Some(Err(DecoderError::IoError(_)))));
        assert!(decoder.next().is_none());

        let items = Decoder::new(Unplugged, FramerConfig::new()).take(1000).count();
        assert_eq!(items, 1);
    }

    #[test]
    fn test_iterator_continues_after_oversized_frame() {
        let mut stream = vec![0x02];
        stream.extend(std::iter::repeat(b'x').take(300));
        stream.extend_from_slice(SAMPLE);

        let config = FramerConfig::new().with_chunk_size(8).with_max_frame_len(200);
        let items: Vec<Result<FieldMap>> = Decoder::new(Cursor::new(stream), config).collect();

        assert_eq!(items.len(), 2);
        assert!(matches!(items[0], Err(DecoderError::FrameTooLarge { .. })));
        assert_eq!(items[1].as_ref().unwrap().len(), 11);
    }

    #[test]
    fn test_iterator_ends_with_stream() {
        let decoder = Decoder::new(Cursor::new(SAMPLE.repeat(3)), FramerConfig::new());
        let maps: Vec<FieldMap> = decoder.collect::<Result<Vec<_>>>().unwrap();
        assert_eq!(maps.len(), 3);
    }
}
