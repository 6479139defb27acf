//! Frame extraction from a raw teleinfo byte stream
//!
//! A meter emits frames delimited by STX (0x02) and ETX (0x03). The reader pulls
//! fixed-size chunks from any [`Read`] transport, throws away everything before a
//! start marker, and hands back the bytes up to the next end marker.
//!
//! ## Resynchronization
//! - A frame that grows past `max_frame_len` without an end marker is discarded with
//!   [`DecoderError::FrameTooLarge`]; the reader then hunts for the next start marker.
//! - A start marker seen inside an unfinished frame means the previous frame was
//!   truncated on the wire. The frame restarts at the later marker.
//!
//! There is no read deadline: a silent transport blocks the caller.

use crate::config::FramerConfig;
use crate::types::{DecoderError, Frame, Result, FRAME_END, FRAME_START};
use std::io::{ErrorKind, Read};

/// Counters describing what the framer has seen so far
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FramerStats {
    /// Complete frames returned
    pub frames: u64,
    /// Frames dropped for exceeding the length limit
    pub oversized: u64,
    /// Frames restarted on a nested start marker
    pub resyncs: u64,
    /// Bytes thrown away outside of any returned frame
    pub bytes_discarded: u64,
}

/// Reads STX/ETX delimited frames from a byte transport
pub struct FrameReader<R> {
    reader: R,
    config: FramerConfig,
    buffer: Vec<u8>,
    in_frame: bool,
    finished: bool,
    stats: FramerStats,
}

impl<R: Read> FrameReader<R> {
    pub fn new(reader: R, config: FramerConfig) -> Self {
        Self {
            reader,
            config,
            buffer: Vec::new(),
            in_frame: false,
            finished: false,
            stats: FramerStats::default(),
        }
    }

    pub fn stats(&self) -> FramerStats {
        self.stats
    }

    pub fn into_inner(self) -> R {
        self.reader
    }

    /// Block until the next complete frame is available
    ///
    /// Bytes following the end marker stay buffered for the next call.
    pub fn next_frame(&mut self) -> Result<Frame> {
        loop {
            if !self.in_frame {
                match find(&self.buffer, FRAME_START) {
                    Some(pos) => {
                        self.stats.bytes_discarded += pos as u64;
                        self.buffer.drain(..=pos);
                        self.in_frame = true;
                    }
                    None => {
                        self.stats.bytes_discarded += self.buffer.len() as u64;
                        self.buffer.clear();
                        self.fill()?;
                        continue;
                    }
                }
            }

            if let Some(end) = find(&self.buffer, FRAME_END) {
                let mut content: Vec<u8> = self.buffer.drain(..=end).collect();
                content.pop();
                self.in_frame = false;

                if let Some(restart) = rfind(&content, FRAME_START) {
                    log::debug!(
                        "Nested start marker after {} bytes, restarting frame",
                        restart
                    );
                    self.stats.resyncs += 1;
                    self.stats.bytes_discarded += (restart + 1) as u64;
                    content.drain(..=restart);
                }

                if content.len() > self.config.max_frame_len {
                    return Err(self.oversized(content.len()));
                }

                self.stats.frames += 1;
                log::trace!("Frame complete: {} bytes", content.len());
                return Ok(Frame::new(content));
            }

            if self.buffer.len() > self.config.max_frame_len {
                // Keep a later start marker so the next frame is not lost with this one
                let len = self.buffer.len();
                let keep_from = rfind(&self.buffer, FRAME_START)
                    .filter(|pos| len - pos <= self.config.max_frame_len)
                    .unwrap_or(len);
                self.buffer.drain(..keep_from);
                self.in_frame = false;
                return Err(self.oversized(keep_from));
            }

            self.fill()?;
        }
    }

    fn oversized(&mut self, len: usize) -> DecoderError {
        log::warn!(
            "Dropping frame: {} bytes without end marker (limit {})",
            len,
            self.config.max_frame_len
        );
        self.stats.oversized += 1;
        self.stats.bytes_discarded += len as u64;
        DecoderError::FrameTooLarge {
            len,
            limit: self.config.max_frame_len,
        }
    }

    /// Append one chunk from the transport to the buffer
    fn fill(&mut self) -> Result<()> {
        let start = self.buffer.len();
        self.buffer.resize(start + self.config.chunk_size.max(1), 0);
        loop {
            match self.reader.read(&mut self.buffer[start..]) {
                Ok(0) => {
                    self.buffer.truncate(start);
                    return Err(DecoderError::EndOfStream);
                }
                Ok(n) => {
                    self.buffer.truncate(start + n);
                    return Ok(());
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.buffer.truncate(start);
                    return Err(e.into());
                }
            }
        }
    }
}

/// Iterates frames until the transport ends
///
/// Oversized frames are yielded as errors and iteration continues; end of stream or
/// an I/O error ends the iteration.
impl<R: Read> Iterator for FrameReader<R> {
    type Item = Result<Frame>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        match self.next_frame() {
            Ok(frame) => Some(Ok(frame)),
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

fn find(haystack: &[u8], needle: u8) -> Option<usize> {
    haystack.iter().position(|b| *b == needle)
}

fn rfind(haystack: &[u8], needle: u8) -> Option<usize> {
    haystack.iter().rposition(|b| *b == needle)
}
