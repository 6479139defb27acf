//! Framer configuration types
//!
//! The framer needs very little: how much to read from the transport at a time and
//! how much to buffer before giving up on a frame. Everything else (devices, baud
//! rates, tariff tables) belongs to the application layer.

use serde::{Deserialize, Serialize};

/// Framer settings that cannot work together
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FramerConfigError {
    #[error("chunk_size must be greater than zero")]
    ZeroChunkSize,

    #[error("max_frame_len ({max_frame_len}) must be at least chunk_size ({chunk_size})")]
    LimitBelowChunk {
        max_frame_len: usize,
        chunk_size: usize,
    },
}

/// Configuration for the frame reader
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FramerConfig {
    /// Bytes requested from the transport per read (default: 64)
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Maximum bytes buffered for one frame before it is dropped (default: 10240)
    #[serde(default = "default_max_frame_len")]
    pub max_frame_len: usize,
}

fn default_chunk_size() -> usize {
    64
}

fn default_max_frame_len() -> usize {
    10240
}

impl Default for FramerConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            max_frame_len: default_max_frame_len(),
        }
    }
}

impl FramerConfig {
    /// Create a new framer configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder method: set the transport read size
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Builder method: set the frame length limit
    pub fn with_max_frame_len(mut self, max_frame_len: usize) -> Self {
        self.max_frame_len = max_frame_len;
        self
    }

    /// Check the settings make sense together
    pub fn validate(&self) -> std::result::Result<(), FramerConfigError> {
        if self.chunk_size == 0 {
            return Err(FramerConfigError::ZeroChunkSize);
        }
        if self.max_frame_len < self.chunk_size {
            return Err(FramerConfigError::LimitBelowChunk {
                max_frame_len: self.max_frame_len,
                chunk_size: self.chunk_size,
            });
        }
        Ok(())
    }
}
