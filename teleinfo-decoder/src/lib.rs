//! Teleinfo Decoder Library
//!
//! A reusable library for decoding the teleinfo protocol emitted by electricity
//! meters on their customer serial output.
//!
//! # Architecture
//!
//! This library is intentionally minimal and focused on decoding:
//! - Extracts STX/ETX delimited frames from any byte transport
//! - Validates line checksums (historic and standard encodings)
//! - Folds valid lines into a field map per frame
//! - Resolves the cumulative energy counter and the active tariff period
//!
//! The library does NOT:
//! - Open or configure serial ports
//! - Track counters across frames or apportion energy
//! - Persist anything or read the clock
//!
//! All higher-level functionality is in the application layer (teleinfo-ventilator).
//!
//! # Example Usage
//!
//! ```no_run
//! use teleinfo_decoder::{resolve_counter, Decoder, FramerConfig};
//! use std::fs::File;
//!
//! let port = File::open("/dev/ttyAMA1").unwrap();
//! let decoder = Decoder::new(port, FramerConfig::new());
//!
//! for fields in decoder {
//!     match fields {
//!         Ok(fields) => {
//!             if let Some(reading) = resolve_counter(&fields) {
//!                 println!("{} Wh ({})", reading.total, reading.scheme);
//!             }
//!         }
//!         Err(e) => eprintln!("Decode error: {}", e),
//!     }
//! }
//! ```

// Public modules
pub mod config;
pub mod decoder;
pub mod framer;
pub mod horodate;
pub mod line;
pub mod schemes;
pub mod tariff;
pub mod types;

// Re-export main types for convenience
pub use config::{FramerConfig, FramerConfigError};
pub use decoder::{DecodeStats, Decoder, FrameDecoder};
pub use framer::{FrameReader, FramerStats};
pub use horodate::parse_meter_date;
pub use line::{checksum, decode_line, LineEncoding, LineOutcome};
pub use schemes::{resolve_counter, CounterReading, TariffScheme};
pub use tariff::{TariffCode, TariffTable, TariffTracker, UNKNOWN_BUCKET, UNKNOWN_LABEL};
pub use types::{DecoderError, FieldMap, Frame, Result, Timestamp, FRAME_END, FRAME_START};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_basics() {
        // Smoke test: an empty frame decodes to an empty map
        let mut lines = FrameDecoder::new();
        let fields = lines.decode_frame(&Frame::new(Vec::new()));
        assert!(fields.is_empty());
        assert!(resolve_counter(&fields).is_none());
    }
}
