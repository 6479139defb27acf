//! Serial feed workers
//!
//! Each meter is read by its own thread. A worker opens the device, decodes frames
//! until the transport fails, then reopens it after a delay, forever. Nothing here
//! touches the ledger; decoded field maps are handed to a callback.

use std::fs::File;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::thread;
use std::time::Duration;
use teleinfo_decoder::{Decoder, DecoderError, FieldMap, FramerConfig};

/// How to reach one meter
#[derive(Debug, Clone)]
pub struct FeedSpec {
    /// Name used in logs ("general", "special")
    pub name: &'static str,
    pub device: PathBuf,
    pub baud: u32,
    /// Run `stty` on the device before opening it
    pub configure_line: bool,
}

/// Put the serial line in raw 7-bit mode at the feed's baud rate
pub fn configure_line(device: &Path, baud: u32) -> io::Result<()> {
    let status = Command::new("stty")
        .args(["raw", &baud.to_string(), "-parodd", "-cstopb", "cs7"])
        .stdin(File::open(device)?)
        .status()?;

    if status.success() {
        Ok(())
    } else {
        Err(io::Error::new(
            io::ErrorKind::Other,
            format!("stty failed on {:?} with {}", device, status),
        ))
    }
}

/// Open the feed's transport
pub fn open_transport(spec: &FeedSpec) -> io::Result<File> {
    if spec.configure_line {
        configure_line(&spec.device, spec.baud)?;
    }
    File::open(&spec.device)
}

/// Decode field maps until the transport ends or fails
///
/// Oversized frames are logged and skipped. Returns the error that stopped the
/// stream ([`DecoderError::EndOfStream`] for a clean end).
pub fn pump<R, F>(name: &str, decoder: &mut Decoder<R>, mut on_fields: F) -> DecoderError
where
    R: Read,
    F: FnMut(FieldMap),
{
    loop {
        match decoder.next_fields() {
            Ok(fields) => on_fields(fields),
            Err(e) if e.is_recoverable() => {
                log::warn!("[{}] {}", name, e);
            }
            Err(e) => {
                log::debug!(
                    "[{}] stream stopped: framer {:?}, lines {:?}",
                    name,
                    decoder.framer_stats(),
                    decoder.decode_stats()
                );
                return e;
            }
        }
    }
}

/// Read a feed forever, reopening the transport whenever it fails
pub fn run_feed<F>(spec: FeedSpec, framing: FramerConfig, retry_delay: Duration, mut on_fields: F) -> !
where
    F: FnMut(FieldMap),
{
    loop {
        match open_transport(&spec) {
            Ok(port) => {
                log::info!("[{}] reading {:?} at {} baud", spec.name, spec.device, spec.baud);
                let mut decoder = Decoder::new(port, framing.clone());
                let reason = pump(spec.name, &mut decoder, &mut on_fields);
                log::warn!("[{}] transport lost: {}", spec.name, reason);
            }
            Err(e) => {
                log::warn!("[{}] cannot open {:?}: {}", spec.name, spec.device, e);
            }
        }
        thread::sleep(retry_delay);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use teleinfo_decoder::checksum;

    fn historic_line(name: &str, value: &str) -> Vec<u8> {
        let mut line = format!("{} {}", name, value).into_bytes();
        let c = checksum(&line);
        line.push(b' ');
        line.push(c);
        line
    }

    fn frame(lines: &[Vec<u8>]) -> Vec<u8> {
        let mut bytes = vec![0x02];
        for line in lines {
            bytes.push(b'\n');
            bytes.extend_from_slice(line);
            bytes.push(b'\r');
        }
        bytes.push(0x03);
        bytes
    }

    #[test]
    fn test_pump_delivers_every_frame() {
        let mut stream = frame(&[historic_line("BASE", "000000100")]);
        stream.extend(vec![0x02; 1]);
        stream.extend(std::iter::repeat(b'z').take(200));
        stream.extend(frame(&[historic_line("BASE", "000000150")]));

        let config = FramerConfig::new().with_chunk_size(16).with_max_frame_len(64);
        let mut decoder = Decoder::new(Cursor::new(stream), config);

        let mut seen = Vec::new();
        let reason = pump("test", &mut decoder, |fields| {
            seen.push(fields.get("BASE").map(str::to_string));
        });

        assert!(matches!(reason, DecoderError::EndOfStream));
        assert_eq!(
            seen,
            vec![Some("000000100".to_string()), Some("000000150".to_string())]
        );
        assert_eq!(decoder.framer_stats().oversized, 1);
    }

    #[test]
    fn test_open_missing_device() {
        let spec = FeedSpec {
            name: "test",
            device: PathBuf::from("/nonexistent/ttyTEST"),
            baud: 1200,
            configure_line: false,
        };
        assert!(open_transport(&spec).is_err());
    }
}
