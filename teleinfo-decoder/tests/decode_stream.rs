// End-to-end decoding of captured-style teleinfo streams
use std::io::Cursor;
use teleinfo_decoder::{
    checksum, parse_meter_date, resolve_counter, Decoder, DecoderError, FramerConfig,
    TariffScheme, TariffTable, TariffTracker,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Standard-mode line: tab separated, checksum over everything before it
fn standard_line(name: &str, value: &str) -> Vec<u8> {
    let mut line = format!("{}\t{}\t", name, value).into_bytes();
    let c = checksum(&line);
    line.push(c);
    line
}

/// Historic-mode line: space separated, checksum excludes the last separator
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
fn general_meter_stream() {
    init_logging();

    let mut stream = b"\x00\x7fpartial frame tail\x03".to_vec();
    stream.extend(frame(&[
        standard_line("ADSC", "041234567890"),
        standard_line("DATE", "H200205193643\t"),
        standard_line("EAST", "000123456"),
        standard_line("NTARF", "03"),
        standard_line("LTARF", "HC BLANC"),
    ]));

    let mut decoder = Decoder::new(Cursor::new(stream), FramerConfig::new().with_chunk_size(7));
    let fields = decoder.next_fields().unwrap();

    let tracker = TariffTracker::new("NTARF", TariffTable::standard());
    assert_eq!(tracker.resolve(&fields), Some("index_3"));

    let reading = resolve_counter(&fields).unwrap();
    assert_eq!(reading.scheme, TariffScheme::Total);
    assert_eq!(reading.total, 123456);

    let date = parse_meter_date(fields.get("DATE").unwrap()).unwrap();
    assert_eq!(date.to_rfc3339(), "2020-02-05T19:36:43+01:00");

    assert!(matches!(decoder.next_fields(), Err(DecoderError::EndOfStream)));
}

#[test]
fn special_meter_stream_with_noise() {
    init_logging();

    let mut corrupted = historic_line("HCHP", "006438891");
    corrupted[6] = b'9';

    let mut stream = frame(&[historic_line("HCHC", "004070290"), corrupted]);
    stream.extend(frame(&[
        historic_line("HCHC", "004070290"),
        historic_line("HCHP", "006438891"),
    ]));

    let decoder = Decoder::new(Cursor::new(stream), FramerConfig::new());
    let readings: Vec<Option<u64>> = decoder
        .map(|fields| resolve_counter(&fields.unwrap()).map(|r| r.total))
        .collect();

    // First frame lost one register to line noise and cannot be trusted
    assert_eq!(readings, vec![None, Some(10509181)]);
}

#[test]
fn oversized_frame_does_not_poison_the_stream() {
    init_logging();

    let mut stream = vec![0x02];
    stream.extend(std::iter::repeat(b'A').take(300));
    stream.extend(frame(&[historic_line("BASE", "000012345")]));

    let config = FramerConfig::new().with_chunk_size(16).with_max_frame_len(128);
    let mut decoder = Decoder::new(Cursor::new(stream), config);

    assert!(matches!(
        decoder.next_fields(),
        Err(DecoderError::FrameTooLarge { limit: 128, .. })
    ));
    let fields = decoder.next_fields().unwrap();
    assert_eq!(resolve_counter(&fields).unwrap().total, 12345);
    assert_eq!(decoder.framer_stats().oversized, 1);
}

#[test]
fn field_map_serializes_as_object() {
    let stream = frame(&[historic_line("BASE", "000012345"), historic_line("PTEC", "TH..")]);
    let mut decoder = Decoder::new(Cursor::new(stream), FramerConfig::new());
    let fields = decoder.next_fields().unwrap();

    let json = serde_json::to_string(&fields).unwrap();
    assert_eq!(json, r#"{"BASE":"000012345","PTEC":"TH.."}"#);
}
