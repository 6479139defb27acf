//! Meter timestamps ("horodate")
//!
//! Standard-mode meters send their clock as `SYYMMDDhhmmss`, where the season byte
//! `S` selects the UTC offset: `H`/`h` for winter (+01:00), `E`/`e` for summer
//! (+02:00) and a space when the meter has no season information (+00:00).
//! Lowercase seasons flag a degraded clock but carry the same offset.

use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone};

/// Parse a horodated field value
///
/// Only the first tab-separated token is read, so the raw value of a `DATE` field
/// (which carries an empty data part) can be passed as is.
pub fn parse_meter_date(value: &str) -> Option<DateTime<FixedOffset>> {
    let token = value.split('\t').next()?;
    let mut chars = token.chars();
    let season = chars.next()?;
    let digits = chars.as_str();

    let offset_secs = match season {
        'H' | 'h' => 3600,
        'E' | 'e' => 7200,
        ' ' => 0,
        _ => return None,
    };

    if digits.len() != 12 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    let naive = NaiveDateTime::parse_from_str(&format!("20{}", digits), "%Y%m%d%H%M%S").ok()?;
    let offset = FixedOffset::east_opt(offset_secs)?;
    offset.from_local_datetime(&naive).single()
}
