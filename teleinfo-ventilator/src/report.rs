//! Plain-text consumption report
//!
//! Rendered from a ledger snapshot taken under the lock; formatting and file I/O
//! happen outside of it.

use crate::ledger::Ledger;
use anyhow::{Context, Result};
use chrono::{DateTime, TimeZone};
use std::fmt::{Display, Write as _};
use std::fs;
use std::path::Path;
use teleinfo_decoder::{TariffTable, UNKNOWN_BUCKET, UNKNOWN_LABEL};

/// Render the report text
///
/// Buckets of the tariff table come first, in table order, then `unknown`, then any
/// bucket found in the ledger but missing from the table.
pub fn render_report<Tz>(
    meter_id: u32,
    table: &TariffTable,
    ledger: &Ledger,
    active_bucket: &str,
    at: &DateTime<Tz>,
) -> String
where
    Tz: TimeZone,
    Tz::Offset: Display,
{
    let mut out = String::new();
    let _ = writeln!(out, "Report for meter_id {}", meter_id);
    let _ = writeln!(out, "Date: {}", at.format("%Y-%m-%d %H:%M:%S %z"));
    let _ = writeln!(out, "Active: {}", table.label_for(active_bucket));
    out.push('\n');

    for entry in table.entries() {
        push_line(&mut out, &entry.label, ledger.get(&entry.bucket));
    }
    push_line(&mut out, UNKNOWN_LABEL, ledger.unknown());

    for (bucket, value) in ledger.iter() {
        let listed = bucket == UNKNOWN_BUCKET || table.entries().iter().any(|e| e.bucket == bucket);
        if !listed {
            push_line(&mut out, bucket, value);
        }
    }

    out
}

fn push_line(out: &mut String, label: &str, wh: i64) {
    let _ = writeln!(out, "{}\t{} kWh", label, format_kwh(wh));
}

/// Wh to kWh with three decimals, without going through floating point
pub fn format_kwh(wh: i64) -> String {
    let sign = if wh < 0 { "-" } else { "" };
    let abs = wh.unsigned_abs();
    format!("{}{}.{:03}", sign, abs / 1000, abs % 1000)
}

/// Replace the report file atomically
pub fn write_report(path: &Path, contents: &str) -> Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = Path::new(&tmp);

    fs::write(tmp, contents).with_context(|| format!("Failed to write report: {:?}", tmp))?;
    fs::rename(tmp, path).with_context(|| format!("Failed to replace report: {:?}", path))?;
    Ok(())
}
