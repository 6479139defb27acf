//! Cumulative energy counter resolution
//!
//! A meter reports its energy register under different field names depending on
//! its tariff option. Each option is a [`TariffScheme`]; schemes are tried in
//! [`TariffScheme::PRIORITY`] order and the first one whose fields are *all* present
//! in the frame provides the counter, as the sum of its fields.

use crate::types::FieldMap;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Metering scheme, identified by the set of counter fields it reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TariffScheme {
    /// Standard-mode total active energy (`EAST`)
    Total,
    /// Single rate (`BASE`)
    Base,
    /// Off-peak / peak (`HCHC`, `HCHP`)
    OffPeak,
    /// EJP normal / mobile peak (`EJPHN`, `EJPHPM`)
    Ejp,
    /// Tempo, off-peak and peak for blue, white and red days
    Tempo,
}

impl TariffScheme {
    /// Resolution order, coarsest scheme first
    pub const PRIORITY: [TariffScheme; 5] = [
        TariffScheme::Total,
        TariffScheme::Base,
        TariffScheme::OffPeak,
        TariffScheme::Ejp,
        TariffScheme::Tempo,
    ];

    /// Counter fields that make up this scheme
    pub fn fields(&self) -> &'static [&'static str] {
        match self {
            TariffScheme::Total => &["EAST"],
            TariffScheme::Base => &["BASE"],
            TariffScheme::OffPeak => &["HCHC", "HCHP"],
            TariffScheme::Ejp => &["EJPHN", "EJPHPM"],
            TariffScheme::Tempo => &[
                "BBRHCJB", "BBRHPJB", "BBRHCJW", "BBRHPJW", "BBRHCJR", "BBRHPJR",
            ],
        }
    }

    /// True if every field of the scheme is present
    pub fn matches(&self, fields: &FieldMap) -> bool {
        self.fields().iter().all(|name| fields.contains(name))
    }
}

impl fmt::Display for TariffScheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TariffScheme::Total => write!(f, "Total"),
            TariffScheme::Base => write!(f, "Base"),
            TariffScheme::OffPeak => write!(f, "OffPeak"),
            TariffScheme::Ejp => write!(f, "EJP"),
            TariffScheme::Tempo => write!(f, "Tempo"),
        }
    }
}

/// Cumulative counter resolved from one frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterReading {
    /// Scheme the counter was read from
    pub scheme: TariffScheme,
    /// Sum of the scheme's registers, in the meter's base unit (Wh)
    pub total: u64,
}

/// Resolve the authoritative cumulative counter of a frame
///
/// Returns `None` when no scheme is complete, or when the first complete scheme has
/// a register that is not a base-10 integer (the frame cannot be trusted then).
pub fn resolve_counter(fields: &FieldMap) -> Option<CounterReading> {
    let scheme = TariffScheme::PRIORITY
        .iter()
        .copied()
        .find(|scheme| scheme.matches(fields))?;

    let mut total: u64 = 0;
    for name in scheme.fields() {
        let raw = fields.get(name)?;
        let value = match raw.parse::<u64>() {
            Ok(value) => value,
            Err(_) => {
                log::debug!("{} register {} is not a counter: {:?}", scheme, name, raw);
                return None;
            }
        };
        total = total.checked_add(value)?;
    }

    Some(CounterReading { scheme, total })
}
