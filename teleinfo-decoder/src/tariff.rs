//! Tariff period tracking
//!
//! The general meter announces the running tariff period as a short code in a
//! single field (`NTARF` on standard-mode meters). A [`TariffTable`] maps those
//! codes to ledger bucket names; codes missing from the table mean "no attribution"
//! rather than an error.

use crate::types::FieldMap;
use serde::{Deserialize, Serialize};

/// Name of the bucket that receives unattributed energy
pub const UNKNOWN_BUCKET: &str = "unknown";

/// Human label of the unknown bucket in reports
pub const UNKNOWN_LABEL: &str = "INCONNU";

/// One entry of the tariff code table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TariffCode {
    /// Code as sent by the meter (e.g. "01")
    pub code: String,
    /// Ledger bucket the code maps to
    pub bucket: String,
    /// Label used in reports
    pub label: String,
}

impl TariffCode {
    pub fn new(code: impl Into<String>, bucket: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            bucket: bucket.into(),
            label: label.into(),
        }
    }
}

/// Ordered tariff code table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TariffTable {
    entries: Vec<TariffCode>,
}

impl TariffTable {
    pub fn new(entries: Vec<TariffCode>) -> Self {
        Self { entries }
    }

    /// Standard-mode table: index codes 01 to 10, the first six carrying Tempo labels
    pub fn standard() -> Self {
        let labels = [
            "HC BLEU", "HP BLEU", "HC BLANC", "HP BLANC", "HC ROUGE", "HP ROUGE",
        ];
        let entries = (1..=10)
            .map(|n| {
                let label = labels
                    .get(n - 1)
                    .map(|l| l.to_string())
                    .unwrap_or_else(|| format!("index {}", n));
                TariffCode::new(format!("{:02}", n), format!("index_{}", n), label)
            })
            .collect();
        Self { entries }
    }

    pub fn entries(&self) -> &[TariffCode] {
        &self.entries
    }

    /// Look up a raw code
    pub fn lookup(&self, code: &str) -> Option<&TariffCode> {
        self.entries.iter().find(|entry| entry.code == code)
    }

    /// Report label for a bucket; unlisted buckets are labelled by name
    pub fn label_for<'a>(&'a self, bucket: &'a str) -> &'a str {
        if bucket == UNKNOWN_BUCKET {
            return UNKNOWN_LABEL;
        }
        self.entries
            .iter()
            .find(|entry| entry.bucket == bucket)
            .map(|entry| entry.label.as_str())
            .unwrap_or(bucket)
    }
}

impl Default for TariffTable {
    fn default() -> Self {
        Self::standard()
    }
}

/// Resolves the active bucket from general-meter frames
#[derive(Debug, Clone)]
pub struct TariffTracker {
    field: String,
    table: TariffTable,
}

impl TariffTracker {
    pub fn new(field: impl Into<String>, table: TariffTable) -> Self {
        Self {
            field: field.into(),
            table,
        }
    }

    /// Field carrying the tariff code
    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn table(&self) -> &TariffTable {
        &self.table
    }

    /// Bucket named by the frame's tariff code, if the code is known
    pub fn resolve(&self, fields: &FieldMap) -> Option<&str> {
        let code = fields.get(&self.field)?;
        match self.table.lookup(code) {
            Some(entry) => Some(entry.bucket.as_str()),
            None => {
                log::trace!("Unmapped tariff code {:?} in {}", code, self.field);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(pairs: &[(&str, &str)]) -> FieldMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_standard_table() {
        let table = TariffTable::standard();
        assert_eq!(table.entries().len(), 10);
        assert_eq!(table.lookup("01").unwrap().bucket, "index_1");
        assert_eq!(table.lookup("06").unwrap().label, "HP ROUGE");
        assert_eq!(table.lookup("10").unwrap().label, "index 10");
        assert!(table.lookup("11").is_none());
    }

    #[test]
    fn test_labels() {
        let table = TariffTable::standard();
        assert_eq!(table.label_for("index_3"), "HC BLANC");
        assert_eq!(table.label_for(UNKNOWN_BUCKET), "INCONNU");
        assert_eq!(table.label_for("legacy_bucket"), "legacy_bucket");
    }

    #[test]
    fn test_tracker_resolve() {
        let tracker = TariffTracker::new("NTARF", TariffTable::standard());
        assert_eq!(tracker.resolve(&frame(&[("NTARF", "02")])), Some("index_2"));
        assert_eq!(tracker.resolve(&frame(&[("NTARF", "42")])), None);
        assert_eq!(tracker.resolve(&frame(&[("PTEC", "HP..")])), None);
    }

    #[test]
    fn test_custom_table() {
        let table = TariffTable::new(vec![
            TariffCode::new("HC..", "off_peak", "Heures creuses"),
            TariffCode::new("HP..", "peak", "Heures pleines"),
        ]);
        let tracker = TariffTracker::new("PTEC", table);
        assert_eq!(tracker.resolve(&frame(&[("PTEC", "HP..")])), Some("peak"));
    }
}
