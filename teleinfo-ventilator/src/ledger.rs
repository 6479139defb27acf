//! Bucket ledger
//!
//! Energy attributed to each tariff bucket, in the meter's base unit (Wh). The sum
//! of all buckets always equals the last counter value the engine accepted.
//! Snapshots serialize to a flat JSON object, the format already stored in
//! existing checkpoint databases.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use teleinfo_decoder::UNKNOWN_BUCKET;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Ledger {
    buckets: BTreeMap<String, i64>,
}

impl Ledger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sum of every bucket
    pub fn total(&self) -> i64 {
        self.buckets.values().sum()
    }

    /// Energy in a bucket (zero if the bucket was never touched)
    pub fn get(&self, bucket: &str) -> i64 {
        self.buckets.get(bucket).copied().unwrap_or(0)
    }

    pub fn unknown(&self) -> i64 {
        self.get(UNKNOWN_BUCKET)
    }

    /// Add a (possibly negative) delta to a bucket, creating it if needed
    pub fn add(&mut self, bucket: &str, delta: i64) {
        *self.buckets.entry(bucket.to_string()).or_insert(0) += delta;
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, i64)> {
        self.buckets.iter().map(|(name, value)| (name.as_str(), *value))
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}

impl FromIterator<(String, i64)> for Ledger {
    fn from_iter<T: IntoIterator<Item = (String, i64)>>(iter: T) -> Self {
        let mut ledger = Ledger::new();
        for (bucket, value) in iter {
            ledger.add(&bucket, value);
        }
        ledger
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_and_total() {
        let mut ledger = Ledger::new();
        ledger.add("index_1", 100);
        ledger.add(UNKNOWN_BUCKET, 40);
        ledger.add(UNKNOWN_BUCKET, -5);

        assert_eq!(ledger.get("index_1"), 100);
        assert_eq!(ledger.unknown(), 35);
        assert_eq!(ledger.get("index_2"), 0);
        assert_eq!(ledger.total(), 135);
    }

    #[test]
    fn test_json_matches_stored_format() {
        let ledger = Ledger::from_json(r#"{"unknown":40,"index_1":100}"#).unwrap();
        assert_eq!(ledger.total(), 140);
        assert_eq!(ledger.to_json().unwrap(), r#"{"index_1":100,"unknown":40}"#);
        assert_eq!(Ledger::from_json(&ledger.to_json().unwrap()).unwrap(), ledger);
    }

    #[test]
    fn test_empty_snapshot() {
        let ledger = Ledger::from_json("{}").unwrap();
        assert!(ledger.is_empty());
        assert_eq!(ledger.total(), 0);
    }
}
