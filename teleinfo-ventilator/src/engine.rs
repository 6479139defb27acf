//! Ventilation engine
//!
//! Turns the special meter's cumulative counter into per-bucket energy, using the
//! tariff period announced by the general meter.
//!
//! The engine is a plain state machine: it never touches the database, the clock or
//! the log. Every operation returns an [`Outcome`] listing the checkpoint to persist
//! (if any) and the incidents to record, and the caller applies it.
//!
//! ## States
//! - `Unsynced` at process start, whatever the loaded ledger says. The first
//!   non-zero delta is put in `unknown`: nobody knows which tariff period consumed
//!   the energy while the process was down.
//! - `Synced` afterwards, for the rest of the process lifetime.
//!
//! ## Per-reading rules once synced
//! - `0 < delta <= max_delta`: into the active bucket.
//! - `delta < 0` or `delta > max_delta`: anomaly, into `unknown`, checkpoint now.

use crate::ledger::Ledger;
use chrono::Duration;
use teleinfo_decoder::{FieldMap, Timestamp, UNKNOWN_BUCKET};

/// Tunables of the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Largest delta accepted as normal consumption between two readings
    pub max_delta: i64,
    /// Age after which the active bucket falls back to `unknown`
    pub staleness: Duration,
    /// Record one incident per this many readings attributed to `unknown`
    pub unknown_incident_every: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_delta: 1000,
            staleness: Duration::seconds(1800),
            unknown_incident_every: 100,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Unsynced,
    Synced,
}

/// Tariff bucket currently receiving energy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveBucket {
    pub bucket: String,
    pub updated_at: Timestamp,
}

impl ActiveBucket {
    fn unknown(now: Timestamp) -> Self {
        Self {
            bucket: UNKNOWN_BUCKET.to_string(),
            updated_at: now,
        }
    }

    pub fn is_unknown(&self) -> bool {
        self.bucket == UNKNOWN_BUCKET
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Warning,
}

/// Human-readable audit note
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Incident {
    pub severity: Severity,
    pub text: String,
}

impl Incident {
    fn info(text: String) -> Self {
        Self {
            severity: Severity::Info,
            text,
        }
    }

    fn warning(text: String) -> Self {
        Self {
            severity: Severity::Warning,
            text,
        }
    }
}

/// Side effects requested by one engine operation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Outcome {
    /// Ledger snapshot to append to the checkpoint log
    pub checkpoint: Option<Ledger>,
    /// Incidents to record, in order
    pub incidents: Vec<Incident>,
}

impl Outcome {
    pub fn is_empty(&self) -> bool {
        self.checkpoint.is_none() && self.incidents.is_empty()
    }
}

/// Counters kept for diagnostics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineStats {
    /// Readings attributed to a bucket as normal consumption
    pub ventilations: u64,
    /// Readings attributed to `unknown` because no tariff period was active
    pub unknown_ventilations: u64,
    /// Negative or oversized deltas
    pub anomalies: u64,
    /// Readings ignored because no counter could be resolved
    pub ignored: u64,
}

pub struct VentilationEngine {
    meter_id: u32,
    config: EngineConfig,
    ledger: Ledger,
    active: ActiveBucket,
    sync: SyncState,
    stats: EngineStats,
}

impl VentilationEngine {
    /// Start from a ledger loaded from the last checkpoint (or empty)
    pub fn new(meter_id: u32, config: EngineConfig, ledger: Ledger, now: Timestamp) -> Self {
        Self {
            meter_id,
            config,
            ledger,
            active: ActiveBucket::unknown(now),
            sync: SyncState::Unsynced,
            stats: EngineStats::default(),
        }
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn active(&self) -> &ActiveBucket {
        &self.active
    }

    pub fn sync_state(&self) -> SyncState {
        self.sync
    }

    pub fn stats(&self) -> EngineStats {
        self.stats
    }

    /// The general meter announced a recognised tariff period
    pub fn observe_tariff(&mut self, bucket: &str, now: Timestamp) -> Outcome {
        let mut outcome = Outcome::default();
        if bucket != self.active.bucket {
            outcome.incidents.push(Incident::info(format!(
                "Setting general meter index from {} to {}",
                self.active.bucket, bucket
            )));
            self.active.bucket = bucket.to_string();
        }
        self.active.updated_at = now;
        outcome
    }

    /// The special meter reported a frame
    ///
    /// `reading` is the resolved cumulative counter; `None` and zero are ignored.
    /// `fields` is only used to document anomalies.
    pub fn observe_counter(&mut self, reading: Option<u64>, fields: &FieldMap) -> Outcome {
        let new_sum = match reading.filter(|total| *total != 0).map(i64::try_from) {
            Some(Ok(total)) => total,
            _ => {
                self.stats.ignored += 1;
                return Outcome::default();
            }
        };

        let delta = new_sum - self.ledger.total();

        match self.sync {
            SyncState::Unsynced => self.absorb_baseline(delta),
            SyncState::Synced if delta == 0 => Outcome::default(),
            SyncState::Synced if delta > 0 && delta <= self.config.max_delta => {
                self.ventilate(delta)
            }
            SyncState::Synced => self.absorb_anomaly(delta, fields),
        }
    }

    /// Periodic maintenance: unconditional checkpoint and staleness check
    pub fn tick(&mut self, now: Timestamp) -> Outcome {
        let mut outcome = Outcome::default();

        if !self.active.is_unknown() && now - self.active.updated_at >= self.config.staleness {
            outcome.incidents.push(Incident::warning(format!(
                "Reverting general meter index to unknown. Last update was {}.",
                self.active.updated_at
            )));
            self.active = ActiveBucket::unknown(now);
        }

        outcome.checkpoint = Some(self.ledger.clone());
        outcome
    }

    /// Checkpoint request outside of the periodic tick (shutdown)
    pub fn checkpoint(&self) -> Outcome {
        Outcome {
            checkpoint: Some(self.ledger.clone()),
            incidents: Vec::new(),
        }
    }

    fn absorb_baseline(&mut self, delta: i64) -> Outcome {
        self.sync = SyncState::Synced;
        if delta == 0 {
            return Outcome::default();
        }

        self.ledger.add(UNKNOWN_BUCKET, delta);
        Outcome {
            checkpoint: Some(self.ledger.clone()),
            incidents: vec![Incident::info(format!(
                "adjust unknown index from meter {} by {} Wh",
                self.meter_id, delta
            ))],
        }
    }

    fn ventilate(&mut self, delta: i64) -> Outcome {
        let bucket = self.active.bucket.clone();
        self.ledger.add(&bucket, delta);
        self.stats.ventilations += 1;

        let mut outcome = Outcome::default();
        if self.active.is_unknown() {
            self.stats.unknown_ventilations += 1;
            let every = self.config.unknown_incident_every.max(1);
            if (self.stats.unknown_ventilations - 1) % every == 0 {
                outcome.incidents.push(Incident::info(format!(
                    "ventilate {} Wh of meter {} into the unknown index (occurrence {})",
                    delta, self.meter_id, self.stats.unknown_ventilations
                )));
            }
        }
        outcome
    }

    fn absorb_anomaly(&mut self, delta: i64, fields: &FieldMap) -> Outcome {
        self.ledger.add(UNKNOWN_BUCKET, delta);
        self.stats.anomalies += 1;

        let dump = serde_json::to_string(fields).unwrap_or_else(|_| fields.to_string());
        Outcome {
            checkpoint: Some(self.ledger.clone()),
            incidents: vec![
                Incident::warning(format!(
                    "strange consumption of {} of {} Wh",
                    self.meter_id, delta
                )),
                Incident::warning(format!("meter_info for {} {}", self.meter_id, dump)),
            ],
        }
    }
}
