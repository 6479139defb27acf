//! Long-running ventilation service
//!
//! Threads:
//! - one feed worker per meter
//! - a checkpoint ticker (periodic checkpoint and staleness check)
//! - a report renderer
//! - the main thread, which waits for SIGINT/SIGTERM and writes a final checkpoint
//!
//! The engine sits behind a single mutex. Engine outcomes are persisted under the
//! journal mutex, which is taken *before* the engine lock is released: writes reach
//! the database in the order the engine produced them, while feeds are free to
//! update the ledger during the write.

use crate::clock::{set_system_clock, ClockCheck, ClockGuard};
use crate::config::AppConfig;
use crate::engine::{ActiveBucket, Outcome, VentilationEngine};
use crate::feed::{run_feed, FeedSpec};
use crate::ledger::Ledger;
use crate::report::{render_report, write_report};
use crate::store::Journal;
use anyhow::{Context, Result};
use chrono::{Local, Utc};
use signal_hook::consts::signal::{SIGINT, SIGTERM};
use signal_hook::iterator::Signals;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread;
use std::time::{Duration, Instant};
use teleinfo_decoder::{parse_meter_date, resolve_counter, FieldMap, TariffTracker};

/// State shared by every worker
pub struct Shared {
    meter_id: u32,
    engine: Mutex<VentilationEngine>,
    journal: Mutex<Journal>,
}

impl Shared {
    pub fn new(meter_id: u32, engine: VentilationEngine, journal: Journal) -> Self {
        Self {
            meter_id,
            engine: Mutex::new(engine),
            journal: Mutex::new(journal),
        }
    }

    /// Run one engine operation and persist what it asks for
    pub fn with_engine<F>(&self, op: F)
    where
        F: FnOnce(&mut VentilationEngine) -> Outcome,
    {
        let mut engine = lock(&self.engine);
        let outcome = op(&mut engine);
        if outcome.is_empty() {
            return;
        }
        let journal = lock(&self.journal);
        drop(engine);
        journal.apply(self.meter_id, &outcome);
    }

    /// Consistent copy of the ledger and active bucket
    pub fn snapshot(&self) -> (Ledger, ActiveBucket) {
        let engine = lock(&self.engine);
        (engine.ledger().clone(), engine.active().clone())
    }

    /// Record an incident that does not come from the engine
    pub fn record_incident(&self, text: &str) {
        log::info!("{}", text);
        if let Err(e) = lock(&self.journal).record_incident(text) {
            log::error!("{:#}", e);
        }
    }

    pub fn final_checkpoint(&self) {
        self.with_engine(|engine| engine.checkpoint());
    }
}

/// Lock a mutex, recovering the data if a worker panicked while holding it
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Handle one frame from the special meter
pub fn on_special_frame(shared: &Shared, fields: FieldMap) {
    let reading = resolve_counter(&fields);
    if let Some(reading) = &reading {
        log::trace!("special meter: {} Wh ({})", reading.total, reading.scheme);
    }
    shared.with_engine(|engine| engine.observe_counter(reading.map(|r| r.total), &fields));
}

/// Handle one frame from the general meter
pub fn on_general_frame(shared: &Shared, tracker: &TariffTracker, fields: &FieldMap) {
    if let Some(bucket) = tracker.resolve(fields) {
        shared.with_engine(|engine| engine.observe_tariff(bucket, Utc::now()));
    }
}

fn check_clock(
    shared: &Shared,
    guard: &mut ClockGuard,
    sync: bool,
    fields: &FieldMap,
    date_field: &str,
) {
    let meter_time = match fields.get(date_field).and_then(parse_meter_date) {
        Some(meter_time) => meter_time,
        None => return,
    };

    match guard.check(meter_time, Utc::now(), Instant::now()) {
        ClockCheck::InSync | ClockCheck::Throttled => {}
        ClockCheck::Drifted { meter_time, .. } if sync => {
            let result = match set_system_clock(&meter_time) {
                Ok(ok) => ok.to_string(),
                Err(e) => e.to_string(),
            };
            shared.record_incident(&format!(
                "Trying to set time of day to {} with return value {}",
                meter_time, result
            ));
        }
        ClockCheck::Drifted { meter_time, drift_secs } => {
            log::warn!(
                "General meter clock {} is {}s away from the system clock",
                meter_time,
                drift_secs
            );
        }
    }
}

fn spawn<F>(name: &str, body: F) -> Result<()>
where
    F: FnOnce() + Send + 'static,
{
    thread::Builder::new()
        .name(name.to_string())
        .spawn(body)
        .with_context(|| format!("Failed to start {} thread", name))?;
    Ok(())
}

/// Run the service until a termination signal arrives
pub fn run(config: AppConfig) -> Result<()> {
    let meter_id = config.special.meter_id;
    let journal = Journal::open(&config.storage.database)?;

    let (line, ledger) = match journal.latest_checkpoint(meter_id)? {
        Some(checkpoint) => {
            log::info!(
                "Resuming meter {} from checkpoint {} written at {}",
                checkpoint.meter_id,
                checkpoint.id,
                checkpoint.created_at
            );
            (checkpoint.id.to_string(), checkpoint.ledger)
        }
        None => ("none".to_string(), Ledger::new()),
    };

    let engine = VentilationEngine::new(
        meter_id,
        config.ventilation.engine_config(),
        ledger,
        Utc::now(),
    );
    let shared = Arc::new(Shared::new(meter_id, engine, journal));
    shared.record_incident(&format!(
        "read indexes from database for meter {} from line number {}",
        meter_id, line
    ));

    // Register before any worker runs so an early signal still checkpoints
    let mut signals = Signals::new([SIGINT, SIGTERM]).context("Failed to register signal handlers")?;

    let retry_delay = Duration::from_secs(config.transport.retry_delay_secs);

    {
        let shared = Arc::clone(&shared);
        let spec = FeedSpec {
            name: "general",
            device: config.general.device.clone(),
            baud: config.general.baud,
            configure_line: config.transport.configure_line,
        };
        let tracker = TariffTracker::new(config.general.tariff_field.clone(), config.tariffs.clone());
        let date_field = config.general.date_field.clone();
        let clock_sync = config.clock.sync;
        let mut guard = ClockGuard::new(
            config.clock.max_drift_secs,
            Duration::from_secs(config.clock.retry_secs),
        );
        let framing = config.framing.clone();
        spawn("general-feed", move || {
            run_feed(spec, framing, retry_delay, |fields| {
                check_clock(&shared, &mut guard, clock_sync, &fields, &date_field);
                on_general_frame(&shared, &tracker, &fields);
            })
        })?;
    }

    {
        let shared = Arc::clone(&shared);
        let spec = FeedSpec {
            name: "special",
            device: config.special.device.clone(),
            baud: config.special.baud,
            configure_line: config.transport.configure_line,
        };
        let framing = config.framing.clone();
        spawn("special-feed", move || {
            run_feed(spec, framing, retry_delay, |fields| on_special_frame(&shared, fields))
        })?;
    }

    {
        let shared = Arc::clone(&shared);
        let interval = config.ventilation.checkpoint_interval();
        spawn("checkpoint", move || loop {
            thread::sleep(interval);
            shared.with_engine(|engine| {
                let stats = engine.stats();
                log::debug!(
                    "Engine {:?}: {} ventilations ({} unknown), {} anomalies, {} ignored",
                    engine.sync_state(),
                    stats.ventilations,
                    stats.unknown_ventilations,
                    stats.anomalies,
                    stats.ignored
                );
                engine.tick(Utc::now())
            });
        })?;
    }

    {
        let shared = Arc::clone(&shared);
        let interval = Duration::from_secs(config.report.interval_secs);
        let path = config.report.path.clone();
        let tariffs = config.tariffs.clone();
        spawn("report", move || loop {
            thread::sleep(interval);
            let (ledger, active) = shared.snapshot();
            let text = render_report(meter_id, &tariffs, &ledger, &active.bucket, &Local::now());
            if let Err(e) = write_report(&path, &text) {
                log::warn!("{:#}", e);
            }
        })?;
    }

    if let Some(signal) = signals.forever().next() {
        log::info!("Received signal {}, writing final checkpoint", signal);
    }
    shared.final_checkpoint();
    Ok(())
}
