//! Checkpoint and incident journal
//!
//! Both logs are append-only SQLite tables. The schema is the one used by existing
//! deployments, so databases written before keep loading.

use crate::engine::{Outcome, Severity};
use crate::ledger::Ledger;
use anyhow::{Context, Result};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension};
use std::path::Path;

/// One row of the checkpoint log
#[derive(Debug, Clone, PartialEq)]
pub struct Checkpoint {
    /// Row id, increasing with every append
    pub id: i64,
    pub meter_id: u32,
    /// SQLite `datetime()` text, UTC
    pub created_at: String,
    pub ledger: Ledger,
}

/// One row of the incident log
#[derive(Debug, Clone, PartialEq)]
pub struct IncidentRecord {
    pub id: i64,
    pub created_at: String,
    pub text: String,
}

pub struct Journal {
    conn: Connection,
}

impl Journal {
    /// Open or create the journal database
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
        )
        .with_context(|| format!("Failed to open journal database: {:?}", path))?;

        Self::init_schema(&conn)?;
        log::info!("Journal opened: {:?}", path);
        Ok(Self { conn })
    }

    /// Journal that lives only as long as the test
    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("Failed to open in-memory journal")?;
        Self::init_schema(&conn)?;
        Ok(Self { conn })
    }

    fn init_schema(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS index_reports (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                meter_id INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                indexes TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS incidents (
                id INTEGER PRIMARY KEY,
                created_at TEXT NOT NULL,
                incident TEXT NOT NULL
            );
            "#,
        )
        .context("Failed to initialize journal schema")?;
        Ok(())
    }

    /// Most recent checkpoint of a meter
    pub fn latest_checkpoint(&self, meter_id: u32) -> Result<Option<Checkpoint>> {
        let row = self
            .conn
            .query_row(
                "SELECT id, created_at, indexes FROM index_reports
                 WHERE meter_id = ?1 ORDER BY id DESC LIMIT 1",
                params![meter_id],
                |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()
            .context("Failed to query latest checkpoint")?;

        match row {
            Some((id, created_at, indexes)) => {
                let ledger = Ledger::from_json(&indexes)
                    .with_context(|| format!("Checkpoint {} holds an invalid ledger", id))?;
                Ok(Some(Checkpoint {
                    id,
                    meter_id,
                    created_at,
                    ledger,
                }))
            }
            None => Ok(None),
        }
    }

    /// Append a ledger snapshot; returns the new row id
    pub fn append_checkpoint(&self, meter_id: u32, ledger: &Ledger) -> Result<i64> {
        let indexes = ledger.to_json().context("Failed to serialize ledger")?;
        self.conn
            .execute(
                "INSERT INTO index_reports (meter_id, created_at, indexes)
                 VALUES (?1, datetime(), ?2)",
                params![meter_id, indexes],
            )
            .context("Failed to append checkpoint")?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn record_incident(&self, text: &str) -> Result<()> {
        self.conn
            .execute(
                "INSERT INTO incidents (created_at, incident) VALUES (datetime(), ?1)",
                params![text],
            )
            .context("Failed to record incident")?;
        Ok(())
    }

    /// Latest incidents, newest first
    pub fn recent_incidents(&self, limit: usize) -> Result<Vec<IncidentRecord>> {
        let mut stmt = self
            .conn
            .prepare("SELECT id, created_at, incident FROM incidents ORDER BY id DESC LIMIT ?1")?;
        let rows = stmt.query_map(params![limit as i64], |row| {
            Ok(IncidentRecord {
                id: row.get(0)?,
                created_at: row.get(1)?,
                text: row.get(2)?,
            })
        })?;

        let mut incidents = Vec::new();
        for row in rows {
            incidents.push(row?);
        }
        Ok(incidents)
    }

    /// Persist the side effects of an engine operation
    ///
    /// Incidents are mirrored to the log before being written. A failed write is
    /// logged and skipped; the in-memory ledger stays authoritative.
    pub fn apply(&self, meter_id: u32, outcome: &Outcome) {
        for incident in &outcome.incidents {
            match incident.severity {
                Severity::Info => log::info!("{}", incident.text),
                Severity::Warning => log::warn!("{}", incident.text),
            }
            if let Err(e) = self.record_incident(&incident.text) {
                log::error!("{:#}", e);
            }
        }

        if let Some(ledger) = &outcome.checkpoint {
            match self.append_checkpoint(meter_id, ledger) {
                Ok(id) => log::debug!("Checkpoint {} written for meter {}", id, meter_id),
                Err(e) => log::error!("{:#}", e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{EngineConfig, VentilationEngine};
    use chrono::Utc;
    use teleinfo_decoder::FieldMap;

    fn ledger(pairs: &[(&str, i64)]) -> Ledger {
        pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect()
    }

    #[test]
    fn test_latest_checkpoint_per_meter() {
        let journal = Journal::open_in_memory().unwrap();
        assert!(journal.latest_checkpoint(1).unwrap().is_none());

        journal.append_checkpoint(1, &ledger(&[("index_1", 10)])).unwrap();
        journal.append_checkpoint(2, &ledger(&[("index_1", 99)])).unwrap();
        let last = journal.append_checkpoint(1, &ledger(&[("index_1", 20)])).unwrap();

        let checkpoint = journal.latest_checkpoint(1).unwrap().unwrap();
        assert_eq!(checkpoint.id, last);
        assert_eq!(checkpoint.ledger.get("index_1"), 20);
        assert!(!checkpoint.created_at.is_empty());
    }

    #[test]
    fn test_incidents_newest_first() {
        let journal = Journal::open_in_memory().unwrap();
        journal.record_incident("first").unwrap();
        journal.record_incident("second").unwrap();
        journal.record_incident("third").unwrap();

        let incidents = journal.recent_incidents(2).unwrap();
        let texts: Vec<&str> = incidents.iter().map(|i| i.text.as_str()).collect();
        assert_eq!(texts, vec!["third", "second"]);
        assert!(incidents[0].id > incidents[1].id);
    }

    #[test]
    fn test_apply_engine_outcome() {
        let journal = Journal::open_in_memory().unwrap();
        let mut engine = VentilationEngine::new(7, EngineConfig::default(), Ledger::new(), Utc::now());

        let outcome = engine.observe_counter(Some(140), &FieldMap::new());
        journal.apply(7, &outcome);

        let checkpoint = journal.latest_checkpoint(7).unwrap().unwrap();
        assert_eq!(checkpoint.ledger.unknown(), 140);
        assert_eq!(journal.recent_incidents(10).unwrap().len(), 1);
    }

    #[test]
    fn test_reopen_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index_reports.sqlite3");

        {
            let journal = Journal::open(&path).unwrap();
            journal.append_checkpoint(1, &ledger(&[("unknown", 5), ("index_2", 8)])).unwrap();
        }

        let journal = Journal::open(&path).unwrap();
        let checkpoint = journal.latest_checkpoint(1).unwrap().unwrap();
        assert_eq!(checkpoint.ledger.total(), 13);
    }

    #[test]
    fn test_corrupt_snapshot_is_an_error() {
        let journal = Journal::open_in_memory().unwrap();
        journal
            .conn
            .execute(
                "INSERT INTO index_reports (meter_id, created_at, indexes) VALUES (1, datetime(), 'nope')",
                [],
            )
            .unwrap();
        assert!(journal.latest_checkpoint(1).is_err());
    }
}
