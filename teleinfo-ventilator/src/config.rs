//! Configuration loading and parsing
//!
//! Every section is optional; the defaults describe the reference installation
//! (general meter on the first UART, special meter on the second).

use crate::engine::EngineConfig;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use teleinfo_decoder::{FramerConfig, FramerConfigError, TariffCode, TariffTable, UNKNOWN_BUCKET};

/// Main application configuration (loaded from config.toml)
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    #[serde(default)]
    pub general: GeneralMeterConfig,
    #[serde(default)]
    pub special: SpecialMeterConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub report: ReportConfig,
    #[serde(default)]
    pub ventilation: VentilationConfig,
    #[serde(default)]
    pub framing: FramerConfig,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub clock: ClockConfig,
    #[serde(default = "TariffTable::standard")]
    pub tariffs: TariffTable,
}

/// Meter announcing the active tariff period
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GeneralMeterConfig {
    #[serde(default = "default_general_device")]
    pub device: PathBuf,
    #[serde(default = "default_general_baud")]
    pub baud: u32,
    /// Field carrying the tariff period code
    #[serde(default = "default_tariff_field")]
    pub tariff_field: String,
    /// Field carrying the meter clock
    #[serde(default = "default_date_field")]
    pub date_field: String,
}

impl Default for GeneralMeterConfig {
    fn default() -> Self {
        Self {
            device: default_general_device(),
            baud: default_general_baud(),
            tariff_field: default_tariff_field(),
            date_field: default_date_field(),
        }
    }
}

fn default_general_device() -> PathBuf {
    PathBuf::from("/dev/ttyS0")
}

fn default_general_baud() -> u32 {
    9600
}

fn default_tariff_field() -> String {
    "NTARF".to_string()
}

fn default_date_field() -> String {
    "DATE".to_string()
}

/// Meter whose consumption is ventilated
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SpecialMeterConfig {
    #[serde(default = "default_special_device")]
    pub device: PathBuf,
    #[serde(default = "default_special_baud")]
    pub baud: u32,
    /// Identifier of the ledger in the checkpoint log
    #[serde(default = "default_meter_id")]
    pub meter_id: u32,
}

impl Default for SpecialMeterConfig {
    fn default() -> Self {
        Self {
            device: default_special_device(),
            baud: default_special_baud(),
            meter_id: default_meter_id(),
        }
    }
}

fn default_special_device() -> PathBuf {
    PathBuf::from("/dev/ttyAMA1")
}

fn default_special_baud() -> u32 {
    1200
}

fn default_meter_id() -> u32 {
    1
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    #[serde(default = "default_database")]
    pub database: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database: default_database(),
        }
    }
}

fn default_database() -> PathBuf {
    PathBuf::from("/var/lib/teleinfo/index_reports.sqlite3")
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReportConfig {
    #[serde(default = "default_report_path")]
    pub path: PathBuf,
    #[serde(default = "default_report_interval")]
    pub interval_secs: u64,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            path: default_report_path(),
            interval_secs: default_report_interval(),
        }
    }
}

fn default_report_path() -> PathBuf {
    PathBuf::from("/run/meter_report.txt")
}

fn default_report_interval() -> u64 {
    10
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VentilationConfig {
    /// Largest delta (Wh) accepted between two readings
    #[serde(default = "default_max_delta")]
    pub max_delta: i64,
    #[serde(default = "default_interval")]
    pub checkpoint_interval_secs: u64,
    #[serde(default = "default_interval")]
    pub staleness_secs: u64,
    #[serde(default = "default_unknown_incident_every")]
    pub unknown_incident_every: u64,
}

impl Default for VentilationConfig {
    fn default() -> Self {
        Self {
            max_delta: default_max_delta(),
            checkpoint_interval_secs: default_interval(),
            staleness_secs: default_interval(),
            unknown_incident_every: default_unknown_incident_every(),
        }
    }
}

impl VentilationConfig {
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            max_delta: self.max_delta,
            staleness: chrono::Duration::seconds(self.staleness_secs as i64),
            unknown_incident_every: self.unknown_incident_every,
        }
    }

    pub fn checkpoint_interval(&self) -> Duration {
        Duration::from_secs(self.checkpoint_interval_secs)
    }
}

fn default_max_delta() -> i64 {
    1000
}

fn default_interval() -> u64 {
    1800
}

fn default_unknown_incident_every() -> u64 {
    100
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TransportConfig {
    /// Delay before reopening a failed feed
    #[serde(default = "default_retry_delay")]
    pub retry_delay_secs: u64,
    /// Configure the line discipline with `stty` before reading
    #[serde(default = "default_true")]
    pub configure_line: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            retry_delay_secs: default_retry_delay(),
            configure_line: true,
        }
    }
}

fn default_retry_delay() -> u64 {
    5
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClockConfig {
    /// Set the system clock from the general meter when they drift apart
    #[serde(default)]
    pub sync: bool,
    #[serde(default = "default_max_drift")]
    pub max_drift_secs: u64,
    /// Minimum delay between two clock corrections
    #[serde(default = "default_interval")]
    pub retry_secs: u64,
}

impl Default for ClockConfig {
    fn default() -> Self {
        Self {
            sync: false,
            max_drift_secs: default_max_drift(),
            retry_secs: default_interval(),
        }
    }
}

fn default_max_drift() -> u64 {
    60
}

/// Configuration rejected at load time
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("{field} must be greater than zero")]
    NotPositive { field: &'static str },

    #[error("{field} is too large ({value} seconds)")]
    TooLarge { field: &'static str, value: u64 },

    #[error("Invalid framing settings: {0}")]
    Framing(#[from] FramerConfigError),

    #[error("Tariff code {0:?} is listed twice")]
    DuplicateCode(String),

    #[error("Tariff bucket {0:?} is listed twice")]
    DuplicateBucket(String),

    #[error("Tariff code {0:?} cannot use the reserved bucket \"unknown\"")]
    ReservedBucket(String),
}

impl AppConfig {
    /// Check settings that serde cannot express
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        let positive = [
            ("ventilation.checkpoint_interval_secs", self.ventilation.checkpoint_interval_secs),
            ("ventilation.staleness_secs", self.ventilation.staleness_secs),
            ("ventilation.unknown_incident_every", self.ventilation.unknown_incident_every),
            ("report.interval_secs", self.report.interval_secs),
            ("transport.retry_delay_secs", self.transport.retry_delay_secs),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(ConfigError::NotPositive { field });
            }
        }
        if self.ventilation.max_delta <= 0 {
            return Err(ConfigError::NotPositive {
                field: "ventilation.max_delta",
            });
        }

        // Both end up as chrono durations, which hold far less than u64 seconds
        let clock_windows = [
            ("ventilation.staleness_secs", self.ventilation.staleness_secs),
            ("clock.max_drift_secs", self.clock.max_drift_secs),
        ];
        for (field, value) in clock_windows {
            let fits = i64::try_from(value)
                .ok()
                .and_then(chrono::Duration::try_seconds)
                .is_some();
            if !fits {
                return Err(ConfigError::TooLarge { field, value });
            }
        }

        self.framing.validate()?;

        let mut codes = HashSet::new();
        let mut buckets = HashSet::new();
        for TariffCode { code, bucket, .. } in self.tariffs.entries() {
            if bucket == UNKNOWN_BUCKET {
                return Err(ConfigError::ReservedBucket(code.clone()));
            }
            if !codes.insert(code.as_str()) {
                return Err(ConfigError::DuplicateCode(code.clone()));
            }
            if !buckets.insert(bucket.as_str()) {
                return Err(ConfigError::DuplicateBucket(bucket.clone()));
            }
        }

        Ok(())
    }
}

/// Load configuration from a TOML file
pub fn load_config(path: &Path) -> Result<AppConfig> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {:?}", path))?;

    let config: AppConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {:?}", path))?;

    config
        .validate()
        .with_context(|| format!("Invalid config file: {:?}", path))?;

    Ok(config)
}
