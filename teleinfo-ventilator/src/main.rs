//! Teleinfo Ventilator
//!
//! Reads two teleinfo meters and splits the consumption of the "special" meter into
//! per-tariff buckets, following the tariff period announced by the "general" meter.
//! It uses the teleinfo-decoder library and adds:
//! - The ventilation engine and its ledger
//! - SQLite checkpoint and incident journal
//! - Periodic report file
//! - Optional system clock correction from the meter clock

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::io::{self, Write};
use std::path::PathBuf;
use teleinfo_decoder::{Decoder, DecoderError, UNKNOWN_BUCKET};

mod clock;
mod config;
mod engine;
mod feed;
mod ledger;
mod report;
mod service;
mod store;

use config::{load_config, AppConfig};

/// Teleinfo Ventilator - split meter consumption by tariff period
#[derive(Parser, Debug)]
#[command(name = "teleinfo-ventilator")]
#[command(about = "Split teleinfo meter consumption by tariff period", long_about = None)]
#[command(version)]
struct Args {
    /// Path to configuration file (config.toml)
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Verbosity level (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the ventilation service until SIGINT/SIGTERM
    Run,

    /// Print decoded frames of one feed as JSON
    Dump {
        /// Serial device or capture file
        #[arg(short, long, value_name = "PATH")]
        device: PathBuf,

        /// Line speed passed to stty
        #[arg(short, long, default_value_t = 1200)]
        baud: u32,

        /// Stop after this many frames
        #[arg(short, long, value_name = "COUNT")]
        frames: Option<usize>,

        /// Do not configure the line (capture files)
        #[arg(long)]
        raw: bool,
    },

    /// Render the report from the latest checkpoint
    Report {
        /// Output file (default: stdout)
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },

    /// Print the latest incidents, newest first
    Incidents {
        #[arg(short, long, default_value_t = 20)]
        limit: usize,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

    init_logging(args.verbose, args.quiet);

    log::info!("Teleinfo Ventilator v{}", env!("CARGO_PKG_VERSION"));
    log::info!("Using decoder library v{}", teleinfo_decoder::VERSION);

    let config = match &args.config {
        Some(path) => {
            log::info!("Loading configuration from {:?}", path);
            load_config(path)?
        }
        None => AppConfig::default(),
    };

    match args.command {
        Command::Run => service::run(config),
        Command::Dump {
            device,
            baud,
            frames,
            raw,
        } => dump(&config, device, baud, frames, raw),
        Command::Report { output } => report_once(&config, output),
        Command::Incidents { limit } => list_incidents(&config, limit),
    }
}

/// Read a feed and print each decoded field map
fn dump(
    config: &AppConfig,
    device: PathBuf,
    baud: u32,
    frames: Option<usize>,
    raw: bool,
) -> Result<()> {
    let spec = feed::FeedSpec {
        name: "dump",
        device,
        baud,
        configure_line: !raw,
    };
    let port = feed::open_transport(&spec)
        .with_context(|| format!("Failed to open {:?}", spec.device))?;
    let mut decoder = Decoder::new(port, config.framing.clone());

    let stdout = io::stdout();
    let mut out = stdout.lock();
    let mut printed = 0;

    while frames.map_or(true, |limit| printed < limit) {
        match decoder.next_fields() {
            Ok(fields) => {
                writeln!(out, "{}", serde_json::to_string_pretty(&fields)?)?;
                printed += 1;
            }
            Err(e) if e.is_recoverable() => log::warn!("{}", e),
            Err(DecoderError::EndOfStream) => break,
            Err(e) => return Err(e).context("Failed to read frames"),
        }
    }

    log::info!(
        "{} frames printed; framer {:?}; lines {:?}",
        printed,
        decoder.framer_stats(),
        decoder.decode_stats()
    );
    Ok(())
}

fn report_once(config: &AppConfig, output: Option<PathBuf>) -> Result<()> {
    let meter_id = config.special.meter_id;
    let journal = store::Journal::open(&config.storage.database)?;
    let ledger = journal
        .latest_checkpoint(meter_id)?
        .map(|checkpoint| checkpoint.ledger)
        .unwrap_or_default();
    if ledger.is_empty() {
        log::warn!("No checkpoint found for meter {}", meter_id);
    }

    let text = report::render_report(
        meter_id,
        &config.tariffs,
        &ledger,
        UNKNOWN_BUCKET,
        &chrono::Local::now(),
    );

    match output {
        Some(path) => report::write_report(&path, &text)?,
        None => print!("{}", text),
    }
    Ok(())
}

fn list_incidents(config: &AppConfig, limit: usize) -> Result<()> {
    let journal = store::Journal::open(&config.storage.database)?;
    for incident in journal.recent_incidents(limit)? {
        println!("{}\t{}\t{}", incident.id, incident.created_at, incident.text);
    }
    Ok(())
}

/// Initialize logging based on verbosity level
fn init_logging(verbose: u8, quiet: bool) {
    use env_logger::Builder;
    use log::LevelFilter;

    let level = if quiet {
        LevelFilter::Error
    } else {
        match verbose {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    };

    Builder::new()
        .filter_level(level)
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {}] {}",
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();
}
