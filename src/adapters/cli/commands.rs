//! CLI Command Handlers
//!
//! `run` starts one engine per enabled venue, `status` prints what the
//! ledgers on disk hold, `validate` checks a config file without trading.

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use super::status::{render_json, render_text};
use crate::adapters::announcement::FileAnnouncementSource;
use crate::adapters::notify::build_notifier;
use crate::adapters::paper::PaperVenue;
use crate::application::{EngineDeps, TickScheduler, VenueEngine};
use crate::config::{load_config, Config, LoggingSection, VenueConfig};
use crate::domain::{LedgerStore, LoadedState};
use crate::ports::{AnnouncementSource, Clock, Notifier, SystemClock};

/// Listing sniper - buys newly listed pairs and exits on a deadline ladder
#[derive(Parser, Debug)]
#[command(
    name = "listing-sniper",
    version = env!("CARGO_PKG_VERSION"),
    about = "Buys newly listed trading pairs and exits them on a deadline ladder",
    long_about = "Watches announced listings, enters the new pair the moment a venue lists it, \
                  and sells through slow limit, fast limit and forced market exits."
)]
pub struct CliApp {
    /// The command to execute
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start the venue engines
    Run(RunCmd),

    /// Show tracked listings and positions from the saved ledgers
    Status(StatusCmd),

    /// Check a configuration file and exit
    Validate(ValidateCmd),
}

#[derive(Parser, Debug)]
pub struct RunCmd {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", default_value = "config/config.toml")]
    pub config: PathBuf,

    /// Trade against the simulated paper venue
    #[arg(short, long)]
    pub paper: bool,

    /// Only run this venue
    #[arg(long, value_name = "NAME")]
    pub venue: Option<String>,
}

#[derive(Parser, Debug)]
pub struct StatusCmd {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", default_value = "config/config.toml")]
    pub config: PathBuf,

    /// Output format (text, json)
    #[arg(short, long, value_name = "FORMAT", default_value = "text")]
    pub format: String,

    /// Only show this venue
    #[arg(long, value_name = "NAME")]
    pub venue: Option<String>,
}

#[derive(Parser, Debug)]
pub struct ValidateCmd {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", default_value = "config/config.toml")]
    pub config: PathBuf,
}

/// Execute the CLI command
pub async fn execute(app: CliApp) -> Result<()> {
    match app.command {
        Command::Run(cmd) => run_command(cmd, app.verbose, app.debug).await,
        Command::Status(cmd) => status_command(cmd, app.verbose, app.debug),
        Command::Validate(cmd) => validate_command(cmd, app.verbose, app.debug),
    }
}

/// Initialize logging: stdout always, plus a plain-text file when enabled.
/// `RUST_LOG` overrides the computed level.
pub fn init_logging(verbose: bool, debug: bool, logging: Option<&LoggingSection>) -> Result<()> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let level = if debug {
        "debug"
    } else if verbose {
        "info"
    } else {
        logging.map_or("warn", |l| l.level.as_str())
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let file_layer = match logging.filter(|l| l.log_to_file) {
        Some(l) => {
            let path = PathBuf::from(shellexpand::tilde(&l.log_file).to_string());
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create log directory {}", parent.display()))?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .with_context(|| format!("Failed to open log file {}", path.display()))?;
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_target(false)
                    .with_writer(Mutex::new(file)),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .with(file_layer)
        .try_init()
        .context("Failed to initialize logging")?;
    Ok(())
}

fn selected_venues<'a>(config: &'a Config, only: Option<&str>) -> Result<Vec<&'a VenueConfig>> {
    let venues: Vec<_> = config
        .enabled_venues()
        .filter(|v| only.map_or(true, |name| v.name.eq_ignore_ascii_case(name)))
        .collect();
    if venues.is_empty() {
        match only {
            Some(name) => bail!("No enabled venue named '{}' in the configuration", name),
            None => bail!("No enabled venues in the configuration"),
        }
    }
    Ok(venues)
}

/// Handle run command
async fn run_command(cmd: RunCmd, verbose: bool, debug: bool) -> Result<()> {
    let config = load_config(&cmd.config)
        .with_context(|| format!("Failed to load configuration from {}", cmd.config.display()))?;
    init_logging(verbose, debug, Some(&config.logging))?;

    let paper = cmd.paper || config.engine.paper;
    if !paper {
        bail!(
            "No live venue client is built into this binary; run with --paper \
             or set engine.paper = true"
        );
    }
    tracing::warn!("PAPER TRADING MODE - orders go to the simulated venue");

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let announcements: Arc<dyn AnnouncementSource> = Arc::new(FileAnnouncementSource::new(
        config.announcements.path(),
        clock.clone(),
    ));
    let notifier: Arc<dyn Notifier> = Arc::new(build_notifier(&config.alerts));

    let mut scheduler = TickScheduler::new(config.engine.frequency());
    for venue_config in selected_venues(&config, cmd.venue.as_deref())? {
        let venue = PaperVenue::new(&venue_config.name, clock.clone())
            .with_starting_book(&venue_config.quote_asset)
            .with_listing_feed(announcements.clone());
        let deps = EngineDeps {
            venue: Arc::new(venue),
            announcements: announcements.clone(),
            notifier: notifier.clone(),
            clock: clock.clone(),
        };
        let store = LedgerStore::new(config.engine.data_dir(), venue_config.name.clone());

        let mut engine = match VenueEngine::new(venue_config.clone(), store, deps) {
            Ok(engine) => engine
                .with_config_reload(cmd.config.clone())
                .with_housekeeping_interval(config.engine.housekeeping_interval()),
            Err(e) => {
                tracing::error!("[{}] Not starting venue: {}", venue_config.name, e);
                continue;
            }
        };
        engine.recover();
        scheduler.add_engine(engine);
    }

    if scheduler.engine_count() == 0 {
        bail!("No venue could be started");
    }

    let shutdown = scheduler.shutdown_handle();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("Shutdown signal received");
        shutdown.trigger();
    });

    let summaries = scheduler.run().await;
    for summary in &summaries {
        tracing::info!(
            "[{}] {} ticks, {} entries, {} closes, {} errors",
            summary.venue,
            summary.ticks,
            summary.entries,
            summary.closes,
            summary.errors
        );
    }
    if summaries.iter().any(|s| !s.final_flush_ok) {
        bail!("At least one ledger failed its final flush");
    }
    Ok(())
}

/// Handle status command. Read-only: corrupted files are reported, not moved.
fn status_command(cmd: StatusCmd, verbose: bool, debug: bool) -> Result<()> {
    let config = load_config(&cmd.config)
        .with_context(|| format!("Failed to load configuration from {}", cmd.config.display()))?;
    init_logging(verbose, debug, None)?;

    let data_dir = config.engine.data_dir();
    let states = saved_states(&data_dir, &selected_venues(&config, cmd.venue.as_deref())?);

    match cmd.format.as_str() {
        "json" => {
            let reports = states
                .iter()
                .map(|(name, state)| render_json(name, state))
                .collect::<Result<Vec<_>, _>>()?;
            println!("{}", serde_json::to_string_pretty(&reports)?);
        }
        "text" => {
            for (name, state) in &states {
                println!("{}", render_text(name, state));
            }
        }
        other => bail!("Unknown format '{}', expected text or json", other),
    }
    Ok(())
}

fn saved_states(data_dir: &Path, venues: &[&VenueConfig]) -> Vec<(String, LoadedState)> {
    venues
        .iter()
        .map(|v| (v.name.clone(), LedgerStore::new(data_dir, v.name.clone()).inspect()))
        .collect()
}

/// Handle validate command
fn validate_command(cmd: ValidateCmd, verbose: bool, debug: bool) -> Result<()> {
    init_logging(verbose, debug, None)?;
    let errors = validate_file(&cmd.config)?;
    if errors.is_empty() {
        println!("{} is valid", cmd.config.display());
        return Ok(());
    }
    for error in &errors {
        println!("  {}", error);
    }
    bail!("{} venue(s) failed validation", errors.len())
}

/// Per-venue validation failures; file-level failures are returned as errors.
pub fn validate_file(path: &Path) -> Result<Vec<String>> {
    let config = load_config(path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))?;
    Ok(config
        .enabled_venues()
        .filter_map(|v| v.validate().err().map(|e| e.to_string()))
        .collect())
}
