pub mod registry;
pub mod scheduler;

use std::path::Path;

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use tracing::{error, info, warn};

use crate::chain::{CaptureBatch, extract};
use crate::config::{self, Settings};
use crate::fetch::{NseClient, SnapshotSource};
use crate::freshness::{Acceptance, FreshnessGate};
use crate::sink::{GoogleSheetBackend, Ledger, WriteOutcome, XlsxBackend, append_dedup};

use scheduler::DailyScheduler;

/// CLI-facing options for the `run` command.
pub struct RunConfig {
    /// Run one cycle at startup before waiting for the schedule.
    pub init: bool,
    /// Same, but accept whatever snapshot is available.
    pub init_now: bool,
}

/// What one capture cycle did.
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub symbol: String,
    pub declared: NaiveDateTime,
    pub attempts: u32,
    pub acceptance: Acceptance,
    pub quotes: usize,
    pub ledger: WriteOutcome,
    pub workbook: Option<WriteOutcome>,
    pub cloud: Option<WriteOutcome>,
}

/// One symbol's capture pipeline: gate, ledger, extraction, tabular sinks.
pub struct Capture<S> {
    settings: Settings,
    gate: FreshnessGate<S>,
}

impl<S: SnapshotSource> Capture<S> {
    pub fn new(settings: Settings, source: S) -> Self {
        let gate = FreshnessGate::new(source, settings.freshness.clone());
        Capture { settings, gate }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Run a cycle expecting a snapshot as of the current exchange time.
    pub async fn cycle(&self, force: bool) -> Result<CycleReport> {
        let expected = self.settings.now_local();
        self.cycle_at(expected, force).await
    }

    /// Sinks run in order (ledger, workbook, cloud); the first failure ends
    /// the cycle and earlier writes stay in place.
    pub async fn cycle_at(&self, expected: NaiveDateTime, force: bool) -> Result<CycleReport> {
        let symbol = self.settings.symbol.as_str();
        info!(symbol, expected = %expected, force, "capture cycle starting");

        let fresh = self.gate.acquire_fresh(symbol, expected, force).await?;

        let ledger = Ledger::open(&self.settings.ledger_path, self.settings.ledger_policy)
            .context("opening ledger")?;
        let ledger_outcome = ledger.append(
            symbol,
            &fresh.snapshot,
            fresh.declared,
            self.settings.now_local(),
        )?;
        drop(ledger);

        let extraction = extract(&fresh.snapshot, &self.settings.target_strikes)
            .with_context(|| format!("extracting {symbol} strikes"))?;
        let batch = CaptureBatch::new(symbol, extraction);
        if batch.quotes.is_empty() {
            warn!(symbol, "none of the target strikes are in the snapshot");
        }

        let workbook = match &self.settings.workbook_path {
            Some(path) => {
                let mut backend = XlsxBackend::open(path, symbol)?;
                Some(append_dedup(&mut backend, &batch).await?)
            }
            None => None,
        };

        let cloud = match &self.settings.cloud {
            Some(cloud) => {
                let mut backend = GoogleSheetBackend::connect(cloud)
                    .await
                    .context("opening cloud worksheet")?;
                Some(append_dedup(&mut backend, &batch).await?)
            }
            None => None,
        };

        Ok(CycleReport {
            symbol: symbol.to_string(),
            declared: fresh.declared,
            attempts: fresh.attempts,
            acceptance: fresh.acceptance,
            quotes: batch.quotes.len(),
            ledger: ledger_outcome,
            workbook,
            cloud,
        })
    }
}

pub fn load_settings(config_path: &Path) -> Result<Settings> {
    config::load_and_validate(config_path).map_err(|errors| {
        let msgs: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
        anyhow::anyhow!(
            "Config validation failed ({}):\n  {}",
            config_path.display(),
            msgs.join("\n  ")
        )
    })
}

/// Entry point for the `run` command.
pub fn run(config_path: &Path, cli_config: &RunConfig) -> Result<()> {
    let settings = load_settings(config_path)?;
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("creating tokio runtime")?;
    rt.block_on(run_async(settings, cli_config))
}

/// Entry point for the `once` command.
pub fn once(config_path: &Path, force: bool) -> Result<()> {
    let settings = load_settings(config_path)?;
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("creating tokio runtime")?;
    rt.block_on(async {
        let source = NseClient::new(&settings.endpoint)?;
        let capture = Capture::new(settings, source);
        let report = capture.cycle(force).await?;
        log_report(&report);
        Ok(())
    })
}

async fn run_async(settings: Settings, cli_config: &RunConfig) -> Result<()> {
    let source = NseClient::new(&settings.endpoint)?;
    let capture = Capture::new(settings, source);
    let settings = capture.settings();

    info!(
        symbol = %settings.symbol,
        strikes = ?settings.target_strikes,
        triggers = settings.trigger_times.len(),
        utc_offset = %settings.utc_offset,
        "capture daemon starting"
    );

    if cli_config.init || cli_config.init_now {
        let report = capture.cycle(cli_config.init_now).await?;
        log_report(&report);
    }

    let mut scheduler = DailyScheduler::new(&settings.trigger_times, settings.now_local());
    if let Some(next) = scheduler.next_run() {
        info!(next = %next, "waiting for first trigger");
    }

    loop {
        tokio::select! {
            fired = scheduler.wait_for_next(|| settings.now_local()) => {
                if fired.len() > 1 {
                    warn!(slots = ?fired, "overdue triggers coalesced into one cycle");
                }
                match capture.cycle(false).await {
                    Ok(report) => log_report(&report),
                    Err(e) => {
                        error!(error = %format!("{e:#}"), "capture cycle failed");
                        return Err(e);
                    }
                }
                if let Some(next) = scheduler.next_run() {
                    info!(next = %next, "next trigger");
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received, shutting down");
                return Ok(());
            }
        }
    }
}

fn log_report(report: &CycleReport) {
    info!(
        symbol = %report.symbol,
        declared = %report.declared,
        attempts = report.attempts,
        acceptance = ?report.acceptance,
        quotes = report.quotes,
        ledger = ?report.ledger,
        workbook = ?report.workbook,
        cloud = ?report.cloud,
        "capture cycle complete"
    );
}
