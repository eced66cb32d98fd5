
use std::collections::VecDeque;
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::json;

use optchain_capture::chain::Snapshot;
use optchain_capture::config::{CaptureConfig, Settings};
use optchain_capture::fetch::SnapshotSource;
use optchain_capture::freshness::{Acceptance, GateError};
use optchain_capture::run::Capture;
use optchain_capture::sink::workbook::LABEL_ROW;
use optchain_capture::sink::{Ledger, LedgerPolicy, WriteOutcome, XlsxBackend};

use stub_common::*;

/// Serves queued payloads in order, then keeps repeating the last one.
struct Replay(Mutex<VecDeque<Snapshot>>);

impl Replay {
    fn new(payloads: Vec<Snapshot>) -> Self {
        Replay(Mutex::new(payloads.into()))
    }
}

#[async_trait]
impl SnapshotSource for Replay {
    async fn fetch(&self, _symbol: &str) -> anyhow::Result<Snapshot> {
        let mut queue = self.0.lock().unwrap();
        let next = if queue.len() > 1 {
            queue.pop_front()
        } else {
            queue.front().cloned()
        };
        Ok(next.unwrap_or_else(Snapshot::empty))
    }
}

fn settings(dir: &Path, dedupe: bool) -> Settings {
    let config: CaptureConfig = serde_json::from_value(json!({
        "symbol": "NIFTY",
        "target_strikes": [24600, 24700],
        "schedule": ["09:15", "15:30"],
        "ledger": { "path": dir.join("db/options_data.sqlite3"), "dedupe": dedupe },
        "workbook": { "path": dir.join("report/NIFTY_options_data.xlsx") },
        "freshness": { "max_attempts": 5 },
    }))
    .unwrap();
    config.resolve().unwrap()
}

fn snapshot(day: u32, h: u32, m: u32) -> Snapshot {
    Snapshot::new(chain_payload(at(day, h, m, 0), 24650.4, &[24500, 24600, 24700, 24800]))
}

#[tokio::test(start_paused = true)]
async fn test_cycle_writes_ledger_and_workbook() {
    let dir = tempfile::tempdir().unwrap();
    let settings = settings(dir.path(), false);
    let ledger_path = settings.ledger_path.clone();
    let workbook_path = settings.workbook_path.clone().unwrap();

    let capture = Capture::new(
        settings,
        Replay::new(vec![Snapshot::empty(), snapshot(16, 9, 14), snapshot(16, 9, 15)]),
    );
    let report = capture.cycle_at(at(16, 9, 15, 59), false).await.unwrap();

    assert_eq!(report.attempts, 3);
    assert_eq!(report.acceptance, Acceptance::Fresh);
    assert_eq!(report.quotes, 4);
    assert_eq!(report.ledger, WriteOutcome::Written);
    assert_eq!(report.workbook, Some(WriteOutcome::Written));
    assert_eq!(report.cloud, None);

    let ledger = Ledger::open(&ledger_path, LedgerPolicy::AppendAlways).unwrap();
    assert_eq!(ledger.count("NIFTY").unwrap(), 1);
    assert_eq!(ledger.latest("NIFTY").unwrap().unwrap().timestamp, "2024-07-16 09:15:00");

    let workbook = XlsxBackend::open(&workbook_path, "NIFTY").unwrap();
    assert_eq!(workbook.grid().text(4, LABEL_ROW), Some("09:15"));
    assert_eq!(workbook.grid().text(3, 6), Some("24600 CE"));
    assert_eq!(workbook.grid().text(3, 9), Some("24700 PE"));
    assert!(workbook.grid().text(3, 10).is_none());
}

#[tokio::test(start_paused = true)]
async fn test_repeated_cycle_is_idempotent_for_sheets_only() {
    let dir = tempfile::tempdir().unwrap();
    let settings = settings(dir.path(), false);
    let ledger_path = settings.ledger_path.clone();

    let capture = Capture::new(settings, Replay::new(vec![snapshot(16, 15, 30)]));
    let first = capture.cycle_at(at(16, 15, 30, 59), false).await.unwrap();
    let second = capture.cycle_at(at(16, 15, 30, 59), false).await.unwrap();

    assert_eq!(first.workbook, Some(WriteOutcome::Written));
    assert_eq!(second.workbook, Some(WriteOutcome::Skipped));
    // The ledger keeps every capture by default.
    assert_eq!(second.ledger, WriteOutcome::Written);
    let ledger = Ledger::open(&ledger_path, LedgerPolicy::AppendAlways).unwrap();
    assert_eq!(ledger.count("NIFTY").unwrap(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_ledger_dedupe_option() {
    let dir = tempfile::tempdir().unwrap();
    let capture = Capture::new(settings(dir.path(), true), Replay::new(vec![snapshot(16, 10, 0)]));
    capture.cycle_at(at(16, 10, 0, 59), false).await.unwrap();
    let second = capture.cycle_at(at(16, 10, 0, 59), false).await.unwrap();
    assert_eq!(second.ledger, WriteOutcome::Skipped);
}

#[tokio::test(start_paused = true)]
async fn test_market_close_snapshot_accepted_late() {
    let dir = tempfile::tempdir().unwrap();
    let capture = Capture::new(settings(dir.path(), false), Replay::new(vec![snapshot(16, 15, 30)]));
    let report = capture.cycle_at(at(16, 15, 35, 59), false).await.unwrap();
    assert_eq!(report.acceptance, Acceptance::MarketClose);
    assert_eq!(report.attempts, 1);
}

#[tokio::test(start_paused = true)]
async fn test_stale_feed_gives_up_without_writing() {
    let dir = tempfile::tempdir().unwrap();
    let settings = settings(dir.path(), false);
    let ledger_path = settings.ledger_path.clone();

    let capture = Capture::new(settings, Replay::new(vec![snapshot(16, 9, 0)]));
    let err = capture.cycle_at(at(16, 11, 0, 59), false).await.unwrap_err();
    match err.downcast_ref::<GateError>() {
        Some(GateError::FreshnessUnattainable { attempts, .. }) => assert_eq!(*attempts, 5),
        other => panic!("expected FreshnessUnattainable, got {other:?}"),
    }
    assert!(!ledger_path.exists());
}

#[tokio::test(start_paused = true)]
async fn test_forced_cycle_takes_old_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let capture = Capture::new(settings(dir.path(), false), Replay::new(vec![snapshot(16, 9, 0)]));
    let report = capture.cycle_at(at(16, 11, 0, 59), true).await.unwrap();
    assert_eq!(report.acceptance, Acceptance::Forced);
    assert_eq!(report.declared, at(16, 9, 0, 0));
}
