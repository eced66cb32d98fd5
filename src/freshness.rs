//! Retry loop that keeps polling until the upstream snapshot is current.
//!
//! The upstream can answer with an empty body before the first publication of
//! the day, or with a cached snapshot whose declared timestamp lags the wall
//! clock. An empty answer is retried quickly; a stale one is retried more
//! slowly. The loop is bounded by `max_attempts` so a feed that never catches
//! up ends in [`GateError::FreshnessUnattainable`] instead of hanging.

use std::time::Duration;

use chrono::{NaiveDateTime, NaiveTime, TimeDelta, Timelike};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::chain::{Snapshot, SnapshotError};
use crate::fetch::SnapshotSource;

#[derive(Debug, Error)]
pub enum GateError {
    #[error(transparent)]
    Fetch(anyhow::Error),

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    #[error("no fresh {symbol} snapshot after {attempts} attempts (last declared: {last_declared:?})")]
    FreshnessUnattainable {
        symbol: String,
        attempts: u32,
        last_declared: Option<NaiveDateTime>,
    },
}

/// Why a snapshot was let through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acceptance {
    /// Declared within the tolerance of the expected instant.
    Fresh,
    /// Declared at the market-close minute; nothing newer will be published.
    MarketClose,
    /// Caller asked to take whatever is available.
    Forced,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FreshnessPolicy {
    pub tolerance: TimeDelta,
    pub empty_retry: Duration,
    pub stale_retry: Duration,
    pub market_close: NaiveTime,
    /// 0 means unbounded.
    pub max_attempts: u32,
}

/// 15:30, the last minute the exchange publishes.
pub const MARKET_CLOSE: NaiveTime = match NaiveTime::from_hms_opt(15, 30, 0) {
    Some(t) => t,
    None => panic!("invalid market close time"),
};

impl Default for FreshnessPolicy {
    fn default() -> Self {
        FreshnessPolicy {
            tolerance: TimeDelta::seconds(59),
            empty_retry: Duration::from_secs(5),
            stale_retry: Duration::from_secs(10),
            market_close: MARKET_CLOSE,
            max_attempts: 120,
        }
    }
}

impl FreshnessPolicy {
    /// Decide whether a snapshot declared at `declared` may be used for a
    /// capture expected at `expected`. `None` means retry.
    pub fn judge(
        &self,
        declared: NaiveDateTime,
        expected: NaiveDateTime,
        force: bool,
    ) -> Option<Acceptance> {
        if force {
            return Some(Acceptance::Forced);
        }
        if declared.hour() == self.market_close.hour()
            && declared.minute() == self.market_close.minute()
        {
            return Some(Acceptance::MarketClose);
        }
        if expected - declared <= self.tolerance {
            return Some(Acceptance::Fresh);
        }
        None
    }

    fn exhausted(&self, attempts: u32) -> bool {
        self.max_attempts > 0 && attempts >= self.max_attempts
    }
}

/// A snapshot the gate has certified, with how it got there.
#[derive(Debug, Clone)]
pub struct FreshSnapshot {
    pub snapshot: Snapshot,
    pub declared: NaiveDateTime,
    pub attempts: u32,
    pub acceptance: Acceptance,
}

pub struct FreshnessGate<S> {
    source: S,
    policy: FreshnessPolicy,
}

impl<S: SnapshotSource> FreshnessGate<S> {
    pub fn new(source: S, policy: FreshnessPolicy) -> Self {
        FreshnessGate { source, policy }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub async fn acquire_fresh(
        &self,
        symbol: &str,
        expected: NaiveDateTime,
        force: bool,
    ) -> Result<FreshSnapshot, GateError> {
        let mut attempts = 0u32;
        let mut last_declared = None;

        loop {
            attempts += 1;

            let snapshot = self.source.fetch(symbol).await.map_err(GateError::Fetch)?;
            if snapshot.is_empty() {
                debug!(symbol, attempt = attempts, "empty payload, not published yet");
                if self.policy.exhausted(attempts) {
                    return Err(unattainable(symbol, attempts, last_declared));
                }
                tokio::time::sleep(self.policy.empty_retry).await;
                continue;
            }

            let declared = snapshot.declared_timestamp()?;
            last_declared = Some(declared);

            if let Some(acceptance) = self.policy.judge(declared, expected, force) {
                info!(
                    symbol,
                    declared = %declared,
                    lag_secs = (expected - declared).num_seconds(),
                    attempts,
                    ?acceptance,
                    "snapshot accepted"
                );
                return Ok(FreshSnapshot {
                    snapshot,
                    declared,
                    attempts,
                    acceptance,
                });
            }

            warn!(
                symbol,
                declared = %declared,
                expected = %expected,
                retry_in_secs = self.policy.stale_retry.as_secs(),
                "snapshot is stale"
            );
            if self.policy.exhausted(attempts) {
                return Err(unattainable(symbol, attempts, last_declared));
            }
            tokio::time::sleep(self.policy.stale_retry).await;
        }
    }
}

fn unattainable(symbol: &str, attempts: u32, last_declared: Option<NaiveDateTime>) -> GateError {
    GateError::FreshnessUnattainable {
        symbol: symbol.to_string(),
        attempts,
        last_declared,
    }
}
