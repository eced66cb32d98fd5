use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{FixedOffset, NaiveDateTime, NaiveTime, Offset, TimeDelta, Timelike, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::freshness::FreshnessPolicy;
use crate::sink::ledger::LedgerPolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("`symbol` must not be empty")]
    EmptySymbol,

    #[error("`target_strikes` must list at least one strike")]
    NoStrikes,

    #[error("`schedule` must list at least one HH:MM time")]
    NoSchedule,

    #[error("invalid time `{value}` in `{field}` (expected HH:MM)")]
    BadTime { field: &'static str, value: String },

    #[error("`fire_second` {0} is outside 0..=59")]
    BadFireSecond(u32),

    #[error("invalid `utc_offset` `{0}` (expected +HH:MM or -HH:MM)")]
    BadOffset(String),

    #[error("`cloud.{field}` must not be empty")]
    EmptyCloudField { field: &'static str },
}

// ── File schema ──────────────────────────────────────────────────────

/// Capture configuration as written on disk (JSON).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    pub symbol: String,
    pub target_strikes: Vec<i64>,
    /// Daily trigger times, `HH:MM`, exchange-local.
    pub schedule: Vec<String>,
    /// Second within the trigger minute at which the cycle fires.
    #[serde(default = "default_fire_second")]
    pub fire_second: u32,
    #[serde(default = "default_utc_offset")]
    pub utc_offset: String,
    /// Minute at which the exchange stops publishing; a snapshot stamped at
    /// this minute is final.
    #[serde(default = "default_market_close")]
    pub market_close: String,
    #[serde(default)]
    pub endpoint: EndpointConfig,
    #[serde(default)]
    pub freshness: FreshnessConfig,
    #[serde(default)]
    pub ledger: LedgerConfig,
    /// `null` disables the workbook sink.
    #[serde(default = "default_workbook")]
    pub workbook: Option<WorkbookConfig>,
    #[serde(default)]
    pub cloud: Option<CloudConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_true")]
    pub warm_up: bool,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        EndpointConfig {
            base_url: default_base_url(),
            warm_up: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FreshnessConfig {
    #[serde(default = "default_tolerance_secs")]
    pub tolerance_secs: u64,
    #[serde(default = "default_empty_retry_secs")]
    pub empty_retry_secs: u64,
    #[serde(default = "default_stale_retry_secs")]
    pub stale_retry_secs: u64,
    /// 0 retries forever.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for FreshnessConfig {
    fn default() -> Self {
        FreshnessConfig {
            tolerance_secs: default_tolerance_secs(),
            empty_retry_secs: default_empty_retry_secs(),
            stale_retry_secs: default_stale_retry_secs(),
            max_attempts: default_max_attempts(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerConfig {
    #[serde(default = "default_ledger_path")]
    pub path: PathBuf,
    /// Skip inserting a snapshot whose (symbol, timestamp) is already stored.
    #[serde(default)]
    pub dedupe: bool,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        LedgerConfig {
            path: default_ledger_path(),
            dedupe: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkbookConfig {
    /// Defaults to `report/{SYMBOL}_options_data.xlsx`.
    #[serde(default)]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudConfig {
    /// JSON file holding an OAuth `access_token`.
    pub credentials: PathBuf,
    /// Spreadsheet (document) name, resolved through Drive.
    pub sheet_name: String,
    /// Tab title inside the spreadsheet.
    pub worksheet: String,
    /// Skips the name lookup when set.
    #[serde(default)]
    pub spreadsheet_id: Option<String>,
}

fn default_fire_second() -> u32 {
    59
}
fn default_utc_offset() -> String {
    "+05:30".to_string()
}
fn default_market_close() -> String {
    "15:30".to_string()
}
fn default_base_url() -> String {
    "https://www.nseindia.com".to_string()
}
fn default_true() -> bool {
    true
}
fn default_tolerance_secs() -> u64 {
    59
}
fn default_empty_retry_secs() -> u64 {
    5
}
fn default_stale_retry_secs() -> u64 {
    10
}
fn default_max_attempts() -> u32 {
    120
}
fn default_ledger_path() -> PathBuf {
    PathBuf::from("options_data.sqlite3")
}
fn default_workbook() -> Option<WorkbookConfig> {
    Some(WorkbookConfig::default())
}

// ── Resolved settings ────────────────────────────────────────────────

/// Validated configuration with every field parsed into its working type.
#[derive(Debug, Clone)]
pub struct Settings {
    pub symbol: String,
    pub target_strikes: Vec<i64>,
    pub trigger_times: Vec<NaiveTime>,
    pub utc_offset: FixedOffset,
    pub freshness: FreshnessPolicy,
    pub endpoint: EndpointConfig,
    pub ledger_path: PathBuf,
    pub ledger_policy: LedgerPolicy,
    pub workbook_path: Option<PathBuf>,
    pub cloud: Option<CloudConfig>,
}

impl Settings {
    /// Current wall-clock time on the exchange clock.
    pub fn now_local(&self) -> NaiveDateTime {
        Utc::now().with_timezone(&self.utc_offset).naive_local()
    }
}

/// Load a config file and validate it, collecting every problem.
pub fn load_and_validate(path: &Path) -> Result<Settings, Vec<ConfigError>> {
    let contents = std::fs::read_to_string(path).map_err(|source| {
        vec![ConfigError::Io {
            path: path.to_path_buf(),
            source,
        }]
    })?;
    let config: CaptureConfig =
        serde_json::from_str(&contents).map_err(|e| vec![ConfigError::Json(e)])?;
    config.resolve()
}

impl CaptureConfig {
    pub fn resolve(&self) -> Result<Settings, Vec<ConfigError>> {
        let mut errors = Vec::new();

        let symbol = self.symbol.trim().to_uppercase();
        if symbol.is_empty() {
            errors.push(ConfigError::EmptySymbol);
        }

        let mut seen = HashSet::new();
        let target_strikes: Vec<i64> = self
            .target_strikes
            .iter()
            .copied()
            .filter(|s| seen.insert(*s))
            .collect();
        if target_strikes.is_empty() {
            errors.push(ConfigError::NoStrikes);
        }

        if self.fire_second > 59 {
            errors.push(ConfigError::BadFireSecond(self.fire_second));
        }
        if self.schedule.is_empty() {
            errors.push(ConfigError::NoSchedule);
        }
        let mut trigger_times = Vec::new();
        for raw in &self.schedule {
            match parse_hh_mm(raw).and_then(|t| t.with_second(self.fire_second.min(59))) {
                Some(at) => trigger_times.push(at),
                None => errors.push(ConfigError::BadTime {
                    field: "schedule",
                    value: raw.clone(),
                }),
            }
        }
        trigger_times.sort();
        trigger_times.dedup();

        let market_close = parse_hh_mm(&self.market_close).unwrap_or_else(|| {
            errors.push(ConfigError::BadTime {
                field: "market_close",
                value: self.market_close.clone(),
            });
            NaiveTime::MIN
        });

        let utc_offset = parse_offset(&self.utc_offset).unwrap_or_else(|| {
            errors.push(ConfigError::BadOffset(self.utc_offset.clone()));
            Utc.fix()
        });

        if let Some(cloud) = &self.cloud {
            if cloud.sheet_name.trim().is_empty() && cloud.spreadsheet_id.is_none() {
                errors.push(ConfigError::EmptyCloudField { field: "sheet_name" });
            }
            if cloud.worksheet.trim().is_empty() {
                errors.push(ConfigError::EmptyCloudField { field: "worksheet" });
            }
        }

        if !errors.is_empty() {
            return Err(errors);
        }

        let freshness = FreshnessPolicy {
            tolerance: TimeDelta::seconds(self.freshness.tolerance_secs as i64),
            empty_retry: Duration::from_secs(self.freshness.empty_retry_secs),
            stale_retry: Duration::from_secs(self.freshness.stale_retry_secs),
            market_close,
            max_attempts: self.freshness.max_attempts,
        };

        let workbook_path = self.workbook.as_ref().map(|w| {
            w.path
                .clone()
                .unwrap_or_else(|| PathBuf::from(format!("report/{symbol}_options_data.xlsx")))
        });

        Ok(Settings {
            symbol,
            target_strikes,
            trigger_times,
            utc_offset,
            freshness,
            endpoint: self.endpoint.clone(),
            ledger_path: self.ledger.path.clone(),
            ledger_policy: if self.ledger.dedupe {
                LedgerPolicy::SkipDuplicates
            } else {
                LedgerPolicy::AppendAlways
            },
            workbook_path,
            cloud: self.cloud.clone(),
        })
    }
}

fn parse_hh_mm(raw: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(raw.trim(), "%H:%M").ok()
}

/// `+05:30` / `-04:00`
fn parse_offset(raw: &str) -> Option<FixedOffset> {
    let raw = raw.trim();
    let (sign, rest) = match raw.as_bytes().first()? {
        b'+' => (1, &raw[1..]),
        b'-' => (-1, &raw[1..]),
        _ => return None,
    };
    let (hours, minutes) = rest.split_once(':')?;
    let hours: i32 = hours.parse().ok()?;
    let minutes: i32 = minutes.parse().ok()?;
    if !(0..=23).contains(&hours) || !(0..=59).contains(&minutes) {
        return None;
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
}
