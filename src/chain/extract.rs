use std::collections::HashSet;
use std::fmt;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde_json::Value;

use super::snapshot::{Snapshot, SnapshotError, invalid, lookup, number_at};

// ── Records ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OptionSide {
    Call,
    Put,
}

impl OptionSide {
    /// Upstream key and display code (`CE` / `PE`).
    pub fn code(self) -> &'static str {
        match self {
            OptionSide::Call => "CE",
            OptionSide::Put => "PE",
        }
    }
}

impl fmt::Display for OptionSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// One side of one strike, linearized out of a snapshot entry.
#[derive(Debug, Clone, PartialEq)]
pub struct OptionQuote {
    pub strike: i64,
    pub side: OptionSide,
    pub identifier: String,
    pub last_price: f64,
}

impl OptionQuote {
    /// `"24600 CE"`
    pub fn strike_label(&self) -> String {
        format!("{} {}", self.strike, self.side)
    }
}

/// Output of [`extract`]: the filtered quotes plus the snapshot header values.
#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    pub quotes: Vec<OptionQuote>,
    pub timestamp: NaiveDateTime,
    pub underlying_value: f64,
}

/// A symbol's extraction, the unit handed to every tabular sink.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureBatch {
    pub symbol: String,
    pub timestamp: NaiveDateTime,
    pub underlying_value: f64,
    pub quotes: Vec<OptionQuote>,
}

impl CaptureBatch {
    pub fn new(symbol: impl Into<String>, extraction: Extraction) -> Self {
        CaptureBatch {
            symbol: symbol.into(),
            timestamp: extraction.timestamp,
            underlying_value: extraction.underlying_value,
            quotes: extraction.quotes,
        }
    }

    pub fn date(&self) -> NaiveDate {
        self.timestamp.date()
    }

    /// Row-shaped view: the underlying first, then one row per quote.
    pub fn records(&self) -> Vec<CaptureRecord> {
        let date = self.timestamp.date();
        let time = self.timestamp.time();

        let mut records = Vec::with_capacity(self.quotes.len() + 1);
        records.push(CaptureRecord {
            date,
            instrument: self.symbol.clone(),
            time,
            price: self.underlying_value,
        });
        records.extend(self.quotes.iter().map(|q| CaptureRecord {
            date,
            instrument: format!("{} {}", self.symbol, q.strike_label()),
            time,
            price: q.last_price,
        }));
        records
    }
}

/// One row: {date, instrument label, time of day, price}.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureRecord {
    pub date: NaiveDate,
    pub instrument: String,
    pub time: NaiveTime,
    pub price: f64,
}

// ── Extraction ───────────────────────────────────────────────────────

/// Narrow a snapshot to `target_strikes`, emitting call then put for every
/// surviving strike in the order the upstream listed them.
pub fn extract(snapshot: &Snapshot, target_strikes: &[i64]) -> Result<Extraction, SnapshotError> {
    let timestamp = snapshot.declared_timestamp()?;
    let underlying_value = snapshot.underlying_value()?;
    let targets: HashSet<i64> = target_strikes.iter().copied().collect();

    let mut quotes = Vec::new();
    for (index, entry) in snapshot.filtered_entries()?.iter().enumerate() {
        let path = format!("filtered.data[{index}]");
        let strike = strike_of(entry, &path)?;
        let Some(strike) = strike.filter(|s| targets.contains(s)) else {
            continue;
        };
        for side in [OptionSide::Call, OptionSide::Put] {
            quotes.push(quote_of(entry, strike, side, &path)?);
        }
    }

    Ok(Extraction {
        quotes,
        timestamp,
        underlying_value,
    })
}

/// Integral strike of an entry; fractional strikes can never match a target.
fn strike_of(entry: &Value, path: &str) -> Result<Option<i64>, SnapshotError> {
    let raw = number_at(entry, &["strikePrice"]).map_err(|e| prefix(e, path))?;
    if raw.fract() == 0.0 {
        Ok(Some(raw as i64))
    } else {
        Ok(None)
    }
}

fn quote_of(
    entry: &Value,
    strike: i64,
    side: OptionSide,
    path: &str,
) -> Result<OptionQuote, SnapshotError> {
    let leg = lookup(entry, &[side.code()]).map_err(|e| prefix(e, path))?;
    let leg_path = format!("{path}.{}", side.code());

    let identifier_value = lookup(leg, &["identifier"]).map_err(|e| prefix(e, &leg_path))?;
    let identifier = identifier_value
        .as_str()
        .ok_or_else(|| invalid(&format!("{leg_path}.identifier"), identifier_value))?
        .to_string();
    let last_price = number_at(leg, &["lastPrice"]).map_err(|e| prefix(e, &leg_path))?;

    Ok(OptionQuote {
        strike,
        side,
        identifier,
        last_price,
    })
}

fn prefix(err: SnapshotError, path: &str) -> SnapshotError {
    match err {
        SnapshotError::MissingField { path: inner } => SnapshotError::MissingField {
            path: format!("{path}.{inner}"),
        },
        SnapshotError::InvalidField { path: inner, value } => SnapshotError::InvalidField {
            path: format!("{path}.{inner}"),
            value,
        },
        other => other,
    }
}
