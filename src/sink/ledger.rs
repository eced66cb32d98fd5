use std::path::Path;

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use rusqlite::{Connection, OptionalExtension, params};
use tracing::{debug, info};

use crate::chain::Snapshot;

use super::WriteOutcome;

const STORED_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// How the ledger treats a snapshot whose (symbol, timestamp) is already stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LedgerPolicy {
    #[default]
    AppendAlways,
    SkipDuplicates,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LedgerEntry {
    pub id: i64,
    pub symbol: String,
    pub data: String,
    pub timestamp: String,
    pub dumptime: String,
}

/// Append-only store of raw snapshots.
pub struct Ledger {
    conn: Connection,
    policy: LedgerPolicy,
}

impl Ledger {
    pub fn open(path: &Path, policy: LedgerPolicy) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating ledger directory {}", parent.display()))?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("opening sqlite at {}", path.display()))?;
        conn.execute_batch("PRAGMA journal_mode = WAL;")?;
        migrate(&conn)?;

        Ok(Ledger { conn, policy })
    }

    pub fn open_in_memory(policy: LedgerPolicy) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        migrate(&conn)?;
        Ok(Ledger { conn, policy })
    }

    pub fn append(
        &self,
        symbol: &str,
        snapshot: &Snapshot,
        declared: NaiveDateTime,
        written_at: NaiveDateTime,
    ) -> Result<WriteOutcome> {
        let timestamp = declared.format(STORED_FORMAT).to_string();

        if self.policy == LedgerPolicy::SkipDuplicates && self.contains(symbol, &timestamp)? {
            debug!(symbol, %timestamp, "snapshot already in ledger");
            return Ok(WriteOutcome::Skipped);
        }

        self.conn
            .execute(
                "INSERT INTO options_data (symbol, data, timestamp, dumptime)
                 VALUES (?1, ?2, ?3, ?4)",
                params![
                    symbol,
                    snapshot.to_json(),
                    timestamp,
                    written_at.format(STORED_FORMAT).to_string(),
                ],
            )
            .with_context(|| format!("inserting {symbol} snapshot into ledger"))?;

        info!(symbol, %timestamp, id = self.conn.last_insert_rowid(), "snapshot stored");
        Ok(WriteOutcome::Written)
    }

    pub fn count(&self, symbol: &str) -> Result<u64> {
        let n: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM options_data WHERE symbol = ?1",
            [symbol],
            |row| row.get(0),
        )?;
        Ok(n as u64)
    }

    pub fn latest(&self, symbol: &str) -> Result<Option<LedgerEntry>> {
        let entry = self
            .conn
            .query_row(
                "SELECT id, symbol, data, timestamp, dumptime FROM options_data
                 WHERE symbol = ?1 ORDER BY id DESC LIMIT 1",
                [symbol],
                |row| {
                    Ok(LedgerEntry {
                        id: row.get(0)?,
                        symbol: row.get(1)?,
                        data: row.get(2)?,
                        timestamp: row.get(3)?,
                        dumptime: row.get(4)?,
                    })
                },
            )
            .optional()?;
        Ok(entry)
    }

    fn contains(&self, symbol: &str, timestamp: &str) -> Result<bool> {
        let found = self
            .conn
            .query_row(
                "SELECT 1 FROM options_data WHERE symbol = ?1 AND timestamp = ?2 LIMIT 1",
                params![symbol, timestamp],
                |_| Ok(()),
            )
            .optional()?;
        Ok(found.is_some())
    }
}

fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS options_data (
            id        INTEGER PRIMARY KEY AUTOINCREMENT,
            symbol    TEXT NOT NULL,
            data      TEXT NOT NULL,
            timestamp TEXT NOT NULL,
            dumptime  TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_options_data_symbol_ts
            ON options_data (symbol, timestamp);
        ",
    )?;
    Ok(())
}
