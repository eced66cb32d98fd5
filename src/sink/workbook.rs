//! Date-block layout of the capture workbook.
//!
//! Each calendar date owns a block of columns on the symbol's worksheet:
//!
//! ```text
//!        col c          col c+1              col c+2  col c+3 ...
//! row 3  NIFTY
//! row 4  DATE 16-07-2024
//! row 5  Identifier     Strike Price / Type  09:15    09:30
//! row 6  OPTIDX..CE..   24600 CE             101.5    99.0
//! row 7  OPTIDX..PE..   24600 PE             80.25    82.1
//! ...
//! row 20 NIFTY                               24650.4  24661.0
//! ```
//!
//! Blocks are laid out left to right with one blank column between them.
//! The layout is computed over a [`Grid`], independent of the file format;
//! [`super::xlsx`] loads and persists it.

use std::collections::BTreeMap;

use chrono::{NaiveDate, NaiveDateTime};
use tracing::warn;

use super::{CaptureBatch, WriteOutcome};

pub const HEADER_ROW: u32 = 3;
pub const DATE_ROW: u32 = 4;
pub const LABEL_ROW: u32 = 5;
pub const FIRST_DATA_ROW: u32 = 6;
pub const SUMMARY_ROW: u32 = 20;
pub const FIRST_BLOCK_COLUMN: u32 = 2;

/// Columns before the first value column in a block.
const FIXED_COLUMNS: u32 = 2;

#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Text(String),
    Number(f64),
}

impl CellValue {
    pub fn render(&self) -> String {
        match self {
            CellValue::Text(s) => s.clone(),
            CellValue::Number(n) => n.to_string(),
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            CellValue::Text(s) => Some(s),
            CellValue::Number(_) => None,
        }
    }
}

impl From<&str> for CellValue {
    fn from(s: &str) -> Self {
        CellValue::Text(s.to_string())
    }
}

impl From<String> for CellValue {
    fn from(s: String) -> Self {
        CellValue::Text(s)
    }
}

impl From<f64> for CellValue {
    fn from(n: f64) -> Self {
        CellValue::Number(n)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CellStyle {
    pub bold: bool,
    pub centered: bool,
}

const PLAIN: CellStyle = CellStyle {
    bold: false,
    centered: false,
};
const BOLD: CellStyle = CellStyle {
    bold: true,
    centered: false,
};
const HEADING: CellStyle = CellStyle {
    bold: true,
    centered: true,
};

/// A pending cell write, replayed onto the real worksheet on save.
#[derive(Debug, Clone, PartialEq)]
pub struct CellWrite {
    pub col: u32,
    pub row: u32,
    pub value: CellValue,
    pub style: CellStyle,
}

/// Sparse 1-based (column, row) cell map plus the log of writes made to it.
#[derive(Debug, Clone, Default)]
pub struct Grid {
    cells: BTreeMap<(u32, u32), CellValue>,
    writes: Vec<CellWrite>,
}

impl Grid {
    pub fn new() -> Self {
        Self::default()
    }

    /// Grid holding existing cells; nothing is logged as written.
    pub fn load(cells: impl IntoIterator<Item = ((u32, u32), CellValue)>) -> Self {
        Grid {
            cells: cells.into_iter().collect(),
            writes: Vec::new(),
        }
    }

    pub fn set(&mut self, col: u32, row: u32, value: impl Into<CellValue>, style: CellStyle) {
        let value = value.into();
        self.cells.insert((col, row), value.clone());
        self.writes.push(CellWrite {
            col,
            row,
            value,
            style,
        });
    }

    pub fn get(&self, col: u32, row: u32) -> Option<&CellValue> {
        self.cells.get(&(col, row))
    }

    pub fn text(&self, col: u32, row: u32) -> Option<&str> {
        self.get(col, row).and_then(CellValue::as_text)
    }

    fn is_empty_at(&self, col: u32, row: u32) -> bool {
        match self.get(col, row) {
            None => true,
            Some(CellValue::Text(s)) => s.is_empty(),
            Some(CellValue::Number(_)) => false,
        }
    }

    /// Rightmost used column, 0 for an empty grid.
    pub fn max_column(&self) -> u32 {
        self.cells.keys().map(|&(col, _)| col).max().unwrap_or(0)
    }

    pub fn writes(&self) -> &[CellWrite] {
        &self.writes
    }

    pub fn take_writes(&mut self) -> Vec<CellWrite> {
        std::mem::take(&mut self.writes)
    }

    /// `(column, width)` for every used column: `(longest rendered value + 2) * 1.2`.
    pub fn column_widths(&self) -> Vec<(u32, f64)> {
        let mut longest: BTreeMap<u32, usize> = BTreeMap::new();
        for (&(col, _), value) in &self.cells {
            let len = value.render().chars().count();
            let entry = longest.entry(col).or_default();
            *entry = (*entry).max(len);
        }
        longest
            .into_iter()
            .map(|(col, len)| (col, (len as f64 + 2.0) * 1.2))
            .collect()
    }
}

pub fn date_label(date: NaiveDate) -> String {
    format!("DATE {}", date.format("%d-%m-%Y"))
}

pub fn time_label(timestamp: NaiveDateTime) -> String {
    timestamp.format("%H:%M").to_string()
}

/// First column of the block for `date`, if one exists.
pub fn find_block(grid: &Grid, date: NaiveDate) -> Option<u32> {
    let wanted = date_label(date);
    (FIRST_BLOCK_COLUMN..=grid.max_column()).find(|&col| grid.text(col, DATE_ROW) == Some(&wanted))
}

/// Where a new block goes: column 2 on an empty sheet, otherwise one blank
/// column to the right of the rightmost used label cell.
pub fn next_block_column(grid: &Grid) -> u32 {
    let rightmost = (1..=grid.max_column())
        .rev()
        .find(|&col| !grid.is_empty_at(col, LABEL_ROW));
    match rightmost {
        Some(col) => (col + 2).max(FIRST_BLOCK_COLUMN),
        None => FIRST_BLOCK_COLUMN,
    }
}

/// First empty label cell scanning right from the block start.
pub fn append_point(grid: &Grid, block: u32) -> u32 {
    let mut col = block;
    while !grid.is_empty_at(col, LABEL_ROW) {
        col += 1;
    }
    col
}

/// Label of the most recent value column in the block for `date`.
pub fn last_label(grid: &Grid, date: NaiveDate) -> Option<String> {
    let block = find_block(grid, date)?;
    let next = append_point(grid, block);
    if next <= block + FIXED_COLUMNS {
        return None;
    }
    grid.get(next - 1, LABEL_ROW).map(CellValue::render)
}

/// Row holding the underlying value for a block with `data_rows` quote rows.
pub fn summary_row(data_rows: u32) -> u32 {
    SUMMARY_ROW.max(FIRST_DATA_ROW + data_rows + 1)
}

/// Write `batch` into its date block, creating the block when needed.
pub fn record(grid: &mut Grid, batch: &CaptureBatch) -> WriteOutcome {
    match find_block(grid, batch.date()) {
        None => {
            let block = next_block_column(grid);
            create_block(grid, block, batch);
            WriteOutcome::Written
        }
        Some(block) => extend_block(grid, block, batch),
    }
}

fn create_block(grid: &mut Grid, block: u32, batch: &CaptureBatch) {
    let value_col = block + FIXED_COLUMNS;

    grid.set(block, HEADER_ROW, batch.symbol.as_str(), BOLD);
    grid.set(block, DATE_ROW, date_label(batch.date()), BOLD);
    grid.set(block, LABEL_ROW, "Identifier", HEADING);
    grid.set(block + 1, LABEL_ROW, "Strike Price / Type", HEADING);
    grid.set(value_col, LABEL_ROW, time_label(batch.timestamp), HEADING);

    for (row, quote) in (FIRST_DATA_ROW..).zip(&batch.quotes) {
        grid.set(block, row, quote.identifier.as_str(), PLAIN);
        grid.set(block + 1, row, quote.strike_label(), PLAIN);
        grid.set(value_col, row, quote.last_price, PLAIN);
    }

    let summary = summary_row(batch.quotes.len() as u32);
    grid.set(block, summary, batch.symbol.as_str(), PLAIN);
    grid.set(value_col, summary, batch.underlying_value, PLAIN);
}

fn extend_block(grid: &mut Grid, block: u32, batch: &CaptureBatch) -> WriteOutcome {
    let label = time_label(batch.timestamp);
    let col = append_point(grid, block);
    if col > block + FIXED_COLUMNS && grid.text(col - 1, LABEL_ROW) == Some(label.as_str()) {
        return WriteOutcome::Skipped;
    }

    let rows: BTreeMap<String, u32> = (FIRST_DATA_ROW..)
        .map_while(|row| grid.text(block, row).filter(|s| !s.is_empty()).map(|id| (id.to_string(), row)))
        .collect();

    grid.set(col, LABEL_ROW, label, HEADING);
    for quote in &batch.quotes {
        match rows.get(&quote.identifier) {
            Some(&row) => grid.set(col, row, quote.last_price, PLAIN),
            None => warn!(
                symbol = %batch.symbol,
                identifier = %quote.identifier,
                "identifier not present in today's block, skipping"
            ),
        }
    }

    grid.set(col, summary_row(rows.len() as u32), batch.underlying_value, PLAIN);
    WriteOutcome::Written
}

/// `1 -> "A"`, `27 -> "AA"`.
pub fn column_letter(mut col: u32) -> String {
    let mut letters = Vec::new();
    while col > 0 {
        let rem = (col - 1) % 26;
        letters.push(b'A' + rem as u8);
        col = (col - 1) / 26;
    }
    letters.reverse();
    String::from_utf8_lossy(&letters).into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{OptionQuote, OptionSide};

    fn batch(day: u32, h: u32, m: u32, strikes: &[i64]) -> CaptureBatch {
        let quotes = strikes
            .iter()
            .flat_map(|&strike| {
                [OptionSide::Call, OptionSide::Put].map(|side| OptionQuote {
                    strike,
                    side,
                    identifier: format!("OPTIDXNIFTY25-07-2024{side}{strike}.00"),
                    last_price: strike as f64 / 100.0 + m as f64,
                })
            })
            .collect();
        CaptureBatch {
            symbol: "NIFTY".to_string(),
            timestamp: NaiveDate::from_ymd_opt(2024, 7, day)
                .unwrap()
                .and_hms_opt(h, m, 0)
                .unwrap(),
            underlying_value: 24650.4,
            quotes,
        }
    }

    #[test]
    fn test_new_block_layout() {
        let mut grid = Grid::new();
        assert_eq!(record(&mut grid, &batch(16, 9, 15, &[24600])), WriteOutcome::Written);

        assert_eq!(grid.text(2, HEADER_ROW), Some("NIFTY"));
        assert_eq!(grid.text(2, DATE_ROW), Some("DATE 16-07-2024"));
        assert_eq!(grid.text(2, LABEL_ROW), Some("Identifier"));
        assert_eq!(grid.text(3, LABEL_ROW), Some("Strike Price / Type"));
        assert_eq!(grid.text(4, LABEL_ROW), Some("09:15"));
        assert_eq!(grid.text(2, 6), Some("OPTIDXNIFTY25-07-2024CE24600.00"));
        assert_eq!(grid.text(3, 6), Some("24600 CE"));
        assert_eq!(grid.text(3, 7), Some("24600 PE"));
        assert_eq!(grid.get(4, 6), Some(&CellValue::Number(261.0)));
        assert_eq!(grid.text(2, SUMMARY_ROW), Some("NIFTY"));
        assert_eq!(grid.get(4, SUMMARY_ROW), Some(&CellValue::Number(24650.4)));

        let heading = grid.writes().iter().find(|w| w.row == LABEL_ROW).unwrap();
        assert_eq!(heading.style, HEADING);
    }

    #[test]
    fn test_same_minute_is_noop() {
        let mut grid = Grid::new();
        record(&mut grid, &batch(16, 9, 15, &[24600]));
        let before = grid.max_column();
        let writes = grid.writes().len();
        assert_eq!(record(&mut grid, &batch(16, 9, 15, &[24600])), WriteOutcome::Skipped);
        assert_eq!(grid.max_column(), before);
        assert_eq!(grid.writes().len(), writes);
    }

    #[test]
    fn test_new_time_appends_column() {
        let mut grid = Grid::new();
        record(&mut grid, &batch(16, 9, 15, &[24600]));
        record(&mut grid, &batch(16, 9, 30, &[24600]));

        assert_eq!(grid.text(5, LABEL_ROW), Some("09:30"));
        assert_eq!(grid.get(5, 6), Some(&CellValue::Number(276.0)));
        assert_eq!(grid.get(5, SUMMARY_ROW), Some(&CellValue::Number(24650.4)));
        assert_eq!(last_label(&grid, batch(16, 0, 0, &[]).date()).as_deref(), Some("09:30"));
    }

    #[test]
    fn test_new_date_opens_block_after_separator() {
        let mut grid = Grid::new();
        record(&mut grid, &batch(16, 9, 15, &[24600]));
        record(&mut grid, &batch(16, 9, 30, &[24600]));
        record(&mut grid, &batch(17, 9, 15, &[24600]));

        // Block one spans columns 2..=5, column 6 stays blank.
        assert!(grid.get(6, LABEL_ROW).is_none());
        assert_eq!(find_block(&grid, batch(17, 0, 0, &[]).date()), Some(7));
        assert_eq!(grid.text(7, DATE_ROW), Some("DATE 17-07-2024"));
        assert_eq!(grid.text(9, LABEL_ROW), Some("09:15"));
        // The first block is untouched.
        assert_eq!(grid.text(5, LABEL_ROW), Some("09:30"));
    }

    #[test]
    fn test_unknown_identifier_is_skipped() {
        let mut grid = Grid::new();
        record(&mut grid, &batch(16, 9, 15, &[24600]));
        let outcome = record(&mut grid, &batch(16, 9, 30, &[24600, 24700]));
        assert_eq!(outcome, WriteOutcome::Written);
        // Only the two known rows received prices.
        assert!(grid.get(5, 8).is_none());
        assert!(grid.get(5, 9).is_none());
        assert!(grid.get(5, 7).is_some());
    }

    #[test]
    fn test_summary_row_moves_below_many_quotes() {
        assert_eq!(summary_row(4), SUMMARY_ROW);
        assert_eq!(summary_row(13), SUMMARY_ROW);
        assert_eq!(summary_row(14), 21);

        let strikes: Vec<i64> = (0..8).map(|i| 24000 + i * 100).collect();
        let mut grid = Grid::new();
        record(&mut grid, &batch(16, 9, 15, &strikes));
        record(&mut grid, &batch(16, 9, 30, &strikes));
        assert_eq!(grid.text(3, 21), Some("24700 PE"));
        assert_eq!(grid.get(5, 23), Some(&CellValue::Number(24650.4)));
    }

    #[test]
    fn test_existing_foreign_content_is_skipped_over() {
        let mut grid = Grid::load([((3, LABEL_ROW), CellValue::from("notes"))]);
        record(&mut grid, &batch(16, 9, 15, &[24600]));
        assert_eq!(find_block(&grid, batch(16, 0, 0, &[]).date()), Some(5));
    }

    #[test]
    fn test_column_widths() {
        let grid = Grid::load([
            ((1, 1), CellValue::from("abcd")),
            ((1, 2), CellValue::from("ab")),
            ((2, 1), CellValue::Number(12.5)),
        ]);
        let widths = grid.column_widths();
        assert_eq!(widths.len(), 2);
        assert!((widths[0].1 - 7.2).abs() < 1e-9);
        assert!((widths[1].1 - 7.2).abs() < 1e-9);
    }

    #[test]
    fn test_column_letter() {
        assert_eq!(column_letter(1), "A");
        assert_eq!(column_letter(26), "Z");
        assert_eq!(column_letter(27), "AA");
        assert_eq!(column_letter(702), "ZZ");
        assert_eq!(column_letter(703), "AAA");
    }
}
