use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::debug;
use umya_spreadsheet::{HorizontalAlignmentValues, Spreadsheet, Worksheet};

use super::tabular::TabularBackend;
use super::workbook::{self, CellValue, CellWrite, Grid};
use super::{CaptureBatch, SinkError, WriteOutcome};

/// Local `.xlsx` workbook with one worksheet per symbol.
pub struct XlsxBackend {
    path: PathBuf,
    sheet: String,
    book: Spreadsheet,
    grid: Grid,
}

impl XlsxBackend {
    /// Load the workbook at `path`, or start an empty one if the file is absent.
    pub fn open(path: &Path, sheet: &str) -> Result<Self> {
        let mut book = if path.exists() {
            umya_spreadsheet::reader::xlsx::read(path)
                .map_err(|e| SinkError::Spreadsheet(e.to_string()))
                .with_context(|| format!("reading workbook {}", path.display()))?
        } else {
            debug!(path = %path.display(), "workbook does not exist yet, creating");
            umya_spreadsheet::new_file_empty_worksheet()
        };

        if book.get_sheet_by_name(sheet).is_none() {
            book.new_sheet(sheet)
                .map_err(|e| SinkError::Spreadsheet(e.to_string()))?;
        }
        let grid = book
            .get_sheet_by_name(sheet)
            .map(grid_of)
            .unwrap_or_default();

        Ok(XlsxBackend {
            path: path.to_path_buf(),
            sheet: sheet.to_string(),
            book,
            grid,
        })
    }

    pub fn grid(&self) -> &Grid {
        &self.grid
    }

    fn save(&mut self) -> Result<()> {
        let worksheet = self
            .book
            .get_sheet_by_name_mut(&self.sheet)
            .ok_or_else(|| SinkError::WorksheetNotFound {
                title: self.sheet.clone(),
                spreadsheet: self.path.display().to_string(),
            })?;

        for write in self.grid.take_writes() {
            apply(worksheet, &write);
        }
        for (col, width) in self.grid.column_widths() {
            worksheet
                .get_column_dimension_mut(&workbook::column_letter(col))
                .set_width(width);
        }

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating workbook directory {}", parent.display()))?;
        }
        let staging = staging_path(&self.path);
        umya_spreadsheet::writer::xlsx::write(&self.book, &staging)
            .map_err(|e| SinkError::Spreadsheet(e.to_string()))
            .with_context(|| format!("writing workbook {}", staging.display()))?;
        std::fs::rename(&staging, &self.path)
            .with_context(|| format!("replacing workbook {}", self.path.display()))?;
        Ok(())
    }
}

#[async_trait]
impl TabularBackend for XlsxBackend {
    fn name(&self) -> &'static str {
        "workbook"
    }

    fn slot_label(&self, batch: &CaptureBatch) -> String {
        workbook::time_label(batch.timestamp)
    }

    async fn last_label(&mut self, batch: &CaptureBatch) -> Result<Option<String>> {
        Ok(workbook::last_label(&self.grid, batch.date()))
    }

    async fn append(&mut self, batch: &CaptureBatch) -> Result<()> {
        if workbook::record(&mut self.grid, batch) == WriteOutcome::Written {
            self.save()?;
        }
        Ok(())
    }
}

fn grid_of(sheet: &Worksheet) -> Grid {
    let (max_col, max_row) = sheet.get_highest_column_and_row();
    let mut cells = Vec::new();
    for row in 1..=max_row {
        for col in 1..=max_col {
            let Some(cell) = sheet.get_cell((col, row)) else {
                continue;
            };
            let raw = cell.get_value();
            if raw.is_empty() {
                continue;
            }
            let value = match cell.get_value_number() {
                Some(n) => CellValue::Number(n),
                None => CellValue::Text(raw.into_owned()),
            };
            cells.push(((col, row), value));
        }
    }
    Grid::load(cells)
}

fn apply(sheet: &mut Worksheet, write: &CellWrite) {
    let cell = sheet.get_cell_mut((write.col, write.row));
    match &write.value {
        CellValue::Text(s) => {
            cell.set_value(s.clone());
        }
        CellValue::Number(n) => {
            cell.set_value_number(*n);
        }
    }
    let style = cell.get_style_mut();
    if write.style.bold {
        style.get_font_mut().set_bold(true);
    }
    if write.style.centered {
        style
            .get_alignment_mut()
            .set_horizontal(HorizontalAlignmentValues::Center);
    }
}

/// Sibling path the workbook is written to before being renamed into place.
fn staging_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "workbook.xlsx".to_string());
    path.with_file_name(format!(".{name}.partial.xlsx"))
}
