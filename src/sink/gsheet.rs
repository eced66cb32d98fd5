use std::path::Path;

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use chrono::NaiveDateTime;
use reqwest::Url;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::debug;

use crate::config::CloudConfig;

use super::tabular::TabularBackend;
use super::{CaptureBatch, SinkError};

const SHEETS_BASE: &str = "https://sheets.googleapis.com";
const DRIVE_BASE: &str = "https://www.googleapis.com";
const SPREADSHEET_MIME: &str = "application/vnd.google-apps.spreadsheet";

// ── Wire types ───────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct StoredCredentials {
    access_token: String,
    #[serde(default)]
    token_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DriveFileList {
    #[serde(default)]
    files: Vec<DriveFile>,
}

#[derive(Debug, Deserialize)]
struct DriveFile {
    id: String,
}

#[derive(Debug, Deserialize)]
struct SpreadsheetMeta {
    #[serde(default)]
    sheets: Vec<SheetEntry>,
}

#[derive(Debug, Deserialize)]
struct SheetEntry {
    properties: SheetProperties,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SheetProperties {
    sheet_id: i64,
    title: String,
}

#[derive(Debug, Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<Value>>,
}

// ── Client ───────────────────────────────────────────────────────────

/// Minimal Sheets v4 / Drive v3 client authenticated with a stored token.
pub struct SheetsClient {
    http: reqwest::Client,
    token: String,
    sheets_base: Url,
    drive_base: Url,
}

/// A resolved tab inside a spreadsheet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloudWorksheet {
    pub spreadsheet_id: String,
    pub title: String,
    pub sheet_id: i64,
}

impl SheetsClient {
    pub fn from_credentials_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| SinkError::Credentials {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        let creds: StoredCredentials =
            serde_json::from_str(&raw).map_err(|e| SinkError::Credentials {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })?;
        if let Some(kind) = creds.token_type.as_deref() {
            if !kind.eq_ignore_ascii_case("bearer") {
                return Err(SinkError::Credentials {
                    path: path.to_path_buf(),
                    reason: format!("unsupported token type `{kind}`"),
                }
                .into());
            }
        }
        Self::with_endpoints(creds.access_token, SHEETS_BASE, DRIVE_BASE)
    }

    pub fn with_endpoints(token: impl Into<String>, sheets_base: &str, drive_base: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .user_agent(concat!("optchain-capture/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("creating Sheets HTTP client")?;

        Ok(SheetsClient {
            http,
            token: token.into(),
            sheets_base: Url::parse(sheets_base).context("invalid Sheets base URL")?,
            drive_base: Url::parse(drive_base).context("invalid Drive base URL")?,
        })
    }

    /// Resolve a worksheet by spreadsheet name (or id) and tab title.
    pub async fn open(
        &self,
        sheet_name: &str,
        spreadsheet_id: Option<&str>,
        title: &str,
    ) -> Result<CloudWorksheet> {
        let spreadsheet_id = match spreadsheet_id {
            Some(id) => id.to_string(),
            None => self.find_spreadsheet(sheet_name).await?,
        };

        let mut url = endpoint(&self.sheets_base, &["v4", "spreadsheets", &spreadsheet_id])?;
        url.query_pairs_mut().append_pair("fields", "sheets.properties");
        let meta: SpreadsheetMeta = self.get_json(url).await?;

        let sheet_id = meta
            .sheets
            .into_iter()
            .find(|s| s.properties.title == title)
            .map(|s| s.properties.sheet_id)
            .ok_or_else(|| SinkError::WorksheetNotFound {
                title: title.to_string(),
                spreadsheet: sheet_name.to_string(),
            })?;

        debug!(%spreadsheet_id, title, sheet_id, "worksheet resolved");
        Ok(CloudWorksheet {
            spreadsheet_id,
            title: title.to_string(),
            sheet_id,
        })
    }

    async fn find_spreadsheet(&self, name: &str) -> Result<String> {
        let mut url = endpoint(&self.drive_base, &["drive", "v3", "files"])?;
        let query = format!(
            "name = '{}' and mimeType = '{SPREADSHEET_MIME}' and trashed = false",
            name.replace('\'', "\\'")
        );
        url.query_pairs_mut()
            .append_pair("q", &query)
            .append_pair("fields", "files(id,name)")
            .append_pair("pageSize", "1");

        let list: DriveFileList = self.get_json(url).await?;
        list.files
            .into_iter()
            .next()
            .map(|f| f.id)
            .ok_or_else(|| {
                SinkError::SpreadsheetNotFound {
                    name: name.to_string(),
                }
                .into()
            })
    }

    /// Values of one column (1-based), trailing blanks trimmed by the API.
    pub async fn col_values(&self, ws: &CloudWorksheet, col: u32) -> Result<Vec<String>> {
        let letter = super::workbook::column_letter(col);
        let range = format!("'{}'!{letter}:{letter}", ws.title);
        let mut url = endpoint(
            &self.sheets_base,
            &["v4", "spreadsheets", &ws.spreadsheet_id, "values", &range],
        )?;
        url.query_pairs_mut().append_pair("majorDimension", "COLUMNS");

        let body: ValueRange = self.get_json(url).await?;
        Ok(body
            .values
            .into_iter()
            .next()
            .unwrap_or_default()
            .into_iter()
            .map(cell_text)
            .collect())
    }

    /// Rows of columns A..=`last_col` (1-based), trailing blank rows trimmed by the API.
    pub async fn row_values(&self, ws: &CloudWorksheet, last_col: u32) -> Result<Vec<Vec<String>>> {
        let range = format!("'{}'!A:{}", ws.title, super::workbook::column_letter(last_col));
        let mut url = endpoint(
            &self.sheets_base,
            &["v4", "spreadsheets", &ws.spreadsheet_id, "values", &range],
        )?;
        url.query_pairs_mut().append_pair("majorDimension", "ROWS");

        let body: ValueRange = self.get_json(url).await?;
        Ok(body
            .values
            .into_iter()
            .map(|row| row.into_iter().map(cell_text).collect())
            .collect())
    }

    /// Write `rows` into columns A..D starting at `start_row`.
    pub async fn update_rows(&self, ws: &CloudWorksheet, start_row: u32, rows: &[Vec<Value>]) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        let end_row = start_row + rows.len() as u32 - 1;
        let range = format!("'{}'!A{start_row}:D{end_row}", ws.title);
        let mut url = endpoint(
            &self.sheets_base,
            &["v4", "spreadsheets", &ws.spreadsheet_id, "values", &range],
        )?;
        // RAW keeps labels as the exact strings written, so they read back
        // unchanged for the duplicate check.
        url.query_pairs_mut().append_pair("valueInputOption", "RAW");

        let body = json!({ "range": range, "majorDimension": "ROWS", "values": rows });
        let resp = self
            .http
            .put(url)
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("updating {range}"))?;
        check(resp, "values.update").await?;
        Ok(())
    }

    /// Center-align columns A..D of rows `start_row..=end_row`.
    pub async fn center_rows(&self, ws: &CloudWorksheet, start_row: u32, end_row: u32) -> Result<()> {
        let action = format!("{}:batchUpdate", ws.spreadsheet_id);
        let url = endpoint(&self.sheets_base, &["v4", "spreadsheets", &action])?;
        let body = json!({
            "requests": [{
                "repeatCell": {
                    "range": {
                        "sheetId": ws.sheet_id,
                        "startRowIndex": start_row - 1,
                        "endRowIndex": end_row,
                        "startColumnIndex": 0,
                        "endColumnIndex": 4,
                    },
                    "cell": { "userEnteredFormat": { "horizontalAlignment": "CENTER" } },
                    "fields": "userEnteredFormat.horizontalAlignment",
                }
            }]
        });
        let resp = self
            .http
            .post(url)
            .bearer_auth(&self.token)
            .json(&body)
            .send()
            .await
            .context("formatting appended rows")?;
        check(resp, "batchUpdate").await?;
        Ok(())
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T> {
        let resp = self
            .http
            .get(url.clone())
            .bearer_auth(&self.token)
            .send()
            .await
            .with_context(|| format!("GET {}", url.path()))?;
        let resp = check(resp, url.path()).await?;
        resp.json::<T>()
            .await
            .with_context(|| format!("decoding response from {}", url.path()))
    }
}

fn cell_text(value: Value) -> String {
    match value {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

fn endpoint(base: &Url, segments: &[&str]) -> Result<Url> {
    let mut url = base.clone();
    url.path_segments_mut()
        .map_err(|_| anyhow!("base URL {base} cannot carry a path"))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

async fn check(resp: reqwest::Response, what: &str) -> Result<reqwest::Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    bail!("{what} failed with HTTP {status}: {body}");
}

// ── Backend ──────────────────────────────────────────────────────────

/// `03:30 PM`
pub fn cloud_time_label(timestamp: NaiveDateTime) -> String {
    timestamp.format("%I:%M %p").to_string()
}

/// `16-07-2024`
pub fn cloud_date_label(timestamp: NaiveDateTime) -> String {
    timestamp.format("%d-%m-%Y").to_string()
}

/// Date and time of a capture as they appear in columns A and C.
fn slot_key(date: &str, time: &str) -> String {
    format!("{date} {time}")
}

/// `[date, label, time, price]` rows: underlying first, then one per quote.
pub fn cloud_rows(batch: &CaptureBatch) -> Vec<Vec<Value>> {
    let date = cloud_date_label(batch.timestamp);
    let time = cloud_time_label(batch.timestamp);
    batch
        .records()
        .into_iter()
        .map(|r| {
            vec![
                json!(date),
                json!(r.instrument),
                json!(time),
                json!(r.price),
            ]
        })
        .collect()
}

pub struct GoogleSheetBackend {
    client: SheetsClient,
    worksheet: CloudWorksheet,
}

impl GoogleSheetBackend {
    pub fn new(client: SheetsClient, worksheet: CloudWorksheet) -> Self {
        GoogleSheetBackend { client, worksheet }
    }

    pub async fn connect(config: &CloudConfig) -> Result<Self> {
        let client = SheetsClient::from_credentials_file(&config.credentials)?;
        let worksheet = client
            .open(
                &config.sheet_name,
                config.spreadsheet_id.as_deref(),
                &config.worksheet,
            )
            .await?;
        Ok(Self::new(client, worksheet))
    }
}

#[async_trait]
impl TabularBackend for GoogleSheetBackend {
    fn name(&self) -> &'static str {
        "cloud-sheet"
    }

    fn slot_label(&self, batch: &CaptureBatch) -> String {
        slot_key(&cloud_date_label(batch.timestamp), &cloud_time_label(batch.timestamp))
    }

    /// Date and time of the last row that carries a time label.
    async fn last_label(&mut self, _batch: &CaptureBatch) -> Result<Option<String>> {
        let rows = self.client.row_values(&self.worksheet, 3).await?;
        Ok(rows.iter().rev().find_map(|row| {
            let date = row.first().map(String::as_str).unwrap_or_default();
            let time = row.get(2).map(String::as_str).unwrap_or_default();
            (!time.is_empty()).then(|| slot_key(date, time))
        }))
    }

    async fn append(&mut self, batch: &CaptureBatch) -> Result<()> {
        let rows = cloud_rows(batch);
        let start_row = self.client.col_values(&self.worksheet, 1).await?.len() as u32 + 1;
        let end_row = start_row + rows.len() as u32 - 1;

        self.client.update_rows(&self.worksheet, start_row, &rows).await?;
        self.client.center_rows(&self.worksheet, start_row, end_row).await?;
        Ok(())
    }
}
