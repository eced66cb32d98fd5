use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use reqwest::header::{self, HeaderMap, HeaderValue};
use serde_json::Value;
use tracing::{debug, warn};

use crate::chain::Snapshot;
use crate::config::EndpointConfig;

use super::SnapshotSource;

const CHAIN_PATH: &str = "/api/option-chain-indices";

// Upstream rejects requests that do not look like a desktop browser.
const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
     (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36";

/// Option-chain client for the NSE public API.
pub struct NseClient {
    http: reqwest::Client,
    base_url: String,
    warm_up: bool,
    warmed: AtomicBool,
}

impl NseClient {
    pub fn new(endpoint: &EndpointConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .default_headers(browser_headers())
            .cookie_store(true)
            .gzip(true)
            .brotli(true)
            .deflate(true)
            .build()
            .context("building HTTP client")?;

        Ok(NseClient {
            http,
            base_url: endpoint.base_url.trim_end_matches('/').to_string(),
            warm_up: endpoint.warm_up,
            warmed: AtomicBool::new(false),
        })
    }

    pub fn chain_url(&self) -> String {
        format!("{}{}", self.base_url, CHAIN_PATH)
    }

    /// Visit the landing page once so the cookie store holds a session.
    async fn warm_up_session(&self) {
        match self.http.get(&self.base_url).send().await {
            Ok(resp) => debug!(status = %resp.status(), "session warm-up"),
            Err(e) => warn!(error = %e, "session warm-up failed, continuing without cookies"),
        }
    }
}

#[async_trait]
impl SnapshotSource for NseClient {
    async fn fetch(&self, symbol: &str) -> Result<Snapshot> {
        if self.warm_up && !self.warmed.swap(true, Ordering::Relaxed) {
            self.warm_up_session().await;
        }

        let url = self.chain_url();
        let resp = self
            .http
            .get(&url)
            .query(&[("symbol", symbol)])
            .send()
            .await
            .with_context(|| format!("GET {url}?symbol={symbol}"))?;

        let status = resp.status();
        if !status.is_success() {
            bail!("option chain request for {symbol} failed with HTTP {status}");
        }

        let body = resp
            .text()
            .await
            .with_context(|| format!("reading option chain body for {symbol}"))?;
        if body.trim().is_empty() {
            return Ok(Snapshot::empty());
        }

        let value: Value = serde_json::from_str(&body)
            .with_context(|| format!("decoding option chain JSON for {symbol}"))?;
        Ok(Snapshot::new(value))
    }
}

fn browser_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(header::USER_AGENT, HeaderValue::from_static(USER_AGENT));
    headers.insert(
        header::ACCEPT,
        HeaderValue::from_static("application/json, text/plain, */*"),
    );
    headers.insert(
        header::ACCEPT_LANGUAGE,
        HeaderValue::from_static("en-US,en;q=0.9"),
    );
    // Accept-Encoding is filled in by reqwest from the enabled decoders.
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    headers
}
