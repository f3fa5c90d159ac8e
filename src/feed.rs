//! Market data feed with mirror-endpoint failover
//!
//! Public Binance-compatible REST endpoints are tried in order, each request
//! bounded by the configured timeout. The first endpoint that answers with a
//! parseable payload wins; when all of them fail the caller gets a single
//! aggregate `NetworkUnavailable`.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::DateTime;
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::MarketConfig;
use crate::error::{MonitorError, MonitorResult};
use crate::Candle;

/// Candle count bounds accepted by the klines endpoint
pub const MIN_CANDLES: usize = 5;
pub const MAX_CANDLES: usize = 1000;

/// Valid Binance intervals
pub const BINANCE_INTERVALS: &[&str] = &[
    "1m", "3m", "5m", "15m", "30m", "1h", "2h", "4h", "6h", "8h", "12h", "1d", "3d", "1w", "1M",
];

/// Check if interval is valid for Binance
pub fn is_valid_interval(interval: &str) -> bool {
    BINANCE_INTERVALS.contains(&interval)
}

/// Source of prices and candles for one instrument
#[async_trait]
pub trait MarketData: Send + Sync {
    async fn get_price(&self, symbol: &str) -> MonitorResult<f64>;

    /// Candles ordered oldest to newest; `count` is clamped to [5, 1000]
    async fn get_candles(
        &self,
        symbol: &str,
        interval: &str,
        count: usize,
    ) -> MonitorResult<Vec<Candle>>;
}

/// Binance REST client that fails over across mirror hosts
#[derive(Debug, Clone)]
pub struct BinanceFeed {
    client: Client,
    endpoints: Vec<String>,
}

impl BinanceFeed {
    pub fn new(endpoints: Vec<String>, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("gridwatch/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(BinanceFeed {
            client,
            endpoints: endpoints
                .into_iter()
                .map(|e| e.trim_end_matches('/').to_string())
                .collect(),
        })
    }

    pub fn from_config(config: &MarketConfig) -> Result<Self> {
        Self::new(
            config.endpoints.clone(),
            Duration::from_secs(config.request_timeout_secs),
        )
    }

    pub fn endpoints(&self) -> &[String] {
        &self.endpoints
    }

    async fn get_json(
        &self,
        base: &str,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<serde_json::Value> {
        let url = format!("{}{}", base, path);
        let response = self
            .client
            .get(&url)
            .query(params)
            .send()
            .await
            .with_context(|| format!("request to {} failed", url))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("{} returned {}: {}", url, status, body);
        }

        response
            .json()
            .await
            .with_context(|| format!("invalid JSON from {}", url))
    }

    /// Try each endpoint in order until `parse` accepts a payload
    async fn with_failover<T>(
        &self,
        what: &'static str,
        path: &str,
        params: &[(&str, String)],
        parse: impl Fn(&serde_json::Value) -> Result<T>,
    ) -> MonitorResult<T> {
        let mut last_error = String::from("no endpoints configured");

        for (attempt, base) in self.endpoints.iter().enumerate() {
            match self.get_json(base, path, params).await.and_then(|v| parse(&v)) {
                Ok(value) => {
                    if attempt > 0 {
                        debug!("{} served by fallback endpoint {}", what, base);
                    }
                    return Ok(value);
                }
                Err(e) => {
                    warn!(
                        "{} failed on {} (attempt {}/{}): {:#}",
                        what,
                        base,
                        attempt + 1,
                        self.endpoints.len(),
                        e
                    );
                    last_error = format!("{:#}", e);
                }
            }
        }

        Err(MonitorError::NetworkUnavailable {
            what,
            attempts: self.endpoints.len(),
            last_error,
        })
    }
}

#[async_trait]
impl MarketData for BinanceFeed {
    async fn get_price(&self, symbol: &str) -> MonitorResult<f64> {
        let params = [("symbol", symbol.to_string())];
        self.with_failover("price", "/api/v3/ticker/price", &params, parse_price)
            .await
    }

    async fn get_candles(
        &self,
        symbol: &str,
        interval: &str,
        count: usize,
    ) -> MonitorResult<Vec<Candle>> {
        let limit = clamp_candle_count(count);
        let params = [
            ("symbol", symbol.to_string()),
            ("interval", interval.to_string()),
            ("limit", limit.to_string()),
        ];
        debug!(
            "Fetching klines: symbol={}, interval={}, limit={}",
            symbol, interval, limit
        );
        self.with_failover("klines", "/api/v3/klines", &params, parse_klines)
            .await
    }
}

pub fn clamp_candle_count(count: usize) -> usize {
    count.clamp(MIN_CANDLES, MAX_CANDLES)
}

/// Parse a `/ticker/price` payload: `{"symbol":"POLUSDT","price":"0.2512"}`
pub fn parse_price(value: &serde_json::Value) -> Result<f64> {
    let raw = value
        .get("price")
        .ok_or_else(|| anyhow!("missing 'price' field"))?;
    let price = match raw {
        serde_json::Value::String(s) => s.parse::<f64>().context("unparseable price")?,
        serde_json::Value::Number(n) => n.as_f64().ok_or_else(|| anyhow!("price out of range"))?,
        other => anyhow::bail!("unexpected price value: {}", other),
    };
    if !price.is_finite() || price <= 0.0 {
        anyhow::bail!("non-positive price: {}", price);
    }
    Ok(price)
}

/// Parse a `/klines` payload.
///
/// Each row is `[open_time, open, high, low, close, volume, ...]` with the
/// prices encoded as strings. Rows that fail validation are dropped and
/// reported, since a gap shifts the true range onto a non-adjacent close.
pub fn parse_klines(value: &serde_json::Value) -> Result<Vec<Candle>> {
    let rows = value
        .as_array()
        .ok_or_else(|| anyhow!("klines payload is not an array"))?;

    let (mut candles, dropped) = parse_kline_rows(rows);

    if candles.is_empty() && !rows.is_empty() {
        anyhow::bail!("none of the {} kline rows could be parsed", rows.len());
    }
    if dropped > 0 {
        warn!("Dropped {} of {} kline rows that failed validation", dropped, rows.len());
    }

    candles.sort_by_key(|c| c.open_time);
    Ok(candles)
}

/// Valid candles from raw kline rows, plus how many rows were rejected
fn parse_kline_rows(rows: &[serde_json::Value]) -> (Vec<Candle>, usize) {
    let candles: Vec<Candle> = rows
        .iter()
        .filter_map(|row| candle_from_row(row.as_array()?))
        .collect();
    let dropped = rows.len() - candles.len();
    (candles, dropped)
}

fn candle_from_row(raw: &[serde_json::Value]) -> Option<Candle> {
    if raw.len() < 5 {
        return None;
    }
    let num = |v: &serde_json::Value| -> Option<f64> {
        match v {
            serde_json::Value::String(s) => s.parse().ok(),
            other => other.as_f64(),
        }
    };

    let open_time = DateTime::from_timestamp_millis(raw[0].as_i64()?)?;
    match Candle::new(
        open_time,
        num(&raw[1])?,
        num(&raw[2])?,
        num(&raw[3])?,
        num(&raw[4])?,
    ) {
        Ok(candle) => Some(candle),
        Err(e) => {
            debug!("Dropping invalid kline at {}: {}", open_time, e);
            None
        }
    }
}
