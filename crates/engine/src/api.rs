//! Market data provider interfaces and the Binance-backed implementation
//!
//! The engine never talks to an exchange directly; it goes through the
//! `SnapshotProvider` and `HistoryProvider` traits. Both contracts are
//! explicit about failure: a snapshot is complete or `SnapshotUnavailable`,
//! never a struct with silently-missing fields, and a candle range that
//! cannot be satisfied is `InsufficientData`, never a silently-short vector
//! of zero candles.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use rust_decimal::Decimal;
use std::str::FromStr;
use thiserror::Error;
use tracing::debug;

use crate::features::{derive_latest, FEATURE_PERIOD};
use crate::types::{Candle, MarketSnapshot, Timeframe};

const DEFAULT_BASE_URL: &str = "https://api.binance.com";
const MAX_CANDLES_PER_REQUEST: u32 = 1000;

/// Bars fetched to warm up the feature window for a live snapshot
const SNAPSHOT_BARS: u32 = (FEATURE_PERIOD as u32) * 2 + 5;

#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("snapshot unavailable for {symbol}: {reason}")]
    SnapshotUnavailable { symbol: String, reason: String },

    #[error("insufficient data: {have} candles, need {need}")]
    InsufficientData { have: usize, need: usize },

    #[error("upstream error: {0}")]
    Upstream(String),
}

/// Supplies the current market feature snapshot
#[async_trait]
pub trait SnapshotProvider: Send + Sync {
    async fn snapshot(&self, symbol: &str) -> Result<MarketSnapshot, ProviderError>;
}

/// Supplies ordered historical candles for a symbol/timeframe/range
#[async_trait]
pub trait HistoryProvider: Send + Sync {
    async fn candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start_time: i64,
        end_time: i64,
    ) -> Result<Vec<Candle>, ProviderError>;
}

/// Binance public market data client (no authentication required)
#[derive(Clone)]
pub struct BinanceMarketData {
    client: Client,
    base_url: String,
}

/// Raw kline data from Binance API (array of arrays)
#[derive(Debug, serde::Deserialize)]
#[allow(dead_code)]
struct RawKline(
    i64,    // 0: Open time
    String, // 1: Open
    String, // 2: High
    String, // 3: Low
    String, // 4: Close
    String, // 5: Volume
    i64,    // 6: Close time
    String, // 7: Quote asset volume
    u64,    // 8: Number of trades
    String, // 9: Taker buy base
    String, // 10: Taker buy quote
    String, // 11: Ignore
);

impl Default for BinanceMarketData {
    fn default() -> Self {
        Self::new()
    }
}

impl BinanceMarketData {
    pub fn new() -> Self {
        Self {
            client: Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .build()
                .expect("Failed to build HTTP client"),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    async fn get_klines(
        &self,
        symbol: &str,
        interval: &str,
        start_time: Option<i64>,
        end_time: Option<i64>,
        limit: Option<u32>,
    ) -> Result<Vec<Candle>, ProviderError> {
        let mut url = format!(
            "{}/api/v3/klines?symbol={}&interval={}",
            self.base_url, symbol, interval
        );

        if let Some(start) = start_time {
            url.push_str(&format!("&startTime={}", start));
        }
        if let Some(end) = end_time {
            url.push_str(&format!("&endTime={}", end));
        }

        let limit = limit.unwrap_or(500).min(MAX_CANDLES_PER_REQUEST);
        url.push_str(&format!("&limit={}", limit));

        debug!(symbol, interval, "Fetching klines from Binance");

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ProviderError::Upstream(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Upstream(format!(
                "Binance API error {}: {}",
                status, body
            )));
        }

        let raw_klines: Vec<RawKline> = response
            .json()
            .await
            .map_err(|e| ProviderError::Upstream(e.to_string()))?;

        let candles: Vec<Candle> = raw_klines
            .into_iter()
            .filter_map(|raw| {
                Some(Candle {
                    open_time: raw.0,
                    open: Decimal::from_str(&raw.1).ok()?,
                    high: Decimal::from_str(&raw.2).ok()?,
                    low: Decimal::from_str(&raw.3).ok()?,
                    close: Decimal::from_str(&raw.4).ok()?,
                    volume: Decimal::from_str(&raw.5).ok()?,
                    close_time: raw.6,
                })
            })
            .collect();

        debug!(count = candles.len(), "Fetched klines");
        Ok(candles)
    }
}

#[async_trait]
impl SnapshotProvider for BinanceMarketData {
    async fn snapshot(&self, symbol: &str) -> Result<MarketSnapshot, ProviderError> {
        let candles = self
            .get_klines(symbol, "15m", None, None, Some(SNAPSHOT_BARS))
            .await
            .map_err(|e| ProviderError::SnapshotUnavailable {
                symbol: symbol.to_string(),
                reason: e.to_string(),
            })?;

        let features = derive_latest(&candles, FEATURE_PERIOD).ok_or_else(|| {
            ProviderError::SnapshotUnavailable {
                symbol: symbol.to_string(),
                reason: format!(
                    "only {} candles returned, need {} for feature warmup",
                    candles.len(),
                    FEATURE_PERIOD + 1
                ),
            }
        })?;

        Ok(MarketSnapshot {
            symbol: symbol.to_string(),
            captured_at: Utc::now().timestamp(),
            features,
        })
    }
}

#[async_trait]
impl HistoryProvider for BinanceMarketData {
    async fn candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        start_time: i64,
        end_time: i64,
    ) -> Result<Vec<Candle>, ProviderError> {
        let mut all_candles = Vec::new();
        let mut current_start = start_time;

        loop {
            if current_start >= end_time {
                break;
            }

            let candles = self
                .get_klines(
                    symbol,
                    timeframe.as_str(),
                    Some(current_start),
                    Some(end_time),
                    Some(MAX_CANDLES_PER_REQUEST),
                )
                .await?;

            if candles.is_empty() {
                break;
            }

            let last_close_time = candles.last().map(|c| c.close_time).unwrap_or(end_time);
            all_candles.extend(candles);

            // Move start to after the last candle
            current_start = last_close_time + 1;

            // Small delay to respect rate limits
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        }

        if all_candles.is_empty() {
            return Err(ProviderError::InsufficientData { have: 0, need: 1 });
        }

        Ok(all_candles)
    }
}
