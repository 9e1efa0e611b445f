//! Market data boundary: provider-neutral types, the `MarketDataClient`
//! capability trait and the REST clients registered by provider name.

pub mod bitget;
pub mod http;
pub mod hyperliquid;
pub mod okx;

use crate::config::Config;
use crate::error::{Result, ScanError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

/// OHLCV bar; `open_time` is the interval start in epoch milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    pub fn range(&self) -> f64 {
        self.high - self.low
    }

    pub fn body(&self) -> f64 {
        (self.close - self.open).abs()
    }

    pub fn upper_wick(&self) -> f64 {
        self.high - self.open.max(self.close)
    }

    pub fn lower_wick(&self) -> f64 {
        self.open.min(self.close) - self.low
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instrument {
    pub symbol: String,
    pub base: String,
    pub quote: String,
    pub active: bool,
    /// 24h quote volume when the catalogue carries it
    pub quote_volume: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ticker {
    pub symbol: String,
    pub last: f64,
    pub quote_volume: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    M1,
    M5,
    M15,
    H1,
    H4,
    D1,
}

impl Timeframe {
    pub fn as_millis(&self) -> i64 {
        const MINUTE: i64 = 60_000;
        match self {
            Timeframe::M1 => MINUTE,
            Timeframe::M5 => 5 * MINUTE,
            Timeframe::M15 => 15 * MINUTE,
            Timeframe::H1 => 60 * MINUTE,
            Timeframe::H4 => 240 * MINUTE,
            Timeframe::D1 => 1_440 * MINUTE,
        }
    }

    /// Lowercase code as used by most venues ("1h", "15m").
    pub fn code(&self) -> &'static str {
        match self {
            Timeframe::M1 => "1m",
            Timeframe::M5 => "5m",
            Timeframe::M15 => "15m",
            Timeframe::H1 => "1h",
            Timeframe::H4 => "4h",
            Timeframe::D1 => "1d",
        }
    }
}

impl FromStr for Timeframe {
    type Err = ScanError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "1m" => Ok(Timeframe::M1),
            "5m" => Ok(Timeframe::M5),
            "15m" => Ok(Timeframe::M15),
            "1h" => Ok(Timeframe::H1),
            "4h" => Ok(Timeframe::H4),
            "1d" => Ok(Timeframe::D1),
            other => Err(ScanError::Config(format!("unsupported timeframe '{}'", other))),
        }
    }
}

impl std::fmt::Display for Timeframe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.code())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandleQuery {
    /// Latest `limit` bars, including the still-forming one
    Recent(usize),
    /// Up to `limit` bars whose open time is >= `start_ms`
    Since { start_ms: i64, limit: usize },
}

/// Read-only market data capability of one provider. Results are returned
/// in ascending `open_time` order.
#[async_trait]
pub trait MarketDataClient: Send + Sync {
    fn name(&self) -> &str;

    async fn load_instruments(&self) -> Result<Vec<Instrument>>;

    async fn fetch_tickers(&self) -> Result<HashMap<String, Ticker>>;

    async fn fetch_ticker(&self, symbol: &str) -> Result<Ticker>;

    async fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        query: CandleQuery,
    ) -> Result<Vec<Candle>>;
}

pub type ClientRegistry = HashMap<String, Arc<dyn MarketDataClient>>;

/// Builds the provider-keyed client registry from `PROVIDERS`.
pub fn build_registry(config: &Config) -> Result<ClientRegistry> {
    let http = http::build_http_client(config.http_timeout_secs)?;
    let mut registry: ClientRegistry = HashMap::new();

    for provider in &config.providers {
        let client: Arc<dyn MarketDataClient> = match provider.as_str() {
            okx::PROVIDER => Arc::new(okx::OkxClient::new(http.clone(), &config.okx_base_url)),
            bitget::PROVIDER => Arc::new(bitget::BitgetClient::new(http.clone(), &config.bitget_base_url)),
            hyperliquid::PROVIDER => Arc::new(hyperliquid::HyperliquidClient::new(
                http.clone(),
                &config.hyperliquid_base_url,
            )),
            other => return Err(ScanError::UnknownProvider(other.to_string())),
        };
        registry.insert(provider.clone(), client);
    }

    Ok(registry)
}

/// Keeps only bars at or after `start_ms`, sorted ascending and truncated to `limit`.
pub(crate) fn finalize_candles(mut candles: Vec<Candle>, query: CandleQuery) -> Vec<Candle> {
    candles.sort_by_key(|c| c.open_time);
    candles.dedup_by_key(|c| c.open_time);
    match query {
        CandleQuery::Recent(limit) => {
            let skip = candles.len().saturating_sub(limit);
            candles.split_off(skip)
        }
        CandleQuery::Since { start_ms, limit } => candles
            .into_iter()
            .filter(|c| c.open_time >= start_ms)
            .take(limit)
            .collect(),
    }
}
