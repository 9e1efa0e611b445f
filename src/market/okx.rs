//! OKX perpetual swaps (REST v5).

use super::http::{as_f64, as_i64, field_f64, field_str, send_json};
use super::{finalize_candles, Candle, CandleQuery, Instrument, MarketDataClient, Ticker, Timeframe};
use crate::error::{Result, ScanError};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;

pub const PROVIDER: &str = "okx";
pub const DEFAULT_BASE_URL: &str = "https://www.okx.com";

/// Largest page the candle endpoints accept.
const MAX_CANDLE_PAGE: usize = 300;

#[derive(Debug, Deserialize)]
struct Envelope {
    code: String,
    #[serde(default)]
    msg: String,
    #[serde(default)]
    data: Vec<Value>,
}

impl Envelope {
    fn into_data(self) -> Result<Vec<Value>> {
        match self.code.as_str() {
            "0" => Ok(self.data),
            "50011" | "50061" => Err(ScanError::RateLimited(format!("okx {}: {}", self.code, self.msg))),
            "50001" | "50004" => Err(ScanError::ExchangeUnavailable(format!("okx {}: {}", self.code, self.msg))),
            "51001" => Err(ScanError::InvalidSymbol(format!("okx {}: {}", self.code, self.msg))),
            _ => Err(ScanError::Parse(format!("okx {}: {}", self.code, self.msg))),
        }
    }
}

pub struct OkxClient {
    http: Client,
    base_url: String,
}

impl OkxClient {
    pub fn new(http: Client, base_url: &str) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn get(&self, path: &str, query: &[(&str, String)]) -> Result<Vec<Value>> {
        let url = format!("{}{}", self.base_url, path);
        let envelope: Envelope = send_json(path, self.http.get(url).query(query)).await?;
        envelope.into_data()
    }

    fn bar_code(timeframe: Timeframe) -> &'static str {
        match timeframe {
            Timeframe::M1 => "1m",
            Timeframe::M5 => "5m",
            Timeframe::M15 => "15m",
            Timeframe::H1 => "1H",
            Timeframe::H4 => "4H",
            Timeframe::D1 => "1D",
        }
    }
}

fn parse_ticker(row: &Value) -> Option<Ticker> {
    let symbol = field_str(row, "instId")?;
    let last = field_f64(row, "last")?;
    // volCcy24h is denominated in the base currency for swaps
    let quote_volume = field_f64(row, "volCcy24h").map(|v| v * last);
    Some(Ticker {
        symbol: symbol.to_string(),
        last,
        quote_volume,
    })
}

/// Rows are `[ts, o, h, l, c, vol, volCcy, volCcyQuote, confirm]`, newest first.
fn parse_candle(row: &Value) -> Option<Candle> {
    let cols = row.as_array()?;
    Some(Candle {
        open_time: as_i64(cols.first()?)?,
        open: as_f64(cols.get(1)?)?,
        high: as_f64(cols.get(2)?)?,
        low: as_f64(cols.get(3)?)?,
        close: as_f64(cols.get(4)?)?,
        volume: cols.get(5).and_then(as_f64).unwrap_or(0.0),
    })
}

#[async_trait]
impl MarketDataClient for OkxClient {
    fn name(&self) -> &str {
        PROVIDER
    }

    async fn load_instruments(&self) -> Result<Vec<Instrument>> {
        let rows = self
            .get("/api/v5/public/instruments", &[("instType", "SWAP".to_string())])
            .await?;

        Ok(rows
            .iter()
            .filter_map(|row| {
                let symbol = field_str(row, "instId")?;
                // uly is "BASE-QUOTE"
                let (base, quote) = field_str(row, "uly")?.split_once('-')?;
                Some(Instrument {
                    symbol: symbol.to_string(),
                    base: base.to_string(),
                    quote: quote.to_string(),
                    active: field_str(row, "state") == Some("live"),
                    quote_volume: None,
                })
            })
            .collect())
    }

    async fn fetch_tickers(&self) -> Result<HashMap<String, Ticker>> {
        let rows = self
            .get("/api/v5/market/tickers", &[("instType", "SWAP".to_string())])
            .await?;
        Ok(rows
            .iter()
            .filter_map(parse_ticker)
            .map(|t| (t.symbol.clone(), t))
            .collect())
    }

    async fn fetch_ticker(&self, symbol: &str) -> Result<Ticker> {
        let rows = self
            .get("/api/v5/market/ticker", &[("instId", symbol.to_string())])
            .await?;
        rows.first()
            .and_then(parse_ticker)
            .ok_or_else(|| ScanError::InvalidSymbol(format!("okx returned no ticker for {}", symbol)))
    }

    async fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        query: CandleQuery,
    ) -> Result<Vec<Candle>> {
        let bar = Self::bar_code(timeframe).to_string();
        let rows = match query {
            CandleQuery::Recent(limit) => {
                let limit = limit.min(MAX_CANDLE_PAGE);
                self.get(
                    "/api/v5/market/candles",
                    &[("instId", symbol.to_string()), ("bar", bar), ("limit", limit.to_string())],
                )
                .await?
            }
            CandleQuery::Since { start_ms, limit } => {
                let limit = limit.min(MAX_CANDLE_PAGE);
                // `after` returns bars strictly older than the given timestamp
                let after = start_ms + timeframe.as_millis() * limit as i64;
                self.get(
                    "/api/v5/market/history-candles",
                    &[
                        ("instId", symbol.to_string()),
                        ("bar", bar),
                        ("after", after.to_string()),
                        ("limit", limit.to_string()),
                    ],
                )
                .await?
            }
        };

        let candles = rows.iter().filter_map(parse_candle).collect();
        Ok(finalize_candles(candles, query))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_envelope_error_codes() {
        let rate: Envelope = serde_json::from_value(json!({"code": "50011", "msg": "Too Many Requests"})).unwrap();
        assert!(matches!(rate.into_data(), Err(ScanError::RateLimited(_))));

        let ok: Envelope = serde_json::from_value(json!({"code": "0", "msg": "", "data": [1]})).unwrap();
        assert_eq!(ok.into_data().unwrap().len(), 1);
    }

    #[test]
    fn test_ticker_volume_is_converted_to_quote() {
        let row = json!({"instId": "BTC-USDT-SWAP", "last": "50000", "volCcy24h": "100"});
        let ticker = parse_ticker(&row).unwrap();
        assert_eq!(ticker.quote_volume, Some(5_000_000.0));
    }

    #[test]
    fn test_candle_row() {
        let row = json!(["1700000000000", "1", "2", "0.5", "1.5", "10", "0", "0", "1"]);
        let candle = parse_candle(&row).unwrap();
        assert_eq!(candle.open_time, 1_700_000_000_000);
        assert_eq!(candle.close, 1.5);
    }
}
