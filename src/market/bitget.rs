//! Bitget USDT-margined futures (REST v2 mix API).

use super::http::{as_f64, as_i64, field_f64, field_str, send_json};
use super::{finalize_candles, Candle, CandleQuery, Instrument, MarketDataClient, Ticker, Timeframe};
use crate::error::{Result, ScanError};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;

pub const PROVIDER: &str = "bitget";
pub const DEFAULT_BASE_URL: &str = "https://api.bitget.com";

const PRODUCT_TYPE: &str = "USDT-FUTURES";
const MAX_CANDLE_PAGE: usize = 1000;

#[derive(Debug, Deserialize)]
struct Envelope {
    code: String,
    #[serde(default)]
    msg: String,
    #[serde(default)]
    data: Value,
}

impl Envelope {
    fn into_rows(self) -> Result<Vec<Value>> {
        match self.code.as_str() {
            "00000" => match self.data {
                Value::Array(rows) => Ok(rows),
                Value::Null => Ok(Vec::new()),
                other => Ok(vec![other]),
            },
            "429" | "40010" => Err(ScanError::RateLimited(format!("bitget {}: {}", self.code, self.msg))),
            "40034" | "40019" => Err(ScanError::InvalidSymbol(format!("bitget {}: {}", self.code, self.msg))),
            _ => Err(ScanError::Parse(format!("bitget {}: {}", self.code, self.msg))),
        }
    }
}

pub struct BitgetClient {
    http: Client,
    base_url: String,
}

impl BitgetClient {
    pub fn new(http: Client, base_url: &str) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn get(&self, path: &str, query: &[(&str, String)]) -> Result<Vec<Value>> {
        let url = format!("{}{}", self.base_url, path);
        let envelope: Envelope = send_json(path, self.http.get(url).query(query)).await?;
        envelope.into_rows()
    }

    fn granularity(timeframe: Timeframe) -> &'static str {
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
    Some(Ticker {
        symbol: field_str(row, "symbol")?.to_string(),
        last: field_f64(row, "lastPr")?,
        quote_volume: field_f64(row, "quoteVolume").or_else(|| field_f64(row, "usdtVolume")),
    })
}

/// Rows are `[ts, o, h, l, c, baseVol, quoteVol]`.
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
impl MarketDataClient for BitgetClient {
    fn name(&self) -> &str {
        PROVIDER
    }

    async fn load_instruments(&self) -> Result<Vec<Instrument>> {
        let rows = self
            .get("/api/v2/mix/market/contracts", &[("productType", PRODUCT_TYPE.to_string())])
            .await?;

        Ok(rows
            .iter()
            .filter_map(|row| {
                Some(Instrument {
                    symbol: field_str(row, "symbol")?.to_string(),
                    base: field_str(row, "baseCoin")?.to_string(),
                    quote: field_str(row, "quoteCoin")?.to_string(),
                    active: field_str(row, "symbolStatus") == Some("normal"),
                    quote_volume: None,
                })
            })
            .collect())
    }

    async fn fetch_tickers(&self) -> Result<HashMap<String, Ticker>> {
        let rows = self
            .get("/api/v2/mix/market/tickers", &[("productType", PRODUCT_TYPE.to_string())])
            .await?;
        Ok(rows
            .iter()
            .filter_map(parse_ticker)
            .map(|t| (t.symbol.clone(), t))
            .collect())
    }

    async fn fetch_ticker(&self, symbol: &str) -> Result<Ticker> {
        let rows = self
            .get(
                "/api/v2/mix/market/ticker",
                &[("symbol", symbol.to_string()), ("productType", PRODUCT_TYPE.to_string())],
            )
            .await?;
        rows.first()
            .and_then(parse_ticker)
            .ok_or_else(|| ScanError::InvalidSymbol(format!("bitget returned no ticker for {}", symbol)))
    }

    async fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        query: CandleQuery,
    ) -> Result<Vec<Candle>> {
        let mut params = vec![
            ("symbol", symbol.to_string()),
            ("productType", PRODUCT_TYPE.to_string()),
            ("granularity", Self::granularity(timeframe).to_string()),
        ];
        match query {
            CandleQuery::Recent(limit) => {
                params.push(("limit", limit.min(MAX_CANDLE_PAGE).to_string()));
            }
            CandleQuery::Since { start_ms, limit } => {
                let limit = limit.min(MAX_CANDLE_PAGE);
                let end = start_ms + timeframe.as_millis() * limit as i64;
                params.push(("startTime", start_ms.to_string()));
                params.push(("endTime", end.to_string()));
                params.push(("limit", limit.to_string()));
            }
        }

        let rows = self.get("/api/v2/mix/market/candles", &params).await?;
        let candles = rows.iter().filter_map(parse_candle).collect();
        Ok(finalize_candles(candles, query))
    }
}
