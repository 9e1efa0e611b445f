//! Hyperliquid perpetuals via the public `/info` endpoint.

use super::http::{as_f64, field_f64, field_str, send_json};
use super::{finalize_candles, Candle, CandleQuery, Instrument, MarketDataClient, Ticker, Timeframe};
use crate::error::{Result, ScanError};
use crate::utils::now_ms;
use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::collections::HashMap;

pub const PROVIDER: &str = "hyperliquid";
pub const DEFAULT_BASE_URL: &str = "https://api.hyperliquid.xyz";

/// Perps settle in USDC.
const QUOTE: &str = "USDC";

pub struct HyperliquidClient {
    http: Client,
    info_url: String,
}

impl HyperliquidClient {
    pub fn new(http: Client, base_url: &str) -> Self {
        Self {
            http,
            info_url: format!("{}/info", base_url.trim_end_matches('/')),
        }
    }

    async fn info(&self, label: &str, payload: Value) -> Result<Value> {
        send_json(label, self.http.post(&self.info_url).json(&payload)).await
    }

    /// `metaAndAssetCtxs` returns `[meta, ctxs]` with `meta.universe[i]` paired to `ctxs[i]`.
    async fn meta_and_ctxs(&self) -> Result<Vec<(Value, Value)>> {
        let body = self
            .info("hyperliquid metaAndAssetCtxs", json!({ "type": "metaAndAssetCtxs" }))
            .await?;
        let universe = body
            .get(0)
            .and_then(|m| m.get("universe"))
            .and_then(Value::as_array)
            .ok_or_else(|| ScanError::Parse("metaAndAssetCtxs: missing universe".to_string()))?;
        let ctxs = body
            .get(1)
            .and_then(Value::as_array)
            .ok_or_else(|| ScanError::Parse("metaAndAssetCtxs: missing asset contexts".to_string()))?;

        Ok(universe.iter().cloned().zip(ctxs.iter().cloned()).collect())
    }
}

#[async_trait]
impl MarketDataClient for HyperliquidClient {
    fn name(&self) -> &str {
        PROVIDER
    }

    async fn load_instruments(&self) -> Result<Vec<Instrument>> {
        let rows = self.meta_and_ctxs().await?;
        Ok(rows
            .iter()
            .filter_map(|(meta, ctx)| {
                let coin = field_str(meta, "name")?;
                let delisted = meta.get("isDelisted").and_then(Value::as_bool).unwrap_or(false);
                Some(Instrument {
                    symbol: coin.to_string(),
                    base: coin.to_string(),
                    quote: QUOTE.to_string(),
                    active: !delisted,
                    quote_volume: field_f64(ctx, "dayNtlVlm"),
                })
            })
            .collect())
    }

    async fn fetch_tickers(&self) -> Result<HashMap<String, Ticker>> {
        let rows = self.meta_and_ctxs().await?;
        Ok(rows
            .iter()
            .filter_map(|(meta, ctx)| {
                let coin = field_str(meta, "name")?;
                let last = field_f64(ctx, "midPx").or_else(|| field_f64(ctx, "markPx"))?;
                Some((
                    coin.to_string(),
                    Ticker {
                        symbol: coin.to_string(),
                        last,
                        quote_volume: field_f64(ctx, "dayNtlVlm"),
                    },
                ))
            })
            .collect())
    }

    async fn fetch_ticker(&self, symbol: &str) -> Result<Ticker> {
        let mids = self.info("hyperliquid allMids", json!({ "type": "allMids" })).await?;
        let last = mids
            .get(symbol)
            .and_then(as_f64)
            .ok_or_else(|| ScanError::InvalidSymbol(format!("{} not in allMids", symbol)))?;
        Ok(Ticker {
            symbol: symbol.to_string(),
            last,
            quote_volume: None,
        })
    }

    async fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        query: CandleQuery,
    ) -> Result<Vec<Candle>> {
        let interval = timeframe.as_millis();
        let (start, end) = match query {
            CandleQuery::Recent(limit) => {
                let end = now_ms();
                (end - interval * limit as i64, end)
            }
            CandleQuery::Since { start_ms, limit } => (start_ms, start_ms + interval * limit as i64 - 1),
        };

        let payload = json!({
            "type": "candleSnapshot",
            "req": {
                "coin": symbol,
                "interval": timeframe.code(),
                "startTime": start,
                "endTime": end,
            }
        });
        let body = self.info("hyperliquid candleSnapshot", payload).await?;
        let rows = body
            .as_array()
            .ok_or_else(|| ScanError::Parse("candleSnapshot: expected array".to_string()))?;

        let candles = rows.iter().filter_map(parse_candle).collect();
        Ok(finalize_candles(candles, query))
    }
}

fn parse_candle(row: &Value) -> Option<Candle> {
    Some(Candle {
        open_time: row.get("t").and_then(super::http::as_i64)?,
        open: field_f64(row, "o")?,
        high: field_f64(row, "h")?,
        low: field_f64(row, "l")?,
        close: field_f64(row, "c")?,
        volume: field_f64(row, "v").unwrap_or(0.0),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_snapshot_row() {
        let row = json!({"t": 1_700_000_000_000_i64, "T": 1_700_003_599_999_i64, "s": "BTC", "i": "1h",
                         "o": "100.5", "h": "101", "l": "99", "c": "100", "v": "12.5", "n": 40});
        let candle = parse_candle(&row).unwrap();
        assert_eq!(candle.open_time, 1_700_000_000_000);
        assert_eq!(candle.high, 101.0);
        assert_eq!(candle.volume, 12.5);
    }

    #[test]
    fn test_rows_missing_prices_are_skipped() {
        assert!(parse_candle(&json!({"t": 1, "o": "1"})).is_none());
    }
}
