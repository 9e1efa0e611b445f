//! Scriptable in-memory `MarketDataClient` for unit and integration tests.

use crate::error::{Result, ScanError};
use crate::market::{finalize_candles, Candle, CandleQuery, Instrument, MarketDataClient, Ticker, Timeframe};
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

pub struct MockMarketClient {
    name: String,
    instruments: Mutex<Vec<Instrument>>,
    tickers: DashMap<String, Ticker>,
    candles: DashMap<String, Vec<Candle>>,
    ticker_failures: Mutex<VecDeque<ScanError>>,
    candle_failures: Mutex<VecDeque<ScanError>>,
    catalogue_down: AtomicBool,
    latency: Mutex<Duration>,
    ticker_calls: AtomicUsize,
    candle_calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

/// Tracks concurrent calls for the lifetime of one request.
struct InFlight<'a>(&'a MockMarketClient);

impl<'a> InFlight<'a> {
    fn enter(client: &'a MockMarketClient) -> Self {
        let now = client.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        client.max_in_flight.fetch_max(now, Ordering::SeqCst);
        Self(client)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

impl MockMarketClient {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            instruments: Mutex::new(Vec::new()),
            tickers: DashMap::new(),
            candles: DashMap::new(),
            ticker_failures: Mutex::new(VecDeque::new()),
            candle_failures: Mutex::new(VecDeque::new()),
            catalogue_down: AtomicBool::new(false),
            latency: Mutex::new(Duration::ZERO),
            ticker_calls: AtomicUsize::new(0),
            candle_calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn provider(&self) -> &str {
        &self.name
    }

    /// Lists `symbol` as an active instrument with the given 24h quote volume.
    pub fn list(&self, symbol: &str, base: &str, quote: &str, volume: f64) {
        self.instruments.lock().unwrap_or_else(|e| e.into_inner()).push(Instrument {
            symbol: symbol.to_string(),
            base: base.to_string(),
            quote: quote.to_string(),
            active: true,
            quote_volume: None,
        });
        let last = self.tickers.get(symbol).map(|t| t.last).unwrap_or(1.0);
        self.tickers.insert(
            symbol.to_string(),
            Ticker {
                symbol: symbol.to_string(),
                last,
                quote_volume: Some(volume),
            },
        );
    }

    pub fn set_price(&self, symbol: &str, price: f64) {
        self.tickers
            .entry(symbol.to_string())
            .and_modify(|t| t.last = price)
            .or_insert_with(|| Ticker {
                symbol: symbol.to_string(),
                last: price,
                quote_volume: None,
            });
    }

    pub fn set_candles(&self, symbol: &str, candles: Vec<Candle>) {
        self.candles.insert(symbol.to_string(), candles);
    }

    pub fn fail_next_tickers(&self, errors: Vec<ScanError>) {
        self.ticker_failures.lock().unwrap_or_else(|e| e.into_inner()).extend(errors);
    }

    pub fn fail_next_candles(&self, errors: Vec<ScanError>) {
        self.candle_failures.lock().unwrap_or_else(|e| e.into_inner()).extend(errors);
    }

    pub fn set_catalogue_down(&self, down: bool) {
        self.catalogue_down.store(down, Ordering::SeqCst);
    }

    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock().unwrap_or_else(|e| e.into_inner()) = latency;
    }

    pub fn ticker_calls(&self) -> usize {
        self.ticker_calls.load(Ordering::SeqCst)
    }

    pub fn candle_calls(&self) -> usize {
        self.candle_calls.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    async fn simulate_latency(&self) {
        let latency = *self.latency.lock().unwrap_or_else(|e| e.into_inner());
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
    }

    fn next_failure(queue: &Mutex<VecDeque<ScanError>>) -> Option<ScanError> {
        queue.lock().unwrap_or_else(|e| e.into_inner()).pop_front()
    }

    fn check_catalogue(&self) -> Result<()> {
        if self.catalogue_down.load(Ordering::SeqCst) {
            return Err(ScanError::ExchangeUnavailable(format!("{} in maintenance", self.name)));
        }
        Ok(())
    }
}

#[async_trait]
impl MarketDataClient for MockMarketClient {
    fn name(&self) -> &str {
        &self.name
    }

    async fn load_instruments(&self) -> Result<Vec<Instrument>> {
        self.check_catalogue()?;
        Ok(self.instruments.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }

    async fn fetch_tickers(&self) -> Result<HashMap<String, Ticker>> {
        self.check_catalogue()?;
        Ok(self
            .tickers
            .iter()
            .map(|e| (e.key().clone(), e.value().clone()))
            .collect())
    }

    async fn fetch_ticker(&self, symbol: &str) -> Result<Ticker> {
        self.ticker_calls.fetch_add(1, Ordering::SeqCst);
        let _guard = InFlight::enter(self);
        self.simulate_latency().await;

        if let Some(err) = Self::next_failure(&self.ticker_failures) {
            return Err(err);
        }
        self.tickers
            .get(symbol)
            .map(|t| t.value().clone())
            .ok_or_else(|| ScanError::InvalidSymbol(symbol.to_string()))
    }

    async fn fetch_candles(
        &self,
        symbol: &str,
        _timeframe: Timeframe,
        query: CandleQuery,
    ) -> Result<Vec<Candle>> {
        self.candle_calls.fetch_add(1, Ordering::SeqCst);
        let _guard = InFlight::enter(self);
        self.simulate_latency().await;

        if let Some(err) = Self::next_failure(&self.candle_failures) {
            return Err(err);
        }
        let series = self.candles.get(symbol).map(|c| c.value().clone()).unwrap_or_default();
        Ok(finalize_candles(series, query))
    }
}
