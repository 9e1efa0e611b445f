//! Every market data call goes through `RequestExecutor::execute`.
//!
//! Providers listed as dedicated get a small fixed semaphore of their own;
//! everyone else shares the adaptive general pool. A permit is held for the
//! whole call including backoff sleeps, so a provider that is rate limiting
//! us does not receive additional parallel requests while we wait.

use super::concurrency::AdaptiveConcurrencyController;
use crate::error::{Result, RetryPolicy, ScanError};
use crate::market::{Candle, CandleQuery, ClientRegistry, Instrument, MarketDataClient, Ticker, Timeframe};
use crate::metrics::PipelineMetrics;
use log::{debug, warn};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

pub struct RequestExecutor {
    clients: ClientRegistry,
    controller: Arc<AdaptiveConcurrencyController>,
    dedicated: HashMap<String, Arc<Semaphore>>,
    retry: RetryPolicy,
    metrics: Arc<PipelineMetrics>,
}

impl RequestExecutor {
    pub fn new(
        clients: ClientRegistry,
        controller: Arc<AdaptiveConcurrencyController>,
        dedicated_providers: &[String],
        dedicated_pool_size: usize,
        retry: RetryPolicy,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        let dedicated = dedicated_providers
            .iter()
            .filter(|p| clients.contains_key(p.as_str()))
            .map(|p| (p.clone(), Arc::new(Semaphore::new(dedicated_pool_size.max(1)))))
            .collect();

        Self {
            clients,
            controller,
            dedicated,
            retry,
            metrics,
        }
    }

    pub fn providers(&self) -> Vec<String> {
        let mut names: Vec<String> = self.clients.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn has_provider(&self, provider: &str) -> bool {
        self.clients.contains_key(provider)
    }

    pub fn controller(&self) -> &Arc<AdaptiveConcurrencyController> {
        &self.controller
    }

    pub fn is_dedicated(&self, provider: &str) -> bool {
        self.dedicated.contains_key(provider)
    }

    async fn acquire(&self, provider: &str) -> Option<OwnedSemaphorePermit> {
        let gate = match self.dedicated.get(provider) {
            Some(sem) => sem.clone(),
            None => self.controller.current_gate(),
        };
        gate.acquire_owned().await.ok()
    }

    /// Runs `call` against `provider`'s client with gating and retries.
    /// Returns `None` when the call finally fails; the caller skips the item.
    pub async fn execute<T, F, Fut>(&self, provider: &str, operation: &str, call: F) -> Option<T>
    where
        F: Fn(Arc<dyn MarketDataClient>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let client = match self.clients.get(provider) {
            Some(client) => client.clone(),
            None => {
                let err = ScanError::UnknownProvider(provider.to_string());
                self.metrics.record_api_failure(err.category());
                warn!("{} skipped: {}", operation, err);
                return None;
            }
        };

        let request_id = uuid::Uuid::new_v4().simple().to_string();
        let request_id = &request_id[..8];

        let _permit = match self.acquire(provider).await {
            Some(permit) => permit,
            None => {
                warn!("[{}] {}:{} gate closed", request_id, provider, operation);
                return None;
            }
        };

        let mut retry = 0;
        loop {
            debug!("[{}] {}:{} attempt {}", request_id, provider, operation, retry + 1);
            match call(client.clone()).await {
                Ok(value) => {
                    self.controller.record(true);
                    self.metrics.record_api_success();
                    return Some(value);
                }
                Err(err) => {
                    self.controller.record(false);
                    self.metrics.record_api_failure(err.category());

                    if err.is_retryable() && retry < self.retry.max_retries {
                        retry += 1;
                        let delay = self.retry.delay_for_retry(retry);
                        debug!(
                            "[{}] {}:{} {} ({}), retry {}/{} in {:?}",
                            request_id,
                            provider,
                            operation,
                            err,
                            err.category(),
                            retry,
                            self.retry.max_retries,
                            delay
                        );
                        self.metrics.increment_api_retries();
                        tokio::time::sleep(delay).await;
                        continue;
                    }

                    if err.is_retryable() {
                        warn!(
                            "[{}] {}:{} gave up after {} attempts: {}",
                            request_id,
                            provider,
                            operation,
                            retry + 1,
                            err
                        );
                    } else {
                        debug!("[{}] {}:{} failed ({}): {}", request_id, provider, operation, err.category(), err);
                    }
                    return None;
                }
            }
        }
    }

    pub async fn load_instruments(&self, provider: &str) -> Option<Vec<Instrument>> {
        self.execute(provider, "load_instruments", |client| async move {
            client.load_instruments().await
        })
        .await
    }

    pub async fn fetch_tickers(&self, provider: &str) -> Option<HashMap<String, Ticker>> {
        self.execute(provider, "fetch_tickers", |client| async move { client.fetch_tickers().await })
            .await
    }

    pub async fn fetch_ticker(&self, provider: &str, symbol: &str) -> Option<Ticker> {
        self.execute(provider, "fetch_ticker", |client| async move {
            client.fetch_ticker(symbol).await
        })
        .await
    }

    pub async fn fetch_recent_candles(
        &self,
        provider: &str,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> Option<Vec<Candle>> {
        self.execute(provider, "fetch_recent_candles", |client| async move {
            client
                .fetch_candles(symbol, timeframe, CandleQuery::Recent(limit))
                .await
        })
        .await
    }

    pub async fn fetch_candles_since(
        &self,
        provider: &str,
        symbol: &str,
        timeframe: Timeframe,
        start_ms: i64,
        limit: usize,
    ) -> Option<Vec<Candle>> {
        self.execute(provider, "fetch_candles_since", |client| async move {
            client
                .fetch_candles(symbol, timeframe, CandleQuery::Since { start_ms, limit })
                .await
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::concurrency::ControllerSettings;
    use crate::error::ErrorCategory;
    use crate::testing::MockMarketClient;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn fast_retry() -> RetryPolicy {
        RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(5))
    }

    fn executor_with(clients: Vec<Arc<MockMarketClient>>, dedicated: &[&str]) -> (RequestExecutor, Arc<PipelineMetrics>) {
        let metrics = Arc::new(PipelineMetrics::new());
        let registry: ClientRegistry = clients
            .into_iter()
            .map(|c| (c.provider().to_string(), c as Arc<dyn MarketDataClient>))
            .collect();
        let dedicated: Vec<String> = dedicated.iter().map(|s| s.to_string()).collect();
        let executor = RequestExecutor::new(
            registry,
            Arc::new(AdaptiveConcurrencyController::new(ControllerSettings::default())),
            &dedicated,
            2,
            fast_retry(),
            metrics.clone(),
        );
        (executor, metrics)
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let mock = Arc::new(MockMarketClient::new("okx"));
        mock.set_price("BTC-USDT-SWAP", 100.0);
        mock.fail_next_tickers(vec![
            ScanError::Network("reset".into()),
            ScanError::RateLimited("429".into()),
        ]);
        let (executor, metrics) = executor_with(vec![mock.clone()], &[]);

        let ticker = executor.fetch_ticker("okx", "BTC-USDT-SWAP").await;
        assert_eq!(ticker.map(|t| t.last), Some(100.0));
        assert_eq!(mock.ticker_calls(), 3);

        let s = metrics.snapshot();
        assert_eq!(s.api_calls, 3);
        assert_eq!(s.api_retries, 2);
        assert_eq!(executor.controller().stats().total_failures, 2);
    }

    #[tokio::test]
    async fn test_retries_stop_after_limit() {
        let mock = Arc::new(MockMarketClient::new("okx"));
        mock.set_price("BTC-USDT-SWAP", 100.0);
        mock.fail_next_tickers((0..10).map(|_| ScanError::Timeout("slow".into())).collect());
        let (executor, _) = executor_with(vec![mock.clone()], &[]);

        assert!(executor.fetch_ticker("okx", "BTC-USDT-SWAP").await.is_none());
        // first attempt + 3 retries
        assert_eq!(mock.ticker_calls(), 4);
    }

    #[tokio::test]
    async fn test_logic_errors_fail_fast() {
        let mock = Arc::new(MockMarketClient::new("okx"));
        mock.fail_next_tickers(vec![ScanError::InvalidSymbol("gone".into())]);
        let (executor, metrics) = executor_with(vec![mock.clone()], &[]);

        assert!(executor.fetch_ticker("okx", "GONE").await.is_none());
        assert_eq!(mock.ticker_calls(), 1);
        assert_eq!(metrics.failures_in(ErrorCategory::Logic), 1);
    }

    #[tokio::test]
    async fn test_unknown_provider_is_skipped() {
        let (executor, metrics) = executor_with(vec![], &[]);
        assert!(executor.fetch_ticker("kraken", "XBT").await.is_none());
        assert_eq!(metrics.failures_in(ErrorCategory::Logic), 1);
    }

    #[tokio::test]
    async fn test_dedicated_pool_caps_parallelism() {
        let mock = Arc::new(MockMarketClient::new("hyperliquid"));
        mock.set_latency(Duration::from_millis(20));
        for i in 0..8 {
            mock.set_price(&format!("C{}", i), 1.0);
        }
        let (executor, _) = executor_with(vec![mock.clone()], &["hyperliquid"]);
        assert!(executor.is_dedicated("hyperliquid"));

        let symbols: Vec<String> = (0..8).map(|i| format!("C{}", i)).collect();
        let results =
            futures::future::join_all(symbols.iter().map(|s| executor.fetch_ticker("hyperliquid", s))).await;

        assert!(results.iter().all(Option::is_some));
        assert_eq!(mock.max_in_flight(), 2);
    }
}
