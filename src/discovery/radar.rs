use crate::api::executor::RequestExecutor;
use crate::market::{Instrument, Ticker};
use crate::metrics::PipelineMetrics;
use futures::future::join_all;
use itertools::Itertools;
use log::{info, warn};
use std::collections::HashMap;
use std::sync::Arc;

/// A symbol worth running structure analysis on this cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct Target {
    pub provider: String,
    pub symbol: String,
    pub recent_volume: f64,
}

/// 24h quote-volume floors. DEX venues are thin, so they get the lowest bar;
/// majors, indices, FX, metals and large equities get a reduced bar.
#[derive(Debug, Clone)]
pub struct VolumeTiers {
    pub min_volume: f64,
    pub vip_min_volume: f64,
    pub dex_min_volume: f64,
    pub dex_providers: Vec<String>,
    /// Uppercase tags matched as substrings of the base asset
    pub vip_assets: Vec<String>,
    pub quote_currencies: Vec<String>,
}

const DEFAULT_VIP_ASSETS: &[&str] = &[
    "XAU", "XAG", "GOLD", "SILVER", "EUR", "GBP", "JPY", "AUD", "CAD", "TSLA", "AAPL", "NVDA", "MSFT", "AMZN",
    "GOOG", "COIN", "MSTR", "SPX", "NAS", "US500", "US100", "BTC", "ETH", "SOL", "HYPE", "PURR", "KLAUS", "TRUMP",
    "MELANIA",
];

impl Default for VolumeTiers {
    fn default() -> Self {
        Self {
            min_volume: 3_000_000.0,
            vip_min_volume: 10_000.0,
            dex_min_volume: 1_000.0,
            dex_providers: vec![crate::market::hyperliquid::PROVIDER.to_string()],
            vip_assets: DEFAULT_VIP_ASSETS.iter().map(|s| s.to_string()).collect(),
            quote_currencies: vec!["USDT".to_string(), "USDC".to_string(), "USD".to_string()],
        }
    }
}

impl VolumeTiers {
    pub fn is_vip(&self, base: &str) -> bool {
        let base = base.to_uppercase();
        self.vip_assets.iter().any(|tag| base.contains(tag.as_str()))
    }

    pub fn threshold_for(&self, provider: &str, base: &str) -> f64 {
        if self.dex_providers.iter().any(|p| p == provider) {
            self.dex_min_volume
        } else if self.is_vip(base) {
            self.vip_min_volume
        } else {
            self.min_volume
        }
    }

    /// Applies the quote / activity / volume filters to one provider's catalogue.
    pub fn select(
        &self,
        provider: &str,
        instruments: &[Instrument],
        tickers: &HashMap<String, Ticker>,
    ) -> Vec<Target> {
        instruments
            .iter()
            .filter(|inst| inst.active)
            .filter(|inst| {
                let quote = inst.quote.to_uppercase();
                self.quote_currencies.iter().any(|q| *q == quote)
            })
            .filter_map(|inst| {
                let volume = tickers
                    .get(&inst.symbol)
                    .and_then(|t| t.quote_volume)
                    .or(inst.quote_volume)?;
                (volume > self.threshold_for(provider, &inst.base)).then(|| Target {
                    provider: provider.to_string(),
                    symbol: inst.symbol.clone(),
                    recent_volume: volume,
                })
            })
            .collect()
    }
}

pub struct Radar {
    executor: Arc<RequestExecutor>,
    tiers: VolumeTiers,
    metrics: Arc<PipelineMetrics>,
}

impl Radar {
    pub fn new(executor: Arc<RequestExecutor>, tiers: VolumeTiers, metrics: Arc<PipelineMetrics>) -> Self {
        Self {
            executor,
            tiers,
            metrics,
        }
    }

    async fn scan_provider(&self, provider: &str) -> Vec<Target> {
        let instruments = match self.executor.load_instruments(provider).await {
            Some(instruments) => instruments,
            None => {
                warn!("🛰️ {}: instrument catalogue unavailable, skipping this cycle", provider);
                return Vec::new();
            }
        };
        let tickers = match self.executor.fetch_tickers(provider).await {
            Some(tickers) => tickers,
            None => {
                warn!("🛰️ {}: tickers unavailable, skipping this cycle", provider);
                return Vec::new();
            }
        };

        let targets = self.tiers.select(provider, &instruments, &tickers);
        info!(
            "🛰️ {}: {} instrument(s), {} target(s)",
            provider,
            instruments.len(),
            targets.len()
        );
        targets
    }

    /// Scans every provider concurrently; results sorted by volume, highest first.
    pub async fn discover(&self) -> Vec<Target> {
        let providers = self.executor.providers();
        let per_provider = join_all(providers.iter().map(|p| self.scan_provider(p))).await;

        let targets: Vec<Target> = per_provider
            .into_iter()
            .flatten()
            .sorted_by(|a, b| b.recent_volume.total_cmp(&a.recent_volume))
            .collect();

        self.metrics.add_targets_discovered(targets.len() as u64);
        info!("🛰️ Radar found {} target(s) across {} provider(s)", targets.len(), providers.len());
        targets
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::concurrency::{AdaptiveConcurrencyController, ControllerSettings};
    use crate::error::RetryPolicy;
    use crate::market::{ClientRegistry, MarketDataClient};
    use crate::testing::MockMarketClient;
    use pretty_assertions::assert_eq;
    use std::time::Duration;

    fn inst(symbol: &str, base: &str, quote: &str) -> Instrument {
        Instrument {
            symbol: symbol.to_string(),
            base: base.to_string(),
            quote: quote.to_string(),
            active: true,
            quote_volume: None,
        }
    }

    fn tickers(rows: &[(&str, f64)]) -> HashMap<String, Ticker> {
        rows.iter()
            .map(|(s, v)| {
                (
                    s.to_string(),
                    Ticker {
                        symbol: s.to_string(),
                        last: 1.0,
                        quote_volume: Some(*v),
                    },
                )
            })
            .collect()
    }

    #[test]
    fn test_tier_thresholds() {
        let tiers = VolumeTiers::default();
        assert_eq!(tiers.threshold_for("hyperliquid", "DOGE"), 1_000.0);
        assert_eq!(tiers.threshold_for("okx", "BTC"), 10_000.0);
        assert_eq!(tiers.threshold_for("okx", "PEPE"), 3_000_000.0);
    }

    #[test]
    fn test_select_filters_quote_activity_and_volume() {
        let tiers = VolumeTiers::default();
        let mut inactive = inst("OLD-USDT-SWAP", "OLD", "USDT");
        inactive.active = false;
        let instruments = vec![
            inst("BTC-USDT-SWAP", "BTC", "USDT"),
            inst("PEPE-USDT-SWAP", "PEPE", "USDT"),
            inst("WIF-USDT-SWAP", "WIF", "USDT"),
            inst("BTC-EUR-SWAP", "BTC", "EUR"),
            inactive,
        ];
        let tickers = tickers(&[
            ("BTC-USDT-SWAP", 50_000.0),
            ("PEPE-USDT-SWAP", 2_000_000.0),
            ("WIF-USDT-SWAP", 4_000_000.0),
            ("BTC-EUR-SWAP", 9_000_000.0),
            ("OLD-USDT-SWAP", 9_000_000.0),
        ]);

        let symbols: Vec<String> = tiers
            .select("okx", &instruments, &tickers)
            .into_iter()
            .map(|t| t.symbol)
            .collect();
        assert_eq!(symbols, vec!["BTC-USDT-SWAP", "WIF-USDT-SWAP"]);
    }

    #[tokio::test]
    async fn test_failing_provider_contributes_nothing() {
        let okx = Arc::new(MockMarketClient::new("okx"));
        okx.list("WIF-USDT-SWAP", "WIF", "USDT", 4_000_000.0);
        okx.list("DOGE-USDT-SWAP", "DOGE", "USDT", 8_000_000.0);
        let bitget = Arc::new(MockMarketClient::new("bitget"));
        bitget.list("PEPEUSDT", "PEPE", "USDT", 9_000_000.0);
        bitget.set_catalogue_down(true);

        let mut clients: ClientRegistry = ClientRegistry::new();
        clients.insert("okx".to_string(), okx as Arc<dyn MarketDataClient>);
        clients.insert("bitget".to_string(), bitget as Arc<dyn MarketDataClient>);
        let metrics = Arc::new(PipelineMetrics::new());
        let executor = Arc::new(RequestExecutor::new(
            clients,
            Arc::new(AdaptiveConcurrencyController::new(ControllerSettings::default())),
            &[],
            1,
            RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(10)),
            metrics.clone(),
        ));

        let targets = Radar::new(executor, VolumeTiers::default(), metrics.clone()).discover().await;
        let symbols: Vec<&str> = targets.iter().map(|t| t.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["DOGE-USDT-SWAP", "WIF-USDT-SWAP"]);
        assert!(targets.iter().all(|t| t.provider == "okx"));
        assert_eq!(metrics.snapshot().targets_discovered, 2);
    }

    #[test]
    fn test_catalogue_volume_is_fallback() {
        let tiers = VolumeTiers::default();
        let mut hl = inst("ARB", "ARB", "USDC");
        hl.quote_volume = Some(5_000.0);
        let targets = tiers.select("hyperliquid", &[hl], &HashMap::new());
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].recent_volume, 5_000.0);
    }
}
