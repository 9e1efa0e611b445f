use crate::analysis::structure::{AnalyzerSettings, StructureParams};
use crate::api::concurrency::ControllerSettings;
use crate::discovery::radar::VolumeTiers;
use crate::error::{RetryPolicy, ScanError};
use crate::market::{bitget, hyperliquid, okx, Timeframe};
use crate::notify::AlertQueueSettings;
use crate::pipeline::confirmation::ConfirmationSettings;
use crate::pipeline::sniper::SniperSettings;
use crate::utils::parse_list;
use std::env;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub providers: Vec<String>,
    pub dedicated_providers: Vec<String>,
    pub dedicated_pool_size: usize,
    pub http_timeout_secs: u64,
    pub okx_base_url: String,
    pub bitget_base_url: String,
    pub hyperliquid_base_url: String,
    /// Unset means state lives only in memory
    pub redis_url: Option<String>,
    pub state_namespace: String,
    pub log_level: String,
    pub log_file: Option<String>,
    pub radar_interval_secs: u64,
    /// Floor on the radar's sleep when a cycle overruns its interval
    pub radar_min_sleep_secs: u64,
    pub alert_webhook_url: Option<String>,
    pub display_utc_offset_hours: i32,
    pub metrics_log_interval_secs: u64,
    pub retry: RetryPolicy,
    pub controller: ControllerSettings,
    pub tiers: VolumeTiers,
    pub structure: StructureParams,
    pub analyzer: AnalyzerSettings,
    pub sniper: SniperSettings,
    pub confirmation: ConfirmationSettings,
    pub alerts: AlertQueueSettings,
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key).ok().and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn env_list(key: &str, default: &str) -> Vec<String> {
    parse_list(&env::var(key).unwrap_or_else(|_| default.to_string()))
}

fn env_bool(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(v) => matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

fn env_timeframe(key: &str, default: Timeframe) -> Timeframe {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Self {
        let structure_defaults = StructureParams::default();
        let analyzer_defaults = AnalyzerSettings::default();
        let controller_defaults = ControllerSettings::default();
        let tiers_defaults = VolumeTiers::default();
        let sniper_defaults = SniperSettings::default();
        let confirmation_defaults = ConfirmationSettings::default();
        let alert_defaults = AlertQueueSettings::default();
        let retry_defaults = RetryPolicy::default();

        Config {
            providers: env_list("PROVIDERS", "okx,bitget,hyperliquid"),
            dedicated_providers: env_list("DEDICATED_PROVIDERS", hyperliquid::PROVIDER),
            dedicated_pool_size: env_or("DEDICATED_POOL_SIZE", 2),
            http_timeout_secs: env_or("HTTP_TIMEOUT_SECS", 30),
            okx_base_url: env_opt("OKX_BASE_URL").unwrap_or_else(|| okx::DEFAULT_BASE_URL.to_string()),
            bitget_base_url: env_opt("BITGET_BASE_URL").unwrap_or_else(|| bitget::DEFAULT_BASE_URL.to_string()),
            hyperliquid_base_url: env_opt("HYPERLIQUID_BASE_URL")
                .unwrap_or_else(|| hyperliquid::DEFAULT_BASE_URL.to_string()),
            redis_url: env_opt("REDIS_URL"),
            state_namespace: env_opt("STATE_NAMESPACE").unwrap_or_else(|| "box_sentinel".to_string()),
            log_level: env_opt("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            log_file: env_opt("LOG_FILE"),
            radar_interval_secs: env_or("RADAR_INTERVAL_SECS", 3600),
            radar_min_sleep_secs: env_or("RADAR_MIN_SLEEP_SECS", 60),
            alert_webhook_url: env_opt("ALERT_WEBHOOK_URL"),
            display_utc_offset_hours: env_or("DISPLAY_UTC_OFFSET_HOURS", 0),
            metrics_log_interval_secs: env_or("METRICS_LOG_INTERVAL_SECS", 300),
            retry: RetryPolicy {
                max_retries: env_or("MAX_RETRIES", retry_defaults.max_retries),
                base_delay: Duration::from_millis(env_or(
                    "RETRY_BASE_DELAY_MS",
                    retry_defaults.base_delay.as_millis() as u64,
                )),
                max_delay: Duration::from_millis(env_or(
                    "RETRY_MAX_DELAY_MS",
                    retry_defaults.max_delay.as_millis() as u64,
                )),
                jitter_pct: env_or("RETRY_JITTER_PCT", retry_defaults.jitter_pct),
            },
            controller: ControllerSettings {
                initial: env_or("MAX_CONCURRENT_REQUESTS", controller_defaults.initial),
                floor: env_or("MIN_CONCURRENT_REQUESTS", controller_defaults.floor),
                ceiling: env_or("MAX_CONCURRENCY_CEILING", controller_defaults.ceiling),
                window: env_or("CONCURRENCY_WINDOW", controller_defaults.window),
                error_threshold: env_or("ERROR_RATE_THRESHOLD", controller_defaults.error_threshold),
                success_threshold: env_or("SUCCESS_RATE_THRESHOLD", controller_defaults.success_threshold),
                cooldown: Duration::from_secs(env_or(
                    "CONCURRENCY_COOLDOWN_SECS",
                    controller_defaults.cooldown.as_secs(),
                )),
                enabled: env_bool("ADAPTIVE_CONCURRENCY", controller_defaults.enabled),
            },
            tiers: VolumeTiers {
                min_volume: env_or("MIN_VOLUME", tiers_defaults.min_volume),
                vip_min_volume: env_or("VIP_MIN_VOLUME", tiers_defaults.vip_min_volume),
                dex_min_volume: env_or("DEX_MIN_VOLUME", tiers_defaults.dex_min_volume),
                dex_providers: env::var("DEX_PROVIDERS")
                    .map(|v| parse_list(&v))
                    .unwrap_or(tiers_defaults.dex_providers),
                vip_assets: env::var("VIP_ASSETS")
                    .map(|v| parse_list(&v).into_iter().map(|s| s.to_uppercase()).collect())
                    .unwrap_or(tiers_defaults.vip_assets),
                quote_currencies: env::var("QUOTE_CURRENCIES")
                    .map(|v| parse_list(&v).into_iter().map(|s| s.to_uppercase()).collect())
                    .unwrap_or(tiers_defaults.quote_currencies),
            },
            structure: StructureParams {
                min_history: env_or("MIN_HISTORY", structure_defaults.min_history),
                min_amplitude: env_or("MIN_AMPLITUDE", structure_defaults.min_amplitude),
                max_amplitude: env_or("MAX_AMPLITUDE", structure_defaults.max_amplitude),
                edge_zone_pct: env_or("EDGE_ZONE_PCT", structure_defaults.edge_zone_pct),
                rejection_wick_ratio: env_or("REJECTION_WICK_RATIO", structure_defaults.rejection_wick_ratio),
                min_touches: env_or("MIN_TOUCHES", structure_defaults.min_touches),
                min_rejections: env_or("MIN_REJECTIONS", structure_defaults.min_rejections),
                squeeze_lookback: env_or("SQUEEZE_LOOKBACK", structure_defaults.squeeze_lookback),
                squeeze_factor: env_or("SQUEEZE_FACTOR", structure_defaults.squeeze_factor),
            },
            analyzer: AnalyzerSettings {
                timeframe: env_timeframe("STRUCTURE_TIMEFRAME", analyzer_defaults.timeframe),
                fetch_limit: env_or("STRUCTURE_FETCH_LIMIT", analyzer_defaults.fetch_limit),
                watch_ttl: Duration::from_secs(env_or("WATCH_TTL_SECS", analyzer_defaults.watch_ttl.as_secs())),
                max_concurrent: env_or("MAX_CONCURRENT_ANALYSIS", analyzer_defaults.max_concurrent),
                announce_new_watches: env_bool("ANNOUNCE_NEW_WATCHES", analyzer_defaults.announce_new_watches),
            },
            sniper: SniperSettings {
                period: Duration::from_secs(env_or("SNIPER_INTERVAL_SECS", sniper_defaults.period.as_secs())),
                min_sleep: Duration::from_secs(env_or("MIN_SLEEP_SECS", sniper_defaults.min_sleep.as_secs())),
                gate_timeframe: env_timeframe("GATE_TIMEFRAME", sniper_defaults.gate_timeframe),
                gate_window: env_or("GATE_WINDOW", sniper_defaults.gate_window),
                gate_exclude_recent: env_or("GATE_EXCLUDE_RECENT", sniper_defaults.gate_exclude_recent),
                gate_min_bars: env_or("GATE_MIN_BARS", sniper_defaults.gate_min_bars),
                gate_factor: env_or("GATE_FACTOR", sniper_defaults.gate_factor),
                confirm_timeframe: env_timeframe("CONFIRM_TIMEFRAME", sniper_defaults.confirm_timeframe),
            },
            confirmation: ConfirmationSettings {
                period: Duration::from_secs(env_or(
                    "CONFIRMATION_INTERVAL_SECS",
                    confirmation_defaults.period.as_secs(),
                )),
                min_sleep: Duration::from_secs(env_or("MIN_SLEEP_SECS", confirmation_defaults.min_sleep.as_secs())),
                timeframe: env_timeframe("CONFIRM_TIMEFRAME", confirmation_defaults.timeframe),
                safety_buffer: Duration::from_secs(env_or(
                    "SAFETY_BUFFER_SECS",
                    confirmation_defaults.safety_buffer.as_secs(),
                )),
                alert_cooldown: Duration::from_secs(env_or(
                    "ALERT_COOLDOWN_SECS",
                    confirmation_defaults.alert_cooldown.as_secs(),
                )),
            },
            alerts: AlertQueueSettings {
                batch_size: env_or("ALERT_BATCH_SIZE", alert_defaults.batch_size),
                batch_interval: Duration::from_secs(env_or(
                    "ALERT_BATCH_INTERVAL_SECS",
                    alert_defaults.batch_interval.as_secs(),
                )),
                max_retries: env_or("ALERT_MAX_RETRIES", alert_defaults.max_retries),
            },
        }
    }

    /// Defaults only, no environment lookups.
    pub fn test_default() -> Self {
        Config {
            providers: vec![okx::PROVIDER.to_string(), hyperliquid::PROVIDER.to_string()],
            dedicated_providers: vec![hyperliquid::PROVIDER.to_string()],
            dedicated_pool_size: 2,
            http_timeout_secs: 5,
            okx_base_url: okx::DEFAULT_BASE_URL.to_string(),
            bitget_base_url: bitget::DEFAULT_BASE_URL.to_string(),
            hyperliquid_base_url: hyperliquid::DEFAULT_BASE_URL.to_string(),
            redis_url: None,
            state_namespace: "box_sentinel_test".to_string(),
            log_level: "debug".to_string(),
            log_file: None,
            radar_interval_secs: 3600,
            radar_min_sleep_secs: 60,
            alert_webhook_url: None,
            display_utc_offset_hours: 0,
            metrics_log_interval_secs: 300,
            retry: RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(10)),
            controller: ControllerSettings::default(),
            tiers: VolumeTiers::default(),
            structure: StructureParams::default(),
            analyzer: AnalyzerSettings::default(),
            sniper: SniperSettings::default(),
            confirmation: ConfirmationSettings::default(),
            alerts: AlertQueueSettings::default(),
        }
    }

    pub fn validate(&self) -> Result<(), ScanError> {
        if self.providers.is_empty() {
            return Err(ScanError::Config("PROVIDERS cannot be empty".to_string()));
        }
        let c = &self.controller;
        if c.floor == 0 || c.floor > c.initial || c.initial > c.ceiling {
            return Err(ScanError::Config(format!(
                "concurrency bounds must satisfy 0 < floor ({}) <= initial ({}) <= ceiling ({})",
                c.floor, c.initial, c.ceiling
            )));
        }
        if c.window == 0 {
            return Err(ScanError::Config("CONCURRENCY_WINDOW must be positive".to_string()));
        }
        if self.dedicated_pool_size == 0 {
            return Err(ScanError::Config("DEDICATED_POOL_SIZE must be positive".to_string()));
        }
        let s = &self.structure;
        if s.min_amplitude < 0.0 || s.min_amplitude > s.max_amplitude {
            return Err(ScanError::Config(format!(
                "amplitude bounds invalid: min {} max {}",
                s.min_amplitude, s.max_amplitude
            )));
        }
        if !(0.0..0.5).contains(&s.edge_zone_pct) {
            return Err(ScanError::Config("EDGE_ZONE_PCT must be in [0, 0.5)".to_string()));
        }
        if s.min_history == 0 || s.squeeze_lookback == 0 || s.squeeze_lookback > s.min_history {
            return Err(ScanError::Config("SQUEEZE_LOOKBACK must be within MIN_HISTORY".to_string()));
        }
        if self.analyzer.fetch_limit <= s.min_history {
            return Err(ScanError::Config(format!(
                "STRUCTURE_FETCH_LIMIT ({}) must exceed MIN_HISTORY ({})",
                self.analyzer.fetch_limit, s.min_history
            )));
        }
        let g = &self.sniper;
        let gate_capacity = g.gate_window.saturating_sub(2).saturating_sub(g.gate_exclude_recent);
        if g.gate_min_bars == 0 || gate_capacity < g.gate_min_bars {
            return Err(ScanError::Config(format!(
                "GATE_WINDOW ({}) - 2 - GATE_EXCLUDE_RECENT ({}) leaves {} gate bar(s), GATE_MIN_BARS is {}",
                g.gate_window, g.gate_exclude_recent, gate_capacity, g.gate_min_bars
            )));
        }
        if self.radar_interval_secs == 0 || self.radar_min_sleep_secs == 0 || self.metrics_log_interval_secs == 0 {
            return Err(ScanError::Config(
                "RADAR_INTERVAL_SECS, RADAR_MIN_SLEEP_SECS and METRICS_LOG_INTERVAL_SECS must be positive".to_string(),
            ));
        }
        if !(-12..=14).contains(&self.display_utc_offset_hours) {
            return Err(ScanError::Config("DISPLAY_UTC_OFFSET_HOURS out of range".to_string()));
        }

        let mut urls = vec![
            ("OKX_BASE_URL", self.okx_base_url.as_str()),
            ("BITGET_BASE_URL", self.bitget_base_url.as_str()),
            ("HYPERLIQUID_BASE_URL", self.hyperliquid_base_url.as_str()),
        ];
        if let Some(redis_url) = &self.redis_url {
            urls.push(("REDIS_URL", redis_url.as_str()));
        }
        if let Some(webhook) = &self.alert_webhook_url {
            urls.push(("ALERT_WEBHOOK_URL", webhook.as_str()));
        }
        for (key, raw) in urls {
            url::Url::parse(raw).map_err(|e| ScanError::Config(format!("{} is not a valid URL: {}", key, e)))?;
        }

        Ok(())
    }

    pub fn validate_and_log(&self) {
        log::info!(
            "Providers: {:?} (dedicated: {:?} x{})",
            self.providers,
            self.dedicated_providers,
            self.dedicated_pool_size
        );
        log::info!(
            "Concurrency: start {} floor {} ceiling {} window {} cooldown {:?} adaptive={}",
            self.controller.initial,
            self.controller.floor,
            self.controller.ceiling,
            self.controller.window,
            self.controller.cooldown,
            self.controller.enabled
        );
        log::info!(
            "Volume tiers: general {} / vip {} / dex {}",
            self.tiers.min_volume,
            self.tiers.vip_min_volume,
            self.tiers.dex_min_volume
        );
        log::info!("Structure: {:?}", self.structure);
        log::info!(
            "Cadence: radar {}s (min sleep {}s), sniper {:?}, confirmation {:?}",
            self.radar_interval_secs,
            self.radar_min_sleep_secs,
            self.sniper.period,
            self.confirmation.period
        );
        log::info!(
            "State backend: {}",
            if self.redis_url.is_some() { "redis" } else { "memory" }
        );
        if self.alert_webhook_url.is_none() {
            log::warn!("ALERT_WEBHOOK_URL not set, alerts will only be logged");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(Config::test_default().validate().is_ok());
    }

    #[test]
    fn test_inverted_concurrency_bounds_rejected() {
        let mut config = Config::test_default();
        config.controller.floor = 20;
        assert!(matches!(config.validate(), Err(ScanError::Config(_))));
    }

    #[test]
    fn test_bad_webhook_url_rejected() {
        let mut config = Config::test_default();
        config.alert_webhook_url = Some("not a url".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_gate_window_must_leave_min_bars() {
        let mut config = Config::test_default();
        config.sniper.gate_window = 4;
        config.sniper.gate_exclude_recent = 2;
        assert!(matches!(config.validate(), Err(ScanError::Config(_))));

        // 12 - 2 - 3 = 7 bars available, so 7 is the largest valid minimum.
        let mut config = Config::test_default();
        config.sniper.gate_min_bars = 7;
        assert!(config.validate().is_ok());
        config.sniper.gate_min_bars = 8;
        assert!(config.validate().is_err());

        let mut config = Config::test_default();
        config.sniper.gate_min_bars = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_fetch_limit_must_cover_history() {
        let mut config = Config::test_default();
        config.analyzer.fetch_limit = config.structure.min_history;
        assert!(config.validate().is_err());
    }
}
