use log::debug;
use rand::Rng;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum ScanError {
    /// Connection refused, reset, DNS failure, ...
    #[error("Network Error: {0}")]
    Network(String),

    /// Request did not complete within the client timeout
    #[error("Timeout Error: {0}")]
    Timeout(String),

    /// Provider answered 429 / explicit rate-limit payload
    #[error("Rate Limited: {0}")]
    RateLimited(String),

    /// Provider down, in maintenance or behind DDoS protection
    #[error("Exchange Unavailable: {0}")]
    ExchangeUnavailable(String),

    /// Symbol unknown to the provider or delisted
    #[error("Invalid Symbol: {0}")]
    InvalidSymbol(String),

    /// Malformed or unexpected response body
    #[error("Parse Error: {0}")]
    Parse(String),

    /// No client registered for the requested provider
    #[error("Unknown Provider: {0}")]
    UnknownProvider(String),

    /// Durable store read/write failed
    #[error("Persistence Error: {0}")]
    Persistence(String),

    /// Alert could not be handed to the transport
    #[error("Notification Error: {0}")]
    Notification(String),

    /// Configuration errors
    #[error("Config Error: {0}")]
    Config(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    TransientNetwork,
    RateLimited,
    ExchangeUnavailable,
    Logic,
    Persistence,
    Notification,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::TransientNetwork => "transient_network",
            ErrorCategory::RateLimited => "rate_limited",
            ErrorCategory::ExchangeUnavailable => "exchange_unavailable",
            ErrorCategory::Logic => "logic",
            ErrorCategory::Persistence => "persistence",
            ErrorCategory::Notification => "notification",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<serde_json::Error> for ScanError {
    fn from(err: serde_json::Error) -> Self {
        ScanError::Parse(format!("JSON serialization/deserialization error: {}", err))
    }
}

impl From<redis::RedisError> for ScanError {
    fn from(err: redis::RedisError) -> Self {
        ScanError::Persistence(format!("Redis error: {}", err))
    }
}

impl From<reqwest::Error> for ScanError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return ScanError::Timeout(err.to_string());
        }
        if let Some(status) = err.status() {
            return ScanError::from_status(status.as_u16(), &err.to_string());
        }
        if err.is_decode() {
            return ScanError::Parse(err.to_string());
        }
        // connect, request and body errors are all transport-level
        ScanError::Network(err.to_string())
    }
}

impl ScanError {
    /// Maps an HTTP status from a provider into the error taxonomy.
    pub fn from_status(status: u16, body: &str) -> Self {
        let detail = format!("HTTP {}: {}", status, truncate(body, 200));
        match status {
            429 | 418 => ScanError::RateLimited(detail),
            403 if body.to_lowercase().contains("ddos") => ScanError::ExchangeUnavailable(detail),
            500..=599 => ScanError::ExchangeUnavailable(detail),
            404 => ScanError::InvalidSymbol(detail),
            _ => ScanError::Parse(detail),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            ScanError::Network(_) | ScanError::Timeout(_) => ErrorCategory::TransientNetwork,
            ScanError::RateLimited(_) => ErrorCategory::RateLimited,
            ScanError::ExchangeUnavailable(_) => ErrorCategory::ExchangeUnavailable,
            ScanError::InvalidSymbol(_)
            | ScanError::Parse(_)
            | ScanError::UnknownProvider(_)
            | ScanError::Config(_) => ErrorCategory::Logic,
            ScanError::Persistence(_) => ErrorCategory::Persistence,
            ScanError::Notification(_) => ErrorCategory::Notification,
        }
    }

    /// Only transport hiccups and rate limits are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::TransientNetwork | ErrorCategory::RateLimited
        )
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Retry policy with exponential backoff
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// 0.0 - 1.0, symmetric around the computed delay
    pub jitter_pct: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
            jitter_pct: 0.0,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
            jitter_pct: 0.0,
        }
    }

    pub fn with_jitter(mut self, jitter_pct: f64) -> Self {
        self.jitter_pct = jitter_pct.clamp(0.0, 1.0);
        self
    }

    /// Calculate delay before retry number `retry` (1-based): base * 2^(retry-1)
    pub fn delay_for_retry(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }

        let multiplier = 2_u128.saturating_pow(retry - 1);
        let delay_ms = self.base_delay.as_millis().saturating_mul(multiplier);
        let mut delay = Duration::from_millis(delay_ms.min(self.max_delay.as_millis()) as u64);

        if self.jitter_pct > 0.0 {
            let factor = 1.0 + rand::thread_rng().gen_range(-self.jitter_pct..=self.jitter_pct);
            delay = Duration::from_millis((delay.as_millis() as f64 * factor) as u64);
        }

        debug!("Retry {}: delay = {:?}", retry, delay);
        delay
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }
}

pub type Result<T> = std::result::Result<T, ScanError>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_backoff_doubles_from_base() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for_retry(0), Duration::ZERO);
        assert_eq!(policy.delay_for_retry(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for_retry(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for_retry(3), Duration::from_secs(8));
        assert_eq!(policy.max_attempts(), 4);
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = RetryPolicy::new(10, Duration::from_secs(2), Duration::from_secs(5));
        assert_eq!(policy.delay_for_retry(6), Duration::from_secs(5));
    }

    #[test]
    fn test_jitter_stays_in_band() {
        let policy = RetryPolicy::default().with_jitter(0.1);
        for _ in 0..50 {
            let ms = policy.delay_for_retry(1).as_millis();
            assert!((1800..=2200).contains(&ms), "delay {}ms out of band", ms);
        }
    }

    #[test]
    fn test_retryable_categories() {
        assert!(ScanError::Network("reset".into()).is_retryable());
        assert!(ScanError::Timeout("30s".into()).is_retryable());
        assert!(ScanError::RateLimited("429".into()).is_retryable());
        assert!(!ScanError::ExchangeUnavailable("503".into()).is_retryable());
        assert!(!ScanError::InvalidSymbol("FOO".into()).is_retryable());
        assert!(!ScanError::Persistence("down".into()).is_retryable());
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(ScanError::from_status(429, "").category(), ErrorCategory::RateLimited);
        assert_eq!(ScanError::from_status(503, "maintenance").category(), ErrorCategory::ExchangeUnavailable);
        assert_eq!(ScanError::from_status(403, "DDoS protection").category(), ErrorCategory::ExchangeUnavailable);
        assert_eq!(ScanError::from_status(400, "bad instId").category(), ErrorCategory::Logic);
        assert_eq!(ScanError::from_status(404, "").category(), ErrorCategory::Logic);
    }
}
