//! Shared HTTP plumbing for the provider clients: one pooled reqwest client,
//! status-to-error classification and lenient number parsing.

use crate::error::{Result, ScanError};
use log::debug;
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;

pub fn build_http_client(timeout_secs: u64) -> Result<Client> {
    Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .connect_timeout(Duration::from_secs(timeout_secs.min(10)))
        .user_agent(concat!("box-sentinel/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| ScanError::Config(format!("failed to build HTTP client: {}", e)))
}

/// Sends the request and decodes a successful body; non-2xx statuses are
/// classified before the body is interpreted.
pub async fn send_json<T: DeserializeOwned>(label: &str, request: RequestBuilder) -> Result<T> {
    let start = std::time::Instant::now();
    let response = request.send().await?;
    let status = response.status();
    let body = response.text().await?;
    debug!("{} -> {} in {} ms", label, status, start.elapsed().as_millis());

    if !status.is_success() {
        return Err(ScanError::from_status(status.as_u16(), &body));
    }
    serde_json::from_str(&body).map_err(|e| ScanError::Parse(format!("{}: {}", label, e)))
}

/// Accepts numbers encoded either as JSON numbers or as strings.
pub fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub fn as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub fn field_f64(obj: &Value, key: &str) -> Option<f64> {
    obj.get(key).and_then(as_f64)
}

pub fn field_str<'a>(obj: &'a Value, key: &str) -> Option<&'a str> {
    obj.get(key).and_then(Value::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_lenient_numbers() {
        assert_eq!(as_f64(&json!("1.25")), Some(1.25));
        assert_eq!(as_f64(&json!(3)), Some(3.0));
        assert_eq!(as_f64(&json!("")), None);
        assert_eq!(as_i64(&json!("1700000000000")), Some(1_700_000_000_000));
        assert_eq!(field_f64(&json!({"px": "2"}), "px"), Some(2.0));
        assert_eq!(field_str(&json!({"s": "BTC"}), "s"), Some("BTC"));
    }
}
