use chrono::{DateTime, TimeZone, Utc};
use log::info;
use std::time::Duration;

/// Initialises the global logger: human-readable lines on stdout and, when
/// `log_file` is set, one JSON object per record appended to that file.
pub fn setup_logging(level: log::LevelFilter, log_file: Option<&str>) -> Result<(), fern::InitError> {
    let stdout = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{}][{}][{}] {}",
                Utc::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.target(),
                message
            ))
        })
        .chain(std::io::stdout());

    let mut dispatch = fern::Dispatch::new()
        .level(level)
        .level_for("reqwest", log::LevelFilter::Warn)
        .level_for("hyper", log::LevelFilter::Warn)
        .level_for("rustls", log::LevelFilter::Warn)
        .level_for("redis", log::LevelFilter::Warn)
        .chain(stdout);

    if let Some(path) = log_file {
        let json_sink = fern::Dispatch::new()
            .format(|out, message, record| {
                let line = serde_json::json!({
                    "timestamp": Utc::now().to_rfc3339(),
                    "level": record.level().to_string(),
                    "target": record.target(),
                    "message": message.to_string(),
                });
                out.finish(format_args!("{}", line))
            })
            .chain(fern::log_file(path)?);
        dispatch = dispatch.chain(json_sink);
    }

    dispatch.apply()?;
    info!("Logging initialized at level {}.", level);
    Ok(())
}

pub fn parse_level(raw: &str) -> log::LevelFilter {
    match raw.trim().to_lowercase().as_str() {
        "trace" => log::LevelFilter::Trace,
        "debug" => log::LevelFilter::Debug,
        "warn" | "warning" => log::LevelFilter::Warn,
        "error" => log::LevelFilter::Error,
        "off" => log::LevelFilter::Off,
        _ => log::LevelFilter::Info,
    }
}

pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

/// First multiple of `interval_ms` strictly after `now_ms`.
pub fn next_interval_boundary(now_ms: i64, interval_ms: i64) -> i64 {
    if interval_ms <= 0 {
        return now_ms;
    }
    (now_ms.div_euclid(interval_ms) + 1) * interval_ms
}

pub fn ms_to_datetime(ms: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms).single()
}

/// Sleep needed to keep a loop on a fixed period measured between cycle starts.
pub fn remaining_sleep(period: Duration, elapsed: Duration, min_sleep: Duration) -> Duration {
    period.saturating_sub(elapsed).max(min_sleep)
}

/// Splits a comma separated env value, dropping blanks and lowercasing.
pub fn parse_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_next_boundary_is_strictly_after() {
        let hour = 3_600_000;
        assert_eq!(next_interval_boundary(0, hour), hour);
        assert_eq!(next_interval_boundary(hour, hour), 2 * hour);
        assert_eq!(next_interval_boundary(hour + 1, hour), 2 * hour);
        assert_eq!(next_interval_boundary(2 * hour - 1, hour), 2 * hour);
    }

    #[test]
    fn test_remaining_sleep_respects_floor() {
        let period = Duration::from_secs(60);
        let floor = Duration::from_secs(1);
        assert_eq!(remaining_sleep(period, Duration::from_secs(20), floor), Duration::from_secs(40));
        assert_eq!(remaining_sleep(period, Duration::from_secs(59), floor), floor);
        assert_eq!(remaining_sleep(period, Duration::from_secs(90), floor), floor);
    }

    #[test]
    fn test_parse_list() {
        assert_eq!(parse_list(" OKX, bitget,,Hyperliquid "), vec!["okx", "bitget", "hyperliquid"]);
        assert!(parse_list("").is_empty());
    }

    #[test]
    fn test_parse_level_defaults_to_info() {
        assert_eq!(parse_level("DEBUG"), log::LevelFilter::Debug);
        assert_eq!(parse_level("nonsense"), log::LevelFilter::Info);
    }
}
