//! Test support: a scriptable market client, an alert sink that records what
//! it receives, and candle series builders.

pub mod mock_market;

pub use mock_market::MockMarketClient;

use crate::market::Candle;
use crate::notify::{Alert, NotificationSink};
use std::sync::Mutex;

pub const HOUR_MS: i64 = 3_600_000;

#[derive(Debug, Default)]
pub struct RecordingSink {
    alerts: Mutex<Vec<Alert>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn subjects(&self) -> Vec<String> {
        self.alerts().into_iter().map(|a| a.subject).collect()
    }

    pub fn len(&self) -> usize {
        self.alerts.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl NotificationSink for RecordingSink {
    fn enqueue(&self, alert: Alert) {
        self.alerts.lock().unwrap_or_else(|e| e.into_inner()).push(alert);
    }
}

fn candle(open_time: i64, open: f64, high: f64, low: f64, close: f64) -> Candle {
    Candle {
        open_time,
        open,
        high,
        low,
        close,
        volume: 1_000.0,
    }
}

/// Hourly bar `index` spanning `[low, high]`, opening and closing mid-range.
pub fn flat_candle(index: i64, low: f64, high: f64) -> Candle {
    let mid = (low + high) / 2.0;
    candle(index * HOUR_MS, mid, high, low, mid)
}

/// `n` hourly bars of constant `range` centred on `mid`.
pub fn range_candles(start_ms: i64, n: usize, mid: f64, range: f64) -> Vec<Candle> {
    (0..n)
        .map(|k| {
            let t = start_ms + k as i64 * HOUR_MS;
            candle(t, mid, mid + range / 2.0, mid - range / 2.0, mid)
        })
        .collect()
}

/// `n` hourly bars forming a consolidation between `low` and `high`: quiet
/// mid-range bars, three rejection wicks into each edge, and a tight tail of
/// five bars (the last one being the still-forming bar).
pub fn box_candles(start_ms: i64, high: f64, low: f64, n: usize) -> Vec<Candle> {
    let width = high - low;
    let mid = (high + low) / 2.0;
    let top: Vec<usize> = [80, 60, 40].iter().filter_map(|d| n.saturating_sub(1).checked_sub(*d)).collect();
    let bottom: Vec<usize> = [70, 50, 30].iter().filter_map(|d| n.saturating_sub(1).checked_sub(*d)).collect();

    (0..n)
        .map(|k| {
            let t = start_ms + k as i64 * HOUR_MS;
            if top.contains(&k) {
                candle(t, mid + 0.2 * width, high, mid + 0.15 * width, mid + 0.22 * width)
            } else if bottom.contains(&k) {
                candle(t, mid - 0.2 * width, mid - 0.15 * width, low, mid - 0.22 * width)
            } else if k + 5 >= n {
                candle(t, mid - 0.01 * width, mid + 0.02 * width, mid - 0.02 * width, mid + 0.01 * width)
            } else {
                candle(t, mid - 0.05 * width, mid + 0.15 * width, mid - 0.15 * width, mid + 0.05 * width)
            }
        })
        .collect()
}
