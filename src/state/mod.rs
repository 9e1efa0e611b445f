//! Watchlist, pending confirmations and alert history: in-memory maps used by
//! the loops plus a durable store they are written through to.

pub mod memory;
pub mod store;
pub mod watchlist;

pub use memory::MemoryStateStore;
pub use store::{RedisStateStore, StateStore};
pub use watchlist::{RecoveryReport, Watchlist};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Key shared by every table: `provider:symbol`.
pub fn entry_id(provider: &str, symbol: &str) -> String {
    format!("{}:{}", provider, symbol)
}

/// A symbol locked in a consolidation box, waiting for a breakout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchEntry {
    pub id: String,
    pub provider: String,
    pub symbol: String,
    pub range_high: f64,
    pub range_low: f64,
    pub base_volatility: f64,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl WatchEntry {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.expires_at
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Up,
    Down,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Up => f.write_str("UP"),
            Direction::Down => f.write_str("DOWN"),
        }
    }
}

/// A breakout seen live, waiting for its interval to close.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingConfirmation {
    pub id: String,
    pub provider: String,
    pub symbol: String,
    pub direction: Direction,
    pub break_level: f64,
    pub trigger_price: f64,
    /// Epoch ms at which the triggering interval closes
    pub candle_close_ts: i64,
    pub triggered_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertDedupRecord {
    pub id: String,
    pub last_alert_time: DateTime<Utc>,
}
