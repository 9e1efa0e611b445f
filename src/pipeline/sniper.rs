//! Breakout detection against the live watchlist.
//!
//! Each entry is claimed before anything is awaited, so no other check can
//! touch it while its price and gate candles are in flight. The claim ends in
//! exactly one of: release (no signal, or data missing), discard (base no
//! longer quiet), or promotion to the pending-confirmation table.

use crate::api::executor::RequestExecutor;
use crate::market::{Candle, Timeframe};
use crate::metrics::PipelineMetrics;
use crate::notify::format::breakout_alert;
use crate::notify::{DisplayClock, NotificationSink};
use crate::state::{Direction, PendingConfirmation, WatchEntry, Watchlist};
use crate::utils::next_interval_boundary;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct SniperSettings {
    pub period: Duration,
    pub min_sleep: Duration,
    pub gate_timeframe: Timeframe,
    /// Recent bars fetched for the volatility gate
    pub gate_window: usize,
    /// Newest bars left out of the gate (they contain the breakout itself)
    pub gate_exclude_recent: usize,
    pub gate_min_bars: usize,
    pub gate_factor: f64,
    pub confirm_timeframe: Timeframe,
}

impl Default for SniperSettings {
    fn default() -> Self {
        Self {
            period: Duration::from_secs(60),
            min_sleep: Duration::from_secs(1),
            gate_timeframe: Timeframe::H1,
            gate_window: 12,
            gate_exclude_recent: 3,
            gate_min_bars: 5,
            gate_factor: 1.2,
            confirm_timeframe: Timeframe::H1,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SnipeOutcome {
    /// Someone else holds the id
    NotClaimed,
    FetchFailed,
    Inside { price: f64 },
    GateInsufficient { bars: usize },
    BaseDestabilized { recent: f64, base: f64 },
    Triggered(PendingConfirmation),
}

/// Bars used for the gate: drop the newest `gate_exclude_recent`, and look
/// back no further than `gate_window - 2` bars from the end.
pub fn gate_bars<'a>(candles: &'a [Candle], settings: &SniperSettings) -> &'a [Candle] {
    let len = candles.len();
    let start = len.saturating_sub(settings.gate_window.saturating_sub(2));
    let end = len.saturating_sub(settings.gate_exclude_recent);
    if start >= end {
        return &[];
    }
    &candles[start..end]
}

pub fn breakout_direction(entry: &WatchEntry, price: f64) -> Option<(Direction, f64)> {
    if price > entry.range_high {
        Some((Direction::Up, entry.range_high))
    } else if price < entry.range_low {
        Some((Direction::Down, entry.range_low))
    } else {
        None
    }
}

pub struct BreakoutDetector {
    executor: Arc<RequestExecutor>,
    watchlist: Arc<Watchlist>,
    sink: Arc<dyn NotificationSink>,
    metrics: Arc<PipelineMetrics>,
    settings: SniperSettings,
    clock: DisplayClock,
}

impl BreakoutDetector {
    pub fn new(
        executor: Arc<RequestExecutor>,
        watchlist: Arc<Watchlist>,
        sink: Arc<dyn NotificationSink>,
        metrics: Arc<PipelineMetrics>,
        settings: SniperSettings,
        clock: DisplayClock,
    ) -> Self {
        Self {
            executor,
            watchlist,
            sink,
            metrics,
            settings,
            clock,
        }
    }

    pub fn settings(&self) -> &SniperSettings {
        &self.settings
    }

    /// Purges expired watches, then checks every live entry concurrently.
    pub async fn run_cycle(&self, now: DateTime<Utc>) -> Vec<SnipeOutcome> {
        self.watchlist.purge_expired(now).await;

        let live = self.watchlist.live_watches(now);
        if live.is_empty() {
            return Vec::new();
        }
        debug!("🎯 Sniper checking {} watch(es)", live.len());

        let outcomes = join_all(live.iter().map(|entry| self.check_entry(&entry.id, now))).await;
        let triggered = outcomes
            .iter()
            .filter(|o| matches!(o, SnipeOutcome::Triggered(_)))
            .count();
        if triggered > 0 {
            info!("🎯 Sniper cycle: {} breakout(s) moved to confirmation", triggered);
        }
        outcomes
    }

    pub async fn check_entry(&self, id: &str, now: DateTime<Utc>) -> SnipeOutcome {
        let entry = match self.watchlist.claim_watch(id) {
            Some(entry) => entry,
            None => return SnipeOutcome::NotClaimed,
        };

        let outcome = self.evaluate(&entry, now).await;
        match &outcome {
            SnipeOutcome::Triggered(pending) => {
                self.sink.enqueue(breakout_alert(pending, &self.clock));
                self.watchlist.promote(pending.clone()).await;
            }
            SnipeOutcome::BaseDestabilized { .. } => {
                self.watchlist.discard_watch(&entry.id).await;
            }
            _ => self.watchlist.release_watch(&entry.id),
        }
        outcome
    }

    async fn evaluate(&self, entry: &WatchEntry, now: DateTime<Utc>) -> SnipeOutcome {
        let ticker = match self.executor.fetch_ticker(&entry.provider, &entry.symbol).await {
            Some(ticker) => ticker,
            None => return SnipeOutcome::FetchFailed,
        };
        let price = ticker.last;
        let (direction, break_level) = match breakout_direction(entry, price) {
            Some(signal) => signal,
            None => return SnipeOutcome::Inside { price },
        };
        self.metrics.increment_breakouts_detected();
        info!("⚡ {} {} through {} at {}", entry.id, direction, break_level, price);

        let candles = match self
            .executor
            .fetch_recent_candles(
                &entry.provider,
                &entry.symbol,
                self.settings.gate_timeframe,
                self.settings.gate_window,
            )
            .await
        {
            Some(candles) => candles,
            None => return SnipeOutcome::FetchFailed,
        };

        let bars = gate_bars(&candles, &self.settings);
        if bars.len() < self.settings.gate_min_bars {
            warn!("{}: only {} gate bar(s), retrying next cycle", entry.id, bars.len());
            return SnipeOutcome::GateInsufficient { bars: bars.len() };
        }
        let recent = bars.iter().map(Candle::range).sum::<f64>() / bars.len() as f64;
        if recent > entry.base_volatility * self.settings.gate_factor {
            self.metrics.increment_base_destabilized();
            info!(
                "🌪️ {} discarded: pre-breakout volatility {:.6} > {:.1}x base {:.6}",
                entry.id, recent, self.settings.gate_factor, entry.base_volatility
            );
            return SnipeOutcome::BaseDestabilized {
                recent,
                base: entry.base_volatility,
            };
        }

        let interval = self.settings.confirm_timeframe.as_millis();
        SnipeOutcome::Triggered(PendingConfirmation {
            id: entry.id.clone(),
            provider: entry.provider.clone(),
            symbol: entry.symbol.clone(),
            direction,
            break_level,
            trigger_price: price,
            candle_close_ts: next_interval_boundary(now.timestamp_millis(), interval),
            triggered_at: now,
        })
    }
}
