use crate::api::executor::RequestExecutor;
use crate::market::Timeframe;
use crate::metrics::PipelineMetrics;
use crate::notify::format::{confirmation_digest, ConfirmedBreakout};
use crate::notify::{DisplayClock, NotificationSink};
use crate::state::{Direction, PendingConfirmation, Watchlist};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use log::{debug, info, warn};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ConfirmationSettings {
    pub period: Duration,
    pub min_sleep: Duration,
    pub timeframe: Timeframe,
    /// Wait past the close so the provider has finalized the bar
    pub safety_buffer: Duration,
    pub alert_cooldown: Duration,
}

impl Default for ConfirmationSettings {
    fn default() -> Self {
        Self {
            period: Duration::from_secs(60),
            min_sleep: Duration::from_secs(1),
            timeframe: Timeframe::H1,
            safety_buffer: Duration::from_secs(60),
            alert_cooldown: Duration::from_secs(3600),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConfirmationOutcome {
    NotDue,
    /// Kept for the next cycle
    FetchFailed,
    TimestampMismatch { expected: i64, got: i64 },
    Confirmed { close: f64, alerted: bool },
    FalseBreakout { close: f64 },
}

pub fn is_confirmed(direction: Direction, break_level: f64, close: f64) -> bool {
    match direction {
        Direction::Up => close > break_level,
        Direction::Down => close < break_level,
    }
}

pub struct ConfirmationScheduler {
    executor: Arc<RequestExecutor>,
    watchlist: Arc<Watchlist>,
    sink: Arc<dyn NotificationSink>,
    metrics: Arc<PipelineMetrics>,
    settings: ConfirmationSettings,
    clock: DisplayClock,
}

impl ConfirmationScheduler {
    pub fn new(
        executor: Arc<RequestExecutor>,
        watchlist: Arc<Watchlist>,
        sink: Arc<dyn NotificationSink>,
        metrics: Arc<PipelineMetrics>,
        settings: ConfirmationSettings,
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

    pub fn settings(&self) -> &ConfirmationSettings {
        &self.settings
    }

    fn is_due(&self, pending: &PendingConfirmation, now: DateTime<Utc>) -> bool {
        let buffer = self.settings.safety_buffer.as_millis() as i64;
        now.timestamp_millis() >= pending.candle_close_ts + buffer
    }

    /// Checks every due pending entry; confirmed breakouts that pass the
    /// dedup cooldown go out as one digest alert.
    pub async fn run_cycle(&self, now: DateTime<Utc>) -> Vec<(String, ConfirmationOutcome)> {
        let due: Vec<PendingConfirmation> = self
            .watchlist
            .pending_snapshot()
            .into_iter()
            .filter(|p| self.is_due(p, now))
            .collect();
        if due.is_empty() {
            return Vec::new();
        }
        debug!("🔍 {} pending confirmation(s) due", due.len());

        let outcomes = join_all(due.iter().map(|p| self.check_pending(p, now))).await;

        let digest: Vec<ConfirmedBreakout> = due
            .iter()
            .zip(outcomes.iter())
            .filter_map(|(pending, outcome)| match outcome {
                ConfirmationOutcome::Confirmed { close, alerted: true } => Some(ConfirmedBreakout {
                    pending: pending.clone(),
                    close: *close,
                }),
                _ => None,
            })
            .collect();
        if !digest.is_empty() {
            info!("✅ Sending confirmation digest with {} breakout(s)", digest.len());
            self.sink.enqueue(confirmation_digest(&digest, &self.clock));
        }

        due.into_iter().map(|p| p.id).zip(outcomes).collect()
    }

    pub async fn check_pending(&self, pending: &PendingConfirmation, now: DateTime<Utc>) -> ConfirmationOutcome {
        if !self.is_due(pending, now) {
            return ConfirmationOutcome::NotDue;
        }

        let interval = self.settings.timeframe.as_millis();
        let expected = pending.candle_close_ts - interval;
        let candle = match self
            .executor
            .fetch_candles_since(&pending.provider, &pending.symbol, self.settings.timeframe, expected, 1)
            .await
            .and_then(|candles| candles.into_iter().next())
        {
            Some(candle) => candle,
            None => {
                debug!("{}: closed candle not available yet, keeping", pending.id);
                return ConfirmationOutcome::FetchFailed;
            }
        };

        if candle.open_time != expected {
            warn!(
                "{}: expected candle {} but provider returned {}, discarding",
                pending.id, expected, candle.open_time
            );
            self.metrics.increment_timestamp_mismatches();
            self.watchlist.remove_pending(&pending.id).await;
            return ConfirmationOutcome::TimestampMismatch {
                expected,
                got: candle.open_time,
            };
        }

        let close = candle.close;
        self.watchlist.remove_pending(&pending.id).await;

        if !is_confirmed(pending.direction, pending.break_level, close) {
            self.metrics.increment_false_breakouts();
            info!(
                "❌ {} false breakout: {} close {} vs level {}",
                pending.id, pending.direction, close, pending.break_level
            );
            return ConfirmationOutcome::FalseBreakout { close };
        }

        self.metrics.increment_confirmations();
        let alerted = self
            .watchlist
            .alert_allowed(&pending.id, now, self.settings.alert_cooldown);
        if alerted {
            self.watchlist.record_alert(&pending.id, now).await;
        } else {
            self.metrics.increment_alerts_suppressed();
            info!("🔕 {} confirmed inside alert cooldown, not re-alerting", pending.id);
        }
        info!(
            "✅ {} confirmed: {} close {} vs level {}",
            pending.id, pending.direction, close, pending.break_level
        );
        ConfirmationOutcome::Confirmed { close, alerted }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confirmation_rule() {
        assert!(is_confirmed(Direction::Up, 110.0, 110.5));
        assert!(!is_confirmed(Direction::Up, 110.0, 110.0));
        assert!(!is_confirmed(Direction::Up, 110.0, 108.0));
        assert!(is_confirmed(Direction::Down, 100.0, 99.0));
        assert!(!is_confirmed(Direction::Down, 100.0, 100.0));
    }
}
