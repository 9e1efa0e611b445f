use crate::error::ErrorCategory;
use dashmap::DashMap;
use log::info;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Process-wide pipeline counters, shared by every stage.
pub struct PipelineMetrics {
    started_at: Instant,
    // API
    api_calls: AtomicU64,
    api_successes: AtomicU64,
    api_failures: AtomicU64,
    api_retries: AtomicU64,
    failures_by_category: DashMap<ErrorCategory, u64>,
    // Radar / analysis
    radar_cycles: AtomicU64,
    targets_discovered: AtomicU64,
    symbols_analyzed: AtomicU64,
    watches_created: AtomicU64,
    watches_expired: AtomicU64,
    // Sniper
    breakouts_detected: AtomicU64,
    base_destabilized: AtomicU64,
    // Confirmation
    confirmations: AtomicU64,
    false_breakouts: AtomicU64,
    timestamp_mismatches: AtomicU64,
    alerts_suppressed: AtomicU64,
    persistence_errors: AtomicU64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricsSnapshot {
    pub api_calls: u64,
    pub api_successes: u64,
    pub api_failures: u64,
    pub api_retries: u64,
    pub radar_cycles: u64,
    pub targets_discovered: u64,
    pub symbols_analyzed: u64,
    pub watches_created: u64,
    pub watches_expired: u64,
    pub breakouts_detected: u64,
    pub base_destabilized: u64,
    pub confirmations: u64,
    pub false_breakouts: u64,
    pub timestamp_mismatches: u64,
    pub alerts_suppressed: u64,
    pub persistence_errors: u64,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            api_calls: AtomicU64::new(0),
            api_successes: AtomicU64::new(0),
            api_failures: AtomicU64::new(0),
            api_retries: AtomicU64::new(0),
            failures_by_category: DashMap::new(),
            radar_cycles: AtomicU64::new(0),
            targets_discovered: AtomicU64::new(0),
            symbols_analyzed: AtomicU64::new(0),
            watches_created: AtomicU64::new(0),
            watches_expired: AtomicU64::new(0),
            breakouts_detected: AtomicU64::new(0),
            base_destabilized: AtomicU64::new(0),
            confirmations: AtomicU64::new(0),
            false_breakouts: AtomicU64::new(0),
            timestamp_mismatches: AtomicU64::new(0),
            alerts_suppressed: AtomicU64::new(0),
            persistence_errors: AtomicU64::new(0),
        }
    }

    pub fn record_api_success(&self) {
        self.api_calls.fetch_add(1, Ordering::Relaxed);
        self.api_successes.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_api_failure(&self, category: ErrorCategory) {
        self.api_calls.fetch_add(1, Ordering::Relaxed);
        self.api_failures.fetch_add(1, Ordering::Relaxed);
        *self.failures_by_category.entry(category).or_insert(0) += 1;
    }

    pub fn increment_api_retries(&self) {
        self.api_retries.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_radar_cycles(&self) {
        self.radar_cycles.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_targets_discovered(&self, n: u64) {
        self.targets_discovered.fetch_add(n, Ordering::Relaxed);
    }

    pub fn increment_symbols_analyzed(&self) {
        self.symbols_analyzed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_watches_created(&self) {
        self.watches_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_watches_expired(&self, n: u64) {
        self.watches_expired.fetch_add(n, Ordering::Relaxed);
    }

    pub fn increment_breakouts_detected(&self) {
        self.breakouts_detected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_base_destabilized(&self) {
        self.base_destabilized.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_confirmations(&self) {
        self.confirmations.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_false_breakouts(&self) {
        self.false_breakouts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_timestamp_mismatches(&self) {
        self.timestamp_mismatches.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_alerts_suppressed(&self) {
        self.alerts_suppressed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_persistence_errors(&self) {
        self.persistence_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn failures_in(&self, category: ErrorCategory) -> u64 {
        self.failures_by_category.get(&category).map(|v| *v).unwrap_or(0)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            api_calls: self.api_calls.load(Ordering::Relaxed),
            api_successes: self.api_successes.load(Ordering::Relaxed),
            api_failures: self.api_failures.load(Ordering::Relaxed),
            api_retries: self.api_retries.load(Ordering::Relaxed),
            radar_cycles: self.radar_cycles.load(Ordering::Relaxed),
            targets_discovered: self.targets_discovered.load(Ordering::Relaxed),
            symbols_analyzed: self.symbols_analyzed.load(Ordering::Relaxed),
            watches_created: self.watches_created.load(Ordering::Relaxed),
            watches_expired: self.watches_expired.load(Ordering::Relaxed),
            breakouts_detected: self.breakouts_detected.load(Ordering::Relaxed),
            base_destabilized: self.base_destabilized.load(Ordering::Relaxed),
            confirmations: self.confirmations.load(Ordering::Relaxed),
            false_breakouts: self.false_breakouts.load(Ordering::Relaxed),
            timestamp_mismatches: self.timestamp_mismatches.load(Ordering::Relaxed),
            alerts_suppressed: self.alerts_suppressed.load(Ordering::Relaxed),
            persistence_errors: self.persistence_errors.load(Ordering::Relaxed),
        }
    }

    pub fn log_summary(&self) {
        let s = self.snapshot();
        let uptime = self.started_at.elapsed().as_secs();
        let success_rate = if s.api_calls > 0 {
            s.api_successes as f64 / s.api_calls as f64 * 100.0
        } else {
            100.0
        };

        info!("📊 Pipeline summary (uptime {}h{:02}m)", uptime / 3600, (uptime % 3600) / 60);
        info!(
            "   API: {} calls | {:.1}% ok | {} failed | {} retries",
            s.api_calls, success_rate, s.api_failures, s.api_retries
        );
        if s.api_failures > 0 {
            let breakdown: Vec<String> = self
                .failures_by_category
                .iter()
                .map(|entry| format!("{}={}", entry.key(), entry.value()))
                .collect();
            info!("   Failures: {}", breakdown.join(", "));
        }
        info!(
            "   Radar: {} cycles | {} targets | {} analyzed | {} watches created | {} expired",
            s.radar_cycles, s.targets_discovered, s.symbols_analyzed, s.watches_created, s.watches_expired
        );
        info!(
            "   Breakouts: {} detected | {} base destabilized | {} confirmed | {} false | {} mismatched",
            s.breakouts_detected, s.base_destabilized, s.confirmations, s.false_breakouts, s.timestamp_mismatches
        );
        info!(
            "   Alerts suppressed: {} | Persistence errors: {}",
            s.alerts_suppressed, s.persistence_errors
        );
    }
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_failure_breakdown_by_category() {
        let metrics = PipelineMetrics::new();
        metrics.record_api_success();
        metrics.record_api_failure(ErrorCategory::RateLimited);
        metrics.record_api_failure(ErrorCategory::RateLimited);
        metrics.record_api_failure(ErrorCategory::Logic);

        let s = metrics.snapshot();
        assert_eq!(s.api_calls, 4);
        assert_eq!(s.api_failures, 3);
        assert_eq!(metrics.failures_in(ErrorCategory::RateLimited), 2);
        assert_eq!(metrics.failures_in(ErrorCategory::Persistence), 0);
    }
}
