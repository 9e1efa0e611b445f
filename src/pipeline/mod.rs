//! Coordinator owning the shared state and the three long-running loops:
//! radar (discovery + structure analysis), sniper and confirmation.

pub mod confirmation;
pub mod sniper;

pub use confirmation::{ConfirmationOutcome, ConfirmationScheduler};
pub use sniper::{BreakoutDetector, SnipeOutcome};

use crate::analysis::structure::StructureAnalyzer;
use crate::api::concurrency::AdaptiveConcurrencyController;
use crate::api::executor::RequestExecutor;
use crate::config::Config;
use crate::discovery::radar::Radar;
use crate::error::Result;
use crate::market::ClientRegistry;
use crate::metrics::PipelineMetrics;
use crate::notify::{DisplayClock, NotificationSink};
use crate::state::{RecoveryReport, StateStore, Watchlist};
use crate::utils::remaining_sleep;
use chrono::{DateTime, Utc};
use log::{error, info};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;

pub struct Pipeline {
    config: Arc<Config>,
    executor: Arc<RequestExecutor>,
    watchlist: Arc<Watchlist>,
    metrics: Arc<PipelineMetrics>,
    radar: Radar,
    analyzer: StructureAnalyzer,
    sniper: BreakoutDetector,
    confirmation: ConfirmationScheduler,
}

/// Sleeps for `duration` unless shutdown is signalled first. Returns true
/// when the caller should stop.
async fn sleep_or_shutdown(duration: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    if *shutdown.borrow() {
        return true;
    }
    tokio::select! {
        _ = tokio::time::sleep(duration) => false,
        changed = shutdown.changed() => changed.is_err() || *shutdown.borrow(),
    }
}

impl Pipeline {
    pub fn new(
        config: Arc<Config>,
        clients: ClientRegistry,
        store: Arc<dyn StateStore>,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        let metrics = Arc::new(PipelineMetrics::new());
        let controller = Arc::new(AdaptiveConcurrencyController::new(config.controller.clone()));
        let executor = Arc::new(RequestExecutor::new(
            clients,
            controller,
            &config.dedicated_providers,
            config.dedicated_pool_size,
            config.retry.clone(),
            metrics.clone(),
        ));
        let watchlist = Arc::new(Watchlist::new(store, metrics.clone()));
        let clock = DisplayClock::with_offset_hours(config.display_utc_offset_hours);

        Self {
            radar: Radar::new(executor.clone(), config.tiers.clone(), metrics.clone()),
            analyzer: StructureAnalyzer::new(
                executor.clone(),
                watchlist.clone(),
                sink.clone(),
                metrics.clone(),
                config.structure.clone(),
                config.analyzer.clone(),
            ),
            sniper: BreakoutDetector::new(
                executor.clone(),
                watchlist.clone(),
                sink.clone(),
                metrics.clone(),
                config.sniper.clone(),
                clock,
            ),
            confirmation: ConfirmationScheduler::new(
                executor.clone(),
                watchlist.clone(),
                sink,
                metrics.clone(),
                config.confirmation.clone(),
                clock,
            ),
            config,
            executor,
            watchlist,
            metrics,
        }
    }

    pub fn watchlist(&self) -> &Arc<Watchlist> {
        &self.watchlist
    }

    pub fn metrics(&self) -> &Arc<PipelineMetrics> {
        &self.metrics
    }

    pub fn executor(&self) -> &Arc<RequestExecutor> {
        &self.executor
    }

    pub fn sniper(&self) -> &BreakoutDetector {
        &self.sniper
    }

    pub fn confirmation(&self) -> &ConfirmationScheduler {
        &self.confirmation
    }

    /// Reloads persisted state; must run before the loops start.
    pub async fn recover(&self, now: DateTime<Utc>) -> Result<RecoveryReport> {
        self.watchlist.recover(now, &self.executor.providers()).await
    }

    /// One discovery pass followed by structure analysis of every target.
    pub async fn run_radar_cycle(&self, now: DateTime<Utc>) -> usize {
        self.metrics.increment_radar_cycles();
        let targets = self.radar.discover().await;
        self.analyzer.analyze_targets(&targets, now).await
    }

    pub fn log_status(&self) {
        self.metrics.log_summary();
        info!("   {}", self.executor.controller().stats());
        info!(
            "   Watchlist: {} watching | {} claimed | {} pending confirmation",
            self.watchlist.watch_count(),
            self.watchlist.claimed_count(),
            self.watchlist.pending_count()
        );
    }

    /// Time to wait before the next radar cycle, given how long this one took.
    pub fn radar_sleep(&self, elapsed: Duration) -> Duration {
        remaining_sleep(
            Duration::from_secs(self.config.radar_interval_secs),
            elapsed,
            Duration::from_secs(self.config.radar_min_sleep_secs),
        )
    }

    async fn radar_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        loop {
            let started = Instant::now();
            info!("🛰️ Radar cycle starting");
            let created = self.run_radar_cycle(Utc::now()).await;
            info!(
                "🛰️ Radar cycle done in {:.1}s, {} new watch(es)",
                started.elapsed().as_secs_f64(),
                created
            );

            if sleep_or_shutdown(self.radar_sleep(started.elapsed()), &mut shutdown).await {
                break;
            }
        }
        info!("🛰️ Radar loop stopped");
    }

    async fn sniper_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let settings = self.sniper.settings().clone();
        loop {
            let started = Instant::now();
            self.sniper.run_cycle(Utc::now()).await;
            if sleep_or_shutdown(
                remaining_sleep(settings.period, started.elapsed(), settings.min_sleep),
                &mut shutdown,
            )
            .await
            {
                break;
            }
        }
        info!("🎯 Sniper loop stopped");
    }

    async fn confirmation_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let settings = self.confirmation.settings().clone();
        loop {
            let started = Instant::now();
            self.confirmation.run_cycle(Utc::now()).await;
            if sleep_or_shutdown(
                remaining_sleep(settings.period, started.elapsed(), settings.min_sleep),
                &mut shutdown,
            )
            .await
            {
                break;
            }
        }
        info!("🔍 Confirmation loop stopped");
    }

    async fn status_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let period = Duration::from_secs(self.config.metrics_log_interval_secs);
        while !sleep_or_shutdown(period, &mut shutdown).await {
            self.log_status();
        }
    }

    /// Runs the three loops until `shutdown` flips to true. Each loop finishes
    /// its current cycle before exiting.
    pub async fn run(self: Arc<Self>, shutdown: watch::Receiver<bool>) {
        info!(
            "🚀 Pipeline running with {} provider(s): {:?}",
            self.executor.providers().len(),
            self.executor.providers()
        );
        let radar = tokio::spawn(self.clone().radar_loop(shutdown.clone()));
        let sniper = tokio::spawn(self.clone().sniper_loop(shutdown.clone()));
        let confirmation = tokio::spawn(self.clone().confirmation_loop(shutdown.clone()));
        let status = tokio::spawn(self.clone().status_loop(shutdown));

        let (radar, sniper, confirmation, status) = tokio::join!(radar, sniper, confirmation, status);
        for (name, result) in [
            ("radar", radar),
            ("sniper", sniper),
            ("confirmation", confirmation),
            ("status", status),
        ] {
            if let Err(e) = result {
                error!("{} loop ended abnormally: {}", name, e);
            }
        }
        self.log_status();
    }
}
