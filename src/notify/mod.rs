//! Alert delivery. Pipeline stages call `NotificationSink::enqueue`, which
//! never blocks; an `AlertDispatcher` task drains the queue in batches and
//! hands each alert to an `AlertTransport`.

pub mod format;
pub mod transport;

pub use format::DisplayClock;
pub use transport::{AlertTransport, LogTransport, WebhookTransport};

use log::{debug, error, info, warn};
use serde::Serialize;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TryRecvError};

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    pub subject: String,
    pub body: String,
    /// Body is markup (HTML) rather than plain text
    pub is_structured: bool,
}

impl Alert {
    pub fn plain(subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            body: body.into(),
            is_structured: false,
        }
    }

    pub fn structured(subject: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            subject: subject.into(),
            body: body.into(),
            is_structured: true,
        }
    }
}

pub trait NotificationSink: Send + Sync {
    fn enqueue(&self, alert: Alert);
}

#[derive(Debug, Clone)]
pub struct AlertQueueSettings {
    pub batch_size: usize,
    pub batch_interval: Duration,
    pub max_retries: u32,
}

impl Default for AlertQueueSettings {
    fn default() -> Self {
        Self {
            batch_size: 5,
            batch_interval: Duration::from_secs(10),
            max_retries: 3,
        }
    }
}

#[derive(Debug, Default)]
pub struct AlertStats {
    queued: AtomicU64,
    sent: AtomicU64,
    failed: AtomicU64,
    retried: AtomicU64,
    dropped: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AlertStatsSnapshot {
    pub queued: u64,
    pub sent: u64,
    pub failed: u64,
    pub retried: u64,
    pub dropped: u64,
}

impl AlertStats {
    pub fn snapshot(&self) -> AlertStatsSnapshot {
        AlertStatsSnapshot {
            queued: self.queued.load(Ordering::Relaxed),
            sent: self.sent.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

impl fmt::Display for AlertStatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Alerts: {} queued | {} sent | {} failed | {} retried | {} dropped",
            self.queued, self.sent, self.failed, self.retried, self.dropped
        )
    }
}

#[derive(Debug)]
struct QueuedAlert {
    alert: Alert,
    attempts: u32,
}

/// Producer side, cheap to clone.
#[derive(Clone)]
pub struct AlertQueue {
    tx: mpsc::UnboundedSender<QueuedAlert>,
    stats: Arc<AlertStats>,
}

impl AlertQueue {
    pub fn stats(&self) -> AlertStatsSnapshot {
        self.stats.snapshot()
    }
}

impl NotificationSink for AlertQueue {
    fn enqueue(&self, alert: Alert) {
        debug!("Queueing alert '{}'", alert.subject);
        match self.tx.send(QueuedAlert { alert, attempts: 0 }) {
            Ok(()) => {
                self.stats.queued.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                self.stats.dropped.fetch_add(1, Ordering::Relaxed);
                warn!("Alert dispatcher stopped, dropping '{}'", e.0.alert.subject);
            }
        }
    }
}

pub struct AlertDispatcher {
    rx: mpsc::UnboundedReceiver<QueuedAlert>,
    transport: Arc<dyn AlertTransport>,
    settings: AlertQueueSettings,
    stats: Arc<AlertStats>,
}

/// Creates the queue handle and the dispatcher that drains it.
pub fn alert_channel(
    settings: AlertQueueSettings,
    transport: Arc<dyn AlertTransport>,
) -> (AlertQueue, AlertDispatcher) {
    let (tx, rx) = mpsc::unbounded_channel();
    let stats = Arc::new(AlertStats::default());
    (
        AlertQueue {
            tx,
            stats: stats.clone(),
        },
        AlertDispatcher {
            rx,
            transport,
            settings,
            stats,
        },
    )
}

impl AlertDispatcher {
    /// Runs until every `AlertQueue` handle is dropped and the backlog is
    /// delivered or has exhausted its retries.
    pub async fn run(mut self) {
        info!("📨 Alert dispatcher started (transport: {})", self.transport.name());
        let mut backlog: VecDeque<QueuedAlert> = VecDeque::new();
        let mut closed = false;

        loop {
            if backlog.is_empty() && !closed {
                match self.rx.recv().await {
                    Some(queued) => backlog.push_back(queued),
                    None => closed = true,
                }
            }
            while !closed {
                match self.rx.try_recv() {
                    Ok(queued) => backlog.push_back(queued),
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => closed = true,
                }
            }
            if backlog.is_empty() {
                if closed {
                    break;
                }
                continue;
            }

            let take = self.settings.batch_size.max(1).min(backlog.len());
            let batch: Vec<QueuedAlert> = backlog.drain(..take).collect();
            for mut queued in batch {
                match self.transport.deliver(&queued.alert).await {
                    Ok(()) => {
                        self.stats.sent.fetch_add(1, Ordering::Relaxed);
                        debug!("Alert '{}' delivered", queued.alert.subject);
                    }
                    Err(e) => {
                        queued.attempts += 1;
                        if queued.attempts < self.settings.max_retries {
                            self.stats.retried.fetch_add(1, Ordering::Relaxed);
                            warn!(
                                "Alert '{}' failed (attempt {}/{}): {}, re-queued",
                                queued.alert.subject, queued.attempts, self.settings.max_retries, e
                            );
                            backlog.push_back(queued);
                        } else {
                            self.stats.failed.fetch_add(1, Ordering::Relaxed);
                            error!(
                                "Alert '{}' abandoned after {} attempts: {}",
                                queued.alert.subject, queued.attempts, e
                            );
                        }
                    }
                }
            }

            if !backlog.is_empty() {
                tokio::time::sleep(self.settings.batch_interval).await;
            }
        }

        info!("📨 Alert dispatcher stopped. {}", self.stats.snapshot());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Result, ScanError};
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;

    /// Fails the first `failures` deliveries, then records everything.
    struct FlakyTransport {
        failures: AtomicU64,
        delivered: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl AlertTransport for FlakyTransport {
        fn name(&self) -> &str {
            "flaky"
        }

        async fn deliver(&self, alert: &Alert) -> Result<()> {
            if self.failures.load(Ordering::SeqCst) > 0 {
                self.failures.fetch_sub(1, Ordering::SeqCst);
                return Err(ScanError::Notification("smtp down".into()));
            }
            self.delivered.lock().unwrap().push(alert.subject.clone());
            Ok(())
        }
    }

    fn fast_settings() -> AlertQueueSettings {
        AlertQueueSettings {
            batch_size: 2,
            batch_interval: Duration::from_millis(1),
            max_retries: 3,
        }
    }

    #[tokio::test]
    async fn test_dispatcher_drains_all_alerts_on_close() {
        let transport = Arc::new(FlakyTransport {
            failures: AtomicU64::new(0),
            delivered: Mutex::new(Vec::new()),
        });
        let (queue, dispatcher) = alert_channel(fast_settings(), transport.clone());
        for i in 0..5 {
            queue.enqueue(Alert::plain(format!("a{}", i), "body"));
        }
        let stats = queue.stats.clone();
        drop(queue);
        dispatcher.run().await;

        assert_eq!(transport.delivered.lock().unwrap().len(), 5);
        assert_eq!(stats.snapshot().sent, 5);
    }

    #[tokio::test]
    async fn test_failed_delivery_is_retried_then_abandoned() {
        let transport = Arc::new(FlakyTransport {
            failures: AtomicU64::new(4),
            delivered: Mutex::new(Vec::new()),
        });
        let (queue, dispatcher) = alert_channel(fast_settings(), transport.clone());
        queue.enqueue(Alert::plain("first", "x"));
        queue.enqueue(Alert::plain("second", "y"));
        let stats = queue.stats.clone();
        drop(queue);
        dispatcher.run().await;

        // attempts: first, second (fail, fail), first, second (fail, fail), first, second (ok, ok)
        let snapshot = stats.snapshot();
        assert_eq!(snapshot.sent, 2);
        assert_eq!(snapshot.retried, 4);
        assert_eq!(snapshot.failed, 0);
    }

    #[tokio::test]
    async fn test_enqueue_after_dispatcher_gone_is_dropped() {
        let (queue, dispatcher) = alert_channel(fast_settings(), Arc::new(LogTransport));
        drop(dispatcher);
        queue.enqueue(Alert::plain("late", "x"));
        assert_eq!(queue.stats().dropped, 1);
    }
}
