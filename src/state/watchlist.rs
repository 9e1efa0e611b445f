use super::store::StateStore;
use super::{AlertDedupRecord, PendingConfirmation, WatchEntry};
use crate::error::Result;
use crate::metrics::PipelineMetrics;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use log::{debug, error, info, warn};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    pub watches_restored: usize,
    pub pending_restored: usize,
    pub alerts_restored: usize,
    pub expired_purged: usize,
    pub orphaned_purged: usize,
}

/// Shared in-memory tables for the three loops. Every mutation is mirrored to
/// the `StateStore`; a failed write is logged and counted, memory stays
/// authoritative.
///
/// Ids move `watches -> claimed -> pending` (or back to `watches` on release),
/// so an id is present in at most one of these maps at any time.
pub struct Watchlist {
    watches: DashMap<String, WatchEntry>,
    claimed: DashMap<String, WatchEntry>,
    pending: DashMap<String, PendingConfirmation>,
    alerts: DashMap<String, DateTime<Utc>>,
    store: Arc<dyn StateStore>,
    metrics: Arc<PipelineMetrics>,
}

impl Watchlist {
    pub fn new(store: Arc<dyn StateStore>, metrics: Arc<PipelineMetrics>) -> Self {
        Self {
            watches: DashMap::new(),
            claimed: DashMap::new(),
            pending: DashMap::new(),
            alerts: DashMap::new(),
            store,
            metrics,
        }
    }

    fn log_store_result(&self, op: &str, id: &str, result: Result<()>) {
        if let Err(e) = result {
            self.metrics.increment_persistence_errors();
            error!("State store {} failed for {}: {}", op, id, e);
        }
    }

    pub fn is_tracked(&self, id: &str) -> bool {
        self.watches.contains_key(id) || self.claimed.contains_key(id) || self.pending.contains_key(id)
    }

    pub fn watch_count(&self) -> usize {
        self.watches.len()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn claimed_count(&self) -> usize {
        self.claimed.len()
    }

    pub fn get_watch(&self, id: &str) -> Option<WatchEntry> {
        self.watches.get(id).map(|e| e.value().clone())
    }

    pub fn get_pending(&self, id: &str) -> Option<PendingConfirmation> {
        self.pending.get(id).map(|e| e.value().clone())
    }

    /// Adds a new watch. Returns false without touching anything if the id is
    /// already tracked in any table.
    pub async fn insert_watch(&self, entry: WatchEntry) -> bool {
        if self.claimed.contains_key(&entry.id) || self.pending.contains_key(&entry.id) {
            return false;
        }
        match self.watches.entry(entry.id.clone()) {
            Entry::Occupied(_) => return false,
            Entry::Vacant(slot) => {
                slot.insert(entry.clone());
            }
        }
        let result = self.store.upsert_watch(&entry).await;
        self.log_store_result("upsert_watch", &entry.id, result);
        true
    }

    /// Drops expired watches from memory and the store.
    pub async fn purge_expired(&self, now: DateTime<Utc>) -> Vec<String> {
        let expired: Vec<String> = self
            .watches
            .iter()
            .filter(|e| e.value().is_expired(now))
            .map(|e| e.key().clone())
            .collect();

        for id in &expired {
            self.watches.remove(id);
            let result = self.store.delete_watch(id).await;
            self.log_store_result("delete_watch", id, result);
        }
        if !expired.is_empty() {
            info!("⏰ Purged {} expired watch(es)", expired.len());
            self.metrics.add_watches_expired(expired.len() as u64);
        }
        expired
    }

    /// Unexpired, unclaimed watches.
    pub fn live_watches(&self, now: DateTime<Utc>) -> Vec<WatchEntry> {
        self.watches
            .iter()
            .filter(|e| !e.value().is_expired(now))
            .map(|e| e.value().clone())
            .collect()
    }

    /// Takes exclusive ownership of a watch for one check. The id stays
    /// tracked (in the claimed set) while it is out of the live table.
    pub fn claim_watch(&self, id: &str) -> Option<WatchEntry> {
        let entry = self.watches.get(id)?.value().clone();
        match self.claimed.entry(id.to_string()) {
            Entry::Occupied(_) => return None,
            Entry::Vacant(slot) => {
                slot.insert(entry.clone());
            }
        }
        self.watches.remove(id);
        Some(entry)
    }

    /// Returns a claimed watch to the live table unchanged.
    pub fn release_watch(&self, id: &str) {
        if let Some((_, entry)) = self.claimed.remove(id) {
            self.watches.insert(entry.id.clone(), entry);
        }
    }

    /// Removes a claimed watch for good.
    pub async fn discard_watch(&self, id: &str) {
        self.claimed.remove(id);
        self.watches.remove(id);
        let result = self.store.delete_watch(id).await;
        self.log_store_result("delete_watch", id, result);
    }

    /// Moves a claimed watch into the pending table.
    pub async fn promote(&self, pending: PendingConfirmation) {
        let id = pending.id.clone();
        self.pending.insert(id.clone(), pending.clone());
        self.claimed.remove(&id);
        self.watches.remove(&id);
        let result = self.store.promote(&pending).await;
        self.log_store_result("promote", &id, result);
    }

    pub fn pending_snapshot(&self) -> Vec<PendingConfirmation> {
        self.pending.iter().map(|e| e.value().clone()).collect()
    }

    pub async fn remove_pending(&self, id: &str) {
        self.pending.remove(id);
        let result = self.store.delete_pending(id).await;
        self.log_store_result("delete_pending", id, result);
    }

    /// True when no alert for `id` fired within `cooldown` of `now`.
    pub fn alert_allowed(&self, id: &str, now: DateTime<Utc>, cooldown: Duration) -> bool {
        let cooldown = match chrono::Duration::from_std(cooldown) {
            Ok(d) => d,
            Err(_) => return false,
        };
        match self.alerts.get(id) {
            Some(last) => now.signed_duration_since(*last.value()) >= cooldown,
            None => true,
        }
    }

    pub async fn record_alert(&self, id: &str, now: DateTime<Utc>) {
        self.alerts.insert(id.to_string(), now);
        let record = AlertDedupRecord {
            id: id.to_string(),
            last_alert_time: now,
        };
        let result = self.store.upsert_alert(&record).await;
        self.log_store_result("upsert_alert", id, result);
    }

    /// Repopulates memory from the store after a restart. Expired watches,
    /// rows for providers that are no longer configured, and watches that
    /// already have a pending row are removed from the store as well.
    pub async fn recover(&self, now: DateTime<Utc>, known_providers: &[String]) -> Result<RecoveryReport> {
        let known: HashSet<&str> = known_providers.iter().map(String::as_str).collect();
        let mut report = RecoveryReport::default();

        for pending in self.store.load_pending().await? {
            if !known.contains(pending.provider.as_str()) {
                warn!("Dropping pending {} for unconfigured provider", pending.id);
                let result = self.store.delete_pending(&pending.id).await;
                self.log_store_result("delete_pending", &pending.id, result);
                report.orphaned_purged += 1;
                continue;
            }
            self.pending.insert(pending.id.clone(), pending);
            report.pending_restored += 1;
        }

        for watch in self.store.load_watches().await? {
            let stale = if watch.is_expired(now) {
                report.expired_purged += 1;
                true
            } else if !known.contains(watch.provider.as_str()) || self.pending.contains_key(&watch.id) {
                report.orphaned_purged += 1;
                true
            } else {
                false
            };

            if stale {
                debug!("Discarding stored watch {}", watch.id);
                let result = self.store.delete_watch(&watch.id).await;
                self.log_store_result("delete_watch", &watch.id, result);
                continue;
            }
            self.watches.insert(watch.id.clone(), watch);
            report.watches_restored += 1;
        }

        for record in self.store.load_alerts().await? {
            self.alerts.insert(record.id, record.last_alert_time);
            report.alerts_restored += 1;
        }

        info!(
            "♻️ Recovered {} watch(es), {} pending, {} alert record(s); purged {} expired, {} orphaned",
            report.watches_restored,
            report.pending_restored,
            report.alerts_restored,
            report.expired_purged,
            report.orphaned_purged
        );
        Ok(report)
    }
}
