use super::store::StateStore;
use super::{AlertDedupRecord, PendingConfirmation, WatchEntry};
use crate::error::{Result, ScanError};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};

/// Process-local store. Used when no Redis URL is configured and in tests,
/// where `set_fail_writes` simulates an unavailable backend.
#[derive(Debug, Default)]
pub struct MemoryStateStore {
    watches: DashMap<String, WatchEntry>,
    pending: DashMap<String, PendingConfirmation>,
    alerts: DashMap<String, AlertDedupRecord>,
    fail_writes: AtomicBool,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(ScanError::Persistence("memory store is read-only".to_string()));
        }
        Ok(())
    }

    pub fn watch_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.watches.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn pending_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.pending.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn upsert_watch(&self, entry: &WatchEntry) -> Result<()> {
        self.check_writable()?;
        self.watches.insert(entry.id.clone(), entry.clone());
        Ok(())
    }

    async fn delete_watch(&self, id: &str) -> Result<()> {
        self.check_writable()?;
        self.watches.remove(id);
        Ok(())
    }

    async fn load_watches(&self) -> Result<Vec<WatchEntry>> {
        Ok(self.watches.iter().map(|e| e.value().clone()).collect())
    }

    async fn upsert_pending(&self, pending: &PendingConfirmation) -> Result<()> {
        self.check_writable()?;
        self.pending.insert(pending.id.clone(), pending.clone());
        Ok(())
    }

    async fn delete_pending(&self, id: &str) -> Result<()> {
        self.check_writable()?;
        self.pending.remove(id);
        Ok(())
    }

    async fn load_pending(&self) -> Result<Vec<PendingConfirmation>> {
        Ok(self.pending.iter().map(|e| e.value().clone()).collect())
    }

    async fn promote(&self, pending: &PendingConfirmation) -> Result<()> {
        self.check_writable()?;
        self.pending.insert(pending.id.clone(), pending.clone());
        self.watches.remove(&pending.id);
        Ok(())
    }

    async fn upsert_alert(&self, record: &AlertDedupRecord) -> Result<()> {
        self.check_writable()?;
        self.alerts.insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn load_alerts(&self) -> Result<Vec<AlertDedupRecord>> {
        Ok(self.alerts.iter().map(|e| e.value().clone()).collect())
    }
}
