use super::{AlertDedupRecord, PendingConfirmation, WatchEntry};
use crate::error::{Result, ScanError};
use async_trait::async_trait;
use log::{debug, info, warn};
use redis::{aio::ConnectionManager, AsyncCommands};
use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Durable backing for the watchlist tables. Memory stays authoritative while
/// running; the store exists so a restart can pick up where it left off.
#[async_trait]
pub trait StateStore: Send + Sync {
    async fn upsert_watch(&self, entry: &WatchEntry) -> Result<()>;
    async fn delete_watch(&self, id: &str) -> Result<()>;
    async fn load_watches(&self) -> Result<Vec<WatchEntry>>;

    async fn upsert_pending(&self, pending: &PendingConfirmation) -> Result<()>;
    async fn delete_pending(&self, id: &str) -> Result<()>;
    async fn load_pending(&self) -> Result<Vec<PendingConfirmation>>;

    /// Inserts the pending row and removes the watch row with the same id in
    /// one transaction.
    async fn promote(&self, pending: &PendingConfirmation) -> Result<()>;

    async fn upsert_alert(&self, record: &AlertDedupRecord) -> Result<()>;
    async fn load_alerts(&self) -> Result<Vec<AlertDedupRecord>>;
}

const WATCH_TABLE: &str = "watchlist";
const PENDING_TABLE: &str = "pending";
const ALERT_TABLE: &str = "alert_history";

/// One Redis hash per table, `field = id`, `value = JSON document`.
#[derive(Clone)]
pub struct RedisStateStore {
    conn_manager: ConnectionManager,
    namespace: String,
    redis_url: String,
}

impl fmt::Debug for RedisStateStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisStateStore")
            .field("redis_url", &self.redis_url)
            .field("namespace", &self.namespace)
            .field("conn_manager", &"<ConnectionManager instance>")
            .finish()
    }
}

impl RedisStateStore {
    pub async fn connect(redis_url: &str, namespace: &str) -> Result<Self> {
        info!("Connecting state store to {} (namespace '{}')", redis_url, namespace);
        let client = redis::Client::open(redis_url)?;
        let conn_manager = ConnectionManager::new(client).await?;
        Ok(Self {
            conn_manager,
            namespace: namespace.to_string(),
            redis_url: redis_url.to_string(),
        })
    }

    fn key(&self, table: &str) -> String {
        format!("{}:{}", self.namespace, table)
    }

    async fn put<T: Serialize + Sync>(&self, table: &str, id: &str, value: &T) -> Result<()> {
        let doc = serde_json::to_string(value)?;
        let mut conn = self.conn_manager.clone();
        conn.hset::<_, _, _, ()>(self.key(table), id, doc).await?;
        debug!("HSET {}:{} {}", self.namespace, table, id);
        Ok(())
    }

    async fn remove(&self, table: &str, id: &str) -> Result<()> {
        let mut conn = self.conn_manager.clone();
        conn.hdel::<_, _, ()>(self.key(table), id).await?;
        debug!("HDEL {}:{} {}", self.namespace, table, id);
        Ok(())
    }

    /// Rows that fail to decode are logged and skipped, not fatal.
    async fn scan<T: DeserializeOwned + Send>(&self, table: &str) -> Result<Vec<T>> {
        let mut conn = self.conn_manager.clone();
        let rows: HashMap<String, String> = conn.hgetall(self.key(table)).await?;
        Ok(rows
            .into_iter()
            .filter_map(|(id, doc)| match serde_json::from_str(&doc) {
                Ok(value) => Some(value),
                Err(e) => {
                    warn!("Skipping undecodable {} row '{}': {}", table, id, e);
                    None
                }
            })
            .collect())
    }
}

#[async_trait]
impl StateStore for RedisStateStore {
    async fn upsert_watch(&self, entry: &WatchEntry) -> Result<()> {
        self.put(WATCH_TABLE, &entry.id, entry).await
    }

    async fn delete_watch(&self, id: &str) -> Result<()> {
        self.remove(WATCH_TABLE, id).await
    }

    async fn load_watches(&self) -> Result<Vec<WatchEntry>> {
        self.scan(WATCH_TABLE).await
    }

    async fn upsert_pending(&self, pending: &PendingConfirmation) -> Result<()> {
        self.put(PENDING_TABLE, &pending.id, pending).await
    }

    async fn delete_pending(&self, id: &str) -> Result<()> {
        self.remove(PENDING_TABLE, id).await
    }

    async fn load_pending(&self) -> Result<Vec<PendingConfirmation>> {
        self.scan(PENDING_TABLE).await
    }

    async fn promote(&self, pending: &PendingConfirmation) -> Result<()> {
        let doc = serde_json::to_string(pending)?;
        let mut conn = self.conn_manager.clone();
        redis::pipe()
            .atomic()
            .hset(self.key(PENDING_TABLE), &pending.id, doc)
            .ignore()
            .hdel(self.key(WATCH_TABLE), &pending.id)
            .ignore()
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| ScanError::Persistence(format!("promote {} failed: {}", pending.id, e)))?;
        debug!("Promoted {} watch -> pending", pending.id);
        Ok(())
    }

    async fn upsert_alert(&self, record: &AlertDedupRecord) -> Result<()> {
        self.put(ALERT_TABLE, &record.id, record).await
    }

    async fn load_alerts(&self) -> Result<Vec<AlertDedupRecord>> {
        self.scan(ALERT_TABLE).await
    }
}
