//! Persistence for the sync layer: remote configurations (so `startup()` can
//! recreate channels after a restart) and per-remote mailbox cursors (so a
//! restarted channel resumes from its last acknowledged ordinal instead of
//! re-transporting everything).

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Deserialize;
use serde::Serialize;

use crate::ChannelConfig;
use crate::RemoteFilter;
use crate::RemoteOptions;
use crate::Result;

#[cfg(test)]
use mockall::automock;

/// Persisted form of a configured remote.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RemoteRecord {
    pub id: String,
    pub name: String,
    pub collection_id: String,
    pub channel_config: ChannelConfig,
    pub filter: RemoteFilter,
    pub options: RemoteOptions,
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait RemoteStore: Send + Sync + 'static {
    async fn upsert(
        &self,
        record: RemoteRecord,
    ) -> Result<()>;

    async fn remove(
        &self,
        name: &str,
    ) -> Result<()>;

    async fn list(&self) -> Result<Vec<RemoteRecord>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CursorSide {
    Inbox,
    Outbox,
}

/// Highest acknowledged ordinal for one mailbox of one remote.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SyncCursor {
    pub remote_name: String,
    pub cursor_side: CursorSide,
    pub cursor_ordinal: u64,
    pub last_synced_at_utc_ms: u64,
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait CursorStore: Send + Sync + 'static {
    async fn upsert(
        &self,
        cursor: SyncCursor,
    ) -> Result<()>;

    async fn list(
        &self,
        remote_name: &str,
    ) -> Result<Vec<SyncCursor>>;
}

/// In-memory remote store. Nothing survives restart; `startup()` recreates
/// nothing, which is what embedded and test reactors want.
#[derive(Debug, Default)]
pub struct MemRemoteStore {
    records: DashMap<String, RemoteRecord>,
}

impl MemRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RemoteStore for MemRemoteStore {
    async fn upsert(
        &self,
        record: RemoteRecord,
    ) -> Result<()> {
        self.records.insert(record.name.clone(), record);
        Ok(())
    }

    async fn remove(
        &self,
        name: &str,
    ) -> Result<()> {
        self.records.remove(name);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<RemoteRecord>> {
        Ok(self.records.iter().map(|e| e.value().clone()).collect())
    }
}

#[derive(Debug, Default)]
pub struct MemCursorStore {
    cursors: DashMap<(String, CursorSide), SyncCursor>,
}

impl MemCursorStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CursorStore for MemCursorStore {
    async fn upsert(
        &self,
        cursor: SyncCursor,
    ) -> Result<()> {
        self.cursors
            .insert((cursor.remote_name.clone(), cursor.cursor_side), cursor);
        Ok(())
    }

    async fn list(
        &self,
        remote_name: &str,
    ) -> Result<Vec<SyncCursor>> {
        Ok(self
            .cursors
            .iter()
            .filter(|e| e.key().0 == remote_name)
            .map(|e| e.value().clone())
            .collect())
    }
}
