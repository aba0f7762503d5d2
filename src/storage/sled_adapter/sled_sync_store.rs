//! Sled-backed persistence for sync remotes and cursors.

use std::sync::Arc;

use async_trait::async_trait;

use crate::constants::SYNC_CURSOR_TREE;
use crate::constants::SYNC_REMOTE_TREE;
use crate::CursorSide;
use crate::CursorStore;
use crate::RemoteRecord;
use crate::RemoteStore;
use crate::Result;
use crate::StorageError;
use crate::SyncCursor;

fn db_err(e: sled::Error) -> crate::Error {
    StorageError::Engine(Box::new(e)).into()
}

#[derive(Debug)]
pub struct SledRemoteStore {
    tree: sled::Tree,
}

impl SledRemoteStore {
    pub fn new(db: &sled::Db) -> Result<Arc<Self>> {
        Ok(Arc::new(Self {
            tree: db.open_tree(SYNC_REMOTE_TREE).map_err(db_err)?,
        }))
    }
}

#[async_trait]
impl RemoteStore for SledRemoteStore {
    async fn upsert(
        &self,
        record: RemoteRecord,
    ) -> Result<()> {
        let value = serde_json::to_vec(&record)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        self.tree
            .insert(record.name.as_bytes(), value)
            .map_err(db_err)?;
        Ok(())
    }

    async fn remove(
        &self,
        name: &str,
    ) -> Result<()> {
        self.tree.remove(name.as_bytes()).map_err(db_err)?;
        Ok(())
    }

    async fn list(&self) -> Result<Vec<RemoteRecord>> {
        let mut records = Vec::new();
        for item in self.tree.iter() {
            let (_, value) = item.map_err(db_err)?;
            let record: RemoteRecord = serde_json::from_slice(&value)
                .map_err(|e| StorageError::Serialization(e.to_string()))?;
            records.push(record);
        }
        Ok(records)
    }
}

fn cursor_key(
    remote_name: &str,
    side: CursorSide,
) -> String {
    let side = match side {
        CursorSide::Inbox => "inbox",
        CursorSide::Outbox => "outbox",
    };
    format!("{remote_name}\u{0}{side}")
}

#[derive(Debug)]
pub struct SledCursorStore {
    tree: sled::Tree,
}

impl SledCursorStore {
    pub fn new(db: &sled::Db) -> Result<Arc<Self>> {
        Ok(Arc::new(Self {
            tree: db.open_tree(SYNC_CURSOR_TREE).map_err(db_err)?,
        }))
    }
}

#[async_trait]
impl CursorStore for SledCursorStore {
    async fn upsert(
        &self,
        cursor: SyncCursor,
    ) -> Result<()> {
        let key = cursor_key(&cursor.remote_name, cursor.cursor_side);
        let value = serde_json::to_vec(&cursor)
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        self.tree.insert(key.as_bytes(), value).map_err(db_err)?;
        Ok(())
    }

    async fn list(
        &self,
        remote_name: &str,
    ) -> Result<Vec<SyncCursor>> {
        let prefix = format!("{remote_name}\u{0}");
        let mut cursors = Vec::new();
        for item in self.tree.scan_prefix(prefix.as_bytes()) {
            let (_, value) = item.map_err(db_err)?;
            let cursor: SyncCursor = serde_json::from_slice(&value)
                .map_err(|e| StorageError::Serialization(e.to_string()))?;
            cursors.push(cursor);
        }
        Ok(cursors)
    }
}
