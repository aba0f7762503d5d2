//! Document meta cache.
//!
//! Caches cross-scope document metadata reconstructed by replaying the
//! `document` scope log: CREATE_DOCUMENT seeds the entry, then
//! UPGRADE_DOCUMENT / DELETE_DOCUMENT fold over it in index order.
//!
//! The source design is single-threaded; executors here are tokio tasks, so
//! every cache mutation and LRU touch happens under one internal lock.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::constants::ACTION_ADD_RELATIONSHIP;
use crate::constants::ACTION_CREATE_DOCUMENT;
use crate::constants::ACTION_DELETE_DOCUMENT;
use crate::constants::ACTION_REMOVE_RELATIONSHIP;
use crate::constants::ACTION_UPGRADE_DOCUMENT;
use crate::constants::DOCUMENT_SCOPE;
use crate::constants::EMPTY_LOG_REVISION;
use crate::CachedDocumentMeta;
use crate::DocumentScopeState;
use crate::Error;
use crate::LruArena;
use crate::Operation;
use crate::OperationStore;
use crate::Result;
use crate::StorageError;

fn cache_key(
    document_id: &str,
    branch: &str,
) -> String {
    format!("{document_id}:{branch}")
}

pub struct DocumentMetaCache {
    store: Arc<dyn OperationStore>,
    cache: Mutex<LruArena<String, CachedDocumentMeta>>,
}

impl DocumentMetaCache {
    pub fn new(
        store: Arc<dyn OperationStore>,
        max_documents: usize,
    ) -> Self {
        Self {
            store,
            cache: Mutex::new(LruArena::new(max_documents)),
        }
    }

    /// Cached meta for (document_id, branch). A hit touches the LRU; a miss
    /// replays the document-scope log and inserts the result.
    pub async fn get_document_meta(
        &self,
        document_id: &str,
        branch: &str,
        cancel: Option<&CancellationToken>,
    ) -> Result<CachedDocumentMeta> {
        if cancel.map(|c| c.is_cancelled()).unwrap_or(false) {
            return Err(Error::Cancelled);
        }

        let key = cache_key(document_id, branch);
        if let Some(meta) = self.cache.lock().get(&key) {
            return Ok(meta.clone());
        }

        let ops = self
            .store
            .get_since(document_id, DOCUMENT_SCOPE, branch, EMPTY_LOG_REVISION)
            .await?;
        if ops.is_empty() {
            return Err(StorageError::DocumentNotFound {
                document_id: document_id.to_string(),
                scope: DOCUMENT_SCOPE.to_string(),
                branch: branch.to_string(),
            }
            .into());
        }

        let meta = fold_document_log(document_id, &ops, None)?;
        self.put_document_meta(document_id, branch, meta.clone());
        Ok(meta)
    }

    /// Inserts, evicting the least-recently-used entry when the cache is
    /// full and the key is new.
    pub fn put_document_meta(
        &self,
        document_id: &str,
        branch: &str,
        meta: CachedDocumentMeta,
    ) {
        let key = cache_key(document_id, branch);
        let evicted = self.cache.lock().insert(key, meta);
        if let Some((evicted_key, _)) = evicted {
            debug!("DocumentMetaCache evicted {}", evicted_key);
        }
    }

    /// Point-in-time reconstruction: same fold, stopped at `target_index`.
    /// Does not populate the cache.
    pub async fn rebuild_at_revision(
        &self,
        document_id: &str,
        branch: &str,
        target_index: i64,
    ) -> Result<CachedDocumentMeta> {
        let ops = self
            .store
            .get_since(document_id, DOCUMENT_SCOPE, branch, EMPTY_LOG_REVISION)
            .await?;
        if ops.is_empty() {
            return Err(StorageError::DocumentNotFound {
                document_id: document_id.to_string(),
                scope: DOCUMENT_SCOPE.to_string(),
                branch: branch.to_string(),
            }
            .into());
        }
        fold_document_log(document_id, &ops, Some(target_index))
    }

    /// Removes one entry, or every branch of the document when `branch` is
    /// omitted.
    pub fn invalidate(
        &self,
        document_id: &str,
        branch: Option<&str>,
    ) {
        let mut cache = self.cache.lock();
        match branch {
            Some(branch) => {
                cache.remove(&cache_key(document_id, branch));
            }
            None => {
                let prefix = format!("{document_id}:");
                cache.remove_where(|k| k.starts_with(&prefix));
            }
        }
    }

    pub fn clear(&self) {
        self.cache.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.cache.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.lock().is_empty()
    }
}

/// Folds a document-scope log into meta. The first operation must be
/// CREATE_DOCUMENT; anything else means the log is malformed and the error
/// is fatal, not retried.
fn fold_document_log(
    document_id: &str,
    ops: &[Operation],
    up_to: Option<i64>,
) -> Result<CachedDocumentMeta> {
    let first = &ops[0];
    if first.action.action_type != ACTION_CREATE_DOCUMENT {
        return Err(StorageError::MalformedDocumentLog {
            document_id: document_id.to_string(),
            reason: format!(
                "log starts with '{}' instead of '{}'",
                first.action.action_type, ACTION_CREATE_DOCUMENT
            ),
        }
        .into());
    }

    let document_type = first.action.input["model"]
        .as_str()
        .unwrap_or_default()
        .to_string();
    let mut state = DocumentScopeState {
        document_type: document_type.clone(),
        version: first.action.input["version"].as_u64().unwrap_or(0) as u32,
        is_deleted: false,
        deleted_at_utc_ms: None,
        children: Vec::new(),
    };
    // revision counts folded operations: CREATE alone yields 1
    let mut revision = first.index + 1;

    for op in &ops[1..] {
        if let Some(limit) = up_to {
            if op.index > limit {
                break;
            }
        }
        match op.action.action_type.as_str() {
            ACTION_UPGRADE_DOCUMENT => {
                state.version = op.action.input["version"]
                    .as_u64()
                    .map(|v| v as u32)
                    .unwrap_or(state.version + 1);
            }
            ACTION_DELETE_DOCUMENT => {
                state.is_deleted = true;
                state.deleted_at_utc_ms = Some(op.timestamp_utc_ms.clone());
            }
            ACTION_ADD_RELATIONSHIP => {
                if let Some(child) = op.action.input["documentId"].as_str() {
                    if !state.children.iter().any(|c| c == child) {
                        state.children.push(child.to_string());
                    }
                }
            }
            ACTION_REMOVE_RELATIONSHIP => {
                if let Some(child) = op.action.input["documentId"].as_str() {
                    state.children.retain(|c| c != child);
                }
            }
            _ => {}
        }
        revision = op.index + 1;
    }

    Ok(CachedDocumentMeta {
        state,
        document_type,
        document_scope_revision: revision,
    })
}
