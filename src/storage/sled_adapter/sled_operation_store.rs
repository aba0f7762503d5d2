//! Sled-backed operation store.
//!
//! Three trees: the per-log operation tree (key encodes document, scope,
//! branch and a zero-padded index so range scans walk a log in order), the
//! committed-id tree (duplicate detection), and the global ordinal tree
//! (cross-document commit index). A single writer lock serializes `apply`;
//! the expected-revision check and the id checks both run under it.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use sled::IVec;
use tracing::debug;

use crate::check_contiguous;
use crate::constants::OPERATION_ID_TREE;
use crate::constants::OPERATION_LOG_TREE;
use crate::constants::OPERATION_ORDINAL_TREE;
use crate::AppliedOperations;
use crate::DocumentRevisions;
use crate::Operation;
use crate::OperationContext;
use crate::OperationStore;
use crate::OperationTxn;
use crate::OperationWithContext;
use crate::Result;
use crate::StorageError;
use crate::TxnFn;

const SEP: char = '\u{0}';

pub struct SledOperationStore {
    log_tree: sled::Tree,
    id_tree: sled::Tree,
    ordinal_tree: sled::Tree,
    write_lock: Mutex<()>,
}

impl std::fmt::Debug for SledOperationStore {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("SledOperationStore")
            .field("log_len", &self.log_tree.len())
            .field("ordinal_len", &self.ordinal_tree.len())
            .finish()
    }
}

fn db_err(e: sled::Error) -> crate::Error {
    StorageError::Engine(Box::new(e)).into()
}

fn encode_op(op: &Operation) -> Result<IVec> {
    let bytes =
        serde_json::to_vec(op).map_err(|e| StorageError::Serialization(e.to_string()))?;
    Ok(IVec::from(bytes))
}

fn decode_op(bytes: &[u8]) -> Result<Operation> {
    serde_json::from_slice(bytes)
        .map_err(|e| StorageError::Serialization(e.to_string()).into())
}

fn log_prefix(
    document_id: &str,
    scope: &str,
    branch: &str,
) -> String {
    format!("{document_id}{SEP}{scope}{SEP}{branch}{SEP}")
}

fn log_key(
    document_id: &str,
    scope: &str,
    branch: &str,
    index: i64,
) -> String {
    // zero-padded so lexicographic order equals index order
    format!("{}{:020}", log_prefix(document_id, scope, branch), index)
}

impl SledOperationStore {
    pub fn new(db: &sled::Db) -> Result<Arc<Self>> {
        Ok(Arc::new(Self {
            log_tree: db.open_tree(OPERATION_LOG_TREE).map_err(db_err)?,
            id_tree: db.open_tree(OPERATION_ID_TREE).map_err(db_err)?,
            ordinal_tree: db.open_tree(OPERATION_ORDINAL_TREE).map_err(db_err)?,
            write_lock: Mutex::new(()),
        }))
    }

    /// Last committed index for a log, -1 when empty
    fn revision_of(
        &self,
        document_id: &str,
        scope: &str,
        branch: &str,
    ) -> Result<i64> {
        let prefix = log_prefix(document_id, scope, branch);
        let mut last: i64 = -1;
        for item in self.log_tree.scan_prefix(prefix.as_bytes()) {
            let (key, _) = item.map_err(db_err)?;
            if let Ok(key_str) = std::str::from_utf8(&key) {
                if let Ok(index) = key_str[prefix.len()..].parse::<i64>() {
                    last = last.max(index);
                }
            }
        }
        Ok(last)
    }

    fn next_ordinal(&self) -> Result<u64> {
        match self.ordinal_tree.last().map_err(db_err)? {
            Some((key, _)) => {
                let mut buf = [0u8; 8];
                buf.copy_from_slice(&key);
                Ok(u64::from_be_bytes(buf) + 1)
            }
            None => Ok(1),
        }
    }

    fn scan_log(
        &self,
        document_id: &str,
        scope: &str,
        branch: &str,
    ) -> Result<Vec<Operation>> {
        let prefix = log_prefix(document_id, scope, branch);
        let mut ops = Vec::new();
        for item in self.log_tree.scan_prefix(prefix.as_bytes()) {
            let (_, value) = item.map_err(db_err)?;
            ops.push(decode_op(&value)?);
        }
        ops.sort_by_key(|op| op.index);
        Ok(ops)
    }
}

#[async_trait]
impl OperationStore for SledOperationStore {
    async fn apply(
        &self,
        document_id: &str,
        document_type: &str,
        scope: &str,
        branch: &str,
        expected_revision: i64,
        build: TxnFn,
    ) -> Result<AppliedOperations> {
        let mut txn = OperationTxn::default();
        build(&mut txn)?;
        let ops = txn.into_operations();

        let _guard = self.write_lock.lock();

        let actual = self.revision_of(document_id, scope, branch)?;
        if actual != expected_revision {
            return Err(StorageError::RevisionMismatch {
                expected: expected_revision,
                actual,
            }
            .into());
        }

        for op in &ops {
            if self
                .id_tree
                .contains_key(op.id.as_bytes())
                .map_err(db_err)?
            {
                return Err(StorageError::DuplicateOperation(op.id.clone()).into());
            }
        }
        check_contiguous(expected_revision, &ops)?;

        let mut next_ordinal = self.next_ordinal()?;
        let mut log_batch = sled::Batch::default();
        let mut id_batch = sled::Batch::default();
        let mut ordinal_batch = sled::Batch::default();
        let mut applied = Vec::with_capacity(ops.len());

        for op in &ops {
            let with_context = OperationWithContext {
                operation: op.clone(),
                context: OperationContext {
                    document_id: document_id.to_string(),
                    document_type: document_type.to_string(),
                    scope: scope.to_string(),
                    branch: branch.to_string(),
                    ordinal: next_ordinal,
                },
            };

            log_batch.insert(
                log_key(document_id, scope, branch, op.index).as_bytes(),
                encode_op(op)?,
            );
            id_batch.insert(op.id.as_bytes(), &[]);
            let ordinal_bytes = serde_json::to_vec(&with_context)
                .map_err(|e| StorageError::Serialization(e.to_string()))?;
            ordinal_batch.insert(&next_ordinal.to_be_bytes(), ordinal_bytes);

            applied.push(with_context);
            next_ordinal += 1;
        }

        // Serialization and validation are done; the batches commit in full.
        self.log_tree.apply_batch(log_batch).map_err(db_err)?;
        self.id_tree.apply_batch(id_batch).map_err(db_err)?;
        self.ordinal_tree.apply_batch(ordinal_batch).map_err(db_err)?;

        debug!(
            "SledOperationStore::apply committed {} op(s) for ({}, {}, {})",
            applied.len(),
            document_id,
            scope,
            branch
        );

        Ok(AppliedOperations { operations: applied })
    }

    async fn get(
        &self,
        document_id: &str,
        scope: &str,
        branch: &str,
        revision: i64,
    ) -> Result<Operation> {
        let key = log_key(document_id, scope, branch, revision);
        match self.log_tree.get(key.as_bytes()).map_err(db_err)? {
            Some(value) => decode_op(&value),
            None => Err(StorageError::DocumentNotFound {
                document_id: document_id.to_string(),
                scope: scope.to_string(),
                branch: branch.to_string(),
            }
            .into()),
        }
    }

    async fn get_since(
        &self,
        document_id: &str,
        scope: &str,
        branch: &str,
        revision: i64,
    ) -> Result<Vec<Operation>> {
        let ops = self.scan_log(document_id, scope, branch)?;
        Ok(ops.into_iter().filter(|op| op.index > revision).collect())
    }

    async fn get_since_timestamp(
        &self,
        document_id: &str,
        scope: &str,
        branch: &str,
        timestamp_utc_ms: &str,
    ) -> Result<Vec<Operation>> {
        let cutoff: u64 = timestamp_utc_ms.parse().unwrap_or(0);
        let ops = self.scan_log(document_id, scope, branch)?;
        Ok(ops
            .into_iter()
            .filter(|op| op.timestamp_utc_ms.parse::<u64>().unwrap_or(0) > cutoff)
            .collect())
    }

    async fn get_since_ordinal(
        &self,
        ordinal: u64,
    ) -> Result<Vec<OperationWithContext>> {
        let mut results = Vec::new();
        for item in self.ordinal_tree.range((ordinal + 1).to_be_bytes()..) {
            let (_, value) = item.map_err(db_err)?;
            let with_context: OperationWithContext = serde_json::from_slice(&value)
                .map_err(|e| StorageError::Serialization(e.to_string()))?;
            results.push(with_context);
        }
        Ok(results)
    }

    async fn get_revisions(
        &self,
        document_id: &str,
        branch: &str,
    ) -> Result<DocumentRevisions> {
        let prefix = format!("{document_id}{SEP}");
        let mut revisions = DocumentRevisions::default();
        let mut latest: u64 = 0;

        for item in self.log_tree.scan_prefix(prefix.as_bytes()) {
            let (key, value) = item.map_err(db_err)?;
            let key_str = match std::str::from_utf8(&key) {
                Ok(s) => s,
                Err(_) => continue,
            };
            let mut parts = key_str.split(SEP);
            let (_, scope, key_branch) = (parts.next(), parts.next(), parts.next());
            let (Some(scope), Some(key_branch)) = (scope, key_branch) else {
                continue;
            };
            if key_branch != branch {
                continue;
            }

            let op = decode_op(&value)?;
            let entry = revisions.revision.entry(scope.to_string()).or_insert(-1);
            *entry = (*entry).max(op.index);

            let ts = op.timestamp_utc_ms.parse::<u64>().unwrap_or(0);
            if ts > latest {
                latest = ts;
                revisions.latest_timestamp = op.timestamp_utc_ms;
            }
        }

        if revisions.revision.is_empty() {
            return Err(StorageError::DocumentNotFound {
                document_id: document_id.to_string(),
                scope: String::new(),
                branch: branch.to_string(),
            }
            .into());
        }

        Ok(revisions)
    }
}
