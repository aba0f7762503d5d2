//! In-memory operation store: tests and embedded reactors.
//!
//! A single lock serializes writers; `apply` is the only mutation path, so
//! the lock is the in-memory rendition of the store's
//! single-mutation-serialization-point contract.

use std::collections::HashMap;
use std::collections::HashSet;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;

use crate::check_contiguous;
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

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct LogKey {
    document_id: String,
    scope: String,
    branch: String,
}

#[derive(Debug, Default)]
struct MemStoreInner {
    logs: HashMap<LogKey, Vec<Operation>>,
    committed_ids: HashSet<String>,
    /// Global commit order; position + 1 is the ordinal
    ordinal_index: Vec<OperationWithContext>,
}

#[derive(Debug, Default)]
pub struct MemOperationStore {
    inner: Mutex<MemStoreInner>,
}

impl MemOperationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OperationStore for MemOperationStore {
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

        let key = LogKey {
            document_id: document_id.to_string(),
            scope: scope.to_string(),
            branch: branch.to_string(),
        };

        let mut inner = self.inner.lock();

        let actual = inner
            .logs
            .get(&key)
            .map(|log| log.len() as i64 - 1)
            .unwrap_or(-1);
        if actual != expected_revision {
            return Err(StorageError::RevisionMismatch {
                expected: expected_revision,
                actual,
            }
            .into());
        }

        for op in &ops {
            if inner.committed_ids.contains(&op.id) {
                return Err(StorageError::DuplicateOperation(op.id.clone()).into());
            }
        }
        check_contiguous(expected_revision, &ops)?;

        // Past the checks nothing can fail: commit is all-or-nothing.
        let mut applied = Vec::with_capacity(ops.len());
        for op in ops {
            inner.committed_ids.insert(op.id.clone());
            let ordinal = inner.ordinal_index.len() as u64 + 1;
            let with_context = OperationWithContext {
                operation: op.clone(),
                context: OperationContext {
                    document_id: document_id.to_string(),
                    document_type: document_type.to_string(),
                    scope: scope.to_string(),
                    branch: branch.to_string(),
                    ordinal,
                },
            };
            inner.ordinal_index.push(with_context.clone());
            inner.logs.entry(key.clone()).or_default().push(op);
            applied.push(with_context);
        }

        debug!(
            "MemOperationStore::apply committed {} op(s) for ({}, {}, {})",
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
        let key = LogKey {
            document_id: document_id.to_string(),
            scope: scope.to_string(),
            branch: branch.to_string(),
        };
        let inner = self.inner.lock();
        inner
            .logs
            .get(&key)
            .and_then(|log| usize::try_from(revision).ok().and_then(|i| log.get(i)))
            .cloned()
            .ok_or_else(|| {
                StorageError::DocumentNotFound {
                    document_id: document_id.to_string(),
                    scope: scope.to_string(),
                    branch: branch.to_string(),
                }
                .into()
            })
    }

    async fn get_since(
        &self,
        document_id: &str,
        scope: &str,
        branch: &str,
        revision: i64,
    ) -> Result<Vec<Operation>> {
        let key = LogKey {
            document_id: document_id.to_string(),
            scope: scope.to_string(),
            branch: branch.to_string(),
        };
        let inner = self.inner.lock();
        let start = (revision + 1).max(0) as usize;
        Ok(inner
            .logs
            .get(&key)
            .map(|log| log.iter().skip(start).cloned().collect())
            .unwrap_or_default())
    }

    async fn get_since_timestamp(
        &self,
        document_id: &str,
        scope: &str,
        branch: &str,
        timestamp_utc_ms: &str,
    ) -> Result<Vec<Operation>> {
        let cutoff: u64 = timestamp_utc_ms.parse().unwrap_or(0);
        let key = LogKey {
            document_id: document_id.to_string(),
            scope: scope.to_string(),
            branch: branch.to_string(),
        };
        let inner = self.inner.lock();
        Ok(inner
            .logs
            .get(&key)
            .map(|log| {
                log.iter()
                    .filter(|op| op.timestamp_utc_ms.parse::<u64>().unwrap_or(0) > cutoff)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn get_since_ordinal(
        &self,
        ordinal: u64,
    ) -> Result<Vec<OperationWithContext>> {
        let inner = self.inner.lock();
        Ok(inner
            .ordinal_index
            .iter()
            .skip(ordinal as usize)
            .cloned()
            .collect())
    }

    async fn get_revisions(
        &self,
        document_id: &str,
        branch: &str,
    ) -> Result<DocumentRevisions> {
        let inner = self.inner.lock();
        let mut revisions = DocumentRevisions::default();
        let mut latest: u64 = 0;

        for (key, log) in inner.logs.iter() {
            if key.document_id != document_id || key.branch != branch || log.is_empty() {
                continue;
            }
            revisions
                .revision
                .insert(key.scope.clone(), log.len() as i64 - 1);
            for op in log {
                let ts = op.timestamp_utc_ms.parse::<u64>().unwrap_or(0);
                if ts > latest {
                    latest = ts;
                    revisions.latest_timestamp = op.timestamp_utc_ms.clone();
                }
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
