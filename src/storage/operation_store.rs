//! Core model: the operation store contract.
//!
//! The store is the persistence boundary and the single
//! mutation-serialization point of the engine: every writer goes through
//! `apply`, which enforces optimistic locking with an expected-revision CAS
//! instead of pessimistic locks. Committed operations are never mutated or
//! reordered.

use async_trait::async_trait;

use crate::DocumentRevisions;
use crate::Operation;
use crate::OperationWithContext;
use crate::Result;

#[cfg(test)]
use mockall::automock;

/// Atomic transaction handle passed to `apply`'s build closure. Operations
/// added here commit together or not at all.
#[derive(Debug, Default)]
pub struct OperationTxn {
    ops: Vec<Operation>,
}

impl OperationTxn {
    pub fn add_operations(
        &mut self,
        ops: impl IntoIterator<Item = Operation>,
    ) {
        self.ops.extend(ops);
    }

    pub(crate) fn into_operations(self) -> Vec<Operation> {
        self.ops
    }
}

/// Build closure executed against the transaction handle.
pub type TxnFn = Box<dyn FnOnce(&mut OperationTxn) -> Result<()> + Send>;

/// Operations committed by one `apply`, with their assigned global ordinals.
#[derive(Debug, Clone, Default)]
pub struct AppliedOperations {
    pub operations: Vec<OperationWithContext>,
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait OperationStore: Send + Sync + 'static {
    /// Executes `build` against a transaction handle and commits the added
    /// operations, but only if the stored revision for
    /// (document_id, scope, branch) still equals `expected_revision`
    /// (`-1` for an empty log). Otherwise fails with
    /// `StorageError::RevisionMismatch` and the store is left unchanged.
    ///
    /// An operation whose id was already committed fails the whole
    /// transaction with `StorageError::DuplicateOperation`.
    async fn apply(
        &self,
        document_id: &str,
        document_type: &str,
        scope: &str,
        branch: &str,
        expected_revision: i64,
        build: TxnFn,
    ) -> Result<AppliedOperations>;

    /// The operation committed at exactly `revision`
    async fn get(
        &self,
        document_id: &str,
        scope: &str,
        branch: &str,
        revision: i64,
    ) -> Result<Operation>;

    /// All operations after `revision`, in index order.
    /// `get_since(.., -1)` replays a log from its start.
    async fn get_since(
        &self,
        document_id: &str,
        scope: &str,
        branch: &str,
        revision: i64,
    ) -> Result<Vec<Operation>>;

    /// All operations with a timestamp strictly after `timestamp_utc_ms`
    async fn get_since_timestamp(
        &self,
        document_id: &str,
        scope: &str,
        branch: &str,
        timestamp_utc_ms: &str,
    ) -> Result<Vec<Operation>>;

    /// Cross-document index: all commits with a global ordinal strictly
    /// greater than `ordinal`, in ordinal order
    async fn get_since_ordinal(
        &self,
        ordinal: u64,
    ) -> Result<Vec<OperationWithContext>>;

    /// Latest index per scope plus the max timestamp, aggregated without
    /// materializing full state. Used to reconstruct document headers.
    async fn get_revisions(
        &self,
        document_id: &str,
        branch: &str,
    ) -> Result<DocumentRevisions>;
}

/// Log position bookkeeping shared by store implementations: validates that
/// a batch continues the log at `expected_revision` and yields the indexes
/// the batch must carry.
pub(crate) fn check_contiguous(
    expected_revision: i64,
    ops: &[Operation],
) -> Result<()> {
    for (i, op) in ops.iter().enumerate() {
        let want = expected_revision + 1 + i as i64;
        if op.index != want {
            return Err(crate::StorageError::InvalidAppend(format!(
                "operation {} carries index {} but the log continues at {}",
                op.id, op.index, want
            ))
            .into());
        }
    }
    Ok(())
}
