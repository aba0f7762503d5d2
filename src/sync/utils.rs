//! Operation-level helpers shared by the sync layer.

use std::sync::Arc;

use crate::Mailbox;
use crate::Operation;
use crate::OperationWithContext;
use crate::RemoteFilter;
use crate::Result;
use crate::SyncOperation;

/// Drops operations already present in `history`. Present means the same
/// (index, skip, scope, hash, type), or a bare NOOP landing on an occupied
/// index. Feeding the output back in returns it unchanged.
pub fn remove_existing_operations(
    new_operations: &[Operation],
    history: &[Operation],
) -> Vec<Operation> {
    new_operations
        .iter()
        .filter(|new_op| {
            !history.iter().any(|old_op| {
                (new_op.action.action_type == "NOOP"
                    && new_op.skip == 0
                    && new_op.index == old_op.index)
                    || (new_op.index == old_op.index
                        && new_op.skip == old_op.skip
                        && new_op.action.scope == old_op.action.scope
                        && new_op.hash == old_op.hash
                        && new_op.action.action_type == old_op.action.action_type)
            })
        })
        .cloned()
        .collect()
}

/// Operations a remote should receive, per its filter
pub fn filter_operations(
    operations: &[OperationWithContext],
    filter: &RemoteFilter,
) -> Vec<OperationWithContext> {
    operations
        .iter()
        .filter(|op| {
            filter.matches(
                &op.context.document_id,
                &op.context.scope,
                &op.context.branch,
            )
        })
        .cloned()
        .collect()
}

#[derive(Debug, Clone)]
pub struct DocumentBatch {
    pub document_id: String,
    pub scope: String,
    pub branch: String,
    pub operations: Vec<OperationWithContext>,
}

/// Groups operations into per-(document, scope, branch) batches, keeping
/// arrival order within each batch.
pub fn batch_operations_by_document(
    operations: &[OperationWithContext],
) -> Vec<DocumentBatch> {
    let mut batches: Vec<DocumentBatch> = Vec::new();
    for op in operations {
        let found = batches.iter_mut().find(|b| {
            b.document_id == op.context.document_id
                && b.scope == op.context.scope
                && b.branch == op.context.branch
        });
        match found {
            Some(batch) => batch.operations.push(op.clone()),
            None => batches.push(DocumentBatch {
                document_id: op.context.document_id.clone(),
                scope: op.context.scope.clone(),
                branch: op.context.branch.clone(),
                operations: vec![op.clone()],
            }),
        }
    }
    batches
}

/// The remote acknowledged everything up to `ack_ordinal`: operations at or
/// below it are Applied from its point of view, so mark them and evict.
pub fn trim_mailbox_from_ack_ordinal(
    mailbox: &Arc<Mailbox>,
    ack_ordinal: u64,
) -> Result<()> {
    let acked: Vec<SyncOperation> = mailbox
        .items()
        .into_iter()
        .filter(|op| op.ordinal() > 0 && op.ordinal() <= ack_ordinal)
        .collect();

    if acked.is_empty() {
        return Ok(());
    }
    for op in &acked {
        op.applied();
    }
    mailbox.remove(&acked)
}
