//! Wire shapes of the GraphQL sync protocol. Field names are wire-exact:
//! camelCase, `type` transport-lowercased, empty `dependsOn` entries
//! filtered before use.

use serde::Deserialize;
use serde::Serialize;

use crate::OperationWithContext;
use crate::RemoteFilter;
use crate::SyncOperation;

pub const ENVELOPE_TYPE_OPERATIONS: &str = "operations";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChannelMeta {
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EnvelopeCursor {
    pub remote_name: String,
    pub cursor_ordinal: u64,
    pub last_synced_at_utc_ms: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SyncEnvelope {
    #[serde(rename = "type")]
    pub envelope_type: String,
    pub channel_meta: ChannelMeta,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operations: Option<Vec<OperationWithContext>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cursor: Option<EnvelopeCursor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depends_on: Option<Vec<String>>,
}

impl SyncEnvelope {
    /// Transport normalization: lowercase the type tag, drop empty
    /// dependsOn keys.
    pub fn normalize(mut self) -> Self {
        self.envelope_type = self.envelope_type.to_lowercase();
        self.depends_on = self.depends_on.map(|deps| {
            deps.into_iter().filter(|d| !d.is_empty()).collect()
        });
        self
    }

    pub fn is_operations(&self) -> bool {
        self.envelope_type == ENVELOPE_TYPE_OPERATIONS
    }

    /// Timestamp of the earliest carried operation, used for transport
    /// ordering.
    pub fn first_operation_timestamp(&self) -> u64 {
        self.operations
            .as_deref()
            .unwrap_or_default()
            .iter()
            .map(|op| op.operation.timestamp_utc_ms.parse::<u64>().unwrap_or(0))
            .min()
            .unwrap_or(0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TouchChannelInput {
    pub id: String,
    pub name: String,
    pub collection_id: String,
    pub filter: RemoteFilter,
    pub since_timestamp_utc_ms: String,
}

#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PollResponse {
    #[serde(default)]
    pub envelopes: Vec<SyncEnvelope>,
    #[serde(default)]
    pub ack_ordinal: u64,
}

/// Oldest-first by each envelope's earliest operation timestamp
pub fn sort_envelopes_by_first_operation_timestamp(
    mut envelopes: Vec<SyncEnvelope>
) -> Vec<SyncEnvelope> {
    envelopes.sort_by_key(|e| e.first_operation_timestamp());
    envelopes
}

/// Splits one inbound envelope into sync operations, one per
/// (document, branch) group, attributed to `remote_name`.
pub fn envelope_to_sync_operations(
    envelope: &SyncEnvelope,
    remote_name: &str,
) -> Vec<SyncOperation> {
    let Some(operations) = envelope.operations.as_deref() else {
        return Vec::new();
    };

    let mut groups: Vec<(String, String, Vec<OperationWithContext>)> = Vec::new();
    for op in operations {
        let found = groups
            .iter_mut()
            .find(|(doc, branch, _)| *doc == op.context.document_id && *branch == op.context.branch);
        match found {
            Some((_, _, ops)) => ops.push(op.clone()),
            None => groups.push((
                op.context.document_id.clone(),
                op.context.branch.clone(),
                vec![op.clone()],
            )),
        }
    }

    groups
        .into_iter()
        .map(|(document_id, branch, ops)| {
            let mut scopes: Vec<String> = ops.iter().map(|op| op.context.scope.clone()).collect();
            scopes.sort();
            scopes.dedup();
            SyncOperation::new("", remote_name, document_id, scopes, branch, ops, Vec::new())
        })
        .collect()
}

/// Builds the outbound envelope for one sync operation. `key` / `depends_on`
/// carry the causal ordering of the originating jobs across the batch.
pub fn sync_operation_to_envelope(
    channel_id: &str,
    sync_op: &SyncOperation,
    key: String,
    depends_on: Vec<String>,
) -> SyncEnvelope {
    SyncEnvelope {
        envelope_type: ENVELOPE_TYPE_OPERATIONS.to_string(),
        channel_meta: ChannelMeta {
            id: channel_id.to_string(),
        },
        operations: Some(sync_op.operations().to_vec()),
        cursor: None,
        key: Some(key),
        depends_on: Some(depends_on),
    }
}

/// Builds the envelope batch for one push: one envelope per sync
/// operation, `dependsOn` mapping job dependencies to the batch keys of
/// the envelopes that carried those jobs.
pub fn sync_operations_to_envelopes(
    channel_id: &str,
    sync_ops: &[SyncOperation],
) -> Vec<SyncEnvelope> {
    let mut job_id_to_keys: std::collections::HashMap<String, Vec<String>> =
        std::collections::HashMap::new();
    let mut envelopes = Vec::with_capacity(sync_ops.len());

    for (i, sync_op) in sync_ops.iter().enumerate() {
        let key = i.to_string();

        if !sync_op.job_id().is_empty() {
            job_id_to_keys
                .entry(sync_op.job_id().to_string())
                .or_default()
                .push(key.clone());
        }

        let mut depends_on = Vec::new();
        for dep in sync_op.job_dependencies() {
            if let Some(keys) = job_id_to_keys.get(dep) {
                depends_on.extend(keys.iter().cloned());
            }
        }

        envelopes.push(sync_operation_to_envelope(channel_id, sync_op, key, depends_on));
    }

    envelopes
}
