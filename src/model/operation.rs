//! Core model: operations and actions.
//!
//! An operation is the committed form of an action: it pins the action to a
//! position in one (document, scope, branch) log. Once committed it is never
//! mutated or reordered.

use std::collections::HashMap;

use serde::Deserialize;
use serde::Serialize;
use sha2::Digest;
use sha2::Sha256;

use crate::utils::timestamp_utc_ms_string;

/// A single state-transition request, produced by a caller and mapped over
/// document state by a document-model reducer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Action {
    pub id: String,
    #[serde(rename = "type")]
    pub action_type: String,
    pub input: serde_json::Value,
    pub scope: String,
    pub timestamp_utc_ms: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Value>,
}

impl Action {
    pub fn new(
        action_type: impl Into<String>,
        input: serde_json::Value,
        scope: impl Into<String>,
    ) -> Self {
        Self {
            id: nanoid::nanoid!(),
            action_type: action_type.into(),
            input,
            scope: scope.into(),
            timestamp_utc_ms: timestamp_utc_ms_string(),
            context: None,
        }
    }
}

/// An action committed at `index` of its log. `skip` records how many prior
/// entries an undo/redo invalidates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    pub id: String,
    pub action: Action,
    pub index: i64,
    pub skip: u64,
    pub hash: String,
    pub timestamp_utc_ms: String,
}

impl Operation {
    /// Builds the operation committing `action` at `index`, hashing the
    /// post-reduction state.
    pub fn from_action(
        action: Action,
        index: i64,
        skip: u64,
        resulting_state: &serde_json::Value,
    ) -> Self {
        Self {
            id: nanoid::nanoid!(),
            action,
            index,
            skip,
            hash: hash_state(resulting_state),
            timestamp_utc_ms: timestamp_utc_ms_string(),
        }
    }
}

/// Hex sha-256 over the canonical JSON encoding of a scope state.
pub fn hash_state(state: &serde_json::Value) -> String {
    let bytes = serde_json::to_vec(state).unwrap_or_default();
    let digest = Sha256::digest(&bytes);
    let mut out = String::with_capacity(digest.len() * 2);
    for b in digest {
        out.push_str(&format!("{:02x}", b));
    }
    out
}

/// Routing metadata attached when an operation crosses a subsystem boundary
/// (event bus, sync envelopes, global ordinal index).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationContext {
    pub document_id: String,
    pub document_type: String,
    pub scope: String,
    pub branch: String,
    /// Global, cross-document commit ordinal assigned by the operation store
    pub ordinal: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationWithContext {
    pub operation: Operation,
    pub context: OperationContext,
}

/// Reconstructed cross-scope header metadata. Never persisted directly;
/// always derived from the operation store.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentRevisions {
    /// Latest committed index per scope
    pub revision: HashMap<String, i64>,
    /// Max operation timestamp across scopes
    pub latest_timestamp: String,
}
