//! Remotes: a named pairing of a channel with a collection and filter.

use std::sync::Arc;

use serde::Deserialize;
use serde::Serialize;

use crate::Channel;

/// Restricts which operations a remote receives. Empty lists match
/// everything; an empty branch matches every branch.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RemoteFilter {
    #[serde(default)]
    pub document_id: Vec<String>,
    #[serde(default)]
    pub scope: Vec<String>,
    #[serde(default)]
    pub branch: String,
}

impl RemoteFilter {
    pub fn matches(
        &self,
        document_id: &str,
        scope: &str,
        branch: &str,
    ) -> bool {
        let doc_ok = self.document_id.is_empty()
            || self.document_id.iter().any(|d| d == "*" || d == document_id);
        let scope_ok = self.scope.is_empty() || self.scope.iter().any(|s| s == "*" || s == scope);
        let branch_ok = self.branch.is_empty() || self.branch == "*" || self.branch == branch;
        doc_ok && scope_ok && branch_ok
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RemoteOptions {
    /// Skip seeding the outbox with historical operations on `add`
    #[serde(default)]
    pub disable_backfill: bool,
}

/// A configured remote. The channel must be shut down before the remote
/// leaves the registry.
#[derive(Clone)]
pub struct Remote {
    pub id: String,
    pub name: String,
    pub collection_id: String,
    pub filter: RemoteFilter,
    pub options: RemoteOptions,
    pub channel: Arc<dyn Channel>,
}

impl std::fmt::Debug for Remote {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        f.debug_struct("Remote")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("collection_id", &self.collection_id)
            .field("filter", &self.filter)
            .finish()
    }
}
