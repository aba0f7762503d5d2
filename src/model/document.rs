//! Document-scope header state, reconstructed by folding the `document`
//! scope log (CREATE_DOCUMENT / UPGRADE_DOCUMENT / DELETE_DOCUMENT).

use serde::Deserialize;
use serde::Serialize;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentScopeState {
    pub document_type: String,
    /// Document-model version, bumped by UPGRADE_DOCUMENT
    pub version: u32,
    pub is_deleted: bool,
    pub deleted_at_utc_ms: Option<String>,
    /// Child document ids, maintained by ADD/REMOVE_RELATIONSHIP
    #[serde(default)]
    pub children: Vec<String>,
}

/// Cross-scope document metadata cached by the meta cache.
/// Cache key is `document_id:branch`.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedDocumentMeta {
    pub state: DocumentScopeState,
    pub document_type: String,
    /// Number of committed document-scope operations; the next operation
    /// takes this as its index
    pub document_scope_revision: i64,
}
