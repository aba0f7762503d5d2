// -
// Scopes and branches

/// The scope whose log carries document lifecycle operations
pub const DOCUMENT_SCOPE: &str = "document";
/// Default branch for documents that do not branch
pub const MAIN_BRANCH: &str = "main";

// -
// Document lifecycle action types

pub const ACTION_CREATE_DOCUMENT: &str = "CREATE_DOCUMENT";
pub const ACTION_UPGRADE_DOCUMENT: &str = "UPGRADE_DOCUMENT";
pub const ACTION_DELETE_DOCUMENT: &str = "DELETE_DOCUMENT";
pub const ACTION_ADD_RELATIONSHIP: &str = "ADD_RELATIONSHIP";
pub const ACTION_REMOVE_RELATIONSHIP: &str = "REMOVE_RELATIONSHIP";

/// Revision of an empty (document, scope, branch) log
pub const EMPTY_LOG_REVISION: i64 = -1;

// -
// Sled database tree namespaces

pub(crate) const OPERATION_LOG_TREE: &str = "_operation_log_tree";
pub(crate) const OPERATION_ID_TREE: &str = "_operation_id_tree";
pub(crate) const OPERATION_ORDINAL_TREE: &str = "_operation_ordinal_tree";
pub(crate) const SYNC_REMOTE_TREE: &str = "_sync_remote_tree";
pub(crate) const SYNC_CURSOR_TREE: &str = "_sync_cursor_tree";
