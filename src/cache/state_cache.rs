//! Scope-state write cache: the last reduced state per
//! (document, scope, branch), pinned to the revision it reflects. Executors
//! consult it before replaying a log through the reducer.

use parking_lot::Mutex;

use crate::LruArena;

#[derive(Debug, Clone, PartialEq)]
pub struct CachedState {
    /// The log revision this state reflects
    pub revision: i64,
    pub state: serde_json::Value,
}

fn cache_key(
    document_id: &str,
    scope: &str,
    branch: &str,
) -> String {
    format!("{document_id}:{scope}:{branch}")
}

pub struct StateCache {
    cache: Mutex<LruArena<String, CachedState>>,
}

impl StateCache {
    pub fn new(max_states: usize) -> Self {
        Self {
            cache: Mutex::new(LruArena::new(max_states)),
        }
    }

    pub fn get_state(
        &self,
        document_id: &str,
        scope: &str,
        branch: &str,
    ) -> Option<CachedState> {
        self.cache
            .lock()
            .get(&cache_key(document_id, scope, branch))
            .cloned()
    }

    pub fn put_state(
        &self,
        document_id: &str,
        scope: &str,
        branch: &str,
        revision: i64,
        state: serde_json::Value,
    ) {
        self.cache.lock().insert(
            cache_key(document_id, scope, branch),
            CachedState { revision, state },
        );
    }

    pub fn invalidate(
        &self,
        document_id: &str,
        scope: &str,
        branch: &str,
    ) {
        self.cache
            .lock()
            .remove(&cache_key(document_id, scope, branch));
    }

    /// Drops every scope and branch of the document
    pub fn invalidate_document(
        &self,
        document_id: &str,
    ) {
        let prefix = format!("{document_id}:");
        self.cache.lock().remove_where(|k| k.starts_with(&prefix));
    }

    pub fn clear(&self) {
        self.cache.lock().clear();
    }
}
