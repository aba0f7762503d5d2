//! Document-model registry.
//!
//! The engine treats reducers as black boxes: `reduce(state, action)` must
//! be deterministic and side-effect-free. Models register per document
//! type; the executor resolves them at job time.

use std::sync::Arc;

use dashmap::DashMap;

use crate::Action;
use crate::ExecutorError;
use crate::Result;

pub trait DocumentReducer: Send + Sync + 'static {
    /// Maps `(state, action) -> state`. Must not touch anything outside its
    /// inputs.
    fn reduce(
        &self,
        state: &serde_json::Value,
        action: &Action,
    ) -> Result<serde_json::Value>;

    /// State of a freshly created document of this type
    fn initial_state(&self) -> serde_json::Value {
        serde_json::Value::Object(Default::default())
    }
}

#[derive(Default)]
pub struct DocumentModelRegistry {
    models: DashMap<String, Arc<dyn DocumentReducer>>,
}

impl DocumentModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(
        &self,
        document_type: impl Into<String>,
        reducer: Arc<dyn DocumentReducer>,
    ) {
        self.models.insert(document_type.into(), reducer);
    }

    pub fn unregister(
        &self,
        document_type: &str,
    ) -> bool {
        self.models.remove(document_type).is_some()
    }

    pub fn get(
        &self,
        document_type: &str,
    ) -> Result<Arc<dyn DocumentReducer>> {
        self.models
            .get(document_type)
            .map(|e| e.value().clone())
            .ok_or_else(|| ExecutorError::ReducerNotFound(document_type.to_string()).into())
    }

    pub fn contains(
        &self,
        document_type: &str,
    ) -> bool {
        self.models.contains_key(document_type)
    }

    pub fn list_types(&self) -> Vec<String> {
        self.models.iter().map(|e| e.key().clone()).collect()
    }
}

/// Reducer that merges action input objects into the state object. Enough
/// for wiring tests and demos without a generated document model.
pub struct MergeReducer;

impl DocumentReducer for MergeReducer {
    fn reduce(
        &self,
        state: &serde_json::Value,
        action: &Action,
    ) -> Result<serde_json::Value> {
        let mut next = state.clone();
        if let (Some(target), Some(patch)) = (next.as_object_mut(), action.input.as_object()) {
            for (k, v) in patch {
                target.insert(k.clone(), v.clone());
            }
        }
        Ok(next)
    }
}
