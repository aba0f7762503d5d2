use std::sync::Arc;

use serde_json::json;

use crate::Action;
use crate::BackoffPolicy;
use crate::DocumentJobExecutor;
use crate::DocumentMetaCache;
use crate::DocumentModelRegistry;
use crate::Error;
use crate::EventBus;
use crate::ExecutorError;
use crate::Job;
use crate::JobExecutor;
use crate::MemOperationStore;
use crate::MergeReducer;
use crate::Operation;
use crate::OperationStore;
use crate::ReactorEvent;
use crate::StateCache;

struct Fixture {
    store: Arc<MemOperationStore>,
    meta_cache: Arc<DocumentMetaCache>,
    state_cache: Arc<StateCache>,
    event_bus: Arc<EventBus>,
    executor: DocumentJobExecutor,
}

fn fixture() -> Fixture {
    let store = Arc::new(MemOperationStore::new());
    let registry = Arc::new(DocumentModelRegistry::new());
    registry.register("test/doc", Arc::new(MergeReducer));
    let meta_cache = Arc::new(DocumentMetaCache::new(store.clone(), 100));
    let state_cache = Arc::new(StateCache::new(100));
    let event_bus = Arc::new(EventBus::new());
    let policy = BackoffPolicy {
        max_retries: 3,
        timeout_ms: 1000,
        base_delay_ms: 1,
        max_delay_ms: 5,
    };
    let executor = DocumentJobExecutor::new(
        store.clone(),
        registry,
        meta_cache.clone(),
        state_cache.clone(),
        event_bus.clone(),
        policy,
    );
    Fixture {
        store,
        meta_cache,
        state_cache,
        event_bus,
        executor,
    }
}

fn create_job(document_id: &str) -> Job {
    Job::mutate(
        document_id,
        "document",
        "main",
        vec![Action::new(
            "CREATE_DOCUMENT",
            json!({"model": "test/doc"}),
            "document",
        )],
    )
}

fn set_title_job(document_id: &str, title: &str) -> Job {
    Job::mutate(
        document_id,
        "global",
        "main",
        vec![Action::new("SET_TITLE", json!({"title": title}), "global")],
    )
}

#[tokio::test]
async fn test_create_document_commits_to_document_scope() {
    let f = fixture();

    let outcome = f.executor.execute_job(&create_job("d1")).await.unwrap();
    assert_eq!(outcome.operations.len(), 1);
    assert_eq!(outcome.operations[0].operation.index, 0);
    assert_eq!(outcome.operations[0].context.scope, "document");

    let meta = f.meta_cache.get_document_meta("d1", "main", None).await.unwrap();
    assert_eq!(meta.document_type, "test/doc");
    assert_eq!(meta.document_scope_revision, 1);
}

#[tokio::test]
async fn test_regular_action_applies_reducer_and_emits_event() {
    let f = fixture();
    let mut sub = f.event_bus.subscribe();

    f.executor.execute_job(&create_job("d1")).await.unwrap();
    let job = set_title_job("d1", "hello");
    let outcome = f.executor.execute_job(&job).await.unwrap();

    assert_eq!(outcome.operations.len(), 1);
    let op = &outcome.operations[0].operation;
    assert_eq!(op.index, 0);
    assert_eq!(op.action.action_type, "SET_TITLE");

    // two OperationsWritten emissions: create then mutate
    let mut written = 0;
    while let Some(event) = sub.try_recv() {
        if let ReactorEvent::OperationsWritten { operations, .. } = event {
            written += operations.len();
        }
    }
    assert_eq!(written, 2);

    // state cache reflects the reduced state at the new revision
    let cached = f.state_cache.get_state("d1", "global", "main").unwrap();
    assert_eq!(cached.revision, 0);
    assert_eq!(cached.state["title"], "hello");
}

#[tokio::test]
async fn test_action_on_missing_document_fails() {
    let f = fixture();
    let result = f.executor.execute_job(&set_title_job("ghost", "x")).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn test_action_on_deleted_document_fails() {
    let f = fixture();
    f.executor.execute_job(&create_job("d1")).await.unwrap();

    let delete = Job::mutate(
        "d1",
        "document",
        "main",
        vec![Action::new("DELETE_DOCUMENT", json!({}), "document")],
    );
    f.executor.execute_job(&delete).await.unwrap();

    let result = f.executor.execute_job(&set_title_job("d1", "x")).await;
    assert!(matches!(
        result,
        Err(Error::Executor(ExecutorError::DocumentDeleted { .. }))
    ));
}

#[tokio::test]
async fn test_stale_state_cache_recovers_via_retry() {
    let f = fixture();
    f.executor.execute_job(&create_job("d1")).await.unwrap();
    f.executor
        .execute_job(&set_title_job("d1", "first"))
        .await
        .unwrap();

    // poison the state cache with a stale revision so the first commit
    // attempt uses a wrong expected revision
    f.state_cache
        .put_state("d1", "global", "main", -1, json!({}));

    let outcome = f
        .executor
        .execute_job(&set_title_job("d1", "second"))
        .await
        .unwrap();
    assert_eq!(outcome.operations[0].operation.index, 1);

    let ops = f.store.get_since("d1", "global", "main", -1).await.unwrap();
    assert_eq!(ops.len(), 2);
}

#[tokio::test]
async fn test_upgrade_document_bumps_meta_version() {
    let f = fixture();
    f.executor.execute_job(&create_job("d1")).await.unwrap();

    let upgrade = Job::mutate(
        "d1",
        "document",
        "main",
        vec![Action::new(
            "UPGRADE_DOCUMENT",
            json!({"version": 2}),
            "document",
        )],
    );
    f.executor.execute_job(&upgrade).await.unwrap();

    let meta = f.meta_cache.get_document_meta("d1", "main", None).await.unwrap();
    assert_eq!(meta.state.version, 2);
    assert_eq!(meta.document_scope_revision, 2);
}

#[tokio::test]
async fn test_load_job_dedupes_and_reanchors() {
    let f = fixture();
    f.executor.execute_job(&create_job("d1")).await.unwrap();
    f.executor
        .execute_job(&set_title_job("d1", "local"))
        .await
        .unwrap();

    let history = f.store.get_since("d1", "global", "main", -1).await.unwrap();
    assert_eq!(history.len(), 1);

    // remote sends back the op we already have, plus one new op
    let duplicate = history[0].clone();
    let incoming_new = {
        let action = Action::new("SET_TITLE", json!({"title": "remote"}), "global");
        Operation::from_action(action, 0, 0, &json!({"title": "remote"}))
    };
    let new_id = incoming_new.id.clone();

    let load = Job::load(
        "d1",
        "global",
        "main",
        vec![duplicate, incoming_new],
        Some("remote-a".to_string()),
    );
    let outcome = f.executor.execute_job(&load).await.unwrap();

    assert_eq!(outcome.operations.len(), 1);
    let committed = &outcome.operations[0].operation;
    // id preserved, index re-anchored after the local log
    assert_eq!(committed.id, new_id);
    assert_eq!(committed.index, 1);

    // feeding the same batch again commits nothing (idempotent)
    let replay = Job::load(
        "d1",
        "global",
        "main",
        f.store.get_since("d1", "global", "main", -1).await.unwrap(),
        Some("remote-a".to_string()),
    );
    let outcome = f.executor.execute_job(&replay).await.unwrap();
    assert!(outcome.operations.is_empty());
}

#[tokio::test]
async fn test_load_job_carries_source_remote_in_event() {
    let f = fixture();
    f.executor.execute_job(&create_job("d1")).await.unwrap();
    let mut sub = f.event_bus.subscribe();

    let incoming = {
        let action = Action::new("SET_TITLE", json!({"title": "remote"}), "global");
        Operation::from_action(action, 0, 0, &json!({"title": "remote"}))
    };
    let load = Job::load(
        "d1",
        "global",
        "main",
        vec![incoming],
        Some("remote-a".to_string()),
    );
    f.executor.execute_job(&load).await.unwrap();

    let mut found = false;
    while let Some(event) = sub.try_recv() {
        if let ReactorEvent::OperationsWritten { source_remote, .. } = event {
            assert_eq!(source_remote.as_deref(), Some("remote-a"));
            found = true;
        }
    }
    assert!(found);
}
