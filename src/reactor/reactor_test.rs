use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::Action;
use crate::DocumentModelRegistry;
use crate::Error;
use crate::Job;
use crate::JobPlanEntry;
use crate::JobStatus;
use crate::MergeReducer;
use crate::QueueError;
use crate::Reactor;
use crate::ReactorBuilder;
use crate::Settings;
use crate::ViewFilter;

async fn test_reactor() -> Arc<Reactor> {
    let registry = Arc::new(DocumentModelRegistry::new());
    registry.register("test/doc", Arc::new(MergeReducer));
    ReactorBuilder::new(Settings::default())
        .registry(registry)
        .build()
        .expect("reactor builds")
}

async fn run_to_completion(reactor: &Reactor, info: crate::JobInfo) -> crate::JobInfo {
    tokio::time::timeout(
        Duration::from_secs(5),
        reactor.wait_for_job(&info.id, None),
    )
    .await
    .expect("job did not settle in time")
    .expect("job resolved")
}

#[tokio::test]
async fn test_create_then_meta_reflects_revision() {
    let reactor = test_reactor().await;

    let info = reactor.create(Some("d1"), "test/doc", None).unwrap();
    assert_eq!(info.status, JobStatus::Queued);

    let done = run_to_completion(&reactor, info).await;
    assert_eq!(done.status, JobStatus::Completed);

    let view = reactor.get("d1", None, None).await.unwrap();
    assert_eq!(view.document_type, "test/doc");
    assert!(!view.is_deleted);
    assert_eq!(view.revisions.revision.get("document"), Some(&0));

    reactor.shutdown().await;
}

#[tokio::test]
async fn test_mutate_reduces_state() {
    let reactor = test_reactor().await;

    let create = reactor.create(Some("d1"), "test/doc", None).unwrap();
    run_to_completion(&reactor, create).await;

    let mutate = reactor
        .mutate(
            "d1",
            "global",
            None,
            vec![Action::new("SET_TITLE", json!({"title": "hello"}), "global")],
            None,
        )
        .unwrap();
    let done = run_to_completion(&reactor, mutate).await;
    assert_eq!(done.status, JobStatus::Completed);
    assert_eq!(done.result.as_ref().unwrap().revision, 0);

    let view = reactor
        .get(
            "d1",
            Some(ViewFilter {
                branch: "main".to_string(),
                scopes: vec!["global".to_string()],
            }),
            None,
        )
        .await
        .unwrap();
    assert_eq!(view.state["global"]["title"], "hello");

    let ops = reactor
        .get_operations("d1", "global", None, -1, None)
        .await
        .unwrap();
    assert_eq!(ops.len(), 1);

    reactor.shutdown().await;
}

#[tokio::test]
async fn test_delete_document_marks_meta() {
    let reactor = test_reactor().await;

    let create = reactor.create(Some("d1"), "test/doc", None).unwrap();
    run_to_completion(&reactor, create).await;
    let delete = reactor.delete_document("d1", None).unwrap();
    run_to_completion(&reactor, delete).await;

    let view = reactor.get("d1", None, None).await.unwrap();
    assert!(view.is_deleted);

    reactor.shutdown().await;
}

#[tokio::test]
async fn test_get_job_status_and_unknown_job() {
    let reactor = test_reactor().await;

    let info = reactor.create(Some("d1"), "test/doc", None).unwrap();
    assert!(reactor.get_job_status(&info.id, None).is_ok());
    assert!(matches!(
        reactor.get_job_status("ghost", None),
        Err(Error::Queue(QueueError::JobNotFound(_)))
    ));

    reactor.shutdown().await;
}

#[tokio::test]
async fn test_mutate_batch_rejects_cycles_atomically() {
    let reactor = test_reactor().await;

    let job_a = Job::mutate(
        "d1",
        "global",
        "main",
        vec![Action::new("SET_TITLE", json!({}), "global")],
    );
    let job_b = Job::mutate(
        "d2",
        "global",
        "main",
        vec![Action::new("SET_TITLE", json!({}), "global")],
    );
    let entries = vec![
        JobPlanEntry::new("a", job_a).depends_on(["b"]),
        JobPlanEntry::new("b", job_b).depends_on(["a"]),
    ];

    assert!(matches!(
        reactor.mutate_batch(entries, None),
        Err(Error::Queue(QueueError::DependencyCycle(_)))
    ));

    reactor.shutdown().await;
}

#[tokio::test]
async fn test_children_round_trip() {
    let reactor = test_reactor().await;

    for doc in ["parent", "c1", "c2"] {
        let info = reactor.create(Some(doc), "test/doc", None).unwrap();
        run_to_completion(&reactor, info).await;
    }

    let add = reactor
        .add_children("parent", &["c1".to_string(), "c2".to_string()], None)
        .unwrap();
    run_to_completion(&reactor, add).await;

    let view = reactor.get("parent", None, None).await.unwrap();
    assert_eq!(view.children, vec!["c1".to_string(), "c2".to_string()]);

    let remove = reactor
        .remove_children("parent", &["c1".to_string()], None)
        .unwrap();
    run_to_completion(&reactor, remove).await;

    let view = reactor.get("parent", None, None).await.unwrap();
    assert_eq!(view.children, vec!["c2".to_string()]);

    reactor.shutdown().await;
}

#[tokio::test]
async fn test_get_by_slug_resolves_created_document() {
    let reactor = test_reactor().await;

    let info = reactor
        .create_with_slug(Some("d1"), "test/doc", Some("my-doc"), None)
        .unwrap();
    run_to_completion(&reactor, info).await;

    let view = reactor.get_by_slug("my-doc", None, None).await.unwrap();
    assert_eq!(view.document_id, "d1");

    assert!(reactor.get_by_slug("missing", None, None).await.is_err());

    reactor.shutdown().await;
}

#[tokio::test]
async fn test_find_reads_global_ordinal_index() {
    let reactor = test_reactor().await;

    for doc in ["d1", "d2"] {
        let info = reactor.create(Some(doc), "test/doc", None).unwrap();
        run_to_completion(&reactor, info).await;
    }

    let all = reactor.find(0, None).await.unwrap();
    assert_eq!(all.len(), 2);
    let after_first = reactor.find(all[0].context.ordinal, None).await.unwrap();
    assert_eq!(after_first.len(), 1);

    reactor.shutdown().await;
}

#[tokio::test]
async fn test_consistency_frontier_follows_commits() {
    let reactor = test_reactor().await;

    let info = reactor.create(Some("d1"), "test/doc", None).unwrap();
    run_to_completion(&reactor, info).await;

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(reactor.consistency().write_frontier() >= 1);

    reactor.shutdown().await;
}

#[tokio::test]
async fn test_cancelled_call_rejects_promptly() {
    let reactor = test_reactor().await;
    let cancel = CancellationToken::new();
    cancel.cancel();

    assert!(matches!(
        reactor.create(Some("d1"), "test/doc", Some(&cancel)),
        Err(Error::Cancelled)
    ));

    reactor.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_drains_and_rejects_new_work() {
    let reactor = test_reactor().await;

    let info = reactor.create(Some("d1"), "test/doc", None).unwrap();
    let status = reactor.shutdown().await;
    assert!(status.clean);

    // the queued job was drained before teardown
    let done = reactor.get_job_status(&info.id, None).unwrap();
    assert!(done.status.is_terminal());

    assert!(reactor.create(Some("d2"), "test/doc", None).is_err());
}
