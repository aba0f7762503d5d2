use std::sync::Arc;

use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::Action;
use crate::ErrorInfo;
use crate::Error;
use crate::EventBus;
use crate::InMemoryJobQueue;
use crate::Job;
use crate::JobPlanEntry;
use crate::QueueError;
use crate::ReactorEvent;

fn job_for(document_id: &str) -> Job {
    Job::mutate(
        document_id,
        "global",
        "main",
        vec![Action::new("SET_VALUE", json!({}), "global")],
    )
}

fn new_queue() -> (Arc<InMemoryJobQueue>, Arc<EventBus>) {
    let bus = Arc::new(EventBus::new());
    (InMemoryJobQueue::new(bus.clone()), bus)
}

#[tokio::test]
async fn test_enqueue_emits_job_available() {
    let (queue, bus) = new_queue();
    let mut sub = bus.subscribe();

    let job = job_for("d1");
    let job_id = job.id.clone();
    queue.enqueue(job).unwrap();

    match sub.recv().await {
        Some(ReactorEvent::JobAvailable { job_id: id, .. }) => assert_eq!(id, job_id),
        other => panic!("unexpected event: {:?}", other),
    }
    assert_eq!(queue.total_size(), 1);
}

#[tokio::test]
async fn test_fifo_order_within_key() {
    let (queue, _) = new_queue();

    let first = job_for("d1");
    let second = job_for("d1");
    let (first_id, second_id) = (first.id.clone(), second.id.clone());
    queue.enqueue(first).unwrap();
    queue.enqueue(second).unwrap();

    let claim = queue.dequeue("d1", "global", "main", None).unwrap().unwrap();
    assert_eq!(claim.job.id, first_id);
    claim.complete();

    let claim = queue.dequeue("d1", "global", "main", None).unwrap().unwrap();
    assert_eq!(claim.job.id, second_id);
}

#[tokio::test]
async fn test_same_document_never_has_two_active_jobs() {
    let (queue, _) = new_queue();

    queue.enqueue(job_for("d1")).unwrap();
    queue.enqueue(job_for("d1")).unwrap();

    let claim = queue.dequeue_next(None).unwrap().expect("first claim");
    // second job for the same document must not be claimable
    assert!(queue.dequeue_next(None).unwrap().is_none());

    claim.complete();
    assert!(queue.dequeue_next(None).unwrap().is_some());
}

#[tokio::test]
async fn test_different_documents_proceed_independently() {
    let (queue, _) = new_queue();

    queue.enqueue(job_for("d1")).unwrap();
    queue.enqueue(job_for("d2")).unwrap();

    let a = queue.dequeue_next(None).unwrap().expect("claim 1");
    let b = queue.dequeue_next(None).unwrap().expect("claim 2");
    assert_ne!(a.job.document_id, b.job.document_id);
}

#[tokio::test]
async fn test_dependency_gates_dequeue() {
    let (queue, _) = new_queue();

    let dep = job_for("d1");
    let dep_id = dep.id.clone();
    let gated = job_for("d2").with_queue_hint(vec![dep_id.clone()]);
    let gated_id = gated.id.clone();

    queue.enqueue(gated).unwrap();
    queue.enqueue(dep).unwrap();

    // only the dependency is eligible
    let claim = queue.dequeue_next(None).unwrap().expect("dependency first");
    assert_eq!(claim.job.id, dep_id);
    assert!(queue.dequeue_next(None).unwrap().is_none());

    claim.complete();
    let claim = queue.dequeue_next(None).unwrap().expect("gated job");
    assert_eq!(claim.job.id, gated_id);
}

#[tokio::test]
async fn test_failed_dependency_still_unblocks_dependents() {
    let (queue, _) = new_queue();

    let dep = job_for("d1");
    let gated = job_for("d2").with_queue_hint(vec![dep.id.clone()]);
    queue.enqueue(dep).unwrap();
    queue.enqueue(gated).unwrap();

    let claim = queue.dequeue_next(None).unwrap().unwrap();
    claim.fail(ErrorInfo::new("boom"));

    assert!(queue.dequeue_next(None).unwrap().is_some());
}

#[tokio::test]
async fn test_enqueue_plan_validates_cycles_before_accepting() {
    let (queue, _) = new_queue();

    let entries = vec![
        JobPlanEntry::new("a", job_for("d1")).depends_on(["b"]),
        JobPlanEntry::new("b", job_for("d2")).depends_on(["a"]),
    ];

    assert!(matches!(
        queue.enqueue_plan(entries),
        Err(Error::Queue(QueueError::DependencyCycle(_)))
    ));
    // nothing was partially applied
    assert_eq!(queue.total_size(), 0);
}

#[tokio::test]
async fn test_enqueue_plan_orders_and_maps_hints() {
    let (queue, _) = new_queue();

    let entries = vec![
        JobPlanEntry::new("last", job_for("d3")).depends_on(["mid"]),
        JobPlanEntry::new("mid", job_for("d2")).depends_on(["root"]),
        JobPlanEntry::new("root", job_for("d1")),
    ];

    let ids = queue.enqueue_plan(entries).unwrap();
    assert_eq!(ids.len(), 3);

    // executing in claim order must respect dependencies
    let mut executed = Vec::new();
    while let Some(claim) = queue.dequeue_next(None).unwrap() {
        executed.push(claim.job.document_id.clone());
        claim.complete();
    }
    assert_eq!(executed, vec!["d1", "d2", "d3"]);
}

#[tokio::test]
async fn test_retry_requeues_with_incremented_count() {
    let (queue, _) = new_queue();

    queue.enqueue(job_for("d1")).unwrap();
    let claim = queue.dequeue_next(None).unwrap().unwrap();
    let job_id = claim.job.id.clone();
    claim.retry(Some(ErrorInfo::new("conflict"))).unwrap();

    let claim = queue.dequeue_next(None).unwrap().expect("requeued job");
    assert_eq!(claim.job.id, job_id);
    assert_eq!(claim.job.retry_count, 1);
    assert_eq!(claim.job.error_history.len(), 1);
}

#[tokio::test]
async fn test_paused_queue_returns_none_and_resume_reannounces() {
    let (queue, bus) = new_queue();

    queue.enqueue(job_for("d1")).unwrap();
    queue.pause();
    assert!(queue.dequeue_next(None).unwrap().is_none());

    let mut sub = bus.subscribe();
    queue.resume();
    assert!(matches!(
        sub.recv().await,
        Some(ReactorEvent::JobAvailable { .. })
    ));
    assert!(queue.dequeue_next(None).unwrap().is_some());
}

#[tokio::test]
async fn test_blocked_queue_rejects_enqueue_and_signals_drain() {
    let (queue, _) = new_queue();

    queue.enqueue(job_for("d1")).unwrap();
    let drained = queue.block().expect("not yet drained");

    assert!(matches!(
        queue.enqueue(job_for("d2")),
        Err(Error::Queue(QueueError::Blocked))
    ));

    let claim = queue.dequeue_next(None).unwrap().unwrap();
    claim.complete();

    drained.await.expect("drain signal");
    assert!(queue.is_drained());
}

#[tokio::test]
async fn test_block_on_drained_queue_returns_none() {
    let (queue, _) = new_queue();
    assert!(queue.block().is_none());
}

#[tokio::test]
async fn test_cancelled_dequeue_rejects() {
    let (queue, _) = new_queue();
    let cancel = CancellationToken::new();
    cancel.cancel();

    assert!(matches!(
        queue.dequeue_next(Some(&cancel)),
        Err(Error::Cancelled)
    ));
}

#[tokio::test]
async fn test_remove_pending_job() {
    let (queue, _) = new_queue();

    let job = job_for("d1");
    let job_id = job.id.clone();
    queue.enqueue(job).unwrap();

    assert!(queue.remove(&job_id));
    assert!(!queue.remove(&job_id));
    assert_eq!(queue.total_size(), 0);
}
