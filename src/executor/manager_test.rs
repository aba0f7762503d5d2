use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use crate::Action;
use crate::DocumentJobExecutorFactory;
use crate::DocumentMetaCache;
use crate::DocumentModelRegistry;
use crate::EventBus;
use crate::ExecutorConfig;
use crate::InMemoryJobQueue;
use crate::Job;
use crate::JobAwaiter;
use crate::JobExecutorManager;
use crate::JobStatus;
use crate::JobTracker;
use crate::MemOperationStore;
use crate::MergeReducer;
use crate::Settings;
use crate::StateCache;

struct Rig {
    queue: Arc<InMemoryJobQueue>,
    tracker: Arc<JobTracker>,
    manager: Arc<JobExecutorManager>,
    awaiter: JobAwaiter,
}

fn rig(workers: usize) -> Rig {
    let settings = Settings::default();
    let bus = Arc::new(EventBus::new());
    let store = Arc::new(MemOperationStore::new());
    let registry = Arc::new(DocumentModelRegistry::new());
    registry.register("test/doc", Arc::new(MergeReducer));
    let meta_cache = Arc::new(DocumentMetaCache::new(store.clone(), 100));
    let state_cache = Arc::new(StateCache::new(100));
    let factory = Arc::new(DocumentJobExecutorFactory::new(
        store,
        registry,
        meta_cache,
        state_cache,
        bus.clone(),
        settings.retry.commit,
    ));
    let queue = InMemoryJobQueue::new(bus.clone());
    let tracker = Arc::new(JobTracker::new());
    let config = ExecutorConfig {
        workers,
        worker_idle_interval_ms: 20,
        ..Default::default()
    };
    let manager = Arc::new(JobExecutorManager::new(
        queue.clone(),
        factory,
        bus.clone(),
        tracker.clone(),
        config,
    ));
    manager.start();
    let awaiter = JobAwaiter::new(&bus, tracker.clone(), 25);
    Rig {
        queue,
        tracker,
        manager,
        awaiter,
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

fn submit(rig: &Rig, job: Job) -> String {
    let id = job.id.clone();
    rig.tracker.insert_queued(&id);
    rig.queue.enqueue(job).unwrap();
    id
}

#[tokio::test]
async fn test_manager_processes_enqueued_job() {
    let rig = rig(1);

    let job_id = submit(&rig, create_job("d1"));
    let info = tokio::time::timeout(
        Duration::from_secs(5),
        rig.awaiter.wait_for_job(&job_id, None),
    )
    .await
    .expect("no timeout")
    .expect("job resolved");

    assert_eq!(info.status, JobStatus::Completed);
    let result = info.result.unwrap();
    assert_eq!(result.operation_ids.len(), 1);
    assert_eq!(result.revision, 0);

    let status = rig.manager.get_status();
    assert_eq!(status.succeeded, 1);
    assert_eq!(status.failed, 0);

    rig.manager.shutdown().await;
}

#[tokio::test]
async fn test_failed_job_reports_error_payload() {
    let rig = rig(1);

    // no CREATE first, so the mutate has no document to run against
    let job = Job::mutate(
        "ghost",
        "global",
        "main",
        vec![Action::new("SET_TITLE", json!({"title": "x"}), "global")],
    );
    let job_id = submit(&rig, job);

    let info = tokio::time::timeout(
        Duration::from_secs(5),
        rig.awaiter.wait_for_job(&job_id, None),
    )
    .await
    .unwrap()
    .unwrap();

    assert_eq!(info.status, JobStatus::Failed);
    assert!(info.error.is_some());
    assert_eq!(rig.manager.get_status().failed, 1);

    rig.manager.shutdown().await;
}

#[tokio::test]
async fn test_jobs_on_different_documents_complete_with_two_workers() {
    let rig = rig(2);

    let ids: Vec<String> = (0..4)
        .map(|i| submit(&rig, create_job(&format!("d{i}"))))
        .collect();

    for id in ids {
        let info = tokio::time::timeout(
            Duration::from_secs(5),
            rig.awaiter.wait_for_job(&id, None),
        )
        .await
        .unwrap()
        .unwrap();
        assert_eq!(info.status, JobStatus::Completed);
    }

    assert_eq!(rig.manager.get_status().succeeded, 4);
    rig.manager.shutdown().await;
}

#[tokio::test]
async fn test_pause_holds_jobs_and_resume_releases_them() {
    let rig = rig(1);

    rig.manager.pause_all();
    let job_id = submit(&rig, create_job("d1"));

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(rig.tracker.get(&job_id).unwrap().status, JobStatus::Queued);
    assert!(rig.manager.get_status().paused);

    rig.manager.resume_all();
    let info = tokio::time::timeout(
        Duration::from_secs(5),
        rig.awaiter.wait_for_job(&job_id, None),
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(info.status, JobStatus::Completed);

    rig.manager.shutdown().await;
}

#[tokio::test]
async fn test_scale_adjusts_worker_count() {
    let rig = rig(1);
    assert_eq!(rig.manager.get_status().workers, 1);

    rig.manager.scale(3);
    assert_eq!(rig.manager.get_status().workers, 3);

    rig.manager.scale(0);
    assert_eq!(rig.manager.get_status().workers, 0);

    // no workers: the job stays queued
    let job_id = submit(&rig, create_job("d1"));
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(rig.tracker.get(&job_id).unwrap().status, JobStatus::Queued);

    rig.manager.scale(1);
    let info = tokio::time::timeout(
        Duration::from_secs(5),
        rig.awaiter.wait_for_job(&job_id, None),
    )
    .await
    .unwrap()
    .unwrap();
    assert_eq!(info.status, JobStatus::Completed);

    rig.manager.shutdown().await;
}
