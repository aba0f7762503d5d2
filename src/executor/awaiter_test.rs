use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::ErrorInfo;
use crate::Error;
use crate::EventBus;
use crate::ExecutorError;
use crate::JobAwaiter;
use crate::JobResultInfo;
use crate::JobStatus;
use crate::JobTracker;
use crate::ReactorEvent;

fn setup() -> (Arc<EventBus>, Arc<JobTracker>, JobAwaiter) {
    let bus = Arc::new(EventBus::new());
    let tracker = Arc::new(JobTracker::new());
    let awaiter = JobAwaiter::new(&bus, tracker.clone(), 25);
    (bus, tracker, awaiter)
}

fn complete(bus: &EventBus, tracker: &JobTracker, job_id: &str) {
    tracker.complete(job_id, JobResultInfo::default());
    let info = tracker.get(job_id).unwrap();
    bus.emit(ReactorEvent::JobCompleted {
        job_id: job_id.to_string(),
        info,
    });
}

#[tokio::test]
async fn test_waiter_resolves_on_completion_event() {
    let (bus, tracker, awaiter) = setup();
    tracker.insert_queued("j1");

    let wait = awaiter.wait_for_job("j1", None);
    tokio::spawn({
        let bus = bus.clone();
        let tracker = tracker.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            complete(&bus, &tracker, "j1");
        }
    });

    let info = tokio::time::timeout(Duration::from_secs(2), wait)
        .await
        .expect("no timeout")
        .expect("job resolved");
    assert_eq!(info.status, JobStatus::Completed);
}

#[tokio::test]
async fn test_already_terminal_resolves_immediately() {
    let (_bus, tracker, awaiter) = setup();
    tracker.insert_queued("j1");
    tracker.fail("j1", ErrorInfo::new("boom"));

    let info = awaiter.wait_for_job("j1", None).await.unwrap();
    assert_eq!(info.status, JobStatus::Failed);
}

#[tokio::test]
async fn test_fallback_timer_catches_missed_event() {
    let (_bus, tracker, awaiter) = setup();
    tracker.insert_queued("j1");

    let wait = awaiter.wait_for_job("j1", None);
    // settle the tracker without emitting any event; only the shared
    // fallback timer can resolve this waiter
    tokio::spawn({
        let tracker = tracker.clone();
        async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            tracker.complete("j1", JobResultInfo::default());
        }
    });

    let info = tokio::time::timeout(Duration::from_secs(2), wait)
        .await
        .expect("no timeout")
        .expect("job resolved");
    assert_eq!(info.status, JobStatus::Completed);
}

#[tokio::test]
async fn test_cancel_rejects_only_the_cancelled_waiter() {
    let (bus, tracker, awaiter) = setup();
    let awaiter = Arc::new(awaiter);
    tracker.insert_queued("j1");

    let cancel = CancellationToken::new();
    let cancelled_wait = {
        let awaiter = awaiter.clone();
        let token = cancel.clone();
        tokio::spawn(async move { awaiter.wait_for_job("j1", Some(token)).await })
    };
    let surviving_wait = {
        let awaiter = awaiter.clone();
        tokio::spawn(async move { awaiter.wait_for_job("j1", None).await })
    };

    tokio::time::sleep(Duration::from_millis(10)).await;
    cancel.cancel();

    let cancelled = cancelled_wait.await.unwrap();
    assert!(matches!(cancelled, Err(Error::Cancelled)));

    complete(&bus, &tracker, "j1");
    let survived = tokio::time::timeout(Duration::from_secs(2), surviving_wait)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(survived.unwrap().status, JobStatus::Completed);
}

#[tokio::test]
async fn test_shutdown_rejects_all_outstanding_waiters() {
    let (_bus, tracker, awaiter) = setup();
    let awaiter = Arc::new(awaiter);
    tracker.insert_queued("j1");
    tracker.insert_queued("j2");

    let w1 = {
        let awaiter = awaiter.clone();
        tokio::spawn(async move { awaiter.wait_for_job("j1", None).await })
    };
    let w2 = {
        let awaiter = awaiter.clone();
        tokio::spawn(async move { awaiter.wait_for_job("j2", None).await })
    };

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(awaiter.pending_count(), 2);
    awaiter.shutdown();

    for handle in [w1, w2] {
        let result = handle.await.unwrap();
        assert!(matches!(
            result,
            Err(Error::Executor(ExecutorError::AwaiterShutdown))
        ));
    }

    // new waits after shutdown are rejected synchronously
    let result = awaiter.wait_for_job("j3", None).await;
    assert!(matches!(
        result,
        Err(Error::Executor(ExecutorError::AwaiterShutdown))
    ));
}

#[tokio::test]
async fn test_multiple_waiters_on_same_id_share_resolution() {
    let (bus, tracker, awaiter) = setup();
    let awaiter = Arc::new(awaiter);
    tracker.insert_queued("j1");

    let handles: Vec<_> = (0..3)
        .map(|_| {
            let awaiter = awaiter.clone();
            tokio::spawn(async move { awaiter.wait_for_job("j1", None).await })
        })
        .collect();

    tokio::time::sleep(Duration::from_millis(10)).await;
    complete(&bus, &tracker, "j1");

    for handle in handles {
        let info = tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(info.status, JobStatus::Completed);
    }
}
