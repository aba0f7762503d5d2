use crate::ErrorInfo;
use crate::JobResultInfo;
use crate::JobStatus;
use crate::JobTracker;

#[test]
fn test_queued_to_active_to_completed() {
    let tracker = JobTracker::new();
    tracker.insert_queued("j1");
    assert_eq!(tracker.get("j1").unwrap().status, JobStatus::Queued);

    tracker.set_active("j1");
    assert_eq!(tracker.get("j1").unwrap().status, JobStatus::Active);

    tracker.complete("j1", JobResultInfo::default());
    let info = tracker.get("j1").unwrap();
    assert_eq!(info.status, JobStatus::Completed);
    assert!(info.result.is_some());
}

#[test]
fn test_terminal_states_are_sticky() {
    let tracker = JobTracker::new();
    tracker.insert_queued("j1");
    tracker.fail("j1", ErrorInfo::new("boom"));

    // no transition may leave a terminal state
    tracker.set_active("j1");
    tracker.complete("j1", JobResultInfo::default());

    let info = tracker.get("j1").unwrap();
    assert_eq!(info.status, JobStatus::Failed);
    assert_eq!(info.error.unwrap().message, "boom");
    assert!(info.result.is_none());
}

#[test]
fn test_set_active_only_from_queued() {
    let tracker = JobTracker::new();
    tracker.insert_queued("j1");
    tracker.complete("j1", JobResultInfo::default());
    tracker.set_active("j1");
    assert_eq!(tracker.get("j1").unwrap().status, JobStatus::Completed);
}

#[test]
fn test_unknown_job_is_none() {
    let tracker = JobTracker::new();
    assert!(tracker.get("ghost").is_none());
    // updates on unknown ids are ignored, not panics
    tracker.set_active("ghost");
    tracker.fail("ghost", ErrorInfo::new("x"));
}
