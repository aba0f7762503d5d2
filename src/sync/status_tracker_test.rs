use std::sync::Arc;

use super::sync_operation_test::sync_op;
use crate::InternalChannel;
use crate::SyncStatus;
use crate::SyncStatusTracker;

fn tracked_channel(tracker: &SyncStatusTracker, remote: &str) -> Arc<InternalChannel> {
    let channel = InternalChannel::new(remote);
    tracker.track_remote(remote, channel.as_ref());
    channel
}

#[tokio::test]
async fn test_unknown_document_reports_none() {
    let tracker = SyncStatusTracker::new(None);
    assert_eq!(tracker.get_status("unknown-doc"), None);
}

#[tokio::test]
async fn test_outgoing_while_outbox_occupied_then_synced() {
    let tracker = SyncStatusTracker::new(None);
    let channel = tracked_channel(&tracker, "remote-1");

    let op = sync_op("doc-1", "remote-1", &[1]);
    channel.outbox().add(vec![op.clone()]).unwrap();
    assert_eq!(tracker.get_status("doc-1"), Some(SyncStatus::Outgoing));

    channel.outbox().remove(&[op]).unwrap();
    assert_eq!(tracker.get_status("doc-1"), Some(SyncStatus::Synced));
}

#[tokio::test]
async fn test_incoming_while_inbox_occupied_then_synced() {
    let tracker = SyncStatusTracker::new(None);
    let channel = tracked_channel(&tracker, "remote-1");

    let op = sync_op("doc-1", "some-remote", &[1]);
    channel.inbox().add(vec![op.clone()]).unwrap();
    assert_eq!(tracker.get_status("doc-1"), Some(SyncStatus::Incoming));

    channel.inbox().remove(&[op]).unwrap();
    assert_eq!(tracker.get_status("doc-1"), Some(SyncStatus::Synced));
}

#[tokio::test]
async fn test_inbox_items_without_remote_attribution_are_ignored() {
    let tracker = SyncStatusTracker::new(None);
    let channel = tracked_channel(&tracker, "remote-1");

    channel
        .inbox()
        .add(vec![sync_op("doc-1", "", &[1])])
        .unwrap();
    assert_eq!(tracker.get_status("doc-1"), None);
}

#[tokio::test]
async fn test_both_directions_active() {
    let tracker = SyncStatusTracker::new(None);
    let channel = tracked_channel(&tracker, "remote-1");

    channel
        .inbox()
        .add(vec![sync_op("doc-1", "some-remote", &[1])])
        .unwrap();
    channel
        .outbox()
        .add(vec![sync_op("doc-1", "remote-1", &[2])])
        .unwrap();

    assert_eq!(
        tracker.get_status("doc-1"),
        Some(SyncStatus::OutgoingAndIncoming)
    );
}

#[tokio::test]
async fn test_any_error_wins_regardless_of_other_counts() {
    let tracker = SyncStatusTracker::new(None);
    let channel = tracked_channel(&tracker, "remote-1");

    channel
        .inbox()
        .add(vec![sync_op("doc-1", "some-remote", &[1])])
        .unwrap();
    channel
        .outbox()
        .add(vec![sync_op("doc-1", "remote-1", &[2])])
        .unwrap();
    let dead = sync_op("doc-1", "remote-1", &[3]);
    channel.dead_letter().add(vec![dead.clone()]).unwrap();

    assert_eq!(tracker.get_status("doc-1"), Some(SyncStatus::Error));

    // inspecting and draining the dead letter clears the error state
    channel.dead_letter().remove(&[dead]).unwrap();
    assert_eq!(
        tracker.get_status("doc-1"),
        Some(SyncStatus::OutgoingAndIncoming)
    );
}

#[tokio::test]
async fn test_status_aggregates_across_remotes() {
    let tracker = SyncStatusTracker::new(None);
    let channel_a = tracked_channel(&tracker, "remote-a");
    let channel_b = tracked_channel(&tracker, "remote-b");

    // remote A fully acknowledged: its op came and went
    let acked = sync_op("doc-1", "remote-a", &[1]);
    channel_a.outbox().add(vec![acked.clone()]).unwrap();
    channel_a.outbox().remove(&[acked]).unwrap();

    // remote B still has a pending inbox item
    channel_b
        .inbox()
        .add(vec![sync_op("doc-1", "some-remote", &[2])])
        .unwrap();

    // not Synced: status must aggregate across all remotes
    assert_eq!(tracker.get_status("doc-1"), Some(SyncStatus::Incoming));
}

#[tokio::test]
async fn test_untrack_remote_drops_its_contribution() {
    let tracker = SyncStatusTracker::new(None);
    let channel = tracked_channel(&tracker, "remote-1");

    channel
        .outbox()
        .add(vec![sync_op("doc-1", "remote-1", &[1])])
        .unwrap();
    assert_eq!(tracker.get_status("doc-1"), Some(SyncStatus::Outgoing));

    tracker.untrack_remote("remote-1");
    assert_eq!(tracker.get_status("doc-1"), Some(SyncStatus::Synced));
}

#[tokio::test]
async fn test_documents_are_tracked_independently() {
    let tracker = SyncStatusTracker::new(None);
    let channel = tracked_channel(&tracker, "remote-1");

    channel
        .outbox()
        .add(vec![sync_op("doc-1", "remote-1", &[1])])
        .unwrap();

    assert_eq!(tracker.get_status("doc-1"), Some(SyncStatus::Outgoing));
    assert_eq!(tracker.get_status("doc-2"), None);
}
