use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use parking_lot::Mutex;

use super::sync_operation_test::sync_op;
use crate::Error;
use crate::Mailbox;
use crate::SyncError;

#[tokio::test]
async fn test_add_and_get() {
    let mailbox = Mailbox::new();
    let op = sync_op("d1", "remote-a", &[1]);

    mailbox.add(vec![op.clone()]).unwrap();

    assert_eq!(mailbox.len(), 1);
    assert_eq!(mailbox.get(op.id()).unwrap().id(), op.id());
    assert!(mailbox.get("missing").is_none());
}

#[tokio::test]
async fn test_add_replaces_same_id() {
    let mailbox = Mailbox::new();
    let op = sync_op("d1", "remote-a", &[1]);

    mailbox.add(vec![op.clone()]).unwrap();
    mailbox.add(vec![op.clone()]).unwrap();

    assert_eq!(mailbox.len(), 1);
}

#[tokio::test]
async fn test_latest_ordinal_tracks_max() {
    let mailbox = Mailbox::new();

    mailbox.add(vec![sync_op("d1", "remote-a", &[3])]).unwrap();
    assert_eq!(mailbox.latest_ordinal(), 3);

    mailbox.add(vec![sync_op("d2", "remote-a", &[9])]).unwrap();
    assert_eq!(mailbox.latest_ordinal(), 9);

    // a lower ordinal never regresses the high-water mark
    mailbox.add(vec![sync_op("d3", "remote-a", &[5])]).unwrap();
    assert_eq!(mailbox.latest_ordinal(), 9);
}

#[tokio::test]
async fn test_ack_advances_only_on_applied_and_monotonically() {
    let mailbox = Mailbox::new();
    let first = sync_op("d1", "remote-a", &[3]);
    let second = sync_op("d2", "remote-a", &[7]);

    mailbox.add(vec![first.clone(), second.clone()]).unwrap();
    assert_eq!(mailbox.ack_ordinal(), 0);

    second.transported();
    second.applied();
    assert_eq!(mailbox.ack_ordinal(), 7);
    assert!(mailbox.ack_ordinal() <= mailbox.latest_ordinal());

    // the earlier op applying must not move the ack backwards
    first.transported();
    first.applied();
    assert_eq!(mailbox.ack_ordinal(), 7);
}

#[tokio::test]
async fn test_ack_never_exceeds_latest() {
    let mailbox = Mailbox::new();
    let op = sync_op("d1", "remote-a", &[4]);
    mailbox.add(vec![op.clone()]).unwrap();

    op.applied();
    assert!(mailbox.ack_ordinal() <= mailbox.latest_ordinal());
    assert_eq!(mailbox.ack_ordinal(), 4);
}

#[tokio::test]
async fn test_init_seeds_cursor() {
    let mailbox = Mailbox::new();
    mailbox.init(42);
    assert_eq!(mailbox.ack_ordinal(), 42);
    assert_eq!(mailbox.latest_ordinal(), 42);
}

#[tokio::test]
async fn test_callbacks_fire_in_registration_order() {
    let mailbox = Mailbox::new();
    let order = Arc::new(Mutex::new(Vec::new()));

    for i in 0..3 {
        let order = order.clone();
        mailbox.on_added(move |_| {
            order.lock().push(i);
            Ok(())
        });
    }

    mailbox.add(vec![sync_op("d1", "remote-a", &[1])]).unwrap();
    assert_eq!(*order.lock(), vec![0, 1, 2]);
}

#[tokio::test]
async fn test_callback_errors_aggregate_without_blocking_delivery() {
    let mailbox = Mailbox::new();
    let delivered = Arc::new(AtomicUsize::new(0));

    mailbox.on_added(|_| Err(Error::Fatal("first listener broke".to_string())));
    {
        let delivered = delivered.clone();
        mailbox.on_added(move |_| {
            delivered.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
    }
    mailbox.on_added(|_| Err(Error::Fatal("third listener broke".to_string())));

    let result = mailbox.add(vec![sync_op("d1", "remote-a", &[1])]);

    // all candidates notified, errors reported after the fact
    assert_eq!(delivered.load(Ordering::SeqCst), 1);
    match result {
        Err(Error::Sync(SyncError::Mailbox(aggregate))) => {
            assert_eq!(aggregate.errors.len(), 2);
        }
        other => panic!("expected aggregate error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_remove_reports_only_evicted_items() {
    let mailbox = Mailbox::new();
    let kept = sync_op("d1", "remote-a", &[1]);
    let gone = sync_op("d2", "remote-a", &[2]);
    let stranger = sync_op("d3", "remote-a", &[3]);

    mailbox.add(vec![kept.clone(), gone.clone()]).unwrap();

    let removed_ids = Arc::new(Mutex::new(Vec::new()));
    {
        let removed_ids = removed_ids.clone();
        mailbox.on_removed(move |ops| {
            removed_ids
                .lock()
                .extend(ops.iter().map(|op| op.id().to_string()));
            Ok(())
        });
    }

    mailbox.remove(&[gone.clone(), stranger]).unwrap();

    assert_eq!(mailbox.len(), 1);
    assert_eq!(*removed_ids.lock(), vec![gone.id().to_string()]);
}

#[tokio::test]
async fn test_pause_buffers_and_resume_replays_in_order() {
    let mailbox = Mailbox::new();
    let events = Arc::new(Mutex::new(Vec::new()));

    {
        let events = events.clone();
        mailbox.on_added(move |ops| {
            events
                .lock()
                .extend(ops.iter().map(|op| format!("add:{}", op.document_id())));
            Ok(())
        });
    }
    {
        let events = events.clone();
        mailbox.on_removed(move |ops| {
            events
                .lock()
                .extend(ops.iter().map(|op| format!("del:{}", op.document_id())));
            Ok(())
        });
    }

    mailbox.pause();
    let a = sync_op("a", "remote-a", &[1]);
    let b = sync_op("b", "remote-a", &[2]);
    mailbox.add(vec![a.clone(), b.clone()]).unwrap();
    mailbox.remove(&[a]).unwrap();

    // mailbox state mutates, but nothing fans out while paused
    assert_eq!(mailbox.len(), 1);
    assert!(events.lock().is_empty());

    mailbox.resume().unwrap();
    assert!(!mailbox.is_paused());
    assert_eq!(*events.lock(), vec!["add:a", "add:b", "del:a"]);
}

#[tokio::test]
async fn test_buffered_mailbox_flushes_by_size_and_on_demand() {
    let mailbox = Mailbox::new();
    let added_batches = Arc::new(Mutex::new(Vec::new()));
    {
        let added_batches = added_batches.clone();
        mailbox.on_added(move |ops| {
            added_batches.lock().push(ops.len());
            Ok(())
        });
    }

    // long flush interval: only size and explicit flush apply here
    let buffered = crate::BufferedMailbox::new(mailbox.clone(), 3, 60_000);

    buffered.add(vec![sync_op("a", "r", &[1])]).unwrap();
    buffered.add(vec![sync_op("b", "r", &[2])]).unwrap();
    assert!(added_batches.lock().is_empty());

    // third item fills the batch
    buffered.add(vec![sync_op("c", "r", &[3])]).unwrap();
    assert_eq!(*added_batches.lock(), vec![3]);

    buffered.add(vec![sync_op("d", "r", &[4])]).unwrap();
    buffered.flush().unwrap();
    assert_eq!(*added_batches.lock(), vec![3, 1]);
    assert_eq!(mailbox.len(), 4);
}
