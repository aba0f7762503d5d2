//! Per-document sync status, derived from mailbox occupancy across all
//! tracked remotes.
//!
//! Only documents that have been seen (at least one tracked mailbox event)
//! report a status; unknown documents report `None` — no opinion, not
//! "synced".

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Deserialize;
use serde::Serialize;
use tracing::trace;

use crate::Channel;
use crate::EventBus;
use crate::ReactorEvent;
use crate::SyncOperation;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncStatus {
    Synced,
    Incoming,
    Outgoing,
    OutgoingAndIncoming,
    Error,
}

#[derive(Debug, Default, Clone, Copy)]
struct DocCounts {
    inbox: i64,
    outbox: i64,
    error: i64,
}

#[derive(Default)]
struct TrackerInner {
    /// document_id -> remote_name -> counts
    counts: HashMap<String, HashMap<String, DocCounts>>,
}

impl TrackerInner {
    fn bump<F>(
        &mut self,
        document_id: &str,
        remote_name: &str,
        f: F,
    ) where
        F: FnOnce(&mut DocCounts),
    {
        let counts = self
            .counts
            .entry(document_id.to_string())
            .or_default()
            .entry(remote_name.to_string())
            .or_default();
        f(counts);
        counts.inbox = counts.inbox.max(0);
        counts.outbox = counts.outbox.max(0);
        counts.error = counts.error.max(0);
    }

    /// Aggregates across every remote: any error wins, then both
    /// directions, then each direction, then synced.
    fn derive(
        &self,
        document_id: &str,
    ) -> Option<SyncStatus> {
        let remotes = self.counts.get(document_id)?;
        let mut total = DocCounts::default();
        for counts in remotes.values() {
            total.inbox += counts.inbox;
            total.outbox += counts.outbox;
            total.error += counts.error;
        }

        Some(if total.error > 0 {
            SyncStatus::Error
        } else if total.inbox > 0 && total.outbox > 0 {
            SyncStatus::OutgoingAndIncoming
        } else if total.inbox > 0 {
            SyncStatus::Incoming
        } else if total.outbox > 0 {
            SyncStatus::Outgoing
        } else {
            SyncStatus::Synced
        })
    }
}

pub struct SyncStatusTracker {
    inner: Arc<Mutex<TrackerInner>>,
    event_bus: Option<Arc<EventBus>>,
}

impl SyncStatusTracker {
    pub fn new(event_bus: Option<Arc<EventBus>>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(TrackerInner::default())),
            event_bus,
        }
    }

    /// Subscribes to the remote's mailboxes; every add/remove updates the
    /// per-document counters and re-derives the status.
    pub fn track_remote(
        &self,
        remote_name: &str,
        channel: &dyn Channel,
    ) {
        self.wire(remote_name, &channel.inbox(), MailboxKind::Inbox);
        self.wire(remote_name, &channel.outbox(), MailboxKind::Outbox);
        self.wire(remote_name, &channel.dead_letter(), MailboxKind::DeadLetter);
    }

    /// Drops all counters contributed by a removed remote.
    pub fn untrack_remote(
        &self,
        remote_name: &str,
    ) {
        let mut inner = self.inner.lock();
        for remotes in inner.counts.values_mut() {
            remotes.remove(remote_name);
        }
    }

    pub fn get_status(
        &self,
        document_id: &str,
    ) -> Option<SyncStatus> {
        self.inner.lock().derive(document_id)
    }

    fn wire(
        &self,
        remote_name: &str,
        mailbox: &crate::Mailbox,
        kind: MailboxKind,
    ) {
        for added in [true, false] {
            let inner = self.inner.clone();
            let event_bus = self.event_bus.clone();
            let remote_name = remote_name.to_string();
            let register = move |ops: &[SyncOperation]| {
                for op in ops {
                    // inbound units that lost their attribution are not
                    // sync traffic we can report on
                    if kind == MailboxKind::Inbox && op.remote_name().is_empty() {
                        continue;
                    }
                    let delta: i64 = if added { 1 } else { -1 };
                    let document_id = op.document_id().to_string();
                    {
                        let mut inner = inner.lock();
                        inner.bump(&document_id, &remote_name, |c| match kind {
                            MailboxKind::Inbox => c.inbox += delta,
                            MailboxKind::Outbox => c.outbox += delta,
                            MailboxKind::DeadLetter => c.error += delta,
                        });
                    }
                    let status = inner.lock().derive(&document_id);
                    if let (Some(bus), Some(status)) = (&event_bus, status) {
                        trace!("sync status of {} -> {:?}", document_id, status);
                        bus.emit(ReactorEvent::SyncStatusChanged {
                            document_id,
                            status,
                        });
                    }
                }
                Ok(())
            };
            if added {
                mailbox.on_added(register);
            } else {
                mailbox.on_removed(register);
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MailboxKind {
    Inbox,
    Outbox,
    DeadLetter,
}
