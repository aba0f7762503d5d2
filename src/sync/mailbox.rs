//! Mailboxes: ordered, acknowledgment-tracked buffers of sync operations.
//!
//! Every channel owns three: inbox, outbox and dead-letter. Two ordinals
//! track progress: `latest_ordinal` (highest position ever admitted) and
//! `ack_ordinal` (highest acknowledged position). `ack_ordinal` advances
//! only when a contained operation transitions to Applied, never moves
//! backwards, and never passes `latest_ordinal`.

use std::sync::Arc;
use std::sync::Weak;

use parking_lot::Mutex;
use tracing::trace;
use tracing::warn;

use crate::Error;
use crate::MailboxAggregateError;
use crate::Result;
use crate::SyncOperation;
use crate::SyncOperationStatus;

pub type MailboxCallback = dyn Fn(&[SyncOperation]) -> Result<()> + Send + Sync;

enum BufferedEvent {
    Added(Vec<SyncOperation>),
    Removed(Vec<SyncOperation>),
}

#[derive(Default)]
struct MailboxInner {
    /// Insertion order; an add with a known id replaces in place
    items: Vec<SyncOperation>,
    ack_ordinal: u64,
    latest_ordinal: u64,
    on_added: Vec<Arc<MailboxCallback>>,
    on_removed: Vec<Arc<MailboxCallback>>,
    paused: bool,
    buffered: Vec<BufferedEvent>,
}

pub struct Mailbox {
    inner: Mutex<MailboxInner>,
    // handed to item status observers so Applied can advance the ack
    weak_self: Weak<Mailbox>,
}

impl Mailbox {
    pub fn new() -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            inner: Mutex::new(MailboxInner::default()),
            weak_self: weak.clone(),
        })
    }

    /// Seeds both ordinals from a persisted cursor.
    pub fn init(
        &self,
        cursor_ordinal: u64,
    ) {
        let mut inner = self.inner.lock();
        inner.ack_ordinal = cursor_ordinal;
        inner.latest_ordinal = inner.latest_ordinal.max(cursor_ordinal);
    }

    /// Inserts (or replaces by id), advances `latest_ordinal`, and
    /// subscribes to each item's status stream so a transition to Applied
    /// advances `ack_ordinal`. Fans out to every registered callback;
    /// callback failures are collected and reported together after all
    /// callbacks ran.
    pub fn add(
        &self,
        items: Vec<SyncOperation>,
    ) -> Result<()> {
        if items.is_empty() {
            return Ok(());
        }

        {
            let mut inner = self.inner.lock();
            for item in &items {
                match inner.items.iter().position(|i| i.id() == item.id()) {
                    Some(pos) => inner.items[pos] = item.clone(),
                    None => inner.items.push(item.clone()),
                }
                inner.latest_ordinal = inner.latest_ordinal.max(item.ordinal());
            }
        }

        for item in &items {
            let weak = self.weak_self.clone();
            item.on_status(move |op, _prev, next| {
                if next == SyncOperationStatus::Applied {
                    if let Some(mailbox) = weak.upgrade() {
                        mailbox.note_applied(op.ordinal());
                    }
                }
            });
            // acknowledged before the subscription existed
            if item.status() == SyncOperationStatus::Applied {
                self.note_applied(item.ordinal());
            }
        }

        self.fan_out(BufferedEvent::Added(items))
    }

    /// Evicts by id. Items the mailbox does not hold are ignored; only the
    /// actually evicted ones are reported to callbacks.
    pub fn remove(
        &self,
        items: &[SyncOperation],
    ) -> Result<()> {
        let evicted: Vec<SyncOperation> = {
            let mut inner = self.inner.lock();
            items
                .iter()
                .filter_map(|item| {
                    let pos = inner.items.iter().position(|i| i.id() == item.id())?;
                    Some(inner.items.remove(pos))
                })
                .collect()
        };

        if evicted.is_empty() {
            return Ok(());
        }
        self.fan_out(BufferedEvent::Removed(evicted))
    }

    fn note_applied(
        &self,
        ordinal: u64,
    ) {
        let mut inner = self.inner.lock();
        let capped = ordinal.min(inner.latest_ordinal);
        if capped > inner.ack_ordinal {
            trace!("mailbox ack ordinal {} -> {}", inner.ack_ordinal, capped);
            inner.ack_ordinal = capped;
        }
    }

    fn fan_out(
        &self,
        event: BufferedEvent,
    ) -> Result<()> {
        let callbacks = {
            let mut inner = self.inner.lock();
            if inner.paused {
                inner.buffered.push(event);
                return Ok(());
            }
            match &event {
                BufferedEvent::Added(_) => inner.on_added.clone(),
                BufferedEvent::Removed(_) => inner.on_removed.clone(),
            }
        };

        let items = match &event {
            BufferedEvent::Added(items) | BufferedEvent::Removed(items) => items,
        };

        let mut errors = Vec::new();
        for callback in callbacks {
            if let Err(e) = callback(items) {
                warn!("mailbox callback failed: {}", e);
                errors.push(e);
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::Sync(MailboxAggregateError { errors }.into()))
        }
    }

    pub fn on_added<F>(
        &self,
        callback: F,
    ) where
        F: Fn(&[SyncOperation]) -> Result<()> + Send + Sync + 'static,
    {
        self.inner.lock().on_added.push(Arc::new(callback));
    }

    pub fn on_removed<F>(
        &self,
        callback: F,
    ) where
        F: Fn(&[SyncOperation]) -> Result<()> + Send + Sync + 'static,
    {
        self.inner.lock().on_removed.push(Arc::new(callback));
    }

    /// While paused, add/remove still mutate the mailbox but their events
    /// are buffered instead of fanned out.
    pub fn pause(&self) {
        self.inner.lock().paused = true;
    }

    /// Unpauses and replays the buffered events in arrival order.
    pub fn resume(&self) -> Result<()> {
        self.inner.lock().paused = false;
        self.flush()
    }

    /// Replays buffered events in order, reporting callback failures as
    /// one aggregate.
    pub fn flush(&self) -> Result<()> {
        let buffered: Vec<BufferedEvent> = {
            let mut inner = self.inner.lock();
            std::mem::take(&mut inner.buffered)
        };

        let mut errors = Vec::new();
        for event in buffered {
            let callbacks = {
                let inner = self.inner.lock();
                match &event {
                    BufferedEvent::Added(_) => inner.on_added.clone(),
                    BufferedEvent::Removed(_) => inner.on_removed.clone(),
                }
            };
            let items = match &event {
                BufferedEvent::Added(items) | BufferedEvent::Removed(items) => items,
            };
            for callback in callbacks {
                if let Err(e) = callback(items) {
                    errors.push(e);
                }
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::Sync(MailboxAggregateError { errors }.into()))
        }
    }

    pub fn is_paused(&self) -> bool {
        self.inner.lock().paused
    }

    pub fn get(
        &self,
        id: &str,
    ) -> Option<SyncOperation> {
        self.inner.lock().items.iter().find(|i| i.id() == id).cloned()
    }

    pub fn items(&self) -> Vec<SyncOperation> {
        self.inner.lock().items.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().items.is_empty()
    }

    pub fn ack_ordinal(&self) -> u64 {
        self.inner.lock().ack_ordinal
    }

    pub fn latest_ordinal(&self) -> u64 {
        self.inner.lock().latest_ordinal
    }
}

/// Outbox coalescing layer: adds accumulate and land on the wrapped
/// mailbox as one batch, either when the batch fills or on the flush tick.
pub struct BufferedMailbox {
    mailbox: Arc<Mailbox>,
    pending: Arc<Mutex<Vec<SyncOperation>>>,
    max_batch: usize,
    cancel: tokio_util::sync::CancellationToken,
}

impl BufferedMailbox {
    pub fn new(
        mailbox: Arc<Mailbox>,
        max_batch: usize,
        flush_interval_ms: u64,
    ) -> Arc<Self> {
        let buffered = Arc::new(Self {
            mailbox: mailbox.clone(),
            pending: Arc::new(Mutex::new(Vec::new())),
            max_batch: max_batch.max(1),
            cancel: tokio_util::sync::CancellationToken::new(),
        });

        let pending = buffered.pending.clone();
        let cancel = buffered.cancel.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(std::time::Duration::from_millis(
                flush_interval_ms.max(1),
            ));
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tick.tick() => {
                        let batch: Vec<SyncOperation> = {
                            let mut pending = pending.lock();
                            std::mem::take(&mut *pending)
                        };
                        if !batch.is_empty() {
                            if let Err(e) = mailbox.add(batch) {
                                warn!("buffered mailbox flush failed: {}", e);
                            }
                        }
                    }
                }
            }
        });

        buffered
    }

    pub fn add(
        &self,
        items: Vec<SyncOperation>,
    ) -> Result<()> {
        let batch = {
            let mut pending = self.pending.lock();
            pending.extend(items);
            if pending.len() >= self.max_batch {
                Some(std::mem::take(&mut *pending))
            } else {
                None
            }
        };
        match batch {
            Some(batch) => self.mailbox.add(batch),
            None => Ok(()),
        }
    }

    /// Lands everything accumulated so far, immediately.
    pub fn flush(&self) -> Result<()> {
        let batch: Vec<SyncOperation> = {
            let mut pending = self.pending.lock();
            std::mem::take(&mut *pending)
        };
        if batch.is_empty() {
            return Ok(());
        }
        self.mailbox.add(batch)
    }

    pub fn mailbox(&self) -> &Arc<Mailbox> {
        &self.mailbox
    }

    pub fn shutdown(&self) -> Result<()> {
        self.cancel.cancel();
        self.flush()
    }
}

impl Drop for BufferedMailbox {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
