//! In-process publish/subscribe decoupling the queue, executors, sync layer
//! and read models. Payloads are a closed enum; subscriptions are explicit
//! handles that unsubscribe on drop.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::trace;
use tracing::warn;

use crate::ErrorInfo;
use crate::JobInfo;
use crate::OperationWithContext;
use crate::SyncStatus;

const DEFAULT_BUS_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
pub enum ReactorEvent {
    /// A job became eligible for dequeue
    JobAvailable {
        document_id: String,
        scope: String,
        branch: String,
        job_id: String,
    },

    JobCompleted {
        job_id: String,
        info: JobInfo,
    },

    JobFailed {
        job_id: String,
        error: ErrorInfo,
    },

    /// Operations were committed to the operation store.
    /// `source_remote` is set when the commit replayed a remote's operations,
    /// so the sync layer can suppress the echo.
    OperationsWritten {
        job_id: Option<String>,
        source_remote: Option<String>,
        operations: Arc<Vec<OperationWithContext>>,
    },

    SyncStatusChanged {
        document_id: String,
        status: SyncStatus,
    },
}

pub struct EventBus {
    tx: broadcast::Sender<ReactorEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_BUS_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Fan out to all current subscribers. Emitting with no subscribers is
    /// not an error.
    pub fn emit(
        &self,
        event: ReactorEvent,
    ) {
        trace!("EventBus::emit {:?}", &event);
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> EventSubscription {
        EventSubscription {
            rx: self.tx.subscribe(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiving half of a subscription. Dropping it unsubscribes.
pub struct EventSubscription {
    rx: broadcast::Receiver<ReactorEvent>,
}

impl EventSubscription {
    /// Next event, or `None` once the bus is gone. A slow subscriber that
    /// lags behind the bus capacity skips the missed events and keeps going.
    pub async fn recv(&mut self) -> Option<ReactorEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!("event subscriber lagged, skipped {} events", missed);
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Stream view for consumers composing with other streams. Lagged
    /// gaps surface as stream errors there; most callers want `recv`.
    pub fn into_stream(
        self
    ) -> tokio_stream::wrappers::BroadcastStream<ReactorEvent> {
        tokio_stream::wrappers::BroadcastStream::new(self.rx)
    }

    /// Non-blocking variant used by tests and drain loops.
    pub fn try_recv(&mut self) -> Option<ReactorEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(missed)) => {
                    warn!("event subscriber lagged, skipped {} events", missed);
                    continue;
                }
                Err(_) => return None,
            }
        }
    }
}
