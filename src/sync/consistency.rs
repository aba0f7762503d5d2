//! Consistency tracker: read-model lag relative to the operation store's
//! write frontier.
//!
//! The frontier is the highest global ordinal known to have committed;
//! each named read model reports the highest ordinal it has reflected.
//! `wait_for` answers read-your-writes queries: it resolves once the view
//! has caught up to the ordinal the caller observed at write time.

use std::collections::HashMap;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::Error;
use crate::Result;

pub struct ConsistencyTracker {
    frontier: watch::Sender<u64>,
    views: Mutex<HashMap<String, watch::Sender<u64>>>,
}

impl Default for ConsistencyTracker {
    fn default() -> Self {
        let (frontier, _) = watch::channel(0);
        Self {
            frontier,
            views: Mutex::new(HashMap::new()),
        }
    }
}

impl ConsistencyTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Operations up to `ordinal` have committed.
    pub fn note_write(
        &self,
        ordinal: u64,
    ) {
        self.frontier.send_if_modified(|current| {
            if ordinal > *current {
                *current = ordinal;
                true
            } else {
                false
            }
        });
    }

    /// The named read model has reflected everything up to `ordinal`.
    pub fn note_applied(
        &self,
        view: &str,
        ordinal: u64,
    ) {
        let mut views = self.views.lock();
        let sender = views.entry(view.to_string()).or_insert_with(|| {
            let (tx, _) = watch::channel(0);
            tx
        });
        sender.send_if_modified(|current| {
            if ordinal > *current {
                *current = ordinal;
                true
            } else {
                false
            }
        });
    }

    pub fn write_frontier(&self) -> u64 {
        *self.frontier.borrow()
    }

    pub fn applied(
        &self,
        view: &str,
    ) -> u64 {
        self.views
            .lock()
            .get(view)
            .map(|tx| *tx.borrow())
            .unwrap_or(0)
    }

    /// Ordinals the view still has to catch up on
    pub fn lag(
        &self,
        view: &str,
    ) -> u64 {
        self.write_frontier().saturating_sub(self.applied(view))
    }

    /// Resolves once `view` has applied at least `ordinal`. Cancellation
    /// releases the waiter without affecting the view's progress.
    pub async fn wait_for(
        &self,
        view: &str,
        ordinal: u64,
        cancel: Option<CancellationToken>,
    ) -> Result<()> {
        let mut rx = {
            let mut views = self.views.lock();
            let sender = views.entry(view.to_string()).or_insert_with(|| {
                let (tx, _) = watch::channel(0);
                tx
            });
            sender.subscribe()
        };

        if *rx.borrow() >= ordinal {
            return Ok(());
        }

        loop {
            let changed = match &cancel {
                Some(token) => {
                    tokio::select! {
                        _ = token.cancelled() => return Err(Error::Cancelled),
                        changed = rx.changed() => changed,
                    }
                }
                None => rx.changed().await,
            };
            if changed.is_err() {
                // view sender dropped; report what we know
                return Err(Error::Fatal(format!("read model '{view}' is gone")));
            }
            if *rx.borrow() >= ordinal {
                return Ok(());
            }
        }
    }
}
