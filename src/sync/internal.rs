//! In-process channel pair: moves sync operations between two local
//! channel halves directly, no wire. Used for reactor-to-reactor sync
//! inside one process and for integration tests.

use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::Channel;
use crate::ChannelConfig;
use crate::ChannelError;
use crate::ChannelFactory;
use crate::CursorStore;
use crate::Mailbox;
use crate::RemoteFilter;
use crate::Result;
use crate::SyncOperation;
use crate::SyncOperationStatus;

use config::ConfigError;

pub struct InternalChannel {
    name: String,
    inbox: Arc<Mailbox>,
    outbox: Arc<Mailbox>,
    dead_letter: Arc<Mailbox>,
    is_shutdown: Arc<AtomicBool>,
    peer_tx: Arc<Mutex<Option<mpsc::UnboundedSender<SyncOperation>>>>,
    recv_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
    cancel: CancellationToken,
}

impl InternalChannel {
    pub fn new(name: impl Into<String>) -> Arc<Self> {
        let channel = Arc::new(Self {
            name: name.into(),
            inbox: Mailbox::new(),
            outbox: Mailbox::new(),
            dead_letter: Mailbox::new(),
            is_shutdown: Arc::new(AtomicBool::new(false)),
            peer_tx: Arc::new(Mutex::new(None)),
            recv_task: Mutex::new(None),
            cancel: CancellationToken::new(),
        });

        // outbox entries go straight onto the peer's wire
        let peer_tx = channel.peer_tx.clone();
        let is_shutdown = channel.is_shutdown.clone();
        channel.outbox.on_added(move |ops| {
            if is_shutdown.load(Ordering::SeqCst) {
                return Ok(());
            }
            let guard = peer_tx.lock();
            let Some(tx) = guard.as_ref() else {
                // unpaired; operations wait in the outbox
                return Ok(());
            };
            for op in ops {
                if tx.send(op.clone()).is_ok() {
                    op.transported();
                }
            }
            Ok(())
        });

        channel
    }

    /// Wires two halves back to back and starts both receive loops.
    pub fn connect(
        a: &Arc<InternalChannel>,
        b: &Arc<InternalChannel>,
    ) {
        let (tx_ab, rx_ab) = mpsc::unbounded_channel();
        let (tx_ba, rx_ba) = mpsc::unbounded_channel();

        *a.peer_tx.lock() = Some(tx_ab);
        *b.peer_tx.lock() = Some(tx_ba);
        a.spawn_recv(rx_ba);
        b.spawn_recv(rx_ab);

        // drain anything that queued before pairing
        for half in [a, b] {
            let pending = half.outbox.items();
            let tx = half.peer_tx.lock();
            if let Some(tx) = tx.as_ref() {
                for op in pending {
                    if op.status() == SyncOperationStatus::TransportPending
                        && tx.send(op.clone()).is_ok()
                    {
                        op.transported();
                    }
                }
            }
        }
    }

    /// Convenience: two connected halves.
    pub fn pair(
        name_a: impl Into<String>,
        name_b: impl Into<String>,
    ) -> (Arc<InternalChannel>, Arc<InternalChannel>) {
        let a = Self::new(name_a);
        let b = Self::new(name_b);
        Self::connect(&a, &b);
        (a, b)
    }

    fn spawn_recv(
        &self,
        mut rx: mpsc::UnboundedReceiver<SyncOperation>,
    ) {
        let inbox = self.inbox.clone();
        let name = self.name.clone();
        let cancel = self.cancel.clone();
        let is_shutdown = self.is_shutdown.clone();

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    received = rx.recv() => {
                        let Some(original) = received else { return };
                        if is_shutdown.load(Ordering::SeqCst) {
                            continue;
                        }

                        // the receiving side gets its own unit, attributed
                        // to this remote; its fate is mirrored back so the
                        // sender's outbox acks or dead-letters
                        let mirror = SyncOperation::new(
                            original.job_id(),
                            name.clone(),
                            original.document_id(),
                            original.scopes().to_vec(),
                            original.branch(),
                            original.operations().to_vec(),
                            original.job_dependencies().to_vec(),
                        );
                        mirror.transported();

                        let sender_side = original.clone();
                        mirror.on_status(move |op, _prev, next| match next {
                            SyncOperationStatus::Applied => sender_side.applied(),
                            SyncOperationStatus::Error => sender_side.failed(
                                op.error().unwrap_or_else(|| "peer failed to apply".to_string()),
                            ),
                            _ => {}
                        });

                        debug!("internal channel '{}' received {} op(s)", name, mirror.operations().len());
                        if let Err(e) = inbox.add(vec![mirror]) {
                            debug!("internal inbox callbacks reported: {}", e);
                        }
                    }
                }
            }
        });
        *self.recv_task.lock() = Some(task);
    }
}

#[async_trait]
impl Channel for InternalChannel {
    fn inbox(&self) -> Arc<Mailbox> {
        self.inbox.clone()
    }

    fn outbox(&self) -> Arc<Mailbox> {
        self.outbox.clone()
    }

    fn dead_letter(&self) -> Arc<Mailbox> {
        self.dead_letter.clone()
    }

    fn send(
        &self,
        operations: Vec<SyncOperation>,
    ) -> Result<()> {
        if self.is_shutdown.load(Ordering::SeqCst) {
            return Err(ChannelError::Shutdown.into());
        }
        self.outbox.add(operations)
    }

    async fn init(&self) -> Result<()> {
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        self.is_shutdown.store(true, Ordering::SeqCst);
        self.cancel.cancel();
        if let Some(task) = self.recv_task.lock().take() {
            let _ = task.await;
        }
        Ok(())
    }
}

/// Pairs channels by `pair_key`: the first instance with a key waits, the
/// second connects to it.
#[derive(Default)]
pub struct InternalChannelFactory {
    waiting: DashMap<String, Arc<InternalChannel>>,
}

impl InternalChannelFactory {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ChannelFactory for InternalChannelFactory {
    fn instance(
        &self,
        _channel_id: &str,
        remote_name: &str,
        config: &ChannelConfig,
        _cursor_store: Arc<dyn CursorStore>,
        _collection_id: &str,
        _filter: &RemoteFilter,
    ) -> Result<Arc<dyn Channel>> {
        let ChannelConfig::Internal(internal_config) = config else {
            return Err(ConfigError::Message(format!(
                "internal channel factory cannot build {:?}",
                config
            ))
            .into());
        };
        internal_config.validate()?;

        let channel = InternalChannel::new(remote_name);
        match self.waiting.remove(&internal_config.pair_key) {
            Some((_, waiting)) => {
                InternalChannel::connect(&waiting, &channel);
            }
            None => {
                self.waiting
                    .insert(internal_config.pair_key.clone(), channel.clone());
            }
        }
        Ok(channel)
    }
}
