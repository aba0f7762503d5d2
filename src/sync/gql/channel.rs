//! GraphQL-polling channel.
//!
//! Outbound: outbox adds coalesce through a buffered mailbox, then push as
//! one `pushSyncEnvelopes` mutation with exponential-backoff retries; a
//! batch that exhausts its retries moves to dead-letter instead of
//! retrying forever. Inbound: a poll task issues `pollSyncEnvelopes` on a
//! fixed cadence, feeding returned envelopes into the inbox and trimming
//! the outbox from the remote's acknowledged ordinal. Polling pauses while
//! the inbox sits above the backpressure threshold.

use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::envelope_to_sync_operations;
use crate::sort_envelopes_by_first_operation_timestamp;
use crate::sync_operations_to_envelopes;
use crate::trim_mailbox_from_ack_ordinal;
use crate::utils::retry_with_backoff;
use crate::utils::timestamp_utc_ms;
use crate::BackoffPolicy;
use crate::BufferedMailbox;
use crate::Channel;
use crate::ChannelConfig;
use crate::ChannelError;
use crate::ChannelFactory;
use crate::ChannelHealth;
use crate::ChannelHealthState;
use crate::CursorSide;
use crate::CursorStore;
use crate::GqlChannelConfig;
use crate::GqlTransport;
use crate::Mailbox;
use crate::RemoteFilter;
use crate::Result;
use crate::SyncCursor;
use crate::SyncOperation;
use crate::SyncTransport;
use crate::TouchChannelInput;

use config::ConfigError;

const OUTBOX_BATCH_SIZE: usize = 500;
const OUTBOX_FLUSH_INTERVAL_MS: u64 = 25;

/// Shared transport-facing state, cloneable into the spawned push and poll
/// tasks. The channel object and its tasks observe the same atomics.
#[derive(Clone)]
struct ChannelCtx {
    channel_id: String,
    remote_name: String,
    collection_id: String,
    filter: RemoteFilter,
    config: GqlChannelConfig,
    transport: Arc<dyn SyncTransport>,
    inbox: Arc<Mailbox>,
    outbox: Arc<Mailbox>,
    dead_letter: Arc<Mailbox>,
    is_shutdown: Arc<AtomicBool>,
    failure_count: Arc<AtomicU32>,
    last_success_utc_ms: Arc<AtomicU64>,
    last_failure_utc_ms: Arc<AtomicU64>,
}

impl ChannelCtx {
    fn push_policy(&self) -> BackoffPolicy {
        BackoffPolicy {
            max_retries: self.config.max_failures,
            timeout_ms: 30000,
            base_delay_ms: self.config.retry_base_delay_ms,
            max_delay_ms: self.config.retry_max_delay_ms,
        }
    }

    async fn touch_remote_channel(&self) -> Result<String> {
        self.transport
            .touch_channel(TouchChannelInput {
                id: self.channel_id.clone(),
                name: self.remote_name.clone(),
                collection_id: self.collection_id.clone(),
                filter: self.filter.clone(),
                since_timestamp_utc_ms: "0".to_string(),
            })
            .await
    }

    /// Pushes one outbox batch, retrying with exponential backoff. An
    /// exhausted batch is failed, dead-lettered and evicted from the
    /// outbox rather than retried forever.
    async fn push(
        self,
        ops: Vec<SyncOperation>,
    ) {
        if ops.is_empty() || self.is_shutdown.load(Ordering::SeqCst) {
            return;
        }

        let envelopes = sync_operations_to_envelopes(&self.channel_id, &ops);
        let transport = self.transport.clone();
        let result = retry_with_backoff(
            move || {
                let transport = transport.clone();
                let envelopes = envelopes.clone();
                async move { transport.push_sync_envelopes(envelopes).await }
            },
            &self.push_policy(),
        )
        .await;

        match result {
            Ok(()) => {
                crate::metrics::SYNC_PUSH_TOTAL
                    .with_label_values(&[self.remote_name.as_str(), "ok"])
                    .inc();
                for op in &ops {
                    op.transported();
                }
            }
            Err(e) => {
                warn!(
                    "push to remote '{}' exhausted retries, dead-lettering {} op(s): {}",
                    self.remote_name,
                    ops.len(),
                    e
                );
                crate::metrics::SYNC_PUSH_TOTAL
                    .with_label_values(&[self.remote_name.as_str(), "error"])
                    .inc();
                for op in &ops {
                    op.failed(format!("outbox transport failed: {e}"));
                }
                if let Err(e) = self.dead_letter.add(ops.clone()) {
                    warn!("dead-letter add reported callback errors: {}", e);
                }
                let _ = self.outbox.remove(&ops);
                crate::metrics::DEAD_LETTER_METRIC
                    .with_label_values(&[self.remote_name.as_str()])
                    .set(self.dead_letter.len() as f64);
            }
        }
    }

    /// Holds polling while local processing is behind. Returns false when
    /// cancelled mid-wait.
    async fn wait_for_backpressure(
        &self,
        cancel: &CancellationToken,
    ) -> bool {
        while self.inbox.len() >= self.config.max_queue_depth {
            debug!(
                "channel '{}' backpressured: inbox depth {} >= {}",
                self.remote_name,
                self.inbox.len(),
                self.config.max_queue_depth
            );
            tokio::select! {
                _ = cancel.cancelled() => return false,
                _ = tokio::time::sleep(Duration::from_millis(
                    self.config.backpressure_check_interval_ms.max(1),
                )) => {}
            }
        }
        true
    }

    async fn poll_once(&self) {
        let result = self
            .transport
            .poll_sync_envelopes(
                &self.channel_id,
                self.inbox.ack_ordinal(),
                self.inbox.latest_ordinal(),
            )
            .await;

        match result {
            Ok(response) => {
                crate::metrics::SYNC_POLL_TOTAL
                    .with_label_values(&[self.remote_name.as_str(), "ok"])
                    .inc();

                // first: the remote's ack releases our outbox
                if response.ack_ordinal > 0 {
                    if let Err(e) =
                        trim_mailbox_from_ack_ordinal(&self.outbox, response.ack_ordinal)
                    {
                        warn!("outbox trim reported callback errors: {}", e);
                    }
                }

                let sorted = sort_envelopes_by_first_operation_timestamp(response.envelopes);
                let mut incoming = Vec::new();
                for envelope in &sorted {
                    if envelope.is_operations() {
                        let ops = envelope_to_sync_operations(envelope, &self.remote_name);
                        for op in &ops {
                            op.transported();
                        }
                        incoming.extend(ops);
                    }
                }
                if !incoming.is_empty() {
                    if let Err(e) = self.inbox.add(incoming) {
                        warn!("inbox add reported callback errors: {}", e);
                    }
                }

                self.failure_count.store(0, Ordering::SeqCst);
                self.last_success_utc_ms
                    .store(timestamp_utc_ms(), Ordering::SeqCst);
            }
            Err(e) => {
                crate::metrics::SYNC_POLL_TOTAL
                    .with_label_values(&[self.remote_name.as_str(), "error"])
                    .inc();
                self.last_failure_utc_ms
                    .store(timestamp_utc_ms(), Ordering::SeqCst);

                if matches!(
                    e,
                    crate::Error::Sync(crate::SyncError::Channel(ChannelError::NotFound(_)))
                ) {
                    self.recover_from_channel_not_found().await;
                    return;
                }

                let failures = self.failure_count.fetch_add(1, Ordering::SeqCst) + 1;
                warn!(
                    "channel '{}' poll error ({}/{}): {}",
                    self.remote_name, failures, self.config.max_failures, e
                );
                if failures >= self.config.max_failures as u32 {
                    warn!(
                        "channel '{}' exceeded failure threshold, stopping polls",
                        self.remote_name
                    );
                }
            }
        }
    }

    /// The remote forgot us (restart, expiry): re-register and resume.
    async fn recover_from_channel_not_found(&self) {
        info!(
            "channel '{}' not found on remote, re-registering",
            self.remote_name
        );
        match self.touch_remote_channel().await {
            Ok(_) => {
                info!("channel '{}' re-registered", self.remote_name);
                self.failure_count.store(0, Ordering::SeqCst);
            }
            Err(e) => {
                warn!("channel '{}' failed to re-register: {}", self.remote_name, e);
                self.failure_count.fetch_add(1, Ordering::SeqCst);
            }
        }
    }
}

pub struct GqlChannel {
    ctx: ChannelCtx,
    cursor_store: Arc<dyn CursorStore>,
    buffered_outbox: Arc<BufferedMailbox>,
    cancel: CancellationToken,
    poll_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl GqlChannel {
    pub fn new(
        channel_id: impl Into<String>,
        remote_name: impl Into<String>,
        collection_id: impl Into<String>,
        filter: RemoteFilter,
        config: GqlChannelConfig,
        transport: Arc<dyn SyncTransport>,
        cursor_store: Arc<dyn CursorStore>,
    ) -> Arc<Self> {
        let inbox = Mailbox::new();
        let outbox = Mailbox::new();
        let dead_letter = Mailbox::new();
        let buffered_outbox =
            BufferedMailbox::new(outbox.clone(), OUTBOX_BATCH_SIZE, OUTBOX_FLUSH_INTERVAL_MS);

        let ctx = ChannelCtx {
            channel_id: channel_id.into(),
            remote_name: remote_name.into(),
            collection_id: collection_id.into(),
            filter,
            config,
            transport,
            inbox,
            outbox,
            dead_letter,
            is_shutdown: Arc::new(AtomicBool::new(false)),
            failure_count: Arc::new(AtomicU32::new(0)),
            last_success_utc_ms: Arc::new(AtomicU64::new(0)),
            last_failure_utc_ms: Arc::new(AtomicU64::new(0)),
        };

        let channel = Arc::new(Self {
            ctx: ctx.clone(),
            cursor_store,
            buffered_outbox,
            cancel: CancellationToken::new(),
            poll_task: Mutex::new(None),
        });

        // new outbox entries are pushed to the remote as they land
        let push_ctx = ctx;
        channel.ctx.outbox.on_added(move |ops| {
            let ctx = push_ctx.clone();
            let ops = ops.to_vec();
            tokio::spawn(async move {
                ctx.push(ops).await;
            });
            Ok(())
        });

        channel.wire_cursor_persistence();
        channel
    }

    /// Evictions persist the highest applied ordinal so a future
    /// application run resumes instead of re-transporting. Losing a cursor
    /// only costs duplicate sends, which the receiving store's duplicate
    /// check absorbs.
    fn wire_cursor_persistence(&self) {
        for (mailbox, side) in [
            (&self.ctx.outbox, CursorSide::Outbox),
            (&self.ctx.inbox, CursorSide::Inbox),
        ] {
            let cursor_store = self.cursor_store.clone();
            let remote_name = self.ctx.remote_name.clone();
            mailbox.on_removed(move |ops| {
                let max_applied = ops
                    .iter()
                    .filter(|op| op.status() == crate::SyncOperationStatus::Applied)
                    .map(|op| op.ordinal())
                    .max();
                if let Some(ordinal) = max_applied {
                    let cursor_store = cursor_store.clone();
                    let remote_name = remote_name.clone();
                    tokio::spawn(async move {
                        let cursor = SyncCursor {
                            remote_name,
                            cursor_side: side,
                            cursor_ordinal: ordinal,
                            last_synced_at_utc_ms: timestamp_utc_ms(),
                        };
                        if let Err(e) = cursor_store.upsert(cursor).await {
                            warn!("failed to persist {side:?} cursor: {e}");
                        }
                    });
                }
                Ok(())
            });
        }
    }

    fn spawn_poll_loop(&self) {
        let ctx = self.ctx.clone();
        let cancel = self.cancel.clone();
        let task = tokio::spawn(async move {
            let mut tick =
                tokio::time::interval(Duration::from_millis(ctx.config.poll_interval_ms.max(1)));
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tick.tick() => {
                        if ctx.is_shutdown.load(Ordering::SeqCst) {
                            return;
                        }
                        if ctx.failure_count.load(Ordering::SeqCst)
                            >= ctx.config.max_failures as u32
                        {
                            continue;
                        }
                        if !ctx.wait_for_backpressure(&cancel).await {
                            return;
                        }
                        ctx.poll_once().await;
                    }
                }
            }
        });
        *self.poll_task.lock() = Some(task);
    }
}

#[async_trait]
impl Channel for GqlChannel {
    fn inbox(&self) -> Arc<Mailbox> {
        self.ctx.inbox.clone()
    }

    fn outbox(&self) -> Arc<Mailbox> {
        self.ctx.outbox.clone()
    }

    fn dead_letter(&self) -> Arc<Mailbox> {
        self.ctx.dead_letter.clone()
    }

    fn send(
        &self,
        operations: Vec<SyncOperation>,
    ) -> Result<()> {
        if self.ctx.is_shutdown.load(Ordering::SeqCst) {
            return Err(ChannelError::Shutdown.into());
        }
        self.buffered_outbox.add(operations)
    }

    async fn init(&self) -> Result<()> {
        self.ctx.touch_remote_channel().await?;

        let cursors = self.cursor_store.list(&self.ctx.remote_name).await?;
        for cursor in cursors {
            match cursor.cursor_side {
                CursorSide::Inbox => self.ctx.inbox.init(cursor.cursor_ordinal),
                CursorSide::Outbox => self.ctx.outbox.init(cursor.cursor_ordinal),
            }
        }

        self.spawn_poll_loop();
        info!(
            "gql channel '{}' initialized against {}",
            self.ctx.remote_name, self.ctx.config.url
        );
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        self.ctx.is_shutdown.store(true, Ordering::SeqCst);
        let _ = self.buffered_outbox.shutdown();
        self.cancel.cancel();
        if let Some(task) = self.poll_task.lock().take() {
            let _ = task.await;
        }
        info!("gql channel '{}' shut down", self.ctx.remote_name);
        Ok(())
    }

    fn health(&self) -> ChannelHealth {
        let failures = self.ctx.failure_count.load(Ordering::SeqCst);
        let state = if failures >= self.ctx.config.max_failures as u32 {
            ChannelHealthState::Error
        } else if failures > 0 {
            ChannelHealthState::Running
        } else {
            ChannelHealthState::Idle
        };
        let stamp = |v: u64| if v == 0 { None } else { Some(v) };
        ChannelHealth {
            state,
            last_success_utc_ms: stamp(self.ctx.last_success_utc_ms.load(Ordering::SeqCst)),
            last_failure_utc_ms: stamp(self.ctx.last_failure_utc_ms.load(Ordering::SeqCst)),
            failure_count: failures,
        }
    }
}

/// Builds GqlChannels over the real HTTP transport.
#[derive(Default)]
pub struct GqlChannelFactory;

impl GqlChannelFactory {
    pub fn new() -> Self {
        Self
    }
}

impl ChannelFactory for GqlChannelFactory {
    fn instance(
        &self,
        channel_id: &str,
        remote_name: &str,
        config: &ChannelConfig,
        cursor_store: Arc<dyn CursorStore>,
        collection_id: &str,
        filter: &RemoteFilter,
    ) -> Result<Arc<dyn Channel>> {
        match config {
            ChannelConfig::Gql(gql_config) => {
                gql_config.validate()?;
                let transport = Arc::new(GqlTransport::new(gql_config));
                Ok(GqlChannel::new(
                    channel_id,
                    remote_name,
                    collection_id,
                    filter.clone(),
                    gql_config.clone(),
                    transport,
                    cursor_store,
                ))
            }
            other => Err(ConfigError::Message(format!(
                "gql channel factory cannot build {:?}",
                other
            ))
            .into()),
        }
    }
}
