//! Sync manager: owns the set of configured remotes, each pairing a
//! channel with a collection and filter.
//!
//! Outbound: committed operations fan out to every remote whose filter
//! matches, skipping the remote a load originated from (no echo). Inbound:
//! sync operations arriving in a channel's inbox become load jobs through
//! the reactor facade; a failed load routes the unit to dead-letter with a
//! channel error instead of blocking the inbox.

use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::error;
use tracing::info;
use tracing::warn;

use crate::batch_operations_by_document;
use crate::filter_operations;
use crate::ChannelConfig;
use crate::ChannelFactory;
use crate::CursorStore;
use crate::EventBus;
use crate::JobAwaiter;
use crate::JobInfo;
use crate::JobStatus;
use crate::Operation;
use crate::OperationStore;
use crate::OperationWithContext;
use crate::ReactorEvent;
use crate::Remote;
use crate::RemoteFilter;
use crate::RemoteOptions;
use crate::RemoteRecord;
use crate::RemoteStore;
use crate::Result;
use crate::SyncAwaiter;
use crate::SyncError;
use crate::SyncOperation;
use crate::SyncStatusTracker;

/// The reactor surface the sync layer feeds inbound operations into.
pub trait OperationSink: Send + Sync + 'static {
    /// Enqueues a load job replaying remote operations; returns its queued
    /// JobInfo.
    fn load(
        &self,
        document_id: &str,
        scope: &str,
        branch: &str,
        operations: Vec<Operation>,
        source_remote: Option<String>,
    ) -> Result<JobInfo>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownStatus {
    pub clean: bool,
}

/// Shared state cloneable into the manager's background tasks.
#[derive(Clone)]
struct ManagerCtx {
    remotes: Arc<DashMap<String, Remote>>,
    sink: Arc<dyn OperationSink>,
    job_awaiter: Arc<JobAwaiter>,
    sync_awaiter: Arc<SyncAwaiter>,
    is_shutdown: Arc<AtomicBool>,
}

impl ManagerCtx {
    /// Fans committed operations out to every matching remote's outbox.
    fn handle_operations_written(
        &self,
        job_id: Option<&str>,
        source_remote: Option<&str>,
        operations: &[OperationWithContext],
    ) {
        if self.is_shutdown.load(Ordering::SeqCst) {
            return;
        }

        for remote in self.remotes.iter() {
            if source_remote == Some(remote.name.as_str()) {
                continue;
            }

            let filtered = filter_operations(operations, &remote.filter);
            if filtered.is_empty() {
                continue;
            }

            for batch in batch_operations_by_document(&filtered) {
                let sync_op = SyncOperation::new(
                    job_id.unwrap_or_default(),
                    remote.name.clone(),
                    batch.document_id,
                    vec![batch.scope],
                    batch.branch,
                    batch.operations,
                    Vec::new(),
                );
                self.sync_awaiter.register(&sync_op);
                self.wire_outbox_eviction(remote.value(), &sync_op);
                if let Err(e) = remote.channel.send(vec![sync_op]) {
                    warn!("failed to hand sync op to remote '{}': {}", remote.name, e);
                }
            }
        }
    }

    /// A terminal outbox unit has no more business in the outbox.
    fn wire_outbox_eviction(
        &self,
        remote: &Remote,
        sync_op: &SyncOperation,
    ) {
        let outbox = remote.channel.outbox();
        sync_op.on_status(move |op, _prev, next| {
            if next.is_terminal() {
                let _ = outbox.remove(std::slice::from_ref(op));
            }
        });
    }

    /// Replays one inbound sync operation through the reactor, scope by
    /// scope. Any failure dead-letters the unit; success applies it.
    async fn apply_inbox(
        &self,
        remote_name: &str,
        sync_op: SyncOperation,
    ) {
        let Some(remote) = self.remotes.get(remote_name).map(|r| r.value().clone()) else {
            warn!("inbound sync op for unknown remote '{}'", remote_name);
            return;
        };

        let mut failure: Option<String> = None;
        for scope in sync_op.scopes() {
            let operations: Vec<Operation> = sync_op
                .operations()
                .iter()
                .filter(|op| &op.context.scope == scope)
                .map(|op| op.operation.clone())
                .collect();
            if operations.is_empty() {
                continue;
            }

            let job = match self.sink.load(
                sync_op.document_id(),
                scope,
                sync_op.branch(),
                operations,
                Some(remote_name.to_string()),
            ) {
                Ok(job) => job,
                Err(e) => {
                    failure = Some(format!("failed to enqueue load job: {e}"));
                    break;
                }
            };

            match self.job_awaiter.wait_for_job(&job.id, None).await {
                Ok(info) if info.status == JobStatus::Failed => {
                    failure = Some(format!(
                        "failed to apply operations: {}",
                        info.error.map(|e| e.message).unwrap_or_default()
                    ));
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    failure = Some(format!("load job did not settle: {e}"));
                    break;
                }
            }
        }

        match failure {
            None => {
                sync_op.applied();
            }
            Some(message) => {
                warn!(
                    "inbound sync op from '{}' dead-lettered: {}",
                    remote_name, message
                );
                sync_op.failed(message);
                if let Err(e) = remote.channel.dead_letter().add(vec![sync_op.clone()]) {
                    warn!("dead-letter add reported callback errors: {}", e);
                }
            }
        }
        let _ = remote.channel.inbox().remove(std::slice::from_ref(&sync_op));
    }
}

pub struct SyncManager {
    ctx: ManagerCtx,
    remote_store: Arc<dyn RemoteStore>,
    cursor_store: Arc<dyn CursorStore>,
    channel_factory: Arc<dyn ChannelFactory>,
    status_tracker: Arc<SyncStatusTracker>,
    store: Arc<dyn OperationStore>,
    inbox_tx: mpsc::UnboundedSender<(String, SyncOperation)>,
    cancel: CancellationToken,
    tasks: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl SyncManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        remote_store: Arc<dyn RemoteStore>,
        cursor_store: Arc<dyn CursorStore>,
        channel_factory: Arc<dyn ChannelFactory>,
        sink: Arc<dyn OperationSink>,
        job_awaiter: Arc<JobAwaiter>,
        sync_awaiter: Arc<SyncAwaiter>,
        status_tracker: Arc<SyncStatusTracker>,
        store: Arc<dyn OperationStore>,
        event_bus: Arc<EventBus>,
    ) -> Self {
        let ctx = ManagerCtx {
            remotes: Arc::new(DashMap::new()),
            sink,
            job_awaiter,
            sync_awaiter,
            is_shutdown: Arc::new(AtomicBool::new(false)),
        };

        let (inbox_tx, mut inbox_rx) = mpsc::unbounded_channel::<(String, SyncOperation)>();
        let cancel = CancellationToken::new();
        let mut tasks = Vec::new();

        // committed operations -> outboxes
        {
            let ctx = ctx.clone();
            let cancel = cancel.clone();
            let mut events = event_bus.subscribe();
            tasks.push(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        event = events.recv() => {
                            match event {
                                Some(ReactorEvent::OperationsWritten {
                                    job_id,
                                    source_remote,
                                    operations,
                                }) => {
                                    ctx.handle_operations_written(
                                        job_id.as_deref(),
                                        source_remote.as_deref(),
                                        &operations,
                                    );
                                }
                                Some(_) => {}
                                None => return,
                            }
                        }
                    }
                }
            }));
        }

        // inbound sync operations -> load jobs, serially per manager
        {
            let ctx = ctx.clone();
            let cancel = cancel.clone();
            tasks.push(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => return,
                        received = inbox_rx.recv() => {
                            let Some((remote_name, sync_op)) = received else { return };
                            if ctx.is_shutdown.load(Ordering::SeqCst) {
                                continue;
                            }
                            ctx.apply_inbox(&remote_name, sync_op).await;
                        }
                    }
                }
            }));
        }

        Self {
            ctx,
            remote_store,
            cursor_store,
            channel_factory,
            status_tracker,
            store,
            inbox_tx,
            cancel,
            tasks: Mutex::new(tasks),
        }
    }

    /// Recreates every persisted remote's channel; used after process
    /// restart.
    pub async fn startup(&self) -> Result<()> {
        if self.ctx.is_shutdown.load(Ordering::SeqCst) {
            return Err(SyncError::ManagerShutdown.into());
        }

        let records = self.remote_store.list().await?;
        for record in records {
            if self.ctx.remotes.contains_key(&record.name) {
                continue;
            }
            match self.instantiate(&record).await {
                Ok(remote) => {
                    self.register(remote);
                }
                Err(e) => {
                    error!(
                        "error initializing channel for remote {}: {}",
                        record.name, e
                    );
                    continue;
                }
            }
        }
        Ok(())
    }

    /// Registers a new remote: persists its configuration, builds and
    /// initializes its channel, and seeds the outbox with matching history
    /// unless backfill is disabled. Fails when the name is taken.
    pub async fn add(
        &self,
        name: &str,
        collection_id: &str,
        channel_config: ChannelConfig,
        filter: Option<RemoteFilter>,
        options: Option<RemoteOptions>,
    ) -> Result<Remote> {
        if self.ctx.is_shutdown.load(Ordering::SeqCst) {
            return Err(SyncError::ManagerShutdown.into());
        }
        if self.ctx.remotes.contains_key(name) {
            return Err(SyncError::RemoteExists(name.to_string()).into());
        }
        channel_config.validate()?;

        let record = RemoteRecord {
            id: nanoid::nanoid!(),
            name: name.to_string(),
            collection_id: collection_id.to_string(),
            channel_config,
            filter: filter.unwrap_or_default(),
            options: options.unwrap_or_default(),
        };
        self.remote_store.upsert(record.clone()).await?;

        let remote = self.instantiate(&record).await?;
        self.register(remote.clone());

        if !remote.options.disable_backfill {
            if let Err(e) = self.backfill_outbox(&remote).await {
                warn!("backfill for remote '{}' failed: {}", remote.name, e);
            }
        }

        info!("remote '{}' added (collection {})", name, collection_id);
        Ok(remote)
    }

    async fn instantiate(
        &self,
        record: &RemoteRecord,
    ) -> Result<Remote> {
        let channel = self.channel_factory.instance(
            &record.id,
            &record.name,
            &record.channel_config,
            self.cursor_store.clone(),
            &record.collection_id,
            &record.filter,
        )?;
        channel.init().await?;

        Ok(Remote {
            id: record.id.clone(),
            name: record.name.clone(),
            collection_id: record.collection_id.clone(),
            filter: record.filter.clone(),
            options: record.options,
            channel,
        })
    }

    fn register(
        &self,
        remote: Remote,
    ) {
        self.status_tracker
            .track_remote(&remote.name, remote.channel.as_ref());

        // inbox arrivals feed the load pipeline
        let inbox_tx = self.inbox_tx.clone();
        let remote_name = remote.name.clone();
        remote.channel.inbox().on_added(move |ops| {
            for op in ops {
                let _ = inbox_tx.send((remote_name.clone(), op.clone()));
            }
            Ok(())
        });

        self.ctx.remotes.insert(remote.name.clone(), remote);
    }

    /// Seeds a fresh remote's outbox with everything already committed
    /// that its filter matches.
    async fn backfill_outbox(
        &self,
        remote: &Remote,
    ) -> Result<()> {
        let history = self.store.get_since_ordinal(0).await?;
        if history.is_empty() {
            return Ok(());
        }

        let filtered = filter_operations(&history, &remote.filter);
        if filtered.is_empty() {
            return Ok(());
        }

        for batch in batch_operations_by_document(&filtered) {
            let sync_op = SyncOperation::new(
                "",
                remote.name.clone(),
                batch.document_id,
                vec![batch.scope],
                batch.branch,
                batch.operations,
                Vec::new(),
            );
            self.ctx.wire_outbox_eviction(remote, &sync_op);
            remote.channel.send(vec![sync_op])?;
        }
        Ok(())
    }

    /// Shuts the remote's channel down, then deletes its configuration and
    /// registry entry.
    pub async fn remove(
        &self,
        name: &str,
    ) -> Result<()> {
        let remote = self
            .ctx
            .remotes
            .get(name)
            .map(|r| r.value().clone())
            .ok_or_else(|| SyncError::RemoteNotFound(name.to_string()))?;

        self.remote_store.remove(name).await?;
        remote.channel.shutdown().await?;
        self.status_tracker.untrack_remote(name);
        self.ctx.remotes.remove(name);

        info!("remote '{}' removed", name);
        Ok(())
    }

    pub fn get(
        &self,
        name: &str,
    ) -> Result<Remote> {
        self.ctx
            .remotes
            .get(name)
            .map(|r| r.value().clone())
            .ok_or_else(|| SyncError::RemoteNotFound(name.to_string()).into())
    }

    pub fn list(&self) -> Vec<Remote> {
        self.ctx.remotes.iter().map(|r| r.value().clone()).collect()
    }

    /// Stops every channel and the manager's own tasks. The returned
    /// status reports whether every channel wound down without error.
    pub async fn shutdown(&self) -> ShutdownStatus {
        self.ctx.is_shutdown.store(true, Ordering::SeqCst);
        self.cancel.cancel();

        let mut clean = true;
        let remotes: Vec<Remote> = self
            .ctx
            .remotes
            .iter()
            .map(|r| r.value().clone())
            .collect();
        for remote in remotes {
            if let Err(e) = remote.channel.shutdown().await {
                error!(
                    "error shutting down channel for remote {}: {}",
                    remote.name, e
                );
                clean = false;
            }
        }
        self.ctx.remotes.clear();
        self.ctx.sync_awaiter.shutdown();

        let tasks: Vec<_> = self.tasks.lock().drain(..).collect();
        futures::future::join_all(tasks).await;

        info!("sync manager shut down (clean: {})", clean);
        ShutdownStatus { clean }
    }
}
