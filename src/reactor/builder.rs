//! A builder pattern implementation for constructing a [`Reactor`]
//! instance.
//!
//! The [`ReactorBuilder`] provides a fluent interface to configure and
//! assemble the engine's components: storage layers (operation store,
//! sync remote/cursor stores), caches, the queue and executor pool, the
//! awaiters and the sync manager.
//!
//! ## Key Design Points
//! - **Default Components**: Initializes with storage per `Settings`
//!   (in-memory or sled) and the default channel factory (gql + internal).
//! - **Customization**: Allows overriding defaults via setter methods
//!   (e.g. `operation_store()`, `channel_factory()`).
//! - **Lifecycle Management**: `build()` assembles the [`Reactor`], spawns
//!   the executor pool and background listeners; `Reactor::shutdown()`
//!   winds everything down.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::sync::OnceLock;

use tracing::debug;
use tracing::info;

use crate::init_sled_storages;
use crate::Channel;
use crate::ChannelConfig;
use crate::ChannelFactory;
use crate::ConsistencyTracker;
use crate::CursorStore;
use crate::DocumentJobExecutorFactory;
use crate::DocumentMetaCache;
use crate::DocumentModelRegistry;
use crate::EventBus;
use crate::GqlChannelFactory;
use crate::InMemoryJobQueue;
use crate::InternalChannelFactory;
use crate::JobAwaiter;
use crate::JobExecutorManager;
use crate::JobTracker;
use crate::MemCursorStore;
use crate::MemOperationStore;
use crate::MemRemoteStore;
use crate::OperationSink;
use crate::OperationStore;
use crate::Reactor;
use crate::ReactorEvent;
use crate::RemoteFilter;
use crate::RemoteStore;
use crate::Result;
use crate::Settings;
use crate::SledCursorStore;
use crate::SledOperationStore;
use crate::SledRemoteStore;
use crate::StateCache;
use crate::StorageBackend;
use crate::SyncAwaiter;
use crate::SyncManager;
use crate::SyncStatusTracker;

/// Routes each config variant to its factory: gql channels over HTTP,
/// internal channels paired in-process.
pub struct DefaultChannelFactory {
    gql: GqlChannelFactory,
    internal: InternalChannelFactory,
}

impl Default for DefaultChannelFactory {
    fn default() -> Self {
        Self {
            gql: GqlChannelFactory::new(),
            internal: InternalChannelFactory::new(),
        }
    }
}

impl DefaultChannelFactory {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ChannelFactory for DefaultChannelFactory {
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
            ChannelConfig::Gql(_) => self.gql.instance(
                channel_id,
                remote_name,
                config,
                cursor_store,
                collection_id,
                filter,
            ),
            ChannelConfig::Internal(_) => self.internal.instance(
                channel_id,
                remote_name,
                config,
                cursor_store,
                collection_id,
                filter,
            ),
        }
    }
}

pub struct ReactorBuilder {
    settings: Settings,
    registry: Option<Arc<DocumentModelRegistry>>,
    store: Option<Arc<dyn OperationStore>>,
    remote_store: Option<Arc<dyn RemoteStore>>,
    cursor_store: Option<Arc<dyn CursorStore>>,
    channel_factory: Option<Arc<dyn ChannelFactory>>,
}

impl ReactorBuilder {
    pub fn new(settings: Settings) -> Self {
        Self {
            settings,
            registry: None,
            store: None,
            remote_store: None,
            cursor_store: None,
            channel_factory: None,
        }
    }

    pub fn registry(
        mut self,
        registry: Arc<DocumentModelRegistry>,
    ) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn operation_store(
        mut self,
        store: Arc<dyn OperationStore>,
    ) -> Self {
        self.store = Some(store);
        self
    }

    pub fn remote_store(
        mut self,
        store: Arc<dyn RemoteStore>,
    ) -> Self {
        self.remote_store = Some(store);
        self
    }

    pub fn cursor_store(
        mut self,
        store: Arc<dyn CursorStore>,
    ) -> Self {
        self.cursor_store = Some(store);
        self
    }

    pub fn channel_factory(
        mut self,
        factory: Arc<dyn ChannelFactory>,
    ) -> Self {
        self.channel_factory = Some(factory);
        self
    }

    /// Assembles the reactor and spawns its background machinery. Must run
    /// inside a tokio runtime.
    pub fn build(self) -> Result<Arc<Reactor>> {
        let settings = self.settings;

        let (store, remote_store, cursor_store) = match (
            self.store,
            self.remote_store,
            self.cursor_store,
        ) {
            (Some(store), Some(remote_store), Some(cursor_store)) => {
                (store, remote_store, cursor_store)
            }
            (store, remote_store, cursor_store) => match settings.storage.backend {
                StorageBackend::Memory => {
                    debug!("building reactor on in-memory storage");
                    (
                        store.unwrap_or_else(|| Arc::new(MemOperationStore::new())),
                        remote_store.unwrap_or_else(|| Arc::new(MemRemoteStore::new())),
                        cursor_store.unwrap_or_else(|| Arc::new(MemCursorStore::new())),
                    )
                }
                StorageBackend::Sled => {
                    debug!(
                        "building reactor on sled storage at {}",
                        settings.storage.db_root_dir
                    );
                    let (operations_db, sync_db) =
                        init_sled_storages(&settings.storage.db_root_dir)
                            .map_err(crate::StorageError::Io)?;
                    let sled_store: Arc<dyn OperationStore> = match store {
                        Some(store) => store,
                        None => SledOperationStore::new(&operations_db)?,
                    };
                    let sled_remotes: Arc<dyn RemoteStore> = match remote_store {
                        Some(remotes) => remotes,
                        None => SledRemoteStore::new(&sync_db)?,
                    };
                    let sled_cursors: Arc<dyn CursorStore> = match cursor_store {
                        Some(cursors) => cursors,
                        None => SledCursorStore::new(&sync_db)?,
                    };
                    (sled_store, sled_remotes, sled_cursors)
                }
            },
        };

        let registry = self
            .registry
            .unwrap_or_else(|| Arc::new(DocumentModelRegistry::new()));
        let channel_factory = self
            .channel_factory
            .unwrap_or_else(|| Arc::new(DefaultChannelFactory::new()));

        let event_bus = Arc::new(EventBus::new());
        let meta_cache = Arc::new(DocumentMetaCache::new(
            store.clone(),
            settings.cache.max_documents,
        ));
        let state_cache = Arc::new(StateCache::new(settings.cache.max_states));
        let queue = InMemoryJobQueue::new(event_bus.clone());
        let tracker = Arc::new(JobTracker::new());

        let executor_factory = Arc::new(DocumentJobExecutorFactory::new(
            store.clone(),
            registry.clone(),
            meta_cache.clone(),
            state_cache.clone(),
            event_bus.clone(),
            settings.retry.commit,
        ));
        let manager = Arc::new(JobExecutorManager::new(
            queue.clone(),
            executor_factory,
            event_bus.clone(),
            tracker.clone(),
            settings.executor,
        ));
        manager.start();

        let job_awaiter = Arc::new(JobAwaiter::new(
            &event_bus,
            tracker.clone(),
            settings.executor.awaiter_poll_interval_ms,
        ));
        let sync_awaiter = SyncAwaiter::new();
        let status_tracker = Arc::new(SyncStatusTracker::new(Some(event_bus.clone())));
        let consistency = Arc::new(ConsistencyTracker::new());

        // the write frontier follows every committed batch
        {
            let consistency = consistency.clone();
            let mut events = event_bus.subscribe();
            crate::utils::spawn_task(
                "consistency-frontier",
                move || async move {
                    while let Some(event) = events.recv().await {
                        if let ReactorEvent::OperationsWritten { operations, .. } = event {
                            if let Some(max) =
                                operations.iter().map(|op| op.context.ordinal).max()
                            {
                                consistency.note_write(max);
                            }
                        }
                    }
                    Ok(())
                },
                None,
            );
        }

        let reactor = Arc::new(Reactor {
            settings,
            store: store.clone(),
            registry,
            meta_cache,
            state_cache,
            queue,
            manager,
            tracker,
            job_awaiter: job_awaiter.clone(),
            sync_awaiter: sync_awaiter.clone(),
            status_tracker: status_tracker.clone(),
            consistency,
            event_bus: event_bus.clone(),
            sync_manager: OnceLock::new(),
            is_shutdown: AtomicBool::new(false),
        });

        let sink: Arc<dyn OperationSink> = reactor.clone();
        let sync_manager = Arc::new(SyncManager::new(
            remote_store,
            cursor_store,
            channel_factory,
            sink,
            job_awaiter,
            sync_awaiter,
            status_tracker,
            store,
            event_bus,
        ));
        reactor
            .sync_manager
            .set(sync_manager)
            .map_err(|_| crate::Error::Fatal("sync manager already wired".to_string()))?;

        info!("reactor assembled");
        Ok(reactor)
    }
}
