//! Channel contract: the bidirectional transport that moves sync
//! operations between a local mailbox set and a remote reactor.

use std::sync::Arc;

use async_trait::async_trait;

use crate::ChannelConfig;
use crate::CursorStore;
use crate::Mailbox;
use crate::RemoteFilter;
use crate::Result;
use crate::SyncOperation;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelHealthState {
    Idle,
    Running,
    Error,
}

#[derive(Debug, Clone, Copy)]
pub struct ChannelHealth {
    pub state: ChannelHealthState,
    pub last_success_utc_ms: Option<u64>,
    pub last_failure_utc_ms: Option<u64>,
    pub failure_count: u32,
}

impl ChannelHealth {
    pub fn idle() -> Self {
        Self {
            state: ChannelHealthState::Idle,
            last_success_utc_ms: None,
            last_failure_utc_ms: None,
            failure_count: 0,
        }
    }
}

#[async_trait]
pub trait Channel: Send + Sync + 'static {
    fn inbox(&self) -> Arc<Mailbox>;

    fn outbox(&self) -> Arc<Mailbox>;

    fn dead_letter(&self) -> Arc<Mailbox>;

    /// Hands outbound sync operations to the channel. The default lands
    /// them on the outbox directly; implementations may coalesce.
    fn send(
        &self,
        operations: Vec<SyncOperation>,
    ) -> Result<()> {
        self.outbox().add(operations)
    }

    /// Registers the channel with its remote side and starts transport
    /// (poll timers, receive loops).
    async fn init(&self) -> Result<()>;

    /// Stops transport. Draining is channel-specific; a clean shutdown
    /// flushes whatever can be flushed without waiting on the remote.
    async fn shutdown(&self) -> Result<()>;

    fn health(&self) -> ChannelHealth {
        ChannelHealth::idle()
    }
}

/// Builds channels from their validated config variant.
pub trait ChannelFactory: Send + Sync + 'static {
    fn instance(
        &self,
        channel_id: &str,
        remote_name: &str,
        config: &ChannelConfig,
        cursor_store: Arc<dyn CursorStore>,
        collection_id: &str,
        filter: &RemoteFilter,
    ) -> Result<Arc<dyn Channel>>;
}
