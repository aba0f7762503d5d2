use config::ConfigError;
use serde::Deserialize;
use serde::Serialize;

use crate::Result;

/// Synchronization subsystem defaults shared by all channels
#[derive(Debug, Deserialize, Clone, Copy)]
pub struct SyncConfig {
    /// Inbound poll cadence
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Inbox occupancy at which polling pauses until processing catches up
    #[serde(default = "default_max_queue_depth")]
    pub max_queue_depth: usize,

    /// Re-check cadence while backpressured
    #[serde(default = "default_backpressure_check_interval_ms")]
    pub backpressure_check_interval_ms: u64,

    /// Consecutive transport failures before a channel reports Error health
    #[serde(default = "default_max_failures")]
    pub max_failures: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: default_poll_interval_ms(),
            max_queue_depth: default_max_queue_depth(),
            backpressure_check_interval_ms: default_backpressure_check_interval_ms(),
            max_failures: default_max_failures(),
        }
    }
}

/// Channel configuration is a closed union keyed by channel type. Each
/// variant is validated at construction time; there is no open parameter
/// bag.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ChannelConfig {
    Gql(GqlChannelConfig),
    Internal(InternalChannelConfig),
}

impl ChannelConfig {
    pub fn validate(&self) -> Result<()> {
        match self {
            ChannelConfig::Gql(c) => c.validate(),
            ChannelConfig::Internal(c) => c.validate(),
        }
    }
}

/// GraphQL-polling channel parameters
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct GqlChannelConfig {
    /// The GraphQL endpoint URL
    pub url: String,

    /// Static bearer token attached to every request, if any
    #[serde(default)]
    pub bearer_token: Option<String>,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    /// Base delay for exponential transport backoff
    #[serde(default = "default_retry_base_delay_ms")]
    pub retry_base_delay_ms: u64,

    /// Maximum delay for exponential transport backoff
    #[serde(default = "default_retry_max_delay_ms")]
    pub retry_max_delay_ms: u64,

    #[serde(default = "default_max_failures")]
    pub max_failures: usize,

    #[serde(default = "default_max_queue_depth")]
    pub max_queue_depth: usize,

    #[serde(default = "default_backpressure_check_interval_ms")]
    pub backpressure_check_interval_ms: u64,
}

impl GqlChannelConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            bearer_token: None,
            poll_interval_ms: default_poll_interval_ms(),
            retry_base_delay_ms: default_retry_base_delay_ms(),
            retry_max_delay_ms: default_retry_max_delay_ms(),
            max_failures: default_max_failures(),
            max_queue_depth: default_max_queue_depth(),
            backpressure_check_interval_ms: default_backpressure_check_interval_ms(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.url.is_empty() {
            return Err(ConfigError::Message("gql channel url must not be empty".to_string()).into());
        }
        if !self.url.starts_with("http://") && !self.url.starts_with("https://") {
            return Err(
                ConfigError::Message(format!("gql channel url is not http(s): {}", self.url)).into(),
            );
        }
        if self.retry_base_delay_ms == 0 || self.retry_max_delay_ms < self.retry_base_delay_ms {
            return Err(ConfigError::Message(
                "gql channel retry delays must satisfy 0 < base <= max".to_string(),
            )
            .into());
        }
        if self.max_queue_depth == 0 {
            return Err(
                ConfigError::Message("gql channel max_queue_depth must be positive".to_string())
                    .into(),
            );
        }
        Ok(())
    }
}

/// In-process channel pair: two channels built with the same `pair_key`
/// through one factory are wired back to back.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct InternalChannelConfig {
    pub pair_key: String,
}

impl InternalChannelConfig {
    pub fn validate(&self) -> Result<()> {
        if self.pair_key.is_empty() {
            return Err(
                ConfigError::Message("internal channel pair_key must not be empty".to_string())
                    .into(),
            );
        }
        Ok(())
    }
}

fn default_poll_interval_ms() -> u64 {
    2000
}
fn default_retry_base_delay_ms() -> u64 {
    1000
}
fn default_retry_max_delay_ms() -> u64 {
    300000
}
fn default_max_failures() -> usize {
    5
}
fn default_max_queue_depth() -> usize {
    1000
}
fn default_backpressure_check_interval_ms() -> u64 {
    250
}
