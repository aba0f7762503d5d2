//! Configuration management module for the document engine.
//!
//! Provides configuration loading from multiple sources with priority:
//! 1. Default values (hardcoded)
//! 2. Config file
//! 3. Local overrides
//! 4. Environment variables (highest priority)
//!

mod engine;
mod retry;
mod storage;
mod sync;

pub use engine::*;
pub use retry::*;
pub use storage::*;
pub use sync::*;

#[cfg(test)]
mod config_test;

//---
use config::{Config, Environment, File};
use serde::Deserialize;

use crate::Result;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Settings {
    /// Operation store backend selection
    #[serde(default)]
    pub storage: StorageConfig,
    /// Job execution pool parameters
    #[serde(default)]
    pub executor: ExecutorConfig,
    /// Meta/state cache sizing
    #[serde(default)]
    pub cache: CacheConfig,
    /// Synchronization subsystem defaults
    #[serde(default)]
    pub sync: SyncConfig,
    /// Retry policies for engine operations
    #[serde(default)]
    pub retry: RetryPolicies,
}

impl Settings {
    /// Load configuration with priority:
    /// 1. Optional config file
    /// 2. Local overrides (`<file>.local`)
    /// 3. Environment variables (highest priority)
    ///
    /// # Arguments
    /// * `config_path` - Optional path to a TOML config file (without extension)
    ///
    /// # Returns
    /// Merged configuration with proper priority ordering
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let mut config = Config::builder();

        // 1. Base config file
        if let Some(path) = config_path {
            config = config.add_source(File::with_name(path).required(true));
            // 2. Local overrides
            config = config.add_source(File::with_name(&format!("{}.local", path)).required(false));
        }

        // 3. Environment variables (highest priority)
        config = config.add_source(
            Environment::with_prefix("REACTOR")
                .separator("__")
                .ignore_empty(true)
                .try_parsing(true),
        );

        config
            .build()?
            .try_deserialize()
            .map_err(crate::Error::Config)
    }
}
