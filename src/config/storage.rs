use serde::Deserialize;

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// In-memory store: tests and embedded, nothing survives restart
    Memory,
    /// Sled-backed store under `db_root_dir`
    Sled,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    #[serde(default = "default_backend")]
    pub backend: StorageBackend,

    /// Root directory for the sled trees
    #[serde(default = "default_db_root_dir")]
    pub db_root_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            db_root_dir: default_db_root_dir(),
        }
    }
}

fn default_backend() -> StorageBackend {
    StorageBackend::Memory
}
fn default_db_root_dir() -> String {
    "./reactor_db".to_string()
}
