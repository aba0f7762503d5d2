mod mem;
mod operation_store;
mod sled_adapter;
mod sync_store;

use std::path::Path;

#[doc(hidden)]
pub use mem::*;
#[doc(hidden)]
pub use operation_store::*;
#[doc(hidden)]
pub use sled_adapter::*;
#[doc(hidden)]
pub use sync_store::*;
use tracing::debug;
use tracing::warn;

/// engine storage
/// (operations_db, sync_db)
pub fn init_sled_storages(
    db_root_path: impl AsRef<Path> + std::fmt::Debug
) -> std::result::Result<(sled::Db, sled::Db), std::io::Error> {
    debug!("init_sled_storages from path: {:?}", &db_root_path);

    Ok((
        init_sled_operations_db(&db_root_path)?,
        init_sled_sync_db(&db_root_path)?,
    ))
}

pub fn init_sled_operations_db(
    db_root_path: impl AsRef<Path> + std::fmt::Debug
) -> std::result::Result<sled::Db, std::io::Error> {
    debug!("init_sled_operations_db from path: {:?}", &db_root_path);

    let path = db_root_path.as_ref();
    let operations_db_path = path.join("operations");

    sled::Config::default()
        .path(&operations_db_path)
        .cache_capacity(64 * 1024 * 1024) //64MB
        .use_compression(true)
        .compression_factor(1)
        .open()
        .map_err(|e| {
            warn!(
                "Try to open DB at this location: {:?} and failed: {:?}",
                operations_db_path, e
            );
            std::io::Error::other(e)
        })
}

pub fn init_sled_sync_db(
    db_root_path: impl AsRef<Path> + std::fmt::Debug
) -> std::result::Result<sled::Db, std::io::Error> {
    debug!("init_sled_sync_db from path: {:?}", &db_root_path);

    let path = db_root_path.as_ref();
    let sync_db_path = path.join("sync");

    sled::Config::default()
        .path(&sync_db_path)
        .cache_capacity(10 * 1024 * 1024) //10MB
        .flush_every_ms(Some(3))
        .use_compression(true)
        .compression_factor(1)
        .open()
        .map_err(|e| {
            warn!(
                "Try to open DB at this location: {:?} and failed: {:?}",
                sync_db_path, e
            );
            std::io::Error::other(e)
        })
}
