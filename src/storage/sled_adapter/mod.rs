mod sled_operation_store;
mod sled_sync_store;

pub use sled_operation_store::*;
pub use sled_sync_store::*;
