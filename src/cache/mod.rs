mod lru;
mod meta_cache;
mod state_cache;

pub use lru::*;
pub use meta_cache::*;
pub use state_cache::*;
