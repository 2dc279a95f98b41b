//! Named, versioned response caches.
//!
//! - Two caches are current per version tag: the static shell and the runtime cache
//! - Keys are normalized request identities, values full response snapshots
//! - Any cache not current for the running version is stale and gets purged on activation

mod manager;
mod names;
mod storage;

pub use manager::CacheStoreManager;
pub use names::CacheNames;
pub use storage::{CacheStorage, CachedResponse};
