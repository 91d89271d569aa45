//! Local durable state: the key scheme and the cache backends.

pub mod keys;
pub mod local_cache;

pub use keys::CacheKey;
pub use local_cache::{LocalCache, MemoryLocalCache, SqliteLocalCache};
