//! Generic caching layer for data persistence across reloads.
//!
//! This module provides a resource-agnostic caching mechanism that:
//! - Persists `{ data, timestamp }` entries per resource key
//! - Answers freshness questions against a TTL
//! - Tolerates a broken or missing store (absent entries are a cold cache)

mod key;
mod storage;
mod traits;
mod ttl;

pub use key::{Query, ResourceKey};
pub use storage::{KeyValueStore, MemoryStore, NoopStore, PersistentStore, SqliteStore};
pub use traits::{CacheEntry, Cacheable, Freshness, Payload};
pub use ttl::TtlCache;
