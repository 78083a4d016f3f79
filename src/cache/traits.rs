//! Core traits and types for the caching system.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::time::Duration;

use crate::clock::{duration_ms, Millis};

/// Anything that can live in a cache entry.
///
/// Equality is the deep comparison used to decide whether a revalidated
/// payload actually changed.
pub trait Payload: Clone + PartialEq + Send + Sync + Serialize + DeserializeOwned + 'static {}

impl<T> Payload for T where T: Clone + PartialEq + Send + Sync + Serialize + DeserializeOwned + 'static
{}

/// Trait for list items that carry a stable identity.
///
/// Used to keep incrementally loaded lists free of duplicates.
pub trait Cacheable: Payload {
  /// Unique identifier for this entity (e.g., notification id, machine id)
  fn cache_key(&self) -> String;
}

/// A cached value plus the wall-clock time of its last successful write.
///
/// Entries are replaced as a whole; `data` is never partially written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry<T> {
  pub data: T,
  pub timestamp: Millis,
}

impl<T> CacheEntry<T> {
  pub fn new(data: T, timestamp: Millis) -> Self {
    Self { data, timestamp }
  }

  /// Age of the entry at `now`. Clock skew backwards counts as zero.
  pub fn age_ms(&self, now: Millis) -> Millis {
    now.saturating_sub(self.timestamp).max(0)
  }

  /// `now - timestamp < ttl`
  pub fn is_fresh(&self, ttl: Duration, now: Millis) -> bool {
    self.age_ms(now) < duration_ms(ttl)
  }
}

/// Indicates how the data handed back by a load relates to the TTL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
  /// Cached and younger than the TTL
  Fresh,
  /// Cached but older than the TTL (or a refresh was forced)
  Stale,
  /// Nothing cached for this key
  Missing,
}
