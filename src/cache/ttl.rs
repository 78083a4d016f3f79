//! Single-key TTL cache: an in-memory copy backed by the persisted store.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::debug;

use super::storage::PersistentStore;
use super::traits::{CacheEntry, Payload};
use crate::clock::{Clock, Millis};

/// What the in-memory copy knows about the persisted entry.
enum Slot<T> {
  /// Not read from the store yet (or the store was cleared since)
  Unloaded,
  Absent,
  Present(CacheEntry<T>),
}

struct Memory<T> {
  slot: Slot<T>,
  /// Store epoch the slot was read at.
  epoch: u64,
}

/// Cache entry for one storage key.
///
/// Reads are served from memory once loaded; every write goes to memory
/// first and then to the persisted store, which may fail silently.
pub struct TtlCache<T> {
  key: String,
  store: PersistentStore,
  clock: Arc<dyn Clock>,
  memory: Mutex<Memory<T>>,
}

impl<T: Payload> TtlCache<T> {
  pub fn new(key: impl Into<String>, store: PersistentStore, clock: Arc<dyn Clock>) -> Self {
    Self {
      key: key.into(),
      store,
      clock,
      memory: Mutex::new(Memory {
        slot: Slot::Unloaded,
        epoch: 0,
      }),
    }
  }

  pub fn key(&self) -> &str {
    &self.key
  }

  fn lock(&self) -> std::sync::MutexGuard<'_, Memory<T>> {
    self.memory.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Current entry, if any.
  pub fn get(&self) -> Option<CacheEntry<T>> {
    let mut memory = self.lock();
    let epoch = self.store.epoch();
    if memory.epoch != epoch {
      memory.slot = Slot::Unloaded;
      memory.epoch = epoch;
    }

    if let Slot::Unloaded = memory.slot {
      memory.slot = match self.store.get::<CacheEntry<T>>(&self.key) {
        Some(entry) => {
          debug!(key = %self.key, "Loaded cache entry from store");
          Slot::Present(entry)
        }
        None => Slot::Absent,
      };
    }

    match &memory.slot {
      Slot::Present(entry) => Some(entry.clone()),
      _ => None,
    }
  }

  pub fn is_present(&self) -> bool {
    self.get().is_some()
  }

  /// Whether an entry exists and is younger than `ttl`.
  pub fn is_fresh(&self, ttl: Duration) -> bool {
    let now = self.clock.now_ms();
    self.get().is_some_and(|entry| entry.is_fresh(ttl, now))
  }

  /// Replace the entry with `data`, stamped with the current time.
  pub fn set(&self, data: T) -> CacheEntry<T> {
    self.write(CacheEntry::new(data, self.clock.now_ms()))
  }

  /// Re-stamp the current entry without changing its data.
  ///
  /// Returns `None` when there is nothing to touch.
  pub fn touch(&self) -> Option<CacheEntry<T>> {
    let entry = self.get()?;
    Some(self.write(CacheEntry::new(entry.data, self.clock.now_ms())))
  }

  fn write(&self, entry: CacheEntry<T>) -> CacheEntry<T> {
    let mut memory = self.lock();
    memory.epoch = self.store.epoch();
    memory.slot = Slot::Present(entry.clone());
    if !self.store.set(&self.key, &entry) {
      debug!(key = %self.key, "Cache entry kept in memory only");
    }
    entry
  }

  /// Drop the entry from memory and the store.
  pub fn clear(&self) {
    let mut memory = self.lock();
    memory.slot = Slot::Absent;
    memory.epoch = self.store.epoch();
    self.store.remove(&self.key);
  }

  pub fn now_ms(&self) -> Millis {
    self.clock.now_ms()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::storage::{KeyValueStore, MemoryStore};
  use crate::clock::ManualClock;
  use color_eyre::{eyre::eyre, Result};

  fn cache_with(store: PersistentStore) -> (TtlCache<Vec<String>>, ManualClock) {
    let clock = ManualClock::new(1_000);
    let cache = TtlCache::new("cache:machines", store, Arc::new(clock.clone()));
    (cache, clock)
  }

  #[test]
  fn test_set_stamps_and_persists() {
    let store = PersistentStore::memory();
    let (cache, _clock) = cache_with(store.clone());
    assert!(!cache.is_present());

    let entry = cache.set(vec!["m1".into()]);
    assert_eq!(entry.timestamp, 1_000);

    let persisted: CacheEntry<Vec<String>> = store.get("cache:machines").unwrap();
    assert_eq!(persisted, entry);
  }

  #[test]
  fn test_survives_reload() {
    let store = PersistentStore::memory();
    {
      let (cache, _clock) = cache_with(store.clone());
      cache.set(vec!["m1".into()]);
    }
    let (reloaded, _clock) = cache_with(store);
    assert_eq!(reloaded.get().unwrap().data, vec!["m1".to_string()]);
  }

  #[test]
  fn test_freshness_follows_clock() {
    let (cache, clock) = cache_with(PersistentStore::memory());
    cache.set(vec![]);
    let ttl = Duration::from_secs(60);

    assert!(cache.is_fresh(ttl));
    clock.advance(Duration::from_secs(61));
    assert!(!cache.is_fresh(ttl));
    assert!(cache.is_present());
  }

  #[test]
  fn test_touch_keeps_data() {
    let (cache, clock) = cache_with(PersistentStore::memory());
    assert!(cache.touch().is_none());

    cache.set(vec!["a".into()]);
    clock.advance(Duration::from_secs(5));
    let touched = cache.touch().unwrap();
    assert_eq!(touched.data, vec!["a".to_string()]);
    assert_eq!(touched.timestamp, 6_000);
  }

  #[test]
  fn test_store_clear_invalidates_memory() {
    let store = PersistentStore::memory();
    let (cache, _clock) = cache_with(store.clone());
    cache.set(vec!["a".into()]);

    store.clear_prefix("cache:");
    assert!(cache.get().is_none());
  }

  #[test]
  fn test_write_failure_degrades_to_memory() {
    struct ReadOnly(MemoryStore);
    impl KeyValueStore for ReadOnly {
      fn get_raw(&self, key: &str) -> Result<Option<String>> {
        self.0.get_raw(key)
      }
      fn set_raw(&self, _key: &str, _value: &str) -> Result<()> {
        Err(eyre!("quota exceeded"))
      }
      fn remove(&self, key: &str) -> Result<()> {
        self.0.remove(key)
      }
      fn remove_prefix(&self, prefix: &str) -> Result<usize> {
        self.0.remove_prefix(prefix)
      }
    }

    let (cache, _clock) = cache_with(PersistentStore::new(ReadOnly(MemoryStore::new())));
    cache.set(vec!["kept".into()]);
    assert_eq!(cache.get().unwrap().data, vec!["kept".to_string()]);
  }
}
