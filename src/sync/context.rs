//! Shared wiring for every synchronizer in the process.

use serde::de::DeserializeOwned;
use serde_json::Value;
use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;
use tracing::warn;

use super::policy::{Policies, SyncPolicy};
use super::synchronizer::{Decoder, KeyState, Synchronizer};
use crate::cache::{Payload, PersistentStore, ResourceKey, TtlCache};
use crate::clock::Clock;
use crate::constants::CACHE_NAMESPACE;
use crate::error::FetchError;
use crate::remote::{decode_count, normalize_listing, Listing, RemoteSource};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
  Active,
  /// Credentials were rejected; cached data has been dropped
  Expired,
}

/// Credential state, shared by all synchronizers.
///
/// Expiry is the one failure that leaves the local cache: every cache
/// entry is cleared and subscribers are told to re-authenticate.
#[derive(Clone)]
pub struct Session {
  state: Arc<watch::Sender<SessionState>>,
  store: PersistentStore,
}

impl Session {
  pub fn new(store: PersistentStore) -> Self {
    let (state, _) = watch::channel(SessionState::Active);
    Self {
      state: Arc::new(state),
      store,
    }
  }

  pub fn state(&self) -> SessionState {
    *self.state.borrow()
  }

  pub fn is_expired(&self) -> bool {
    self.state() == SessionState::Expired
  }

  /// Mark the session expired and clear the cache namespace. Idempotent.
  pub fn expire(&self) {
    if self.is_expired() {
      return;
    }
    let removed = self.store.clear_prefix(&format!("{}:", CACHE_NAMESPACE));
    warn!(removed, "Session expired, cache cleared");
    self.state.send_replace(SessionState::Expired);
  }

  /// Back to active after a fresh sign-in.
  pub fn renew(&self) {
    self.state.send_replace(SessionState::Active);
  }

  pub fn subscribe(&self) -> watch::Receiver<SessionState> {
    self.state.subscribe()
  }
}

/// Store, remote source, clock, and TTL policies, constructed once at
/// startup and handed to every consumer.
///
/// Synchronizers built from the same context share the persisted store and
/// the session. Synchronizers of the same storage key also share the memory
/// copy and the in-flight request, however many times they are built.
#[derive(Clone)]
pub struct SyncContext {
  store: PersistentStore,
  source: Arc<dyn RemoteSource>,
  clock: Arc<dyn Clock>,
  policies: Policies,
  session: Session,
  keys: Arc<Mutex<HashMap<String, Arc<dyn Any + Send + Sync>>>>,
}

impl SyncContext {
  pub fn new(store: PersistentStore, source: Arc<dyn RemoteSource>, clock: Arc<dyn Clock>) -> Self {
    let session = Session::new(store.clone());
    Self {
      store,
      source,
      clock,
      policies: Policies::default(),
      session,
      keys: Arc::new(Mutex::new(HashMap::new())),
    }
  }

  pub fn with_policies(mut self, policies: Policies) -> Self {
    self.policies = policies;
    self
  }

  pub fn store(&self) -> &PersistentStore {
    &self.store
  }

  pub fn source(&self) -> &Arc<dyn RemoteSource> {
    &self.source
  }

  pub fn clock(&self) -> &Arc<dyn Clock> {
    &self.clock
  }

  pub fn session(&self) -> &Session {
    &self.session
  }

  pub fn policy_for(&self, resource: &str) -> SyncPolicy {
    self.policies.policy_for(resource)
  }

  /// Synchronizer whose payload deserializes straight from the response.
  pub fn synchronizer<T>(&self, key: impl Into<ResourceKey>) -> Synchronizer<T>
  where
    T: Payload,
  {
    let key = key.into();
    let policy = self.policy_for(&key.name);
    self.build(key, policy, serde_decoder())
  }

  pub fn synchronizer_with_policy<T>(
    &self,
    key: impl Into<ResourceKey>,
    policy: SyncPolicy,
  ) -> Synchronizer<T>
  where
    T: Payload,
  {
    self.build(key.into(), policy, serde_decoder())
  }

  /// Synchronizer with a custom payload decoder.
  pub fn synchronizer_with<T, F>(&self, key: impl Into<ResourceKey>, decode: F) -> Synchronizer<T>
  where
    T: Payload,
    F: Fn(Value) -> Result<T, FetchError> + Send + Sync + 'static,
  {
    let key = key.into();
    let policy = self.policy_for(&key.name);
    self.build(key, policy, Arc::new(decode))
  }

  /// Synchronizer for a list endpoint, accepting every list shape.
  pub fn listing<T>(&self, key: impl Into<ResourceKey>) -> Synchronizer<Listing<T>>
  where
    T: Payload + DeserializeOwned,
  {
    self.synchronizer_with(key, normalize_listing::<T>)
  }

  /// Synchronizer for a counter endpoint.
  pub fn counter(&self, key: impl Into<ResourceKey>) -> Synchronizer<u64> {
    self.synchronizer_with(key, decode_count)
  }

  fn build<T: Payload>(
    &self,
    key: ResourceKey,
    policy: SyncPolicy,
    decode: Decoder<T>,
  ) -> Synchronizer<T> {
    let state = self.key_state(&key);
    Synchronizer::new(
      key,
      state,
      Arc::clone(&self.source),
      decode,
      policy,
      self.session.clone(),
    )
  }

  fn key_state<T: Payload>(&self, key: &ResourceKey) -> Arc<KeyState<T>> {
    let storage_key = key.storage_key();
    let mut keys = self.keys.lock().unwrap_or_else(PoisonError::into_inner);
    if let Some(existing) = keys.get(&storage_key) {
      match Arc::clone(existing).downcast::<KeyState<T>>() {
        Ok(state) => return state,
        Err(_) => warn!(key = %storage_key, "Cache key reused with another payload type"),
      }
    }

    let cache = TtlCache::new(storage_key.clone(), self.store.clone(), Arc::clone(&self.clock));
    let state = Arc::new(KeyState::new(cache));
    keys.insert(storage_key, Arc::clone(&state) as Arc<dyn Any + Send + Sync>);
    state
  }

  /// Drop every cached resource, e.g. on sign-out.
  pub fn clear_cache(&self) -> usize {
    self.store.clear_prefix(&format!("{}:", CACHE_NAMESPACE))
  }
}

fn serde_decoder<T: Payload>() -> Decoder<T> {
  Arc::new(|value: Value| serde_json::from_value(value).map_err(FetchError::from))
}
