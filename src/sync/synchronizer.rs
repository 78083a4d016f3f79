//! Stale-while-revalidate orchestration for one cache key.

use futures::future::{BoxFuture, Shared};
use futures::FutureExt;
use serde_json::Value;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::watch;
use tracing::{debug, warn};

use super::context::Session;
use super::policy::{LoadOptions, SyncPolicy};
use crate::cache::{CacheEntry, Freshness, Payload, ResourceKey, TtlCache};
use crate::clock::{duration_ms, Millis};
use crate::error::FetchError;
use crate::remote::RemoteSource;

/// Turns a raw JSON payload into the cached type.
pub type Decoder<T> = Arc<dyn Fn(Value) -> Result<T, FetchError> + Send + Sync>;

type Flight<T> = Shared<BoxFuture<'static, Result<Refreshed<T>, FetchError>>>;

/// What a settled revalidation did to the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
  /// New payload differed and replaced the entry
  Changed,
  /// Payload was identical; only the timestamp moved
  Unchanged,
  /// A local write landed while the request was out; the payload was dropped
  Superseded,
}

/// Settlement of a successful revalidation.
#[derive(Debug, Clone)]
pub struct Refreshed<T> {
  /// Data now held by the cache (the fetched payload when superseded
  /// without any cached entry)
  pub data: T,
  pub timestamp: Millis,
  pub outcome: RefreshOutcome,
}

/// Handle to the single in-flight revalidation of a key.
///
/// Every caller that triggers or joins the same flight gets a clone; all
/// of them observe the same settlement.
#[derive(Clone)]
pub struct Revalidation<T> {
  flight: Flight<T>,
}

impl<T: Payload> Revalidation<T> {
  /// Wait for the request to settle.
  pub async fn settled(self) -> Result<Refreshed<T>, FetchError> {
    self.flight.await
  }
}

impl<T> fmt::Debug for Revalidation<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Revalidation").finish_non_exhaustive()
  }
}

/// Result of [`Synchronizer::load`]: whatever is cached right now, plus the
/// revalidation it kicked off or joined, if any.
#[derive(Debug)]
pub struct Loaded<T> {
  pub data: Option<T>,
  pub timestamp: Option<Millis>,
  pub freshness: Freshness,
  pub revalidation: Option<Revalidation<T>>,
}

impl<T> Loaded<T> {
  /// Nothing to show yet and a fetch is underway; the only case that
  /// warrants a loading skeleton.
  pub fn is_loading(&self) -> bool {
    self.data.is_none() && self.revalidation.is_some()
  }

  pub fn data_or_default(self) -> T
  where
    T: Default,
  {
    self.data.unwrap_or_default()
  }
}

/// Per-key process state. Never persisted.
struct FlightState<T> {
  in_flight: Option<Flight<T>>,
  last_triggered_at: Option<Millis>,
  /// Bumped by every local write; a revalidation issued under an older
  /// value may not overwrite the entry.
  write_seq: u64,
}

/// Everything one cache key owns in a process: the memory copy, the flight
/// and the revision counter. Every synchronizer of the key shares it.
pub(crate) struct KeyState<T> {
  cache: TtlCache<T>,
  flight: Mutex<FlightState<T>>,
  revision: watch::Sender<u64>,
}

impl<T: Payload> KeyState<T> {
  pub(crate) fn new(cache: TtlCache<T>) -> Self {
    let (revision, _) = watch::channel(0);
    Self {
      cache,
      flight: Mutex::new(FlightState {
        in_flight: None,
        last_triggered_at: None,
        write_seq: 0,
      }),
      revision,
    }
  }

  fn lock_flight(&self) -> MutexGuard<'_, FlightState<T>> {
    self.flight.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn bump_revision(&self) {
    self.revision.send_modify(|rev| *rev += 1);
  }
}

struct Inner<T> {
  resource: ResourceKey,
  key: Arc<KeyState<T>>,
  source: Arc<dyn RemoteSource>,
  decode: Decoder<T>,
  policy: SyncPolicy,
  session: Session,
}

/// Owns one resource's cache entry and is the only thing that fetches it.
///
/// Loads answer synchronously from the cache and, when needed, start a
/// revalidation in the background. At most one revalidation per key is in
/// flight; overlapping triggers join it, whichever synchronizer of the key
/// they come through.
pub struct Synchronizer<T> {
  inner: Arc<Inner<T>>,
}

impl<T> Clone for Synchronizer<T> {
  fn clone(&self) -> Self {
    Self {
      inner: Arc::clone(&self.inner),
    }
  }
}

impl<T: Payload> Synchronizer<T> {
  pub(crate) fn new(
    resource: ResourceKey,
    key: Arc<KeyState<T>>,
    source: Arc<dyn RemoteSource>,
    decode: Decoder<T>,
    policy: SyncPolicy,
    session: Session,
  ) -> Self {
    Self {
      inner: Arc::new(Inner {
        resource,
        key,
        source,
        decode,
        policy,
        session,
      }),
    }
  }

  pub fn resource(&self) -> &ResourceKey {
    &self.inner.resource
  }

  pub fn policy(&self) -> SyncPolicy {
    self.inner.policy
  }

  /// Serve the cached value and decide whether to revalidate.
  ///
  /// - fresh and not forced: no fetch, unless the entry is past the soft
  ///   TTL, in which case a silent revalidation starts (skipped when one is
  ///   already running)
  /// - stale, missing, or forced: start a revalidation, or join the one in
  ///   flight
  pub fn load(&self, options: LoadOptions) -> Loaded<T> {
    let now = self.inner.key.cache.now_ms();
    let ttl = options.ttl.unwrap_or(self.inner.policy.ttl);

    match self.inner.key.cache.get() {
      Some(entry) if !options.force_refresh && entry.is_fresh(ttl, now) => {
        let revalidation = match self.inner.policy.soft_ttl {
          Some(soft) if entry.age_ms(now) >= duration_ms(soft) => self.start_soft(now, soft),
          _ => None,
        };
        debug!(resource = %self.inner.resource, background = revalidation.is_some(), "Cache hit");
        Loaded {
          data: Some(entry.data),
          timestamp: Some(entry.timestamp),
          freshness: Freshness::Fresh,
          revalidation,
        }
      }
      entry => {
        let freshness = if entry.is_some() {
          Freshness::Stale
        } else {
          Freshness::Missing
        };
        debug!(resource = %self.inner.resource, ?freshness, forced = options.force_refresh, "Revalidating");
        let revalidation = self.begin_or_join(now);
        let (data, timestamp) = match entry {
          Some(entry) => (Some(entry.data), Some(entry.timestamp)),
          None => (None, None),
        };
        Loaded {
          data,
          timestamp,
          freshness,
          revalidation: Some(revalidation),
        }
      }
    }
  }

  /// Force a revalidation (or join the running one).
  pub fn refresh(&self) -> Revalidation<T> {
    self.begin_or_join(self.inner.key.cache.now_ms())
  }

  /// Cached entry without triggering anything.
  pub fn peek(&self) -> Option<CacheEntry<T>> {
    self.inner.key.cache.get()
  }

  /// Write-through after a local mutation: replace the entry with `data`.
  ///
  /// Any revalidation already in flight will not overwrite this value.
  pub fn set(&self, data: T) -> CacheEntry<T> {
    let entry = {
      let mut flight = self.inner.key.lock_flight();
      flight.write_seq += 1;
      self.inner.key.cache.set(data)
    };
    self.inner.key.bump_revision();
    entry
  }

  /// Apply `f` to the cached value and write the result through.
  ///
  /// Returns `None` when nothing is cached.
  pub fn update(&self, f: impl FnOnce(&mut T)) -> Option<CacheEntry<T>> {
    let mut data = self.inner.key.cache.get()?.data;
    f(&mut data);
    Some(self.set(data))
  }

  pub fn clear(&self) {
    {
      let mut flight = self.inner.key.lock_flight();
      flight.write_seq += 1;
      self.inner.key.cache.clear();
    }
    self.inner.key.bump_revision();
  }

  pub fn is_in_flight(&self) -> bool {
    self.inner.key.lock_flight().in_flight.is_some()
  }

  pub fn last_triggered_at(&self) -> Option<Millis> {
    self.inner.key.lock_flight().last_triggered_at
  }

  /// Revision counter that moves on every content change.
  ///
  /// A revalidation that returns identical data only extends freshness and
  /// does not move it.
  pub fn subscribe(&self) -> watch::Receiver<u64> {
    self.inner.key.revision.subscribe()
  }

  fn start_soft(&self, now: Millis, soft: std::time::Duration) -> Option<Revalidation<T>> {
    let mut flight = self.inner.key.lock_flight();
    if flight.in_flight.is_some() {
      return None;
    }
    // Don't hammer the server when callers load in a tight loop.
    if let Some(last) = flight.last_triggered_at {
      if now.saturating_sub(last) < duration_ms(soft) {
        return None;
      }
    }
    Some(self.begin_locked(&mut flight, now))
  }

  fn begin_or_join(&self, now: Millis) -> Revalidation<T> {
    let mut flight = self.inner.key.lock_flight();
    if let Some(existing) = &flight.in_flight {
      debug!(resource = %self.inner.resource, "Joining in-flight revalidation");
      return Revalidation {
        flight: existing.clone(),
      };
    }
    self.begin_locked(&mut flight, now)
  }

  fn begin_locked(&self, flight: &mut FlightState<T>, now: Millis) -> Revalidation<T> {
    flight.last_triggered_at = Some(now);
    let seq = flight.write_seq;

    let inner = Arc::clone(&self.inner);
    let request: BoxFuture<'static, Result<Refreshed<T>, FetchError>> = async move {
      let result = inner.revalidate(seq).await;
      inner.key.lock_flight().in_flight = None;
      result
    }
    .boxed();
    let shared = request.shared();
    flight.in_flight = Some(shared.clone());

    // Drive the request even if no caller awaits it.
    let driver = shared.clone();
    let resource = self.inner.resource.clone();
    tokio::spawn(async move {
      if let Err(e) = driver.await {
        warn!(%resource, error = %e, "Revalidation failed, keeping cached data");
      }
    });

    Revalidation { flight: shared }
  }
}

impl<T: Payload> Inner<T> {
  async fn revalidate(&self, seq: u64) -> Result<Refreshed<T>, FetchError> {
    let payload = match self
      .source
      .fetch(&self.resource.name, &self.resource.query)
      .await
    {
      Ok(payload) => payload,
      Err(e) => {
        if e.is_auth() {
          self.session.expire();
        }
        return Err(e);
      }
    };
    let data = (self.decode)(payload)?;

    let refreshed = {
      let flight = self.key.lock_flight();
      let current = self.key.cache.get();

      if flight.write_seq != seq {
        debug!(resource = %self.resource, "Dropping revalidation older than a local write");
        return Ok(match current {
          Some(entry) => Refreshed {
            data: entry.data,
            timestamp: entry.timestamp,
            outcome: RefreshOutcome::Superseded,
          },
          None => Refreshed {
            data,
            timestamp: self.key.cache.now_ms(),
            outcome: RefreshOutcome::Superseded,
          },
        });
      }

      match current {
        Some(entry) if entry.data == data => {
          let touched = self.key.cache.touch().unwrap_or(entry);
          Refreshed {
            data: touched.data,
            timestamp: touched.timestamp,
            outcome: RefreshOutcome::Unchanged,
          }
        }
        _ => {
          let entry = self.key.cache.set(data);
          Refreshed {
            data: entry.data,
            timestamp: entry.timestamp,
            outcome: RefreshOutcome::Changed,
          }
        }
      }
    };

    if refreshed.outcome == RefreshOutcome::Changed {
      self.key.bump_revision();
    }
    Ok(refreshed)
  }
}
