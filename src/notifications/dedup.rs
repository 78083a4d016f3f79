//! At-most-once popup delivery across restarts.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tracing::debug;

use crate::cache::PersistentStore;
use crate::clock::{duration_ms, Clock, Millis};
use crate::constants::{DEDUP_IDS_KEY, DEDUP_TIMES_KEY};

#[derive(Default)]
struct Shown {
  /// Ids in the order they were first shown
  order: Vec<String>,
  at: HashMap<String, Millis>,
}

impl Shown {
  fn remove_older_than(&mut self, cutoff: Millis) -> usize {
    let before = self.order.len();
    let at = &mut self.at;
    self.order.retain(|id| match at.get(id) {
      Some(&shown) if shown >= cutoff => true,
      _ => {
        at.remove(id);
        false
      }
    });
    before - self.order.len()
  }
}

/// Remembers which notification ids already produced a popup.
///
/// Persisted as two entries: the id list and an id -> first-shown map. An id
/// stays until it ages out of the retention window; showing it again never
/// moves its timestamp.
pub struct DedupTracker {
  store: PersistentStore,
  clock: Arc<dyn Clock>,
  retention: Duration,
  shown: Mutex<Shown>,
}

impl DedupTracker {
  /// Load persisted state and prune it once.
  ///
  /// Ids found only in the persisted list (no timestamp) are stamped with
  /// the load time; ids found only in the map are appended to the list.
  pub fn open(store: PersistentStore, clock: Arc<dyn Clock>, retention: Duration) -> Self {
    let now = clock.now_ms();
    let ids: Vec<String> = store.get(DEDUP_IDS_KEY).unwrap_or_default();
    let mut at: HashMap<String, Millis> = store.get(DEDUP_TIMES_KEY).unwrap_or_default();

    let mut order = Vec::with_capacity(ids.len().max(at.len()));
    for id in ids {
      if !at.contains_key(&id) {
        at.insert(id.clone(), now);
      }
      if !order.contains(&id) {
        order.push(id);
      }
    }
    let mut orphans: Vec<_> = at
      .iter()
      .filter(|(id, _)| !order.contains(*id))
      .map(|(id, shown)| (*shown, id.clone()))
      .collect();
    orphans.sort();
    order.extend(orphans.into_iter().map(|(_, id)| id));

    let tracker = Self {
      store,
      clock,
      retention,
      shown: Mutex::new(Shown { order, at }),
    };
    tracker.prune(retention);
    tracker
  }

  fn lock(&self) -> MutexGuard<'_, Shown> {
    self.shown.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn cutoff(&self, retention: Duration) -> Millis {
    self.clock.now_ms().saturating_sub(duration_ms(retention))
  }

  fn persist(&self, shown: &Shown) {
    self.store.set(DEDUP_IDS_KEY, &shown.order);
    self.store.set(DEDUP_TIMES_KEY, &shown.at);
  }

  /// Whether `id` already produced a popup within the retention window.
  ///
  /// Entries past the window are dropped on sight.
  pub fn has_shown(&self, id: &str) -> bool {
    let cutoff = self.cutoff(self.retention);
    let mut shown = self.lock();
    match shown.at.get(id) {
      Some(&at) if at >= cutoff => true,
      Some(_) => {
        let removed = shown.remove_older_than(cutoff);
        debug!(id, removed, "Dedup entry aged out");
        self.persist(&shown);
        false
      }
      None => false,
    }
  }

  /// Record `id` as shown now. Returns false if it was already recorded
  /// within the retention window; an aged-out entry is recorded afresh.
  pub fn mark_shown(&self, id: &str) -> bool {
    let now = self.clock.now_ms();
    let cutoff = self.cutoff(self.retention);
    let mut shown = self.lock();
    match shown.at.get(id) {
      Some(&at) if at >= cutoff => return false,
      Some(_) => {
        let removed = shown.remove_older_than(cutoff);
        debug!(id, removed, "Dedup entry aged out");
      }
      None => {}
    }
    shown.at.insert(id.to_string(), now);
    shown.order.push(id.to_string());
    self.persist(&shown);
    true
  }

  /// Drop entries older than `retention` and persist the result.
  pub fn prune(&self, retention: Duration) -> usize {
    let cutoff = self.cutoff(retention);
    let mut shown = self.lock();
    let removed = shown.remove_older_than(cutoff);
    if removed > 0 {
      debug!(removed, remaining = shown.order.len(), "Pruned dedup entries");
    }
    self.persist(&shown);
    removed
  }

  pub fn shown_at(&self, id: &str) -> Option<Millis> {
    self.lock().at.get(id).copied()
  }

  pub fn len(&self) -> usize {
    self.lock().order.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}
