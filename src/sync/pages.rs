//! Incremental ("load more") pagination on top of per-page synchronizers.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

use super::context::SyncContext;
use super::policy::LoadOptions;
use super::synchronizer::Synchronizer;
use crate::cache::{Cacheable, ResourceKey};
use crate::error::FetchError;
use crate::liveness::Liveness;
use crate::remote::Listing;

/// Snapshot of an incrementally loaded list.
#[derive(Debug, Clone, PartialEq)]
pub struct PaginationState<T> {
  /// Last page successfully loaded (0 before the first load)
  pub page: u32,
  pub page_size: usize,
  /// Append-only across next-page loads; replaced by a full refresh
  pub items: Vec<T>,
  /// False once a page came back shorter than `page_size`
  pub has_more: bool,
  pub loading: bool,
}

struct Tracked<T> {
  state: PaginationState<T>,
  /// Bumped by every first-page load; older page results are dropped.
  generation: u64,
}

/// Pagination state machine for one list resource.
///
/// Each page is its own cache key (`page`/`limit` query), fetched through a
/// [`Synchronizer`]. `loading` keeps page fetches from overlapping, and a
/// full refresh invalidates any next-page load still in flight.
pub struct PageSequencer<T> {
  ctx: SyncContext,
  base: ResourceKey,
  page_size: usize,
  pages: Arc<Mutex<HashMap<u32, Synchronizer<Listing<T>>>>>,
  tracked: Arc<Mutex<Tracked<T>>>,
  liveness: Liveness,
}

impl<T> Clone for PageSequencer<T> {
  fn clone(&self) -> Self {
    Self {
      ctx: self.ctx.clone(),
      base: self.base.clone(),
      page_size: self.page_size,
      pages: Arc::clone(&self.pages),
      tracked: Arc::clone(&self.tracked),
      liveness: self.liveness.clone(),
    }
  }
}

impl<T: Cacheable> PageSequencer<T> {
  pub fn new(ctx: &SyncContext, base: impl Into<ResourceKey>, page_size: usize) -> Self {
    let page_size = page_size.max(1);
    Self {
      ctx: ctx.clone(),
      base: base.into(),
      page_size,
      pages: Arc::new(Mutex::new(HashMap::new())),
      tracked: Arc::new(Mutex::new(Tracked {
        state: PaginationState {
          page: 0,
          page_size,
          items: Vec::new(),
          has_more: true,
          loading: false,
        },
        generation: 0,
      })),
      liveness: Liveness::new(),
    }
  }

  fn lock(&self) -> MutexGuard<'_, Tracked<T>> {
    self.tracked.lock().unwrap_or_else(PoisonError::into_inner)
  }

  pub fn snapshot(&self) -> PaginationState<T> {
    self.lock().state.clone()
  }

  pub fn items(&self) -> Vec<T> {
    self.lock().state.items.clone()
  }

  /// Ids of everything currently listed.
  pub fn ids(&self) -> HashSet<String> {
    self
      .lock()
      .state
      .items
      .iter()
      .map(Cacheable::cache_key)
      .collect()
  }

  pub fn liveness(&self) -> &Liveness {
    &self.liveness
  }

  /// Stop applying results; anything settling afterwards is dropped.
  pub fn teardown(&self) {
    self.liveness.teardown();
  }

  fn page_sync(&self, page: u32) -> Synchronizer<Listing<T>> {
    let mut pages = self.pages.lock().unwrap_or_else(PoisonError::into_inner);
    pages
      .entry(page)
      .or_insert_with(|| {
        let query = self
          .base
          .query
          .clone()
          .with("page", page)
          .with("limit", self.page_size);
        self.ctx.listing(self.base.clone().with_query(query))
      })
      .clone()
  }

  /// Load page 1, replacing the list.
  ///
  /// Without `force_refresh`, cached page-1 data is shown right away and
  /// revalidated per TTL; a non-forced call while another load runs is a
  /// no-op. A forced refresh always fetches and wins over any next-page
  /// load in flight. Returns whether the list was updated.
  pub async fn load_first_page(&self, force_refresh: bool) -> Result<bool, FetchError> {
    let generation = {
      let mut tracked = self.lock();
      if !self.liveness.is_alive() || (tracked.state.loading && !force_refresh) {
        debug!(resource = %self.base, "First page load skipped");
        return Ok(false);
      }
      tracked.generation += 1;
      tracked.state.loading = true;
      tracked.generation
    };

    let loaded = self.page_sync(1).load(LoadOptions {
      force_refresh,
      ttl: None,
    });

    let revalidation = match (loaded.data, loaded.revalidation) {
      (Some(cached), None) => return Ok(self.apply_first(generation, cached, true)),
      (None, None) => {
        self.finish(generation);
        return Ok(false);
      }
      (cached, Some(revalidation)) => {
        if let (Some(cached), false) = (cached, force_refresh) {
          self.apply_first(generation, cached, false);
        }
        revalidation
      }
    };

    match revalidation.settled().await {
      Ok(refreshed) => Ok(self.apply_first(generation, refreshed.data, true)),
      Err(e) => {
        self.finish(generation);
        Err(e)
      }
    }
  }

  /// Append the next page. No-op while loading or once exhausted.
  ///
  /// Returns whether anything was appended (or the exhaustion flag moved).
  pub async fn load_next_page(&self) -> Result<bool, FetchError> {
    let (generation, next) = {
      let mut tracked = self.lock();
      let state = &mut tracked.state;
      if !self.liveness.is_alive() || state.loading || !state.has_more {
        debug!(resource = %self.base, loading = state.loading, has_more = state.has_more, "Next page skipped");
        return Ok(false);
      }
      state.loading = true;
      let next = state.page + 1;
      (tracked.generation, next)
    };

    match self.page_sync(next).refresh().settled().await {
      Ok(refreshed) => Ok(self.apply_next(generation, next, refreshed.data)),
      Err(e) => {
        self.finish(generation);
        Err(e)
      }
    }
  }

  /// Mutate listed items in place and write the change through to every
  /// cached page, including pages this sequencer never loaded itself.
  pub fn update_items(&self, f: impl Fn(&mut T)) {
    if !self.liveness.is_alive() {
      return;
    }
    {
      let mut tracked = self.lock();
      tracked.state.items.iter_mut().for_each(&f);
    }

    // Cached pages are contiguous from page 1
    let mut page = 1;
    while self
      .page_sync(page)
      .update(|listing| listing.items.iter_mut().for_each(&f))
      .is_some()
    {
      page += 1;
    }
    debug!(resource = %self.base, pages = page - 1, "Wrote item update through cached pages");
  }

  fn apply_first(&self, generation: u64, listing: Listing<T>, done: bool) -> bool {
    let mut tracked = self.lock();
    if !self.liveness.is_alive() || tracked.generation != generation {
      return false;
    }

    let fetched = listing.items.len();
    let mut seen = HashSet::new();
    let state = &mut tracked.state;
    state.items = listing
      .items
      .into_iter()
      .filter(|item| seen.insert(item.cache_key()))
      .collect();
    state.page = 1;
    state.has_more = fetched >= self.page_size;
    if done {
      state.loading = false;
    }
    true
  }

  fn apply_next(&self, generation: u64, page: u32, listing: Listing<T>) -> bool {
    let mut tracked = self.lock();
    if !self.liveness.is_alive() || tracked.generation != generation {
      debug!(resource = %self.base, page, "Dropping page from an older list");
      return false;
    }

    let fetched = listing.items.len();
    let state = &mut tracked.state;
    let mut seen: HashSet<String> = state.items.iter().map(Cacheable::cache_key).collect();
    state
      .items
      .extend(listing.items.into_iter().filter(|item| seen.insert(item.cache_key())));
    state.page = page;
    state.has_more = fetched >= self.page_size;
    state.loading = false;
    if listing.has_more.is_some_and(|hint| hint != state.has_more) {
      debug!(resource = %self.base, page, "Server hasMore disagrees with page size");
    }
    true
  }

  fn finish(&self, generation: u64) {
    let mut tracked = self.lock();
    if tracked.generation == generation {
      tracked.state.loading = false;
    }
  }
}
