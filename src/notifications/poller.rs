//! Idle/Polling state machine that surfaces new notifications as popups.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::{debug, info, warn};

use super::dedup::DedupTracker;
use super::events::NotificationEvent;
use super::popups::PopupTray;
use super::record::NotificationRecord;
use crate::cache::{Query, ResourceKey};
use crate::clock::{duration_ms, Clock, Millis};
use crate::constants::{self, NOTIFICATIONS_RESOURCE, UNREAD_COUNT_RESOURCE};
use crate::error::FetchError;
use crate::liveness::Liveness;
use crate::remote::{Listing, RemoteSource};
use crate::scheduler::{Scheduler, TaskId};
use crate::sync::{PageSequencer, SyncContext, Synchronizer};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollerSettings {
  pub interval: Duration,
  /// Only items created this recently may pop up
  pub recency_window: Duration,
  /// How long shown ids are remembered
  pub retention: Duration,
  pub max_popups: usize,
  pub popup_duration: Duration,
  pub page_size: usize,
  /// Items requested per tick
  pub recent_limit: usize,
}

impl Default for PollerSettings {
  fn default() -> Self {
    Self {
      interval: constants::POLL_INTERVAL,
      recency_window: constants::RECENCY_WINDOW,
      retention: constants::DEDUP_RETENTION,
      max_popups: constants::MAX_POPUPS_PER_BATCH,
      popup_duration: constants::POPUP_DURATION,
      page_size: constants::PAGE_SIZE,
      recent_limit: constants::RECENT_FETCH_LIMIT,
    }
  }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerState {
  Idle,
  Polling,
}

/// What one tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
  pub fetched: usize,
  /// Unread items seen for the first time this process
  pub candidates: usize,
  /// Ids surfaced as popups, in server order
  pub shown: Vec<String>,
  /// Counter after the refresh, if it succeeded
  pub unread: Option<u64>,
}

pub(super) struct Inner {
  pub(super) settings: PollerSettings,
  pub(super) clock: Arc<dyn Clock>,
  pub(super) source: Arc<dyn RemoteSource>,
  pub(super) dedup: DedupTracker,
  /// Candidates already evaluated, whatever the verdict, with their
  /// creation time. Dropped once outside the recency window.
  pub(super) processed: Mutex<HashMap<String, Millis>>,
  pub(super) list: PageSequencer<NotificationRecord>,
  pub(super) recent: Synchronizer<Listing<NotificationRecord>>,
  pub(super) unread: Synchronizer<u64>,
  pub(super) popups: PopupTray,
  pub(super) events: UnboundedSender<NotificationEvent>,
  pub(super) state: Mutex<PollerState>,
  pub(super) registration: Mutex<Option<(Scheduler, TaskId)>>,
  pub(super) liveness: Liveness,
}

/// Polls the most recent notifications and announces the new ones.
///
/// A candidate pops up only if it is unread, has not been evaluated before
/// in this process, was never shown (per [`DedupTracker`]), is not already in
/// the loaded notification list, and falls inside the recency window. At most
/// `max_popups` per tick. Every tick also refreshes the unread counter.
#[derive(Clone)]
pub struct NotificationPoller {
  pub(super) inner: Arc<Inner>,
}

impl NotificationPoller {
  pub fn new(
    ctx: &SyncContext,
    settings: PollerSettings,
  ) -> (Self, UnboundedReceiver<NotificationEvent>) {
    let (events, rx) = mpsc::unbounded_channel();

    let recent_key = ResourceKey::new(NOTIFICATIONS_RESOURCE).with_query(
      Query::new()
        .with("limit", settings.recent_limit)
        .with("unread", true),
    );
    let dedup = DedupTracker::open(
      ctx.store().clone(),
      Arc::clone(ctx.clock()),
      settings.retention,
    );

    let inner = Inner {
      clock: Arc::clone(ctx.clock()),
      source: Arc::clone(ctx.source()),
      dedup,
      processed: Mutex::new(HashMap::new()),
      list: PageSequencer::new(ctx, NOTIFICATIONS_RESOURCE, settings.page_size),
      recent: ctx.listing(recent_key),
      unread: ctx.counter(UNREAD_COUNT_RESOURCE),
      popups: PopupTray::new(settings.popup_duration).with_events(events.clone()),
      events,
      state: Mutex::new(PollerState::Idle),
      registration: Mutex::new(None),
      liveness: Liveness::new(),
      settings,
    };

    (
      Self {
        inner: Arc::new(inner),
      },
      rx,
    )
  }

  pub fn settings(&self) -> &PollerSettings {
    &self.inner.settings
  }

  pub fn state(&self) -> PollerState {
    *self.lock_state()
  }

  /// The full notification list. Ids listed here never pop up.
  pub fn list(&self) -> &PageSequencer<NotificationRecord> {
    &self.inner.list
  }

  pub fn popups(&self) -> &PopupTray {
    &self.inner.popups
  }

  pub fn dedup(&self) -> &DedupTracker {
    &self.inner.dedup
  }

  /// Last known unread count, without a fetch.
  pub fn unread_count(&self) -> Option<u64> {
    self.inner.unread.peek().map(|entry| entry.data)
  }

  pub fn processed_count(&self) -> usize {
    self
      .inner
      .processed
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .len()
  }

  fn lock_state(&self) -> MutexGuard<'_, PollerState> {
    self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Idle -> Polling. False if a tick is already running.
  fn enter(&self) -> bool {
    let mut state = self.lock_state();
    if *state == PollerState::Polling {
      return false;
    }
    *state = PollerState::Polling;
    true
  }

  fn leave(&self) {
    *self.lock_state() = PollerState::Idle;
  }

  pub(super) fn emit(&self, event: NotificationEvent) {
    if self.inner.liveness.is_alive() {
      let _ = self.inner.events.send(event);
    }
  }

  /// One poll: fetch recent items, surface the new ones, refresh the counter.
  ///
  /// The counter refresh runs even when the fetch fails. A tick started
  /// while another is running, or after teardown, does nothing.
  pub async fn tick(&self) -> Result<TickReport, FetchError> {
    if !self.inner.liveness.is_alive() || !self.enter() {
      debug!("Notification poll skipped");
      return Ok(TickReport::default());
    }

    let mut report = TickReport::default();
    let fetched = match self.inner.recent.refresh().settled().await {
      Ok(refreshed) => {
        self.surface(refreshed.data.items, &mut report);
        Ok(())
      }
      Err(e) => {
        self.emit(NotificationEvent::Failed(e.to_string()));
        Err(e)
      }
    };

    report.unread = self.refresh_unread().await;
    self.leave();
    fetched.map(|()| report)
  }

  fn surface(&self, items: Vec<NotificationRecord>, report: &mut TickReport) {
    if !self.inner.liveness.is_alive() {
      return;
    }
    let settings = &self.inner.settings;
    let now = self.inner.clock.now_ms();
    let window = duration_ms(settings.recency_window);
    let listed = self.inner.list.ids();
    report.fetched = items.len();

    let candidates: Vec<NotificationRecord> = {
      let mut processed = self
        .inner
        .processed
        .lock()
        .unwrap_or_else(PoisonError::into_inner);
      // Anything older can no longer pop up
      processed.retain(|_, created| *created >= now.saturating_sub(window));
      items
        .into_iter()
        .filter(|n| !n.read)
        .filter(|n| {
          processed
            .insert(n.id.clone(), n.created_at.timestamp_millis())
            .is_none()
        })
        .collect()
    };
    report.candidates = candidates.len();

    let dedup = &self.inner.dedup;
    let fresh: Vec<NotificationRecord> = candidates
      .into_iter()
      .filter(|n| !dedup.has_shown(&n.id) && !listed.contains(&n.id) && n.is_recent(now, window))
      .take(settings.max_popups)
      .collect();

    for record in &fresh {
      dedup.mark_shown(&record.id);
      self.inner.popups.show(record.clone());
    }
    report.shown = fresh.iter().map(|n| n.id.clone()).collect();

    if !fresh.is_empty() {
      info!(count = fresh.len(), "New notifications");
      self.emit(NotificationEvent::Arrived(fresh));
    }
  }

  /// Force-refresh the unread counter and report it.
  pub(super) async fn refresh_unread(&self) -> Option<u64> {
    match self.inner.unread.refresh().settled().await {
      Ok(refreshed) => {
        self.emit(NotificationEvent::UnreadCount(refreshed.data));
        Some(refreshed.data)
      }
      Err(e) => {
        warn!(error = %e, "Unread counter refresh failed");
        None
      }
    }
  }

  /// Register the poll on `scheduler`. Calling it again returns the
  /// existing registration.
  pub fn start(&self, scheduler: &Scheduler) -> TaskId {
    let mut registration = self
      .inner
      .registration
      .lock()
      .unwrap_or_else(PoisonError::into_inner);
    if let Some((_, id)) = registration.as_ref() {
      return *id;
    }

    let weak: Weak<Inner> = Arc::downgrade(&self.inner);
    let id = scheduler.register(NOTIFICATIONS_RESOURCE, self.inner.settings.interval, move || {
      let inner = weak.upgrade();
      async move {
        if let Some(inner) = inner {
          let poller = NotificationPoller { inner };
          if let Err(e) = poller.tick().await {
            warn!(error = %e, "Notification poll failed");
          }
        }
      }
    });
    info!(every_secs = self.inner.settings.interval.as_secs(), "Notification poller started");
    *registration = Some((scheduler.clone(), id));
    id
  }

  pub fn stop(&self) {
    let registration = self
      .inner
      .registration
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .take();
    if let Some((scheduler, id)) = registration {
      scheduler.unregister(id);
    }
  }

  /// Stop polling, cancel popup timers, and drop late results.
  pub fn teardown(&self) {
    self.stop();
    self.inner.liveness.teardown();
    self.inner.popups.teardown();
    self.inner.list.teardown();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::testing::{context, notification, MockSource};
  use serde_json::{json, Value};

  fn recent(items: Vec<Value>) -> Result<Value, FetchError> {
    Ok(json!({ "data": items }))
  }

  fn drain(rx: &mut UnboundedReceiver<NotificationEvent>) -> Vec<NotificationEvent> {
    std::iter::from_fn(|| rx.try_recv().ok()).collect()
  }

  fn count(source: &MockSource, n: u64) {
    source.respond(UNREAD_COUNT_RESOURCE, Ok(json!({ "count": n })));
  }

  #[tokio::test]
  async fn test_batch_with_already_shown_items() {
    let (ctx, source, clock) = context();
    let now = clock.now_ms();
    let items = (1..=5)
      .map(|i| notification(&format!("n{}", i), now - 30_000, false))
      .collect();
    source.respond(NOTIFICATIONS_RESOURCE, recent(items));
    count(&source, 5);

    let (poller, mut events) = NotificationPoller::new(&ctx, PollerSettings::default());
    poller.dedup().mark_shown("n1");
    poller.dedup().mark_shown("n3");

    let report = poller.tick().await.unwrap();
    assert_eq!(report.shown, vec!["n2", "n4", "n5"]);
    assert_eq!(report.candidates, 5);
    assert_eq!(report.unread, Some(5));
    assert_eq!(poller.processed_count(), 5);
    assert_eq!(poller.popups().len(), 3);
    assert_eq!(source.fetch_count(UNREAD_COUNT_RESOURCE), 1);
    assert_eq!(poller.state(), PollerState::Idle);

    let events = drain(&mut events);
    assert_eq!(events.len(), 2);
    assert!(matches!(&events[0], NotificationEvent::Arrived(batch) if batch.len() == 3));
    assert_eq!(events[1], NotificationEvent::UnreadCount(5));
  }

  #[tokio::test]
  async fn test_processed_items_are_not_reevaluated() {
    let (ctx, source, clock) = context();
    let now = clock.now_ms();
    let items: Vec<Value> = (1..=5)
      .map(|i| notification(&format!("n{}", i), now - 10_000, false))
      .collect();
    source.respond(NOTIFICATIONS_RESOURCE, recent(items));
    count(&source, 5);

    let (poller, _events) = NotificationPoller::new(&ctx, PollerSettings::default());
    let first = poller.tick().await.unwrap();
    assert_eq!(first.shown, vec!["n1", "n2", "n3"]);

    // n4 and n5 lost the batch cut; they stay processed and never pop up
    let second = poller.tick().await.unwrap();
    assert!(second.shown.is_empty());
    assert_eq!(second.candidates, 0);
    assert_eq!(source.fetch_count(UNREAD_COUNT_RESOURCE), 2);
  }

  #[tokio::test]
  async fn test_processed_ids_expire_with_recency_window() {
    let (ctx, source, clock) = context();
    let now = clock.now_ms();
    source.respond_once(
      NOTIFICATIONS_RESOURCE,
      recent(vec![notification("n1", now - 10_000, false)]),
    );
    source.respond(NOTIFICATIONS_RESOURCE, recent(vec![]));
    count(&source, 1);

    let (poller, _events) = NotificationPoller::new(&ctx, PollerSettings::default());
    poller.tick().await.unwrap();
    assert_eq!(poller.processed_count(), 1);

    clock.advance(constants::RECENCY_WINDOW);
    poller.tick().await.unwrap();
    assert_eq!(poller.processed_count(), 0);
    assert!(poller.dedup().has_shown("n1"));
  }

  #[tokio::test]
  async fn test_old_read_and_listed_items_stay_quiet() {
    let (ctx, source, clock) = context();
    let now = clock.now_ms();
    source.respond_once(
      NOTIFICATIONS_RESOURCE,
      recent(vec![notification("listed", now - 5_000, false)]),
    );
    source.respond(
      NOTIFICATIONS_RESOURCE,
      recent(vec![
        notification("old", now - 10 * 60_000, false),
        notification("read", now - 5_000, true),
        notification("listed", now - 5_000, false),
        notification("new", now - 5_000, false),
      ]),
    );
    count(&source, 3);

    let (poller, _events) = NotificationPoller::new(&ctx, PollerSettings::default());
    poller.list().load_first_page(false).await.unwrap();
    let report = poller.tick().await.unwrap();

    assert_eq!(report.fetched, 4);
    assert_eq!(report.candidates, 3);
    assert_eq!(report.shown, vec!["new"]);
    assert!(poller.dedup().has_shown("new"));
    assert!(!poller.dedup().has_shown("old"));
  }

  #[tokio::test]
  async fn test_reloaded_list_keeps_newly_listed_items_quiet() {
    let (ctx, source, clock) = context();
    let now = clock.now_ms();
    // list, recent, list again, recent again
    source.respond_once(NOTIFICATIONS_RESOURCE, recent(vec![]));
    source.respond_once(NOTIFICATIONS_RESOURCE, recent(vec![]));
    source.respond_once(
      NOTIFICATIONS_RESOURCE,
      recent(vec![notification("n1", now - 5_000, false)]),
    );
    source.respond_once(
      NOTIFICATIONS_RESOURCE,
      recent(vec![notification("n1", now - 5_000, false)]),
    );
    count(&source, 1);

    let (poller, _events) = NotificationPoller::new(&ctx, PollerSettings::default());
    poller.list().load_first_page(false).await.unwrap();
    poller.tick().await.unwrap();

    assert!(poller.list().load_first_page(true).await.unwrap());
    let report = poller.tick().await.unwrap();
    assert_eq!(report.candidates, 1);
    assert!(report.shown.is_empty());
    assert!(!poller.dedup().has_shown("n1"));
  }

  #[tokio::test]
  async fn test_failed_fetch_still_refreshes_counter() {
    let (ctx, source, _clock) = context();
    source.respond(
      NOTIFICATIONS_RESOURCE,
      Err(FetchError::Transport("connection reset".into())),
    );
    count(&source, 7);

    let (poller, mut events) = NotificationPoller::new(&ctx, PollerSettings::default());
    assert!(poller.tick().await.is_err());
    assert_eq!(poller.unread_count(), Some(7));
    assert_eq!(poller.state(), PollerState::Idle);

    let events = drain(&mut events);
    assert!(matches!(events[0], NotificationEvent::Failed(_)));
    assert_eq!(events[1], NotificationEvent::UnreadCount(7));
  }

  #[tokio::test]
  async fn test_recent_fetch_asks_for_unread_window() {
    let (ctx, source, _clock) = context();
    source.respond(NOTIFICATIONS_RESOURCE, recent(vec![]));
    count(&source, 0);

    let settings = PollerSettings {
      recent_limit: 4,
      ..PollerSettings::default()
    };
    let (poller, _events) = NotificationPoller::new(&ctx, settings);
    poller.tick().await.unwrap();

    let (_, query) = &source.fetches()[0];
    assert_eq!(query.get("limit"), Some("4"));
    assert_eq!(query.get("unread"), Some("true"));
  }

  #[tokio::test]
  async fn test_scheduler_drives_ticks_until_stopped() {
    let (ctx, source, _clock) = context();
    source.respond(NOTIFICATIONS_RESOURCE, recent(vec![]));
    count(&source, 0);

    let scheduler = Scheduler::new(constants::SCHEDULER_RESOLUTION);
    let (poller, _events) = NotificationPoller::new(&ctx, PollerSettings::default());
    let id = poller.start(&scheduler);
    assert_eq!(poller.start(&scheduler), id);

    assert_eq!(scheduler.run_due().await, 1);
    assert_eq!(source.fetch_count(NOTIFICATIONS_RESOURCE), 1);

    poller.stop();
    assert!(scheduler.task_names().is_empty());
  }

  #[tokio::test]
  async fn test_teardown_silences_ticks() {
    let (ctx, source, clock) = context();
    let now = clock.now_ms();
    source.respond(
      NOTIFICATIONS_RESOURCE,
      recent(vec![notification("n1", now, false)]),
    );
    count(&source, 1);

    let (poller, mut events) = NotificationPoller::new(&ctx, PollerSettings::default());
    poller.teardown();
    assert_eq!(poller.tick().await.unwrap(), TickReport::default());
    assert_eq!(source.fetch_count(NOTIFICATIONS_RESOURCE), 0);
    assert!(drain(&mut events).is_empty());
  }
}
