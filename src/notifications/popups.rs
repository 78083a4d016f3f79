//! Transient popup list with per-id auto-dismiss timers.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tracing::debug;

use super::events::{DismissReason, NotificationEvent};
use super::record::NotificationRecord;
use crate::liveness::Liveness;

#[derive(Default)]
struct Tray {
  popups: Vec<NotificationRecord>,
  timers: HashMap<String, JoinHandle<()>>,
}

/// Popups currently on screen.
///
/// Each popup owns one dismiss timer. Manual dismissal cancels it, and
/// [`PopupTray::teardown`] cancels all of them.
#[derive(Clone)]
pub struct PopupTray {
  tray: Arc<Mutex<Tray>>,
  duration: Duration,
  events: Option<UnboundedSender<NotificationEvent>>,
  liveness: Liveness,
}

impl PopupTray {
  pub fn new(duration: Duration) -> Self {
    Self {
      tray: Arc::new(Mutex::new(Tray::default())),
      duration,
      events: None,
      liveness: Liveness::new(),
    }
  }

  /// Report dismissals on `events`.
  pub fn with_events(mut self, events: UnboundedSender<NotificationEvent>) -> Self {
    self.events = Some(events);
    self
  }

  fn lock(&self) -> MutexGuard<'_, Tray> {
    self.tray.lock().unwrap_or_else(PoisonError::into_inner)
  }

  pub fn popups(&self) -> Vec<NotificationRecord> {
    self.lock().popups.clone()
  }

  pub fn len(&self) -> usize {
    self.lock().popups.len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Put a popup on screen and arm its timer. Ignored if already showing.
  pub fn show(&self, record: NotificationRecord) -> bool {
    if !self.liveness.is_alive() {
      return false;
    }
    let mut tray = self.lock();
    if tray.popups.iter().any(|p| p.id == record.id) {
      return false;
    }

    let id = record.id.clone();
    let popups = self.clone();
    let timer_id = id.clone();
    let duration = self.duration;
    let timer = tokio::spawn(async move {
      tokio::time::sleep(duration).await;
      popups.remove(&timer_id, DismissReason::Expired);
    });

    tray.popups.push(record);
    if let Some(old) = tray.timers.insert(id, timer) {
      old.abort();
    }
    true
  }

  /// Close a popup before its timer fires.
  pub fn dismiss(&self, id: &str) -> bool {
    let timer = self.lock().timers.remove(id);
    if let Some(timer) = timer {
      timer.abort();
    }
    self.remove(id, DismissReason::Manual)
  }

  fn remove(&self, id: &str, reason: DismissReason) -> bool {
    if !self.liveness.is_alive() {
      return false;
    }
    let removed = {
      let mut tray = self.lock();
      tray.timers.remove(id);
      let before = tray.popups.len();
      tray.popups.retain(|p| p.id != id);
      tray.popups.len() != before
    };
    if removed {
      debug!(id, ?reason, "Popup dismissed");
      if let Some(events) = &self.events {
        let _ = events.send(NotificationEvent::PopupDismissed {
          id: id.to_string(),
          reason,
        });
      }
    }
    removed
  }

  pub fn mark_read(&self, id: &str) -> bool {
    let mut tray = self.lock();
    match tray.popups.iter_mut().find(|p| p.id == id) {
      Some(popup) => {
        popup.read = true;
        true
      }
      None => false,
    }
  }

  pub fn mark_all_read(&self) -> usize {
    let mut tray = self.lock();
    let mut marked = 0;
    for popup in tray.popups.iter_mut().filter(|p| !p.read) {
      popup.read = true;
      marked += 1;
    }
    marked
  }

  /// Cancel every timer and empty the tray.
  pub fn clear(&self) {
    let mut tray = self.lock();
    for (_, timer) in tray.timers.drain() {
      timer.abort();
    }
    tray.popups.clear();
  }

  pub fn teardown(&self) {
    self.liveness.teardown();
    self.clear();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::testing::settle;
  use chrono::Utc;
  use tokio::sync::mpsc;

  fn record(id: &str) -> NotificationRecord {
    NotificationRecord {
      id: id.to_string(),
      kind: Default::default(),
      title: format!("title {}", id),
      message: String::new(),
      created_at: Utc::now(),
      read: false,
      related_entity_id: None,
    }
  }

  #[tokio::test(start_paused = true)]
  async fn test_popup_expires_after_duration() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let tray = PopupTray::new(Duration::from_secs(8)).with_events(tx);
    assert!(tray.show(record("n1")));
    assert!(!tray.show(record("n1")));

    tokio::time::sleep(Duration::from_secs(7)).await;
    assert_eq!(tray.len(), 1);

    tokio::time::sleep(Duration::from_secs(2)).await;
    settle().await;
    assert!(tray.is_empty());
    assert_eq!(
      rx.try_recv().unwrap(),
      NotificationEvent::PopupDismissed {
        id: "n1".into(),
        reason: DismissReason::Expired
      }
    );
  }

  #[tokio::test(start_paused = true)]
  async fn test_manual_dismiss_cancels_timer() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let tray = PopupTray::new(Duration::from_secs(8)).with_events(tx);
    tray.show(record("n1"));
    tray.show(record("n2"));

    assert!(tray.dismiss("n1"));
    assert!(!tray.dismiss("n1"));
    assert!(matches!(
      rx.try_recv().unwrap(),
      NotificationEvent::PopupDismissed { reason: DismissReason::Manual, .. }
    ));

    tokio::time::sleep(Duration::from_secs(9)).await;
    settle().await;
    let expired: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok()).collect();
    assert_eq!(
      expired,
      vec![NotificationEvent::PopupDismissed {
        id: "n2".into(),
        reason: DismissReason::Expired
      }]
    );
  }

  #[tokio::test]
  async fn test_mark_read_in_place() {
    let tray = PopupTray::new(Duration::from_secs(8));
    tray.show(record("n1"));
    tray.show(record("n2"));

    assert!(tray.mark_read("n1"));
    assert!(!tray.mark_read("missing"));
    assert_eq!(tray.len(), 2);
    assert!(tray.popups()[0].read);
    assert_eq!(tray.mark_all_read(), 1);
    assert!(tray.popups().iter().all(|p| p.read));
  }

  #[tokio::test(start_paused = true)]
  async fn test_teardown_cancels_timers() {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let tray = PopupTray::new(Duration::from_secs(8)).with_events(tx);
    tray.show(record("n1"));
    tray.teardown();

    tokio::time::sleep(Duration::from_secs(9)).await;
    settle().await;
    assert!(tray.is_empty());
    assert!(rx.try_recv().is_err());
    assert!(!tray.show(record("n2")));
  }
}
