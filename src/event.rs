use tokio::sync::{mpsc, watch};

use crate::notifications::NotificationEvent;
use crate::sync::SessionState;

/// Events the watch loop reacts to
#[derive(Debug)]
pub enum Event {
  /// Something from the notification poller
  Notification(NotificationEvent),
  /// Credentials were accepted again or rejected
  Session(SessionState),
  /// Ctrl-C
  Shutdown,
}

/// Merges poller output, session changes, and Ctrl-C into one stream
pub struct EventHandler {
  rx: mpsc::UnboundedReceiver<Event>,
}

impl EventHandler {
  pub fn new(
    mut notifications: mpsc::UnboundedReceiver<NotificationEvent>,
    mut session: watch::Receiver<SessionState>,
  ) -> Self {
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
      let shutdown = tokio::signal::ctrl_c();
      tokio::pin!(shutdown);

      loop {
        let event = tokio::select! {
          Some(event) = notifications.recv() => Event::Notification(event),
          Ok(()) = session.changed() => Event::Session(*session.borrow_and_update()),
          _ = &mut shutdown => {
            let _ = tx.send(Event::Shutdown);
            break;
          }
        };
        if tx.send(event).is_err() {
          break;
        }
      }
    });

    Self { rx }
  }

  /// Receive the next event
  pub async fn next(&mut self) -> Option<Event> {
    self.rx.recv().await
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[tokio::test]
  async fn test_forwards_notifications_and_session_changes() {
    let (notify_tx, notify_rx) = mpsc::unbounded_channel();
    let (session_tx, session_rx) = watch::channel(SessionState::Active);
    let mut events = EventHandler::new(notify_rx, session_rx);

    notify_tx.send(NotificationEvent::UnreadCount(3)).unwrap();
    assert!(matches!(
      events.next().await,
      Some(Event::Notification(NotificationEvent::UnreadCount(3)))
    ));

    session_tx.send_replace(SessionState::Expired);
    assert!(matches!(
      events.next().await,
      Some(Event::Session(SessionState::Expired))
    ));
  }
}
