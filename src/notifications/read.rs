//! Mark-as-read, single and bulk.
//!
//! Order matters: remote call, loaded list, popups, cached recent items,
//! then the unread counter. The counter refresh always runs so the badge
//! never drifts far from the server even when the remote call fails.

use tracing::{info, warn};

use super::poller::NotificationPoller;
use crate::constants::{NOTIFICATIONS_RESOURCE, READ_ALL_PATH};
use crate::error::FetchError;
use crate::remote::Mutation;

impl NotificationPoller {
  /// Mark one notification read. Returns the refreshed unread count.
  pub async fn mark_read(&self, id: &str) -> Result<Option<u64>, FetchError> {
    let path = format!("{}/{}/read", NOTIFICATIONS_RESOURCE, id);
    let result = self
      .inner
      .source
      .mutate(Mutation::Patch, &path, None)
      .await;

    match &result {
      Ok(_) if self.inner.liveness.is_alive() => {
        self.inner.list.update_items(|n| {
          if n.id == id {
            n.read = true;
          }
        });
        self.inner.popups.mark_read(id);
        self.inner.recent.update(|listing| {
          for n in listing.items.iter_mut().filter(|n| n.id == id) {
            n.read = true;
          }
        });
        info!(id, "Notification marked read");
      }
      Ok(_) => {}
      Err(e) => warn!(id, error = %e, "Mark as read failed"),
    }

    let unread = self.refresh_unread().await;
    result.map(|_| unread)
  }

  /// Mark everything read. Returns the refreshed unread count.
  pub async fn mark_all_read(&self) -> Result<Option<u64>, FetchError> {
    let result = self
      .inner
      .source
      .mutate(Mutation::Patch, READ_ALL_PATH, None)
      .await;

    match &result {
      Ok(_) if self.inner.liveness.is_alive() => {
        self.inner.list.update_items(|n| n.read = true);
        let popups = self.inner.popups.mark_all_read();
        self.inner.recent.update(|listing| {
          for n in listing.items.iter_mut() {
            n.read = true;
          }
        });
        info!(popups, "All notifications marked read");
      }
      Ok(_) => {}
      Err(e) => warn!(error = %e, "Mark all as read failed"),
    }

    let unread = self.refresh_unread().await;
    result.map(|_| unread)
  }
}
