//! Named defaults for every tunable of the sync engine.
//!
//! The config file may override these; nothing is negotiated with the server.

use std::time::Duration;

/// Prefix of every key written to the persisted store.
pub const STORE_NAMESPACE: &str = "opsync";

/// Sub-namespace for cache entries.
pub const CACHE_NAMESPACE: &str = "cache";

/// Persisted list of ids that already produced a popup.
pub const DEDUP_IDS_KEY: &str = "notifications:shown_ids";

/// Persisted id -> first-shown timestamp map.
pub const DEDUP_TIMES_KEY: &str = "notifications:shown_at";

/// TTL for resources without a specific entry below.
pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);

/// Per-resource TTLs, tuned to how often each resource changes.
pub const RESOURCE_TTLS: &[(&str, Duration)] = &[
  ("machines", Duration::from_secs(5 * 60)),
  ("services", Duration::from_secs(10 * 60)),
  ("terms", Duration::from_secs(60 * 60)),
  ("payment-settings", Duration::from_secs(30 * 60)),
  ("receipt-format", Duration::from_secs(60 * 60)),
  (NOTIFICATIONS_RESOURCE, Duration::from_secs(60)),
  (UNREAD_COUNT_RESOURCE, Duration::from_secs(30)),
];

/// Notification list resource.
pub const NOTIFICATIONS_RESOURCE: &str = "notifications";

/// Unread counter resource.
pub const UNREAD_COUNT_RESOURCE: &str = "notifications/unread-count";

/// Bulk mark-as-read endpoint.
pub const READ_ALL_PATH: &str = "notifications/read-all";

/// How often the notification poller ticks.
pub const POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Only items created this recently may pop up.
pub const RECENCY_WINDOW: Duration = Duration::from_secs(2 * 60);

/// How long a shown id is remembered.
pub const DEDUP_RETENTION: Duration = Duration::from_secs(7 * 24 * 60 * 60);

/// Maximum popups emitted per poll tick.
pub const MAX_POPUPS_PER_BATCH: usize = 3;

/// Popups auto-dismiss after this long.
pub const POPUP_DURATION: Duration = Duration::from_secs(8);

/// Items per page for incremental lists.
pub const PAGE_SIZE: usize = 20;

/// How many recent items one poll tick asks for.
pub const RECENT_FETCH_LIMIT: usize = 10;

/// Granularity of the shared scheduler's single timer.
pub const SCHEDULER_RESOLUTION: Duration = Duration::from_secs(1);

/// Environment variables checked for the API token, in order.
pub const TOKEN_ENV_VARS: &[&str] = &["OPSYNC_API_TOKEN", "OPSYNC_TOKEN"];

/// TTL from the named table, if the resource has one.
pub fn named_ttl(resource: &str) -> Option<Duration> {
  RESOURCE_TTLS
    .iter()
    .find(|(name, _)| *name == resource)
    .map(|(_, ttl)| *ttl)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_known_resource_ttl() {
    assert_eq!(named_ttl("terms"), Some(Duration::from_secs(3600)));
    assert_eq!(named_ttl(UNREAD_COUNT_RESOURCE), Some(Duration::from_secs(30)));
  }

  #[test]
  fn test_unknown_resource_has_no_named_ttl() {
    assert_eq!(named_ttl("staff"), None);
  }
}
