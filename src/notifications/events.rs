use super::record::NotificationRecord;

/// Why a popup left the tray.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DismissReason {
  /// Display duration elapsed
  Expired,
  /// User closed it
  Manual,
}

/// What the poller reports to whoever presents notifications.
#[derive(Debug, Clone, PartialEq)]
pub enum NotificationEvent {
  /// New items surfaced as popups, in server order
  Arrived(Vec<NotificationRecord>),
  UnreadCount(u64),
  PopupDismissed { id: String, reason: DismissReason },
  /// A poll tick failed; cached state is unchanged
  Failed(String),
}
