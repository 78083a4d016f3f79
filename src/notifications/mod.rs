//! Notification polling, popup dedup, and mark-as-read.

mod dedup;
mod events;
mod poller;
mod popups;
mod read;
mod record;

pub use dedup::DedupTracker;
pub use events::{DismissReason, NotificationEvent};
pub use poller::{NotificationPoller, PollerSettings, PollerState, TickReport};
pub use popups::PopupTray;
pub use record::{NotificationKind, NotificationRecord};
