//! Synchronization engine: keeps local views consistent with the remote API.
//!
//! UI triggers (mount, manual refresh, visibility change, timer tick,
//! scroll-near-bottom) all go through a [`Synchronizer`] or a
//! [`PageSequencer`]; nothing else touches the cache or the network.

mod context;
mod pages;
mod policy;
mod synchronizer;

pub use context::{Session, SessionState, SyncContext};
pub use pages::{PageSequencer, PaginationState};
pub use policy::{LoadOptions, Policies, SyncPolicy};
pub use synchronizer::{Decoder, Loaded, RefreshOutcome, Refreshed, Revalidation, Synchronizer};
