//! Client-side data synchronization for the operations dashboard.
//!
//! A [`sync::SyncContext`] built once at startup hands out
//! [`sync::Synchronizer`]s (stale-while-revalidate TTL cache, one in-flight
//! request per key) and [`sync::PageSequencer`]s (incremental pagination).
//! [`notifications::NotificationPoller`] runs on the shared
//! [`scheduler::Scheduler`] and surfaces new notifications at most once.

pub mod cache;
pub mod clock;
pub mod config;
pub mod constants;
pub mod error;
pub mod event;
pub mod liveness;
pub mod logging;
pub mod notifications;
pub mod remote;
pub mod scheduler;
pub mod sync;

#[cfg(test)]
mod testing;
