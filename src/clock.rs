//! Wall-clock source for cache timestamps and retention windows.
//!
//! Everything that stamps or ages persisted state reads time through
//! [`Clock`], so tests can move time forward without sleeping.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Milliseconds since the Unix epoch.
pub type Millis = i64;

pub trait Clock: Send + Sync {
  fn now_ms(&self) -> Millis;
}

/// Real wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
  fn now_ms(&self) -> Millis {
    chrono::Utc::now().timestamp_millis()
  }
}

/// Manually driven clock, shared between clones.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
  now: Arc<AtomicI64>,
}

impl ManualClock {
  pub fn new(start_ms: Millis) -> Self {
    Self {
      now: Arc::new(AtomicI64::new(start_ms)),
    }
  }

  pub fn set(&self, ms: Millis) {
    self.now.store(ms, Ordering::SeqCst);
  }

  pub fn advance(&self, by: Duration) {
    self.now.fetch_add(duration_ms(by), Ordering::SeqCst);
  }
}

impl Clock for ManualClock {
  fn now_ms(&self) -> Millis {
    self.now.load(Ordering::SeqCst)
  }
}

/// Convert a duration to whole milliseconds, saturating at `i64::MAX`.
pub fn duration_ms(d: Duration) -> Millis {
  i64::try_from(d.as_millis()).unwrap_or(i64::MAX)
}
