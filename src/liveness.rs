//! Mount/teardown flag for async continuations.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared flag that is true from construction until [`Liveness::teardown`].
///
/// Every continuation that mutates component state checks it first, so a
/// response settling after teardown is dropped instead of applied.
#[derive(Debug, Clone)]
pub struct Liveness {
  alive: Arc<AtomicBool>,
}

impl Liveness {
  pub fn new() -> Self {
    Self {
      alive: Arc::new(AtomicBool::new(true)),
    }
  }

  pub fn is_alive(&self) -> bool {
    self.alive.load(Ordering::SeqCst)
  }

  pub fn teardown(&self) {
    self.alive.store(false, Ordering::SeqCst);
  }
}

impl Default for Liveness {
  fn default() -> Self {
    Self::new()
  }
}
