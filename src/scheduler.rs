//! One timer, many periodic tasks.
//!
//! Pollers register here instead of owning their own intervals. Due tasks
//! are queued and run one after another, so scheduled work never issues
//! more than one network operation at a time.

use futures::future::BoxFuture;
use futures::FutureExt;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};

type TaskFn = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(u64);

struct Registered {
  id: TaskId,
  name: String,
  every: Duration,
  next_due: Instant,
  task: TaskFn,
}

struct Inner {
  tasks: Mutex<Vec<Registered>>,
  next_id: AtomicU64,
  resolution: Duration,
  driver: Mutex<Option<JoinHandle<()>>>,
  /// Serializes passes so a slow pass never overlaps the next tick.
  pass: tokio::sync::Mutex<()>,
}

#[derive(Clone)]
pub struct Scheduler {
  inner: Arc<Inner>,
}

impl Scheduler {
  pub fn new(resolution: Duration) -> Self {
    Self {
      inner: Arc::new(Inner {
        tasks: Mutex::new(Vec::new()),
        next_id: AtomicU64::new(1),
        resolution: resolution.max(Duration::from_millis(10)),
        driver: Mutex::new(None),
        pass: tokio::sync::Mutex::new(()),
      }),
    }
  }

  fn tasks(&self) -> MutexGuard<'_, Vec<Registered>> {
    self.inner.tasks.lock().unwrap_or_else(PoisonError::into_inner)
  }

  /// Register a periodic task. It is due immediately, then every `every`.
  pub fn register<F, Fut>(&self, name: impl Into<String>, every: Duration, task: F) -> TaskId
  where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
  {
    let id = TaskId(self.inner.next_id.fetch_add(1, Ordering::SeqCst));
    let name = name.into();
    debug!(task = %name, every_secs = every.as_secs_f64(), "Registered scheduled task");
    self.tasks().push(Registered {
      id,
      name,
      every,
      next_due: Instant::now(),
      task: Arc::new(move || task().boxed()),
    });
    id
  }

  pub fn unregister(&self, id: TaskId) -> bool {
    let mut tasks = self.tasks();
    let before = tasks.len();
    tasks.retain(|t| t.id != id);
    tasks.len() != before
  }

  pub fn task_names(&self) -> Vec<String> {
    self.tasks().iter().map(|t| t.name.clone()).collect()
  }

  /// Run every task that is due, in registration order. Returns how many ran.
  pub async fn run_due(&self) -> usize {
    let _pass = self.inner.pass.lock().await;
    let now = Instant::now();

    let mut queue: VecDeque<(TaskId, String, TaskFn)> = {
      let mut tasks = self.tasks();
      tasks
        .iter_mut()
        .filter(|t| t.next_due <= now)
        .map(|t| {
          t.next_due = now + t.every;
          (t.id, t.name.clone(), Arc::clone(&t.task))
        })
        .collect()
    };

    let mut ran = 0;
    while let Some((id, name, task)) = queue.pop_front() {
      // Unregistered while queued
      if !self.tasks().iter().any(|t| t.id == id) {
        continue;
      }
      debug!(task = %name, "Running scheduled task");
      task().await;
      ran += 1;
    }
    ran
  }

  /// Start the shared timer. Calling it twice is a no-op.
  pub fn start(&self) {
    let mut driver = self.inner.driver.lock().unwrap_or_else(PoisonError::into_inner);
    if driver.is_some() {
      return;
    }

    let scheduler = self.clone();
    let resolution = self.inner.resolution;
    info!(resolution_ms = resolution.as_millis() as u64, "Scheduler started");
    *driver = Some(tokio::spawn(async move {
      let mut ticker = tokio::time::interval(resolution);
      ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
      loop {
        ticker.tick().await;
        scheduler.run_due().await;
      }
    }));
  }

  /// Stop the timer. Registered tasks stay registered.
  pub fn stop(&self) {
    let handle = self
      .inner
      .driver
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .take();
    if let Some(handle) = handle {
      handle.abort();
      info!("Scheduler stopped");
    }
  }

  pub fn is_running(&self) -> bool {
    self
      .inner
      .driver
      .lock()
      .unwrap_or_else(PoisonError::into_inner)
      .is_some()
  }
}
