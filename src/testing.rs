//! Scripted [`RemoteSource`] for unit tests.

use chrono::{TimeZone, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;

use crate::cache::{PersistentStore, Query};
use crate::clock::ManualClock;
use crate::error::FetchError;
use crate::remote::{Mutation, RemoteSource};
use crate::sync::SyncContext;

type Reply = Result<Value, FetchError>;

pub struct MockSource {
  queued: Mutex<HashMap<String, VecDeque<Reply>>>,
  standing: Mutex<HashMap<String, Reply>>,
  fetches: Mutex<Vec<(String, Query)>>,
  mutations: Mutex<Vec<(Mutation, String, Option<Value>)>>,
  mutation_reply: Mutex<Reply>,
  gate: watch::Sender<bool>,
}

impl MockSource {
  pub fn new() -> Arc<Self> {
    let (gate, _) = watch::channel(true);
    Arc::new(Self {
      queued: Mutex::new(HashMap::new()),
      standing: Mutex::new(HashMap::new()),
      fetches: Mutex::new(Vec::new()),
      mutations: Mutex::new(Vec::new()),
      mutation_reply: Mutex::new(Ok(Value::Null)),
      gate,
    })
  }

  /// Answer every fetch of `resource` with `reply` (after queued replies).
  pub fn respond(&self, resource: &str, reply: Reply) {
    self
      .standing
      .lock()
      .unwrap()
      .insert(resource.to_string(), reply);
  }

  /// Answer the next fetch of `resource` with `reply`.
  pub fn respond_once(&self, resource: &str, reply: Reply) {
    self
      .queued
      .lock()
      .unwrap()
      .entry(resource.to_string())
      .or_default()
      .push_back(reply);
  }

  pub fn respond_to_mutations(&self, reply: Reply) {
    *self.mutation_reply.lock().unwrap() = reply;
  }

  /// Hold every fetch open until [`MockSource::release`].
  pub fn hold(&self) {
    self.gate.send_replace(false);
  }

  pub fn release(&self) {
    self.gate.send_replace(true);
  }

  pub fn fetch_count(&self, resource: &str) -> usize {
    self
      .fetches
      .lock()
      .unwrap()
      .iter()
      .filter(|(r, _)| r == resource)
      .count()
  }

  pub fn fetches(&self) -> Vec<(String, Query)> {
    self.fetches.lock().unwrap().clone()
  }

  pub fn mutations(&self) -> Vec<(Mutation, String, Option<Value>)> {
    self.mutations.lock().unwrap().clone()
  }

  fn next_reply(&self, resource: &str) -> Reply {
    if let Some(reply) = self
      .queued
      .lock()
      .unwrap()
      .get_mut(resource)
      .and_then(VecDeque::pop_front)
    {
      return reply;
    }
    self
      .standing
      .lock()
      .unwrap()
      .get(resource)
      .cloned()
      .unwrap_or_else(|| Err(FetchError::Transport(format!("no reply for {}", resource))))
  }
}

impl RemoteSource for MockSource {
  fn fetch<'a>(&'a self, resource: &'a str, query: &'a Query) -> BoxFuture<'a, Result<Value, FetchError>> {
    self
      .fetches
      .lock()
      .unwrap()
      .push((resource.to_string(), query.clone()));
    // Replies are bound in call order, whatever order held fetches resume in.
    let reply = self.next_reply(resource);
    let mut gate = self.gate.subscribe();
    async move {
      let _ = gate.wait_for(|open| *open).await;
      reply
    }
    .boxed()
  }

  fn mutate<'a>(
    &'a self,
    method: Mutation,
    path: &'a str,
    body: Option<Value>,
  ) -> BoxFuture<'a, Result<Value, FetchError>> {
    self
      .mutations
      .lock()
      .unwrap()
      .push((method, path.to_string(), body));
    let reply = self.mutation_reply.lock().unwrap().clone();
    async move { reply }.boxed()
  }
}

/// Context over a memory store, a mock source, and a manual clock.
pub fn context() -> (SyncContext, Arc<MockSource>, ManualClock) {
  let source = MockSource::new();
  let clock = ManualClock::new(1_700_000_000_000);
  let ctx = SyncContext::new(
    PersistentStore::memory(),
    source.clone(),
    Arc::new(clock.clone()),
  );
  (ctx, source, clock)
}

/// Let spawned tasks run to their next suspension point.
pub async fn settle() {
  for _ in 0..10 {
    tokio::task::yield_now().await;
  }
}

/// Notification JSON as the API sends it.
pub fn notification(id: &str, created_at_ms: i64, read: bool) -> Value {
  let created_at = Utc
    .timestamp_millis_opt(created_at_ms)
    .single()
    .unwrap()
    .to_rfc3339();
  serde_json::json!({
    "id": id,
    "type": "payment",
    "title": format!("Payment {}", id),
    "message": "received",
    "createdAt": created_at,
    "isRead": read
  })
}
