//! The remote API as seen by the sync engine.

mod http;
mod listing;

pub use http::HttpSource;
pub use listing::{decode_count, normalize_listing, Listing};

use futures::future::BoxFuture;
use serde_json::Value;

use crate::cache::Query;
use crate::error::FetchError;

/// Mutating HTTP verbs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mutation {
  Post,
  Put,
  Patch,
  Delete,
}

/// Async JSON source behind every cache key.
///
/// Only `Synchronizer`s call `fetch`; callers doing write-through
/// mutations call `mutate` and then store the new value themselves.
pub trait RemoteSource: Send + Sync {
  /// `GET <resource>` with query parameters.
  fn fetch<'a>(&'a self, resource: &'a str, query: &'a Query) -> BoxFuture<'a, Result<Value, FetchError>>;

  /// `POST`/`PUT`/`PATCH`/`DELETE` against a resource path.
  ///
  /// Returns the created/updated resource, or `Value::Null` for
  /// status-only responses.
  fn mutate<'a>(
    &'a self,
    method: Mutation,
    path: &'a str,
    body: Option<Value>,
  ) -> BoxFuture<'a, Result<Value, FetchError>>;
}
