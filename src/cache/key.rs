//! Resource keys and their persisted-store names.

use sha2::{Digest, Sha256};
use std::fmt;

use crate::constants::CACHE_NAMESPACE;

/// Ordered query parameters sent with a fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Query(Vec<(String, String)>);

impl Query {
  pub fn new() -> Self {
    Self::default()
  }

  /// Append a parameter, replacing an earlier one with the same name.
  pub fn with(mut self, name: impl Into<String>, value: impl ToString) -> Self {
    let name = name.into();
    let value = value.to_string();
    match self.0.iter_mut().find(|(n, _)| *n == name) {
      Some(slot) => slot.1 = value,
      None => self.0.push((name, value)),
    }
    self
  }

  pub fn get(&self, name: &str) -> Option<&str> {
    self
      .0
      .iter()
      .find(|(n, _)| n == name)
      .map(|(_, v)| v.as_str())
  }

  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  pub fn pairs(&self) -> &[(String, String)] {
    &self.0
  }

  /// Canonical `a=1&b=2` form used for hashing.
  fn canonical(&self) -> String {
    self
      .0
      .iter()
      .map(|(n, v)| format!("{}={}", n, v))
      .collect::<Vec<_>>()
      .join("&")
  }
}

/// Identifies one synchronized resource: the remote resource name plus query.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceKey {
  pub name: String,
  pub query: Query,
}

impl ResourceKey {
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      query: Query::new(),
    }
  }

  pub fn with_query(mut self, query: Query) -> Self {
    self.query = query;
    self
  }

  /// Name of the persisted entry holding this resource's cache entry.
  ///
  /// Query-less resources keep a readable key; queries are folded into a
  /// SHA256 prefix for stable, fixed-length keys.
  pub fn storage_key(&self) -> String {
    if self.query.is_empty() {
      return format!("{}:{}", CACHE_NAMESPACE, self.name);
    }

    let mut hasher = Sha256::new();
    hasher.update(self.query.canonical().as_bytes());
    let digest = hex::encode(hasher.finalize());
    format!("{}:{}:{}", CACHE_NAMESPACE, self.name, &digest[..16])
  }
}

impl fmt::Display for ResourceKey {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if self.query.is_empty() {
      write!(f, "{}", self.name)
    } else {
      write!(f, "{}?{}", self.name, self.query.canonical())
    }
  }
}

impl From<&str> for ResourceKey {
  fn from(name: &str) -> Self {
    ResourceKey::new(name)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_plain_key_is_readable() {
    assert_eq!(ResourceKey::new("machines").storage_key(), "cache:machines");
  }

  #[test]
  fn test_query_key_is_stable_and_distinct() {
    let page1 = ResourceKey::new("notifications").with_query(Query::new().with("page", 1));
    let page1_again = ResourceKey::new("notifications").with_query(Query::new().with("page", 1));
    let page2 = ResourceKey::new("notifications").with_query(Query::new().with("page", 2));

    assert_eq!(page1.storage_key(), page1_again.storage_key());
    assert_ne!(page1.storage_key(), page2.storage_key());
    assert!(page1.storage_key().starts_with("cache:notifications:"));
  }

  #[test]
  fn test_query_with_replaces_existing() {
    let query = Query::new().with("page", 1).with("limit", 20).with("page", 3);
    assert_eq!(query.get("page"), Some("3"));
    assert_eq!(query.pairs().len(), 2);
  }

  #[test]
  fn test_display() {
    let key = ResourceKey::new("notifications").with_query(Query::new().with("limit", 10));
    assert_eq!(key.to_string(), "notifications?limit=10");
  }
}
