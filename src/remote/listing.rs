//! Normalization of the list shapes the API returns.
//!
//! Endpoints answer with a bare array, `{ data: [...] }`, or
//! `{ <name>: [...], hasMore }`; everything downstream sees [`Listing`].

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::FetchError;

/// A page of items plus the server's own "more available" hint, if any.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Listing<T> {
  pub items: Vec<T>,
  #[serde(default, rename = "hasMore")]
  pub has_more: Option<bool>,
}

impl<T> Listing<T> {
  pub fn new(items: Vec<T>) -> Self {
    Self {
      items,
      has_more: None,
    }
  }

  pub fn len(&self) -> usize {
    self.items.len()
  }

  pub fn is_empty(&self) -> bool {
    self.items.is_empty()
  }
}

impl<T> Default for Listing<T> {
  fn default() -> Self {
    Self::new(Vec::new())
  }
}

/// Decode any of the accepted list shapes into a [`Listing`].
pub fn normalize_listing<T: DeserializeOwned>(value: Value) -> Result<Listing<T>, FetchError> {
  let (items, has_more) = match value {
    Value::Array(items) => (items, None),
    Value::Object(mut obj) => {
      let has_more = has_more_hint(&obj);
      let items = take_items(&mut obj)
        .ok_or_else(|| FetchError::Decode("response object has no item array".to_string()))?;
      (items, has_more)
    }
    other => {
      return Err(FetchError::Decode(format!(
        "expected a list, got {}",
        kind_of(&other)
      )))
    }
  };

  let items = items
    .into_iter()
    .map(serde_json::from_value)
    .collect::<Result<Vec<T>, _>>()?;

  Ok(Listing { items, has_more })
}

fn has_more_hint(obj: &Map<String, Value>) -> Option<bool> {
  obj
    .get("hasMore")
    .or_else(|| obj.get("has_more"))
    .and_then(Value::as_bool)
}

/// `data` wins; otherwise the first array-valued field.
fn take_items(obj: &mut Map<String, Value>) -> Option<Vec<Value>> {
  if let Some(Value::Array(_)) = obj.get("data") {
    if let Some(Value::Array(items)) = obj.remove("data") {
      return Some(items);
    }
  }

  let name = obj
    .iter()
    .find(|(_, v)| v.is_array())
    .map(|(k, _)| k.clone())?;
  match obj.remove(&name) {
    Some(Value::Array(items)) => Some(items),
    _ => None,
  }
}

/// Decode an unread-style counter: a bare number, `{ count }`,
/// `{ unreadCount }`, or `{ data: { count } }`.
pub fn decode_count(value: Value) -> Result<u64, FetchError> {
  fn number(v: &Value) -> Option<u64> {
    v.as_u64()
  }

  let found = match &value {
    Value::Number(_) => number(&value),
    Value::Object(obj) => obj
      .get("count")
      .and_then(number)
      .or_else(|| obj.get("unreadCount").and_then(number))
      .or_else(|| {
        obj
          .get("data")
          .and_then(|d| d.get("count").or_else(|| d.get("unreadCount")))
          .and_then(number)
      }),
    _ => None,
  };

  found.ok_or_else(|| FetchError::Decode(format!("expected a count, got {}", kind_of(&value))))
}

fn kind_of(value: &Value) -> &'static str {
  match value {
    Value::Null => "null",
    Value::Bool(_) => "a boolean",
    Value::Number(_) => "a number",
    Value::String(_) => "a string",
    Value::Array(_) => "an array",
    Value::Object(_) => "an object",
  }
}
