//! Notification payloads as the API sends them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

use crate::cache::Cacheable;
use crate::clock::Millis;

/// Category of a notification. Unknown categories are kept verbatim.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum NotificationKind {
  Payment,
  Transaction,
  Machine,
  #[default]
  System,
  Other(String),
}

impl From<String> for NotificationKind {
  fn from(s: String) -> Self {
    match s.to_lowercase().as_str() {
      "payment" => Self::Payment,
      "transaction" => Self::Transaction,
      "machine" => Self::Machine,
      "system" => Self::System,
      _ => Self::Other(s),
    }
  }
}

impl From<NotificationKind> for String {
  fn from(kind: NotificationKind) -> Self {
    kind.to_string()
  }
}

impl fmt::Display for NotificationKind {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Self::Payment => write!(f, "payment"),
      Self::Transaction => write!(f, "transaction"),
      Self::Machine => write!(f, "machine"),
      Self::System => write!(f, "system"),
      Self::Other(s) => write!(f, "{}", s),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRecord {
  /// Stable identity, also the dedup key
  #[serde(deserialize_with = "id_string")]
  pub id: String,
  #[serde(rename = "type", default)]
  pub kind: NotificationKind,
  #[serde(default)]
  pub title: String,
  #[serde(default)]
  pub message: String,
  pub created_at: DateTime<Utc>,
  #[serde(default, alias = "isRead")]
  pub read: bool,
  #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "optional_id_string")]
  pub related_entity_id: Option<String>,
}

impl NotificationRecord {
  /// Created no earlier than `window_ms` before `now`. Timestamps in the
  /// future count as recent.
  pub fn is_recent(&self, now: Millis, window_ms: Millis) -> bool {
    self.created_at.timestamp_millis() >= now.saturating_sub(window_ms)
  }
}

impl Cacheable for NotificationRecord {
  fn cache_key(&self) -> String {
    self.id.clone()
  }
}

/// Ids arrive as strings or numbers depending on the backend.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
  Text(String),
  Number(i64),
}

impl From<RawId> for String {
  fn from(raw: RawId) -> Self {
    match raw {
      RawId::Text(s) => s,
      RawId::Number(n) => n.to_string(),
    }
  }
}

fn id_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
  D: Deserializer<'de>,
{
  RawId::deserialize(deserializer).map(String::from)
}

fn optional_id_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
  D: Deserializer<'de>,
{
  Ok(Option::<RawId>::deserialize(deserializer)?.map(String::from))
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_decodes_api_shape() {
    let record: NotificationRecord = serde_json::from_value(json!({
      "id": 42,
      "type": "PAYMENT",
      "title": "Payment received",
      "message": "R$ 10,00",
      "createdAt": "2024-05-01T12:00:00Z",
      "isRead": true,
      "relatedEntityId": "tx-9"
    }))
    .unwrap();

    assert_eq!(record.id, "42");
    assert_eq!(record.kind, NotificationKind::Payment);
    assert!(record.read);
    assert_eq!(record.related_entity_id.as_deref(), Some("tx-9"));
  }

  #[test]
  fn test_unknown_kind_and_defaults() {
    let record: NotificationRecord = serde_json::from_value(json!({
      "id": "n1",
      "type": "maintenance",
      "createdAt": "2024-05-01T12:00:00Z"
    }))
    .unwrap();

    assert_eq!(record.kind, NotificationKind::Other("maintenance".into()));
    assert!(!record.read);
    assert!(record.title.is_empty());
    assert!(record.related_entity_id.is_none());
  }

  #[test]
  fn test_cache_round_trip_keeps_kind() {
    let record: NotificationRecord = serde_json::from_value(json!({
      "id": "n1",
      "type": "machine",
      "createdAt": "2024-05-01T12:00:00Z",
      "read": false
    }))
    .unwrap();
    let stored = serde_json::to_value(&record).unwrap();
    assert_eq!(stored["type"], "machine");
    assert_eq!(stored["createdAt"], "2024-05-01T12:00:00Z");
    assert_eq!(serde_json::from_value::<NotificationRecord>(stored).unwrap(), record);
  }

  #[test]
  fn test_recency() {
    let record: NotificationRecord = serde_json::from_value(json!({
      "id": "n1",
      "createdAt": "2024-05-01T12:00:00Z"
    }))
    .unwrap();
    let created = record.created_at.timestamp_millis();
    let window = 120_000;

    assert!(record.is_recent(created + 119_000, window));
    assert!(record.is_recent(created + 120_000, window));
    assert!(!record.is_recent(created + 121_000, window));
    assert!(record.is_recent(created - 5_000, window));
  }
}
