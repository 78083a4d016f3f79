//! Errors surfaced by remote fetches and revalidations.

use thiserror::Error;

/// Failure of a call against the remote API.
///
/// `Clone` because a single in-flight revalidation may be awaited by several
/// callers, and each of them receives the same settlement.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
  /// Network-level failure (connect, timeout, broken body).
  #[error("request failed: {0}")]
  Transport(String),

  /// Non-2xx response other than an auth rejection.
  #[error("server responded with {status}: {message}")]
  Status { status: u16, message: String },

  /// Credentials were rejected or have expired.
  #[error("session expired, sign in again")]
  Unauthorized,

  /// Payload was not valid JSON or not the expected shape.
  #[error("unexpected payload: {0}")]
  Decode(String),
}

impl FetchError {
  /// Auth expiry is the only failure allowed to escalate past the cache.
  pub fn is_auth(&self) -> bool {
    matches!(self, FetchError::Unauthorized)
  }

  pub fn decode(err: impl std::fmt::Display) -> Self {
    FetchError::Decode(err.to_string())
  }
}

impl From<serde_json::Error> for FetchError {
  fn from(err: serde_json::Error) -> Self {
    FetchError::decode(err)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_only_unauthorized_escalates() {
    assert!(FetchError::Unauthorized.is_auth());
    assert!(!FetchError::Transport("reset".into()).is_auth());
    assert!(!FetchError::Status {
      status: 500,
      message: "boom".into()
    }
    .is_auth());
  }

  #[test]
  fn test_json_errors_become_decode() {
    let err = serde_json::from_str::<u32>("nope").unwrap_err();
    assert!(matches!(FetchError::from(err), FetchError::Decode(_)));
  }
}
