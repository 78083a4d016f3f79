//! Revalidation policy knobs.

use std::collections::BTreeMap;
use std::time::Duration;

use crate::constants;

/// TTL settings for one resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncPolicy {
  /// Entries younger than this are served without a fetch
  pub ttl: Duration,
  /// Fresh entries older than this get a silent background revalidation
  pub soft_ttl: Option<Duration>,
}

impl SyncPolicy {
  pub fn new(ttl: Duration) -> Self {
    Self { ttl, soft_ttl: None }
  }

  pub fn with_soft_ttl(mut self, soft_ttl: Duration) -> Self {
    self.soft_ttl = Some(soft_ttl);
    self
  }
}

/// Per-call overrides for [`Synchronizer::load`](super::Synchronizer::load).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadOptions {
  pub force_refresh: bool,
  pub ttl: Option<Duration>,
}

impl LoadOptions {
  pub fn forced() -> Self {
    Self {
      force_refresh: true,
      ttl: None,
    }
  }

  pub fn with_ttl(mut self, ttl: Duration) -> Self {
    self.ttl = Some(ttl);
    self
  }
}

/// Policy table: explicit overrides, then the named resource TTLs, then
/// the configured (or built-in) default.
#[derive(Debug, Clone, Default)]
pub struct Policies {
  default_ttl: Option<Duration>,
  soft_ttl: Option<Duration>,
  overrides: BTreeMap<String, Duration>,
}

impl Policies {
  pub fn with_default_ttl(mut self, ttl: Duration) -> Self {
    self.default_ttl = Some(ttl);
    self
  }

  pub fn with_soft_ttl(mut self, soft_ttl: Duration) -> Self {
    self.soft_ttl = Some(soft_ttl);
    self
  }

  pub fn with_ttl(mut self, resource: &str, ttl: Duration) -> Self {
    self.overrides.insert(resource.to_lowercase(), ttl);
    self
  }

  pub fn policy_for(&self, resource: &str) -> SyncPolicy {
    let resource = resource.to_lowercase();
    let ttl = self
      .overrides
      .get(&resource)
      .copied()
      .or_else(|| constants::named_ttl(&resource))
      .or(self.default_ttl)
      .unwrap_or(constants::DEFAULT_TTL);

    SyncPolicy {
      ttl,
      soft_ttl: self.soft_ttl,
    }
  }
}
