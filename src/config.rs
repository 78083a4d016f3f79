use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants;
use crate::notifications::PollerSettings;
use crate::sync::Policies;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub api: ApiConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub notifications: NotificationsConfig,
  /// Resources refreshed in the background while watching
  #[serde(default)]
  pub watch: Vec<WatchTask>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  pub url: String,
  /// Environment variable holding the bearer token
  pub token_env: Option<String>,
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
  30
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// When false nothing is persisted and every load starts cold
  pub enabled: bool,
  /// Database location (defaults to $XDG_DATA_HOME/opsync/cache.db)
  pub path: Option<PathBuf>,
  pub default_ttl_secs: Option<u64>,
  /// Age after which a still-fresh entry is revalidated in the background
  pub soft_ttl_secs: Option<u64>,
  /// Per-resource TTL overrides (resource names are case-insensitive)
  #[serde(deserialize_with = "deserialize_lowercase_map")]
  pub resources: BTreeMap<String, u64>,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      path: None,
      default_ttl_secs: None,
      soft_ttl_secs: None,
      resources: BTreeMap::new(),
    }
  }
}

fn deserialize_lowercase_map<'de, D>(deserializer: D) -> Result<BTreeMap<String, u64>, D::Error>
where
  D: serde::Deserializer<'de>,
{
  let m: BTreeMap<String, u64> = BTreeMap::deserialize(deserializer)?;
  Ok(m.into_iter().map(|(k, v)| (k.to_lowercase(), v)).collect())
}

impl CacheConfig {
  /// TTL policy table for the sync context.
  pub fn policies(&self) -> Policies {
    let mut policies = Policies::default();
    if let Some(secs) = self.default_ttl_secs {
      policies = policies.with_default_ttl(Duration::from_secs(secs));
    }
    if let Some(secs) = self.soft_ttl_secs {
      policies = policies.with_soft_ttl(Duration::from_secs(secs));
    }
    for (resource, secs) in &self.resources {
      policies = policies.with_ttl(resource, Duration::from_secs(*secs));
    }
    policies
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NotificationsConfig {
  pub poll_interval_secs: u64,
  pub recency_window_secs: u64,
  pub retention_days: u64,
  pub max_popups: usize,
  pub popup_duration_secs: u64,
  pub page_size: usize,
  pub recent_limit: usize,
}

impl Default for NotificationsConfig {
  fn default() -> Self {
    Self {
      poll_interval_secs: constants::POLL_INTERVAL.as_secs(),
      recency_window_secs: constants::RECENCY_WINDOW.as_secs(),
      retention_days: constants::DEDUP_RETENTION.as_secs() / 86_400,
      max_popups: constants::MAX_POPUPS_PER_BATCH,
      popup_duration_secs: constants::POPUP_DURATION.as_secs(),
      page_size: constants::PAGE_SIZE,
      recent_limit: constants::RECENT_FETCH_LIMIT,
    }
  }
}

impl NotificationsConfig {
  pub fn settings(&self) -> PollerSettings {
    PollerSettings {
      interval: Duration::from_secs(self.poll_interval_secs.max(1)),
      recency_window: Duration::from_secs(self.recency_window_secs),
      retention: Duration::from_secs(self.retention_days * 86_400),
      max_popups: self.max_popups,
      popup_duration: Duration::from_secs(self.popup_duration_secs),
      page_size: self.page_size.max(1),
      recent_limit: self.recent_limit.max(1),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WatchTask {
  pub resource: String,
  pub every_secs: u64,
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./opsync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/opsync/config.yaml
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/opsync/config.yaml"
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("opsync.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("opsync").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents).map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  pub fn parse(contents: &str) -> Result<Self> {
    serde_yaml::from_str(contents).map_err(|e| eyre!("{}", e))
  }

  /// Get the API token from environment variables.
  ///
  /// Checks `api.token_env` when configured, then OPSYNC_API_TOKEN and
  /// OPSYNC_TOKEN.
  pub fn get_api_token(&self) -> Result<String> {
    let configured = self.api.token_env.as_deref().into_iter();
    let mut names = configured.chain(constants::TOKEN_ENV_VARS.iter().copied());
    names
      .find_map(|name| std::env::var(name).ok().filter(|v| !v.is_empty()))
      .ok_or_else(|| eyre!("API token not found. Set OPSYNC_API_TOKEN environment variable."))
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_minimal_config_uses_defaults() {
    let config = Config::parse("api:\n  url: https://ops.example.com/api\n").unwrap();
    assert!(config.cache.enabled);
    assert_eq!(config.api.timeout_secs, 30);
    assert!(config.watch.is_empty());

    let settings = config.notifications.settings();
    assert_eq!(settings.interval, constants::POLL_INTERVAL);
    assert_eq!(settings.retention, constants::DEDUP_RETENTION);
    assert_eq!(settings.max_popups, constants::MAX_POPUPS_PER_BATCH);
  }

  #[test]
  fn test_overrides() {
    let yaml = r#"
api:
  url: https://ops.example.com/api
  token_env: OPS_TOKEN
cache:
  enabled: false
  soft_ttl_secs: 60
  resources:
    Machines: 120
notifications:
  poll_interval_secs: 10
  page_size: 5
watch:
  - resource: machines
    every_secs: 300
"#;
    let config = Config::parse(yaml).unwrap();
    assert!(!config.cache.enabled);
    assert_eq!(config.cache.resources.get("machines"), Some(&120));
    assert_eq!(config.notifications.settings().page_size, 5);
    assert_eq!(config.watch[0].resource, "machines");

    let policy = config.cache.policies().policy_for("machines");
    assert_eq!(policy.ttl, Duration::from_secs(120));
    assert_eq!(policy.soft_ttl, Some(Duration::from_secs(60)));
  }

  #[test]
  fn test_missing_api_is_an_error() {
    assert!(Config::parse("cache:\n  enabled: true\n").is_err());
  }
}
