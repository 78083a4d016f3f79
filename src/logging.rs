//! Logging setup: daily-rolling file in the data directory, plus stderr
//! when running verbose.

use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

const LOG_FILE: &str = "opsync.log";

/// Directive used when `RUST_LOG` is not set.
fn default_directive(verbose: bool) -> &'static str {
  if verbose {
    "opsync=debug"
  } else {
    "opsync=info"
  }
}

fn env_filter(verbose: bool) -> EnvFilter {
  EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)))
}

/// Where log files go ($XDG_DATA_HOME/opsync/logs).
pub fn log_dir() -> PathBuf {
  dirs::data_dir()
    .unwrap_or_else(|| PathBuf::from("."))
    .join("opsync")
    .join("logs")
}

/// Install the global subscriber.
///
/// The returned guard flushes the file writer on drop; keep it alive for
/// the life of the program.
pub fn init(verbose: bool) -> Result<WorkerGuard> {
  let dir = log_dir();
  std::fs::create_dir_all(&dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", dir.display(), e))?;

  let file_appender = tracing_appender::rolling::daily(&dir, LOG_FILE);
  let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

  let stderr = verbose.then(|| {
    tracing_subscriber::fmt::layer()
      .with_writer(std::io::stderr)
      .with_target(false)
      .compact()
      .with_filter(env_filter(verbose))
  });

  tracing_subscriber::registry()
    .with(
      tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_filter(env_filter(verbose)),
    )
    .with(stderr)
    .try_init()
    .map_err(|e| eyre!("Failed to initialize logging: {}", e))?;

  Ok(guard)
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_default_directive() {
    assert_eq!(default_directive(false), "opsync=info");
    assert_eq!(default_directive(true), "opsync=debug");
  }

  #[test]
  fn test_log_dir_is_namespaced() {
    let dir = log_dir();
    assert!(dir.ends_with("opsync/logs"));
  }
}
