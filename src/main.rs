mod app;

use clap::{Parser, Subcommand};
use color_eyre::Result;
use std::path::PathBuf;

use opsync::config::Config;
use opsync::logging;

#[derive(Parser, Debug)]
#[command(name = "opsync")]
#[command(about = "Cached, deduplicated access to the operations dashboard API")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/opsync/config.yaml)
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Also log to stderr
  #[arg(short, long)]
  verbose: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Command {
  /// Print a resource, from cache when fresh
  Get {
    resource: String,
    /// Skip the cache and revalidate now
    #[arg(short, long)]
    force: bool,
  },
  /// List notifications page by page
  Notifications {
    /// Pages to load
    #[arg(short, long, default_value_t = 1)]
    pages: u32,
    /// Refetch the first page even if cached
    #[arg(short, long)]
    refresh: bool,
  },
  /// Poll for new notifications and refresh watched resources
  Watch,
  /// Mark a notification (or all of them) as read
  Read {
    #[arg(required_unless_present = "all")]
    id: Option<String>,
    #[arg(long, conflicts_with = "id")]
    all: bool,
  },
  /// Drop every cached resource
  Clear,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Hold the guard so buffered log lines are flushed on exit
  let _guard = logging::init(args.verbose)?;

  // Load configuration
  let config = Config::load(args.config.as_deref())?;

  let app = app::App::new(config)?;
  app.run(args.command).await
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_parse_get() {
    let args = Args::try_parse_from(["opsync", "get", "machines", "--force"]).unwrap();
    assert_eq!(
      args.command,
      Command::Get {
        resource: "machines".into(),
        force: true
      }
    );
    assert!(!args.verbose);
  }

  #[test]
  fn test_parse_notifications_defaults() {
    let args = Args::try_parse_from(["opsync", "-v", "notifications"]).unwrap();
    assert!(args.verbose);
    assert_eq!(
      args.command,
      Command::Notifications {
        pages: 1,
        refresh: false
      }
    );
  }

  #[test]
  fn test_read_needs_id_or_all() {
    assert!(Args::try_parse_from(["opsync", "read"]).is_err());
    assert!(Args::try_parse_from(["opsync", "read", "n1", "--all"]).is_err());

    let args = Args::try_parse_from(["opsync", "read", "--all"]).unwrap();
    assert_eq!(args.command, Command::Read { id: None, all: true });
  }
}
