use color_eyre::{eyre::eyre, Result};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use opsync::cache::{NoopStore, PersistentStore, SqliteStore};
use opsync::clock::SystemClock;
use opsync::config::{CacheConfig, Config};
use opsync::constants::{NOTIFICATIONS_RESOURCE, SCHEDULER_RESOLUTION};
use opsync::event::{Event, EventHandler};
use opsync::notifications::{NotificationEvent, NotificationPoller, NotificationRecord};
use opsync::remote::HttpSource;
use opsync::scheduler::Scheduler;
use opsync::sync::{LoadOptions, PageSequencer, RefreshOutcome, SessionState, SyncContext};

use crate::Command;

const LIST_REFRESH_TASK: &str = "notifications/list";

/// Wires config, store, and HTTP source into one sync context and runs
/// CLI commands against it
pub struct App {
  config: Config,
  ctx: SyncContext,
}

impl App {
  pub fn new(config: Config) -> Result<Self> {
    let store = open_store(&config.cache)?;
    let source = HttpSource::new(&config)?;
    let ctx = SyncContext::new(store, Arc::new(source), Arc::new(SystemClock))
      .with_policies(config.cache.policies());

    Ok(Self { config, ctx })
  }

  pub async fn run(&self, command: Command) -> Result<()> {
    match command {
      Command::Get { resource, force } => self.get(&resource, force).await,
      Command::Notifications { pages, refresh } => self.notifications(pages, refresh).await,
      Command::Watch => self.watch().await,
      Command::Read { id, all } => self.read(id, all).await,
      Command::Clear => {
        let removed = self.ctx.clear_cache();
        println!("Removed {} cached entries", removed);
        Ok(())
      }
    }
  }

  /// Print cached data right away, then the revalidated data if it changed.
  async fn get(&self, resource: &str, force: bool) -> Result<()> {
    let sync = self.ctx.synchronizer::<Value>(resource);
    let loaded = sync.load(LoadOptions {
      force_refresh: force,
      ttl: None,
    });

    let had_data = loaded.data.is_some();
    if let Some(data) = &loaded.data {
      debug!(resource, freshness = ?loaded.freshness, "Serving cached data");
      print_json(data)?;
    }

    let Some(revalidation) = loaded.revalidation else {
      return Ok(());
    };
    match revalidation.settled().await {
      Ok(refreshed) if !had_data || refreshed.outcome == RefreshOutcome::Changed => {
        print_json(&refreshed.data)
      }
      Ok(_) => Ok(()),
      Err(e) if had_data && !e.is_auth() => {
        eprintln!("Showing cached data, refresh failed: {}", e);
        Ok(())
      }
      Err(e) => Err(eyre!("Failed to fetch {}: {}", resource, e)),
    }
  }

  async fn notifications(&self, pages: u32, refresh: bool) -> Result<()> {
    let settings = self.config.notifications.settings();
    let list =
      PageSequencer::<NotificationRecord>::new(&self.ctx, NOTIFICATIONS_RESOURCE, settings.page_size);

    if let Err(e) = list.load_first_page(refresh).await {
      if list.items().is_empty() {
        return Err(eyre!("Failed to load notifications: {}", e));
      }
      eprintln!("Showing cached notifications, refresh failed: {}", e);
    }
    for _ in 1..pages.max(1) {
      match list.load_next_page().await {
        Ok(true) => {}
        Ok(false) => break,
        Err(e) => {
          eprintln!("Stopped paging: {}", e);
          break;
        }
      }
    }

    let state = list.snapshot();
    for n in &state.items {
      print_notification(n);
    }
    eprintln!(
      "{} notifications, page {}{}",
      state.items.len(),
      state.page,
      if state.has_more { ", more available" } else { "" }
    );
    Ok(())
  }

  /// Poll notifications and refresh watched resources until Ctrl-C or
  /// session expiry.
  async fn watch(&self) -> Result<()> {
    let scheduler = Scheduler::new(SCHEDULER_RESOLUTION);
    let settings = self.config.notifications.settings();
    let (poller, rx) = NotificationPoller::new(&self.ctx, settings.clone());

    // Items already listed never pop up
    if let Err(e) = poller.list().load_first_page(false).await {
      warn!(error = %e, "Initial notification list load failed");
    }
    poller.start(&scheduler);

    // Revalidate the list per its TTL so the listed filter tracks the server
    let list = poller.list().clone();
    scheduler.register(LIST_REFRESH_TASK, settings.interval, move || {
      let list = list.clone();
      async move {
        if let Err(e) = list.load_first_page(false).await {
          warn!(error = %e, "Notification list refresh failed");
        }
      }
    });

    for task in &self.config.watch {
      let sync = self.ctx.synchronizer::<Value>(task.resource.as_str());
      let resource = task.resource.clone();
      scheduler.register(
        task.resource.clone(),
        Duration::from_secs(task.every_secs.max(1)),
        move || {
          let sync = sync.clone();
          let resource = resource.clone();
          async move {
            let Some(revalidation) = sync.load(LoadOptions::default()).revalidation else {
              return;
            };
            match revalidation.settled().await {
              Ok(refreshed) if refreshed.outcome == RefreshOutcome::Changed => {
                println!("{} updated", resource);
              }
              Ok(_) => {}
              Err(e) => warn!(%resource, error = %e, "Watched resource refresh failed"),
            }
          }
        },
      );
    }

    scheduler.start();
    info!(tasks = ?scheduler.task_names(), "Watching");

    let mut events = EventHandler::new(rx, self.ctx.session().subscribe());
    let mut last_unread = None;
    while let Some(event) = events.next().await {
      match event {
        Event::Notification(NotificationEvent::Arrived(batch)) => {
          for n in &batch {
            print_notification(n);
          }
        }
        Event::Notification(NotificationEvent::UnreadCount(count)) => {
          if last_unread != Some(count) {
            println!("unread: {}", count);
            last_unread = Some(count);
          }
        }
        Event::Notification(NotificationEvent::PopupDismissed { id, reason }) => {
          debug!(id, ?reason, "Popup dismissed");
        }
        Event::Notification(NotificationEvent::Failed(message)) => {
          eprintln!("Poll failed: {}", message);
        }
        Event::Session(SessionState::Expired) => {
          eprintln!("Session expired. Set a new API token and restart.");
          break;
        }
        Event::Session(SessionState::Active) => {}
        Event::Shutdown => break,
      }
    }

    poller.teardown();
    scheduler.stop();
    Ok(())
  }

  async fn read(&self, id: Option<String>, all: bool) -> Result<()> {
    let (poller, _events) =
      NotificationPoller::new(&self.ctx, self.config.notifications.settings());

    let result = match (id, all) {
      (_, true) => poller.mark_all_read().await,
      (Some(id), false) => poller.mark_read(&id).await,
      (None, false) => return Err(eyre!("Pass a notification id or --all")),
    };
    poller.teardown();

    match result.map_err(|e| eyre!("Failed to mark as read: {}", e))? {
      Some(unread) => println!("unread: {}", unread),
      None => eprintln!("Marked as read; unread count unavailable"),
    }
    Ok(())
  }
}

fn open_store(cache: &CacheConfig) -> Result<PersistentStore> {
  if !cache.enabled {
    info!("Cache disabled, nothing will be persisted");
    return Ok(PersistentStore::new(NoopStore));
  }
  let store = SqliteStore::open(cache.path.as_deref())?;
  Ok(PersistentStore::new(store))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
  let text =
    serde_json::to_string_pretty(value).map_err(|e| eyre!("Failed to format output: {}", e))?;
  println!("{}", text);
  Ok(())
}

fn print_notification(n: &NotificationRecord) {
  println!(
    "{} {} [{}] {}: {}",
    if n.read { " " } else { "*" },
    n.created_at.format("%Y-%m-%d %H:%M"),
    n.kind,
    n.title,
    n.message
  );
}
