//! The engine.
//!
//! Owns the stores and wires the router, lifecycle manager, and sync
//! coordinator together. Control commands arrive over an mpsc channel
//! and are processed one at a time by [`Engine::run`]; request
//! interceptions are independent async calls that may overlap while
//! awaiting the network.

use color_eyre::{eyre::eyre, Result};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};
use url::Url;

use crate::config::Config;
use crate::fetch::Fetcher;
use crate::lifecycle::LifecycleManager;
use crate::message::{Command, Notification};
use crate::request::RequestKey;
use crate::router::{FreshnessWindows, RouteOutcome, Router, RuleTable};
use crate::store::{CapturedResponse, ContentStore, Namespace, OperationLog};
use crate::sync::SyncCoordinator;

/// Clonable handle for foreground collaborators: send commands in,
/// subscribe to notifications out.
#[derive(Clone)]
pub struct EngineHandle {
  commands: mpsc::UnboundedSender<Command>,
  notifications: broadcast::Sender<Notification>,
}

impl EngineHandle {
  pub fn send(&self, command: Command) -> Result<()> {
    self
      .commands
      .send(command)
      .map_err(|_| eyre!("Engine is no longer running"))
  }

  pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
    self.notifications.subscribe()
  }
}

pub struct Engine<F: Fetcher> {
  router: Router<F>,
  lifecycle: LifecycleManager<F>,
  sync: SyncCoordinator<F>,
  store: Arc<ContentStore>,
  log: Arc<OperationLog>,
  fetcher: Arc<F>,
  origin: Url,
  commands: mpsc::UnboundedReceiver<Command>,
  handle: EngineHandle,
}

impl<F: Fetcher + 'static> Engine<F> {
  pub fn new(
    config: &Config,
    fetcher: Arc<F>,
    store: Arc<ContentStore>,
    log: Arc<OperationLog>,
  ) -> Result<Self> {
    let origin = config.origin_url()?;
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (notify_tx, _) = broadcast::channel(16);

    let router = Router::new(
      Arc::clone(&store),
      Arc::clone(&fetcher),
      RuleTable::from_patterns(&config.patterns),
      origin.clone(),
      config.fallback_path.clone(),
      FreshnessWindows::from_config(&config.freshness),
    );

    let lifecycle = LifecycleManager::new(
      Arc::clone(&store),
      Arc::clone(&fetcher),
      origin.clone(),
      config.manifest.clone(),
    );

    let sync = SyncCoordinator::new(
      Arc::clone(&log),
      Arc::clone(&store),
      Arc::clone(&fetcher),
      origin.clone(),
      config.sync.clone(),
      notify_tx.clone(),
    );

    let handle = EngineHandle {
      commands: command_tx,
      notifications: notify_tx,
    };

    Ok(Self {
      router,
      lifecycle,
      sync,
      store,
      log,
      fetcher,
      origin,
      commands: command_rx,
      handle,
    })
  }

  /// Handle for foreground collaborators.
  pub fn handle(&self) -> EngineHandle {
    self.handle.clone()
  }

  /// Request interception hook. Same-origin GETs are answered through
  /// the router; everything else comes back `Ignored`.
  pub async fn handle_request(&self, method: &str, url: &str) -> Result<RouteOutcome> {
    self.router.handle(method, url).await
  }

  /// Record a client mutation for deferred delivery.
  pub fn enqueue(&self, tag: &str, payload: serde_json::Value) -> Result<i64> {
    self.log.enqueue(tag, payload)
  }

  /// Deferred-execution trigger delivery. An `Err` asks the host to
  /// reschedule per its own backoff policy.
  pub async fn deliver_trigger(&self, trigger: &str) -> Result<()> {
    self.sync.on_trigger(trigger).await
  }

  /// Install a new generation from the shell manifest.
  pub async fn install(&self) -> Result<i64> {
    self.lifecycle.install().await
  }

  /// Activate a specific generation.
  pub fn activate(&self, generation: i64) -> Result<()> {
    self.lifecycle.activate(generation)
  }

  /// Activate the pending generation immediately. No-op when nothing is
  /// pending, so repeated deliveries are safe.
  pub fn force_activate(&self) -> Result<()> {
    match self.store.pending_generation()? {
      Some(generation) => self.lifecycle.activate(generation),
      None => {
        debug!("force-activate with no pending generation");
        Ok(())
      }
    }
  }

  /// Delete every content entry. The operation log is untouched.
  pub fn purge_all(&self) -> Result<()> {
    self.store.purge_all()?;
    info!("purged all content stores");
    Ok(())
  }

  /// Fetch the given URLs into the data namespace of the active
  /// generation. Individual failures are logged and skipped.
  pub async fn precache(&self, urls: &[String]) -> Result<()> {
    for url in urls {
      if let Err(e) = self.precache_one(url).await {
        warn!("precache failed for {}: {}", url, e);
      }
    }
    Ok(())
  }

  async fn precache_one(&self, raw: &str) -> Result<()> {
    let key = RequestKey::for_path(&self.origin, raw)?;
    let url = key.absolute(&self.origin)?;

    let response = self.fetcher.get(url.as_str()).await?;
    if !response.is_success() {
      return Err(eyre!("unexpected status {}", response.status));
    }

    self.store.put_active(
      Namespace::Data,
      &key,
      &CapturedResponse::from_fetch(url.as_str(), &response),
    )
  }

  /// Process control commands until every handle is dropped. Commands
  /// run one at a time; a failing command is logged, not fatal.
  pub async fn run(&mut self) -> Result<()> {
    while let Some(command) = self.commands.recv().await {
      if let Err(e) = self.dispatch(command).await {
        warn!("command failed: {}", e);
      }
    }
    Ok(())
  }

  async fn dispatch(&self, command: Command) -> Result<()> {
    match command {
      Command::ForceActivate => self.force_activate(),
      Command::PurgeAll => self.purge_all(),
      Command::Precache { urls } => self.precache(&urls).await,
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::fetch::testing::ScriptedFetcher;
  use serde_json::json;
  use std::time::Duration;

  fn test_config() -> Config {
    serde_yaml::from_str(
      r#"
origin: https://app.test
manifest: ["/index.html"]
fallback_path: /offline.html
sync:
  refresh_paths: ["/api/items"]
"#,
    )
    .unwrap()
  }

  struct Fixture {
    engine: Engine<ScriptedFetcher>,
    store: Arc<ContentStore>,
    log: Arc<OperationLog>,
    fetcher: Arc<ScriptedFetcher>,
  }

  fn fixture() -> Fixture {
    let store = Arc::new(ContentStore::open_in_memory().unwrap());
    let log = Arc::new(OperationLog::open_in_memory().unwrap());
    let fetcher = Arc::new(ScriptedFetcher::new());

    let engine = Engine::new(
      &test_config(),
      Arc::clone(&fetcher),
      Arc::clone(&store),
      Arc::clone(&log),
    )
    .unwrap();

    Fixture {
      engine,
      store,
      log,
      fetcher,
    }
  }

  fn url(path: &str) -> String {
    format!("https://app.test{}", path)
  }

  #[tokio::test]
  async fn test_install_then_force_activate() {
    let f = fixture();
    f.fetcher.ok(&url("/index.html"), "<html>");

    let generation = f.engine.install().await.unwrap();
    assert_eq!(f.store.pending_generation().unwrap(), Some(generation));
    assert_eq!(f.store.active_generation().unwrap(), None);

    f.engine.force_activate().unwrap();
    assert_eq!(f.store.active_generation().unwrap(), Some(generation));

    // Idempotent: a second delivery with nothing pending is a no-op.
    f.engine.force_activate().unwrap();
    assert_eq!(f.store.active_generation().unwrap(), Some(generation));
  }

  #[tokio::test]
  async fn test_enqueue_and_drain_through_engine() {
    let f = fixture();
    f.fetcher.ok(&url("/index.html"), "<html>");
    let generation = f.engine.install().await.unwrap();
    f.engine.activate(generation).unwrap();

    f.engine.enqueue("watchlist_add", json!({"symbol": "A"})).unwrap();
    f.fetcher.ok(&url("/api/watchlist/sync"), "ok");

    f.engine.deliver_trigger("sync-watchlist").await.unwrap();
    assert!(f.log.list_by_tag("watchlist_").unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_pending_operation_survives_engine_restart() {
    let f = fixture();
    f.engine.enqueue("watchlist_add", json!({"symbol": "A"})).unwrap();

    // Tear the engine down and rebuild it over the preserved stores.
    drop(f.engine);
    let rebuilt = Engine::new(
      &test_config(),
      Arc::clone(&f.fetcher),
      Arc::clone(&f.store),
      Arc::clone(&f.log),
    )
    .unwrap();

    let pending = rebuilt.log.list_by_tag("watchlist_").unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].payload, json!({"symbol": "A"}));
  }

  #[tokio::test]
  async fn test_purge_command_scopes_to_content_stores() {
    let f = fixture();
    f.fetcher.ok(&url("/index.html"), "<html>");
    let generation = f.engine.install().await.unwrap();
    f.engine.activate(generation).unwrap();
    f.engine.enqueue("watchlist_add", json!({})).unwrap();

    f.engine.purge_all().unwrap();

    assert_eq!(f.store.entry_count(Namespace::Shell).unwrap(), 0);
    // Queued mutations are not content; they stay.
    assert_eq!(f.log.list_by_tag("watchlist_").unwrap().len(), 1);
  }

  #[tokio::test]
  async fn test_precache_populates_data_namespace() {
    let f = fixture();
    f.fetcher.ok(&url("/index.html"), "<html>");
    let generation = f.engine.install().await.unwrap();
    f.engine.activate(generation).unwrap();

    f.fetcher.ok(&url("/api/items"), "[]");
    f.fetcher.fail(&url("/api/broken"));

    // The failing URL is skipped, the good one lands.
    f.engine
      .precache(&["/api/items".to_string(), "/api/broken".to_string()])
      .await
      .unwrap();

    assert_eq!(f.store.entry_count(Namespace::Data).unwrap(), 1);
  }

  #[tokio::test]
  async fn test_run_loop_processes_commands_from_handle() {
    let f = fixture();
    f.fetcher.ok(&url("/index.html"), "<html>");
    let generation = f.engine.install().await.unwrap();

    let handle = f.engine.handle();
    let store = Arc::clone(&f.store);
    let mut engine = f.engine;
    let worker = tokio::spawn(async move { engine.run().await });

    handle.send(Command::ForceActivate).unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(store.active_generation().unwrap(), Some(generation));
    worker.abort();
  }

  #[tokio::test]
  async fn test_refresh_trigger_notifies_subscribers() {
    let f = fixture();
    f.fetcher.ok(&url("/index.html"), "<html>");
    let generation = f.engine.install().await.unwrap();
    f.engine.activate(generation).unwrap();
    f.fetcher.ok(&url("/api/items"), "[]");

    let mut rx = f.engine.handle().subscribe();
    f.engine.deliver_trigger("sync-data").await.unwrap();

    assert_eq!(rx.try_recv().unwrap(), Notification::SyncStart);
    assert_eq!(rx.try_recv().unwrap(), Notification::SyncComplete);
  }
}
