//! Generation lifecycle.
//!
//! Installing a new generation populates the shell manifest into a fresh
//! namespace set; activating it switches the router over atomically and
//! deletes every prior generation. The ordering is strict:
//! install, then activate, then delete old, never the reverse.

use color_eyre::{eyre::eyre, Result};
use futures::future;
use std::sync::Arc;
use tracing::{info, warn};
use url::Url;

use crate::fetch::Fetcher;
use crate::request::RequestKey;
use crate::store::{CapturedResponse, ContentStore, Namespace};

pub struct LifecycleManager<F: Fetcher> {
  store: Arc<ContentStore>,
  fetcher: Arc<F>,
  origin: Url,
  manifest: Vec<String>,
}

impl<F: Fetcher> LifecycleManager<F> {
  pub fn new(
    store: Arc<ContentStore>,
    fetcher: Arc<F>,
    origin: Url,
    manifest: Vec<String>,
  ) -> Self {
    Self {
      store,
      fetcher,
      origin,
      manifest,
    }
  }

  /// Populate a new generation with the shell manifest and record it as
  /// pending. Manifest entries are fetched independently; individual
  /// failures are logged and do not abort the installation.
  pub async fn install(&self) -> Result<i64> {
    let generation = self.store.begin_generation()?;

    let attempts = self
      .manifest
      .iter()
      .map(|path| self.populate(generation, path));
    let results = future::join_all(attempts).await;

    let mut cached = 0usize;
    for (path, result) in self.manifest.iter().zip(&results) {
      match result {
        Ok(()) => cached += 1,
        Err(e) => warn!("failed to precache {}: {}", path, e),
      }
    }

    info!(
      "installed generation {} with {}/{} shell entries",
      generation,
      cached,
      self.manifest.len()
    );

    Ok(generation)
  }

  async fn populate(&self, generation: i64, path: &str) -> Result<()> {
    let key = RequestKey::for_path(&self.origin, path)?;
    let url = key.absolute(&self.origin)?;

    let response = self.fetcher.get(url.as_str()).await?;
    if !response.is_success() {
      return Err(eyre!("unexpected status {} for {}", response.status, path));
    }

    self.store.put(
      generation,
      Namespace::Shell,
      &key,
      &CapturedResponse::from_fetch(url.as_str(), &response),
    )
  }

  /// Switch the active generation and delete every other one. Atomic
  /// with respect to request interception: lookups resolve the active
  /// generation per read and never see a mixed namespace set.
  pub fn activate(&self, generation: i64) -> Result<()> {
    self.store.activate(generation)?;
    info!("generation {} active, prior generations removed", generation);
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::fetch::testing::ScriptedFetcher;

  fn origin() -> Url {
    Url::parse("https://app.test").unwrap()
  }

  fn url(path: &str) -> String {
    format!("https://app.test{}", path)
  }

  fn manager(
    fetcher: Arc<ScriptedFetcher>,
    manifest: &[&str],
  ) -> (LifecycleManager<ScriptedFetcher>, Arc<ContentStore>) {
    let store = Arc::new(ContentStore::open_in_memory().unwrap());
    let manager = LifecycleManager::new(
      Arc::clone(&store),
      fetcher,
      origin(),
      manifest.iter().map(|s| s.to_string()).collect(),
    );
    (manager, store)
  }

  #[tokio::test]
  async fn test_install_populates_shell_namespace() {
    let fetcher = Arc::new(ScriptedFetcher::new());
    fetcher.ok(&url("/index.html"), "<html>");
    fetcher.ok(&url("/assets/app.js"), "js");
    let (manager, store) = manager(Arc::clone(&fetcher), &["/index.html", "/assets/app.js"]);

    let generation = manager.install().await.unwrap();
    manager.activate(generation).unwrap();

    assert_eq!(store.entry_count(Namespace::Shell).unwrap(), 2);
  }

  #[tokio::test]
  async fn test_partial_manifest_failure_does_not_abort_install() {
    let fetcher = Arc::new(ScriptedFetcher::new());
    fetcher.ok(&url("/index.html"), "<html>");
    fetcher.fail(&url("/assets/app.js"));
    let (manager, store) = manager(Arc::clone(&fetcher), &["/index.html", "/assets/app.js"]);

    let generation = manager.install().await.unwrap();
    manager.activate(generation).unwrap();

    // The reachable entry was cached; the failing one was skipped.
    assert_eq!(store.entry_count(Namespace::Shell).unwrap(), 1);
    let key = RequestKey::for_path(&origin(), "/index.html").unwrap();
    assert!(store.get(Namespace::Shell, &key).unwrap().is_some());
  }

  #[tokio::test]
  async fn test_new_generation_replaces_old_after_activation() {
    let fetcher = Arc::new(ScriptedFetcher::new());
    fetcher.ok(&url("/index.html"), "v1");
    let (manager, store) = manager(Arc::clone(&fetcher), &["/index.html"]);
    let key = RequestKey::for_path(&origin(), "/index.html").unwrap();

    let first = manager.install().await.unwrap();
    manager.activate(first).unwrap();
    assert_eq!(store.get(Namespace::Shell, &key).unwrap().unwrap().body, b"v1");

    // Deploy: new shell content, new generation installed while the old
    // one keeps serving.
    fetcher.ok(&url("/index.html"), "v2");
    let second = manager.install().await.unwrap();
    assert_eq!(store.get(Namespace::Shell, &key).unwrap().unwrap().body, b"v1");

    manager.activate(second).unwrap();
    assert_eq!(store.get(Namespace::Shell, &key).unwrap().unwrap().body, b"v2");
    assert_eq!(store.generations().unwrap(), vec![second]);
  }
}
