//! Cache strategy router.
//!
//! Classifies each intercepted request and executes its class's policy
//! against the content store: cache-first for the shell, network-first
//! for data, stale-while-revalidate for media, pass-through for
//! everything else. Store failures are logged and treated as misses so a
//! broken store degrades to pass-through instead of failing requests.

mod rules;
mod serve;

pub use rules::{Policy, Rule, RuleTable};
pub use serve::{RouteOutcome, ServeSource, Served};

use chrono::{Duration, Utc};
use color_eyre::Result;
use std::sync::Arc;
use tracing::{debug, warn};
use url::Url;

use crate::config::Freshness;
use crate::fetch::{FetchedResponse, Fetcher};
use crate::request::{self, RequestKey};
use crate::store::{CapturedResponse, ContentEntry, ContentStore, Namespace};

/// Advisory freshness windows per namespace. They only affect the
/// fresh/stale marking on served responses; eviction is generation-based,
/// never per-entry.
#[derive(Debug, Clone, Copy)]
pub struct FreshnessWindows {
  pub data: Duration,
  pub media: Duration,
}

impl FreshnessWindows {
  pub fn from_config(freshness: &Freshness) -> Self {
    Self {
      data: Duration::seconds(freshness.data_secs as i64),
      media: Duration::seconds(freshness.media_secs as i64),
    }
  }

  fn window(&self, namespace: Namespace) -> Option<Duration> {
    match namespace {
      Namespace::Shell => None,
      Namespace::Data => Some(self.data),
      Namespace::Media => Some(self.media),
    }
  }
}

/// Strategy router over a content store and a fetcher.
pub struct Router<F: Fetcher> {
  store: Arc<ContentStore>,
  fetcher: Arc<F>,
  rules: RuleTable,
  origin: Url,
  fallback_path: Option<String>,
  freshness: FreshnessWindows,
}

impl<F: Fetcher + 'static> Router<F> {
  pub fn new(
    store: Arc<ContentStore>,
    fetcher: Arc<F>,
    rules: RuleTable,
    origin: Url,
    fallback_path: Option<String>,
    freshness: FreshnessWindows,
  ) -> Self {
    Self {
      store,
      fetcher,
      rules,
      origin,
      fallback_path,
      freshness,
    }
  }

  /// Offer an intercepted request to the router.
  pub async fn handle(&self, method: &str, url: &str) -> Result<RouteOutcome> {
    let Some(key) = request::intercept(&self.origin, method, url)? else {
      return Ok(RouteOutcome::Ignored);
    };

    let served = match self.rules.classify(key.path()) {
      None => self.pass_through(&key).await,
      Some(rule) => match rule.policy {
        Policy::CacheFirst => self.cache_first(rule.namespace, &key).await,
        Policy::NetworkFirst => self.network_first(rule.namespace, &key).await,
        Policy::StaleWhileRevalidate => {
          self.stale_while_revalidate(rule.namespace, &key).await
        }
      },
    };

    Ok(RouteOutcome::Served(served))
  }

  async fn cache_first(&self, namespace: Namespace, key: &RequestKey) -> Served {
    if let Some(entry) = self.lookup(namespace, key) {
      return Served::from_entry(entry, false);
    }

    match self.fetch(key).await {
      Ok(response) => {
        if response.is_success() {
          self.capture(namespace, key, &response);
        }
        Served::from_network(response)
      }
      Err(e) => {
        debug!("shell fetch failed for {}: {}", key.path(), e);
        self.fallback()
      }
    }
  }

  async fn network_first(&self, namespace: Namespace, key: &RequestKey) -> Served {
    match self.fetch(key).await {
      Ok(response) => {
        if response.is_success() {
          self.capture(namespace, key, &response);
        }
        Served::from_network(response)
      }
      Err(e) => {
        debug!("network-first fetch failed for {}: {}", key.path(), e);
        // Staleness is preferable to unavailability: the entry is served
        // however old it is, marked stale past its window.
        match self.lookup(namespace, key) {
          Some(entry) => {
            let stale = self.is_stale(namespace, &entry);
            Served::from_entry(entry, stale)
          }
          None => Served::unavailable(),
        }
      }
    }
  }

  async fn stale_while_revalidate(&self, namespace: Namespace, key: &RequestKey) -> Served {
    if let Some(entry) = self.lookup(namespace, key) {
      let stale = self.is_stale(namespace, &entry);
      self.spawn_revalidate(namespace, key.clone());
      return Served::from_entry(entry, stale);
    }

    match self.fetch(key).await {
      Ok(response) => {
        if response.is_success() {
          self.capture(namespace, key, &response);
        }
        Served::from_network(response)
      }
      Err(e) => {
        debug!("media fetch failed for {}: {}", key.path(), e);
        Served::unavailable()
      }
    }
  }

  async fn pass_through(&self, key: &RequestKey) -> Served {
    match self.fetch(key).await {
      Ok(response) => Served::from_network(response),
      Err(e) => {
        debug!("pass-through fetch failed for {}: {}", key.path(), e);
        Served::unavailable()
      }
    }
  }

  /// Refresh a stored entry off the request's critical path.
  fn spawn_revalidate(&self, namespace: Namespace, key: RequestKey) {
    let url = match key.absolute(&self.origin) {
      Ok(url) => url.to_string(),
      Err(e) => {
        warn!("cannot revalidate {}: {}", key.path(), e);
        return;
      }
    };
    let store = Arc::clone(&self.store);
    let fetcher = Arc::clone(&self.fetcher);

    tokio::spawn(async move {
      match fetcher.get(&url).await {
        Ok(response) if response.is_success() => {
          // The active generation is re-resolved at write time; a cutover
          // during the fetch lands this entry in the new generation.
          let captured = CapturedResponse::from_fetch(&url, &response);
          if let Err(e) = store.put_active(namespace, &key, &captured) {
            warn!("revalidation write failed for {}: {}", key.path(), e);
          }
        }
        Ok(response) => {
          debug!("revalidation for {} returned status {}", key.path(), response.status);
        }
        Err(e) => {
          debug!("revalidation fetch failed for {}: {}", key.path(), e);
        }
      }
    });
  }

  async fn fetch(&self, key: &RequestKey) -> Result<FetchedResponse> {
    let url = key.absolute(&self.origin)?;
    self.fetcher.get(url.as_str()).await
  }

  /// Store read with degradation: a failing store is a miss, not an error.
  fn lookup(&self, namespace: Namespace, key: &RequestKey) -> Option<ContentEntry> {
    match self.store.get(namespace, key) {
      Ok(entry) => entry,
      Err(e) => {
        warn!("content store read failed for {}: {}", key.path(), e);
        None
      }
    }
  }

  /// Store write with degradation: a failing store loses the copy, not
  /// the response.
  fn capture(&self, namespace: Namespace, key: &RequestKey, response: &FetchedResponse) {
    let url = match key.absolute(&self.origin) {
      Ok(url) => url.to_string(),
      Err(_) => key.path_query().to_string(),
    };
    let captured = CapturedResponse::from_fetch(&url, response);
    if let Err(e) = self.store.put_active(namespace, key, &captured) {
      warn!("content store write failed for {}: {}", key.path(), e);
    }
  }

  fn is_stale(&self, namespace: Namespace, entry: &ContentEntry) -> bool {
    match self.freshness.window(namespace) {
      Some(window) => Utc::now() - entry.retrieved_at > window,
      None => false,
    }
  }

  fn fallback(&self) -> Served {
    let Some(path) = &self.fallback_path else {
      return Served::unavailable();
    };
    match RequestKey::for_path(&self.origin, path) {
      Ok(key) => match self.lookup(Namespace::Shell, &key) {
        Some(entry) => Served::fallback(entry),
        None => Served::unavailable(),
      },
      Err(e) => {
        warn!("fallback path is unusable: {}", e);
        Served::unavailable()
      }
    }
  }
}

impl<F: Fetcher> Clone for Router<F> {
  fn clone(&self) -> Self {
    Self {
      store: Arc::clone(&self.store),
      fetcher: Arc::clone(&self.fetcher),
      rules: self.rules.clone(),
      origin: self.origin.clone(),
      fallback_path: self.fallback_path.clone(),
      freshness: self.freshness,
    }
  }
}
