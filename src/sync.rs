//! Sync coordinator.
//!
//! A stateless responder to deferred-execution triggers delivered by the
//! host runtime. Mutation triggers drain one operation-log partition as a
//! single batched request; the data-refresh trigger re-fetches a fixed
//! set of GET paths and notifies connected clients. The coordinator
//! never schedules its own retries: a failed drain is propagated so the
//! host reschedules per its own backoff policy.

use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use url::Url;

use crate::config::SyncConfig;
use crate::fetch::Fetcher;
use crate::message::Notification;
use crate::request::RequestKey;
use crate::store::{CapturedResponse, ContentStore, Namespace, OperationLog};

/// One mutation category: a trigger tag mapped to exactly one operation
/// log partition and one endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct SyncRoute {
  pub trigger: String,
  pub tag: String,
  pub endpoint: String,
}

pub struct SyncCoordinator<F: Fetcher> {
  log: Arc<OperationLog>,
  store: Arc<ContentStore>,
  fetcher: Arc<F>,
  origin: Url,
  config: SyncConfig,
  notifications: broadcast::Sender<Notification>,
}

impl<F: Fetcher> SyncCoordinator<F> {
  pub fn new(
    log: Arc<OperationLog>,
    store: Arc<ContentStore>,
    fetcher: Arc<F>,
    origin: Url,
    config: SyncConfig,
    notifications: broadcast::Sender<Notification>,
  ) -> Self {
    Self {
      log,
      store,
      fetcher,
      origin,
      config,
      notifications,
    }
  }

  /// Respond to one trigger delivery. An `Err` tells the host to
  /// reschedule; the operation log is left untouched in that case.
  pub async fn on_trigger(&self, trigger: &str) -> Result<()> {
    if trigger == self.config.refresh_trigger {
      return self.refresh_data().await;
    }

    let route = self
      .config
      .routes
      .iter()
      .find(|r| r.trigger == trigger)
      .ok_or_else(|| eyre!("Unknown sync trigger: {}", trigger))?;

    self.drain(route).await
  }

  async fn drain(&self, route: &SyncRoute) -> Result<()> {
    let pending = self.log.list_by_tag(&route.tag)?;
    if pending.is_empty() {
      debug!("nothing pending for {}", route.trigger);
      return Ok(());
    }

    // Only the ids listed here are removed afterwards; operations
    // enqueued while the request is in flight stay for the next drain.
    let ids: Vec<i64> = pending.iter().map(|op| op.id).collect();
    let payloads: Vec<&serde_json::Value> = pending.iter().map(|op| &op.payload).collect();
    let body = serde_json::json!({ "operations": payloads });

    let url = self
      .origin
      .join(&route.endpoint)
      .map_err(|e| eyre!("Invalid endpoint {}: {}", route.endpoint, e))?;

    let response = self
      .fetcher
      .post_json(url.as_str(), &body)
      .await
      .map_err(|e| eyre!("Failed to reach {}: {}", route.endpoint, e))?;

    if !response.is_success() {
      return Err(eyre!(
        "Sync endpoint {} returned status {}",
        route.endpoint,
        response.status
      ));
    }

    // Acknowledged: the batch, and only the batch, leaves the log.
    self.log.remove(&ids)?;
    info!("drained {} operations for {}", ids.len(), route.trigger);

    Ok(())
  }

  /// Re-fetch the configured refresh paths into the data namespace.
  /// Never touches the operation log.
  async fn refresh_data(&self) -> Result<()> {
    let _ = self.notifications.send(Notification::SyncStart);

    for path in &self.config.refresh_paths {
      if let Err(e) = self.refresh_one(path).await {
        warn!("refresh failed for {}: {}", path, e);
      }
    }

    let _ = self.notifications.send(Notification::SyncComplete);
    Ok(())
  }

  async fn refresh_one(&self, path: &str) -> Result<()> {
    let key = RequestKey::for_path(&self.origin, path)?;
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
}
