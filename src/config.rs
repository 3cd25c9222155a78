//! Engine configuration.
//!
//! Loaded from a YAML file. Search order: explicit path, then
//! ./driftsync.yaml, then the XDG config directory.

use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

use crate::sync::SyncRoute;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  /// Origin the engine treats as same-origin, e.g. "https://app.example.com"
  pub origin: String,

  /// Shell resources fetched into every new generation at install
  #[serde(default)]
  pub manifest: Vec<String>,

  /// Shell page served when a cache-first request has neither a stored
  /// entry nor a network
  pub fallback_path: Option<String>,

  #[serde(default)]
  pub patterns: PatternTables,

  #[serde(default)]
  pub freshness: Freshness,

  #[serde(default)]
  pub sync: SyncConfig,

  /// Directory holding the SQLite stores (defaults to the platform data
  /// directory)
  pub store_dir: Option<PathBuf>,
}

/// Ordered path-substring pattern lists, one per resource class.
/// First match wins; a path matching none is served pass-through-only.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PatternTables {
  pub shell: Vec<String>,
  pub data: Vec<String>,
  pub media: Vec<String>,
}

impl Default for PatternTables {
  fn default() -> Self {
    Self {
      shell: vec![
        "/index.html".to_string(),
        "/assets/".to_string(),
        "/static/".to_string(),
      ],
      data: vec!["/api/".to_string()],
      media: vec![
        "/img/".to_string(),
        "/media/".to_string(),
        ".png".to_string(),
        ".jpg".to_string(),
        ".webp".to_string(),
      ],
    }
  }
}

/// Advisory freshness windows, in seconds.
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct Freshness {
  pub data_secs: u64,
  pub media_secs: u64,
}

impl Default for Freshness {
  fn default() -> Self {
    Self {
      // data: 30 minutes, media: 7 days
      data_secs: 30 * 60,
      media_secs: 7 * 24 * 60 * 60,
    }
  }
}

/// Sync coordinator wiring: trigger routes plus the data-refresh trigger.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
  /// Trigger tag that refreshes cached data instead of draining the log
  pub refresh_trigger: String,
  /// Idempotent GET paths re-fetched on the refresh trigger
  pub refresh_paths: Vec<String>,
  /// One route per mutation category: trigger tag to log partition + endpoint
  pub routes: Vec<SyncRoute>,
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      refresh_trigger: "sync-data".to_string(),
      refresh_paths: Vec::new(),
      routes: vec![
        SyncRoute {
          trigger: "sync-watchlist".to_string(),
          tag: "watchlist_".to_string(),
          endpoint: "/api/watchlist/sync".to_string(),
        },
        SyncRoute {
          trigger: "sync-comparisons".to_string(),
          tag: "comparison_".to_string(),
          endpoint: "/api/comparisons/sync".to_string(),
        },
      ],
    }
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./driftsync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/driftsync/config.yaml
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
        "No configuration file found. Create one at ~/.config/driftsync/config.yaml"
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    let local = PathBuf::from("driftsync.yaml");
    if local.exists() {
      return Some(local);
    }

    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("driftsync").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config: Config = serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    Ok(config)
  }

  /// Parsed origin URL.
  pub fn origin_url(&self) -> Result<Url> {
    Url::parse(&self.origin).map_err(|e| eyre!("Invalid origin {}: {}", self.origin, e))
  }

  /// Directory for the SQLite stores.
  pub fn resolve_store_dir(&self) -> Result<PathBuf> {
    if let Some(dir) = &self.store_dir {
      return Ok(dir.clone());
    }

    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("driftsync"))
  }
}
