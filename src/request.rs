//! Request identity normalization.
//!
//! Cache lookups are keyed by a normalized request identity: same-origin
//! GET requests only, fragment stripped, query preserved. The identity is
//! hashed to a stable fixed-length key for storage.

use color_eyre::{eyre::eyre, Result};
use sha2::{Digest, Sha256};
use url::Url;

/// Normalized identity of an interceptable request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestKey {
  path: String,
  path_query: String,
  hash: String,
}

impl RequestKey {
  /// Path component, without the query string. Used for rule matching.
  pub fn path(&self) -> &str {
    &self.path
  }

  /// Path plus query string, as sent to the origin.
  pub fn path_query(&self) -> &str {
    &self.path_query
  }

  /// Stable storage key for this identity.
  pub fn hash(&self) -> &str {
    &self.hash
  }

  /// Resolve this identity back to an absolute URL on the given origin.
  pub fn absolute(&self, origin: &Url) -> Result<Url> {
    origin
      .join(&self.path_query)
      .map_err(|e| eyre!("Failed to resolve {} against origin: {}", self.path_query, e))
  }

  /// Build the key for a known same-origin path (manifest entries,
  /// fallback page, refresh paths). Errors on cross-origin input.
  pub fn for_path(origin: &Url, path: &str) -> Result<RequestKey> {
    normalize(origin, path)?.ok_or_else(|| eyre!("Not a same-origin path: {}", path))
  }
}

/// Decide whether an intercepted request is one the engine handles.
///
/// Returns `None` for anything that must pass through untouched: non-GET
/// methods and cross-origin requests.
pub fn intercept(origin: &Url, method: &str, url: &str) -> Result<Option<RequestKey>> {
  if !method.eq_ignore_ascii_case("GET") {
    return Ok(None);
  }
  normalize(origin, url)
}

fn normalize(origin: &Url, raw: &str) -> Result<Option<RequestKey>> {
  let mut resolved = origin
    .join(raw)
    .map_err(|e| eyre!("Failed to parse request URL {}: {}", raw, e))?;

  if resolved.origin() != origin.origin() {
    return Ok(None);
  }

  // Fragments never reach the server; they are not part of the identity.
  resolved.set_fragment(None);

  let path = resolved.path().to_string();
  let path_query = match resolved.query() {
    Some(q) => format!("{}?{}", path, q),
    None => path.clone(),
  };

  let mut hasher = Sha256::new();
  hasher.update(path_query.as_bytes());
  let hash = hex::encode(hasher.finalize());

  Ok(Some(RequestKey {
    path,
    path_query,
    hash,
  }))
}

#[cfg(test)]
mod tests {
  use super::*;

  fn origin() -> Url {
    Url::parse("https://app.test").unwrap()
  }

  #[test]
  fn test_non_get_is_not_intercepted() {
    let key = intercept(&origin(), "POST", "/api/watchlist").unwrap();
    assert!(key.is_none());
  }

  #[test]
  fn test_cross_origin_is_not_intercepted() {
    let key = intercept(&origin(), "GET", "https://cdn.other.test/logo.png").unwrap();
    assert!(key.is_none());
  }

  #[test]
  fn test_relative_path_resolves_to_same_origin() {
    let key = intercept(&origin(), "GET", "/api/items?page=2").unwrap().unwrap();
    assert_eq!(key.path(), "/api/items");
    assert_eq!(key.path_query(), "/api/items?page=2");
  }

  #[test]
  fn test_fragment_is_stripped_from_identity() {
    let plain = intercept(&origin(), "GET", "/index.html").unwrap().unwrap();
    let fragged = intercept(&origin(), "GET", "/index.html#section").unwrap().unwrap();
    assert_eq!(plain.hash(), fragged.hash());
  }

  #[test]
  fn test_query_distinguishes_identities() {
    let first = intercept(&origin(), "GET", "/api/items?page=1").unwrap().unwrap();
    let second = intercept(&origin(), "GET", "/api/items?page=2").unwrap().unwrap();
    assert_ne!(first.hash(), second.hash());
  }

  #[test]
  fn test_method_check_is_case_insensitive() {
    let key = intercept(&origin(), "get", "/index.html").unwrap();
    assert!(key.is_some());
  }

  #[test]
  fn test_for_path_rejects_cross_origin() {
    assert!(RequestKey::for_path(&origin(), "https://cdn.other.test/x").is_err());
  }

  #[test]
  fn test_absolute_round_trip() {
    let key = RequestKey::for_path(&origin(), "/offline.html").unwrap();
    let url = key.absolute(&origin()).unwrap();
    assert_eq!(url.as_str(), "https://app.test/offline.html");
  }
}
