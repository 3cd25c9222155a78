//! Responses produced by the strategy router, with the source of the
//! data attached so callers can tell fresh, stale, and fallback content
//! apart.

use chrono::{DateTime, Utc};

use crate::fetch::FetchedResponse;
use crate::store::ContentEntry;

/// Where a served response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServeSource {
  /// Fresh data from the network
  Network,
  /// Stored entry within its freshness window
  CacheFresh,
  /// Stored entry past its freshness window, served anyway
  CacheStale,
  /// The designated offline fallback page
  Fallback,
  /// No usable response anywhere; status is 503
  Unavailable,
}

/// One response served by the router.
#[derive(Debug, Clone)]
pub struct Served {
  pub status: u16,
  pub headers: Vec<(String, String)>,
  pub body: Vec<u8>,
  pub source: ServeSource,
  /// When the entry was stored, for cache-sourced responses
  pub retrieved_at: Option<DateTime<Utc>>,
}

impl Served {
  pub fn from_network(response: FetchedResponse) -> Self {
    Self {
      status: response.status,
      headers: response.headers,
      body: response.body,
      source: ServeSource::Network,
      retrieved_at: None,
    }
  }

  pub fn from_entry(entry: ContentEntry, stale: bool) -> Self {
    Self {
      status: entry.status,
      headers: entry.headers,
      body: entry.body,
      source: if stale {
        ServeSource::CacheStale
      } else {
        ServeSource::CacheFresh
      },
      retrieved_at: Some(entry.retrieved_at),
    }
  }

  pub fn fallback(entry: ContentEntry) -> Self {
    Self {
      status: entry.status,
      headers: entry.headers,
      body: entry.body,
      source: ServeSource::Fallback,
      retrieved_at: Some(entry.retrieved_at),
    }
  }

  /// The explicit service-unavailable result: the only outcome when
  /// neither network nor store nor fallback can answer.
  pub fn unavailable() -> Self {
    Self {
      status: 503,
      headers: Vec::new(),
      body: Vec::new(),
      source: ServeSource::Unavailable,
      retrieved_at: None,
    }
  }

  pub fn is_unavailable(&self) -> bool {
    self.source == ServeSource::Unavailable
  }
}

/// Outcome of offering a request to the router.
#[derive(Debug, Clone)]
pub enum RouteOutcome {
  /// Not the engine's request (non-GET or cross-origin); the host
  /// performs it untouched.
  Ignored,
  /// The engine produced a response.
  Served(Served),
}

impl RouteOutcome {
  pub fn served(self) -> Option<Served> {
    match self {
      RouteOutcome::Served(served) => Some(served),
      RouteOutcome::Ignored => None,
    }
  }
}
