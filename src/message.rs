//! Control-plane protocol between the foreground application and the
//! engine. Commands flow in, notifications fan out. Every command is
//! idempotent and scoped to exactly the store(s) it names.

use serde::{Deserialize, Serialize};

/// Foreground to engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Command {
  /// Activate the pending generation now, without waiting for connected
  /// clients to wind down. No-op when nothing is pending.
  #[serde(rename = "FORCE_ACTIVATE")]
  ForceActivate,

  /// Delete every content entry across all namespaces and generations.
  /// The operation log is untouched.
  #[serde(rename = "PURGE_ALL")]
  PurgeAll,

  /// Fetch the given URLs into the data namespace on demand.
  #[serde(rename = "PRECACHE")]
  Precache { urls: Vec<String> },
}

/// Engine to foreground.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Notification {
  #[serde(rename = "SYNC_START")]
  SyncStart,

  #[serde(rename = "SYNC_COMPLETE")]
  SyncComplete,
}

#[cfg(test)]
mod tests {
  use super::*;
  use serde_json::json;

  #[test]
  fn test_command_wire_format() {
    assert_eq!(
      serde_json::to_value(Command::ForceActivate).unwrap(),
      json!({"type": "FORCE_ACTIVATE"})
    );
    assert_eq!(
      serde_json::to_value(Command::Precache {
        urls: vec!["/api/items".to_string()]
      })
      .unwrap(),
      json!({"type": "PRECACHE", "urls": ["/api/items"]})
    );

    let parsed: Command = serde_json::from_value(json!({"type": "PURGE_ALL"})).unwrap();
    assert_eq!(parsed, Command::PurgeAll);
  }

  #[test]
  fn test_notification_wire_format() {
    assert_eq!(
      serde_json::to_value(Notification::SyncStart).unwrap(),
      json!({"type": "SYNC_START"})
    );
    assert_eq!(
      serde_json::to_value(Notification::SyncComplete).unwrap(),
      json!({"type": "SYNC_COMPLETE"})
    );
  }
}
