//! Request classification.
//!
//! An ordered table of substring rules maps request paths to a namespace
//! and a retrieval policy. First match wins; a path matching no rule is
//! served pass-through-only. New resource classes are added by extending
//! the table, not by editing the router.

use crate::config::PatternTables;
use crate::store::Namespace;

/// Retrieval policy applied to one resource class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Policy {
  /// Stored entry wins; network only on a miss
  CacheFirst,
  /// Network wins; stored entry only on failure
  NetworkFirst,
  /// Stored entry served immediately, refreshed off the critical path
  StaleWhileRevalidate,
}

/// One classification rule.
#[derive(Debug, Clone)]
pub struct Rule {
  /// Path substring to match
  pub pattern: String,
  pub namespace: Namespace,
  pub policy: Policy,
}

/// Ordered rule table consulted per request.
#[derive(Debug, Clone, Default)]
pub struct RuleTable {
  rules: Vec<Rule>,
}

impl RuleTable {
  pub fn new(rules: Vec<Rule>) -> Self {
    Self { rules }
  }

  /// Build the table from the configured pattern lists, preserving their
  /// order: shell, then data, then media.
  pub fn from_patterns(patterns: &PatternTables) -> Self {
    let mut rules = Vec::new();

    for pattern in &patterns.shell {
      rules.push(Rule {
        pattern: pattern.clone(),
        namespace: Namespace::Shell,
        policy: Policy::CacheFirst,
      });
    }
    for pattern in &patterns.data {
      rules.push(Rule {
        pattern: pattern.clone(),
        namespace: Namespace::Data,
        policy: Policy::NetworkFirst,
      });
    }
    for pattern in &patterns.media {
      rules.push(Rule {
        pattern: pattern.clone(),
        namespace: Namespace::Media,
        policy: Policy::StaleWhileRevalidate,
      });
    }

    Self { rules }
  }

  /// First rule whose pattern occurs in the path, if any.
  pub fn classify(&self, path: &str) -> Option<&Rule> {
    self.rules.iter().find(|rule| path.contains(&rule.pattern))
  }
}
