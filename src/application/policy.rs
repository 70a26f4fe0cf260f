//! Route cache-duration policy.
//!
//! One explicit table replaces per-route duration choices scattered across
//! handlers: every cacheable path resolves its client-facing max-age here.

use std::time::Duration;

/// A single route-pattern to cache-duration rule.
#[derive(Debug, Clone)]
pub struct CacheRule {
    pub pattern: String,
    pub duration_minutes: u32,
}

/// Ordered pattern table mapping request paths to cache durations.
///
/// Lookup is first-match-wins over substring containment, so more specific
/// patterns must be listed before broader ones. The table is immutable once
/// built; it is loaded from settings at process start.
#[derive(Debug, Clone)]
pub struct CachePolicyTable {
    rules: Vec<CacheRule>,
    default_minutes: u32,
}

impl CachePolicyTable {
    pub fn new(rules: Vec<CacheRule>, default_minutes: u32) -> Self {
        Self {
            rules,
            default_minutes,
        }
    }

    /// Duration in minutes for `path`: the first rule whose pattern is
    /// contained in the path wins, falling back to the configured default.
    pub fn duration_for(&self, path: &str) -> u32 {
        self.rules
            .iter()
            .find(|rule| path.contains(rule.pattern.as_str()))
            .map(|rule| rule.duration_minutes)
            .unwrap_or(self.default_minutes)
    }

    /// Client-facing max-age for `path`.
    pub fn max_age(&self, path: &str) -> Duration {
        Duration::from_secs(u64::from(self.duration_for(path)) * 60)
    }
}
