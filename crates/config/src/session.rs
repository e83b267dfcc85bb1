//! Session-manager configuration (C4).

use std::time::Duration;

use duration_str::deserialize_duration;
use serde::Deserialize;

/// Session lifecycle tuning.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionConfig {
    /// Sessions whose last-update age exceeds this are reaped by the
    /// cleanup ticker.
    #[serde(deserialize_with = "deserialize_duration")]
    pub summary_ttl: Duration,
    /// Number of leading messages hashed together for the legacy
    /// identifier fallback when no user message is present.
    pub hash_message_count: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            summary_ttl: Duration::from_secs(2 * 60 * 60),
            hash_message_count: 3,
        }
    }
}
