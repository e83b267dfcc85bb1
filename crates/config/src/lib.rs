//! Configuration structures for the preemptive-compaction gateway.
//!
//! This crate owns only the shapes recognized by §6 of the design: the
//! orchestrator's own knobs plus the nested summarizer/session/detector
//! tables. Loading a file from disk and expanding `{{ env.VAR }}`
//! placeholders are ambient concerns, but the struct definitions live
//! here so both the gateway binary and the compaction core share one
//! schema.

#![deny(missing_docs)]

mod detector;
mod error;
mod loader;
mod session;
mod summarizer;

use std::path::PathBuf;
use std::time::Duration;

use duration_str::deserialize_duration;
use serde::Deserialize;

pub use detector::{DetectorConfig, DetectorsConfig};
pub use error::Error;
pub use session::SessionConfig;
pub use summarizer::{KeepRecent, SummarizerConfig, SummarizerProvider};

/// Top-level configuration for the preemptive-compaction gateway.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Master switch for the preemptive manager. When `false`,
    /// `ProcessRequest` passes every request through untouched.
    pub enabled: bool,
    /// Context-usage percent (0-100) that triggers background
    /// summarization on the normal path.
    pub trigger_threshold: u8,
    /// How long the compaction path waits on a Pending job before
    /// falling back to synchronous summarization.
    #[serde(deserialize_with = "deserialize_duration")]
    pub pending_job_timeout: Duration,
    /// Deadline for the synchronous-summarize fallback.
    #[serde(deserialize_with = "deserialize_duration")]
    pub sync_timeout: Duration,
    /// Bytes-per-token heuristic used for the usage-percent estimate on
    /// the normal path.
    pub token_estimate_ratio: u32,
    /// Overrides the model context-window table; also used by tests.
    pub test_context_window_override: Option<u32>,
    /// Directory the gateway's log files are written to; the compaction
    /// event log resolves `compaction_log_path` relative to this when
    /// the latter is not absolute.
    pub log_dir: PathBuf,
    /// Path to the compaction event-log JSON Lines file.
    pub compaction_log_path: Option<PathBuf>,
    /// Whether to inject `X-Context-*` / `X-Summary-*` response headers
    /// on the normal path.
    pub add_response_headers: bool,
    /// Summarizer client configuration.
    pub summarizer: SummarizerConfig,
    /// Session manager configuration.
    pub session: SessionConfig,
    /// Compaction-phrase detector configuration.
    pub detectors: DetectorsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            enabled: true,
            trigger_threshold: 75,
            pending_job_timeout: Duration::from_secs(90),
            sync_timeout: Duration::from_secs(120),
            token_estimate_ratio: 4,
            test_context_window_override: None,
            log_dir: PathBuf::from("./logs"),
            compaction_log_path: None,
            add_response_headers: true,
            summarizer: SummarizerConfig::default(),
            session: SessionConfig::default(),
            detectors: DetectorsConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file, expanding `{{ env.VAR }}`
    /// placeholders before deserializing.
    pub fn load<P: AsRef<std::path::Path>>(path: P) -> anyhow::Result<Config> {
        loader::load(path)
    }

    /// Resolved path of the compaction event log, honoring `log_dir`
    /// when `compaction_log_path` is relative or unset.
    pub fn resolved_compaction_log_path(&self) -> PathBuf {
        match &self.compaction_log_path {
            Some(path) if path.is_absolute() => path.clone(),
            Some(path) => self.log_dir.join(path),
            None => self.log_dir.join("compaction.jsonl"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_parse_from_empty_toml() {
        let config: Config = toml::from_str("").unwrap();
        assert!(config.enabled);
        assert_eq!(config.trigger_threshold, 75);
        assert_eq!(config.session.hash_message_count, 3);
    }

    #[test]
    fn compaction_log_path_resolves_relative_to_log_dir() {
        let mut config = Config::default();
        config.log_dir = PathBuf::from("/var/log/gateway");
        config.compaction_log_path = Some(PathBuf::from("events.jsonl"));
        assert_eq!(
            config.resolved_compaction_log_path(),
            PathBuf::from("/var/log/gateway/events.jsonl")
        );

        config.compaction_log_path = Some(PathBuf::from("/abs/events.jsonl"));
        assert_eq!(config.resolved_compaction_log_path(), PathBuf::from("/abs/events.jsonl"));
    }
}
