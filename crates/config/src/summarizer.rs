//! Configuration for the background summarizer client (C5).

use std::time::Duration;

use duration_str::deserialize_duration;
use secrecy::SecretString;
use serde::Deserialize;

const DEFAULT_SYSTEM_PROMPT: &str = include_str!("summarizer_system_prompt.txt");

/// Upstream chat API shape the summarizer speaks.
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SummarizerProvider {
    /// Anthropic Messages API (the default).
    Anthropic,
    /// OpenAI Chat Completions API.
    Openai,
}

impl Default for SummarizerProvider {
    fn default() -> Self {
        Self::Anthropic
    }
}

/// How many recent messages/tokens the summarizer must leave untouched.
#[derive(Debug, Clone, Copy, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct KeepRecent {
    /// Keep at least this many trailing tokens (byte-length heuristic) verbatim.
    pub tokens: Option<u32>,
    /// Keep at least this many trailing messages verbatim.
    pub count: Option<usize>,
}

/// Configuration for the upstream summarization call.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SummarizerConfig {
    /// Upstream API shape.
    pub provider: SummarizerProvider,
    /// Model used for the summarization request.
    pub model: String,
    /// Bearer/API credential for the summarizer endpoint.
    pub api_key: SecretString,
    /// Summarizer endpoint URL.
    pub endpoint: String,
    /// Maximum tokens requested from the summarizer model.
    pub max_tokens: u32,
    /// Request timeout for the summarization call.
    #[serde(deserialize_with = "deserialize_duration")]
    pub timeout: Duration,
    /// Cutoff selection inputs; see `find_summarization_cutoff`.
    pub keep_recent: KeepRecent,
    /// Bytes-per-token heuristic ratio used only by the summarizer's own
    /// cutoff search; overridden by the orchestrator's ratio when unset.
    pub token_estimate_ratio: Option<u32>,
    /// System prompt wrapped around the conversation to summarize.
    pub system_prompt: String,
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            provider: SummarizerProvider::default(),
            model: "claude-3-5-haiku-20241022".to_string(),
            api_key: SecretString::from(String::new()),
            endpoint: "https://api.anthropic.com/v1/messages".to_string(),
            max_tokens: 2048,
            timeout: Duration::from_secs(60),
            keep_recent: KeepRecent::default(),
            token_estimate_ratio: None,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }
}
