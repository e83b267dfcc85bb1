//! Shared data types passed between adapters, the session manager, the
//! summarizer, and the orchestrator.

use serde::{Deserialize, Serialize};

/// The wire formats adapters know how to read and write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Anthropic,
    Openai,
    Gemini,
    Ollama,
    Bedrock,
}

impl ProviderKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Anthropic => "anthropic",
            Self::Openai => "openai",
            Self::Gemini => "gemini",
            Self::Ollama => "ollama",
            Self::Bedrock => "bedrock",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What kind of payload an [`ExtractedContent`] entry carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentType {
    ToolResult,
    ToolDef,
}

/// One tool-result or tool-definition lifted out of a request/response
/// body, tagged with enough positional information to write it back.
#[derive(Debug, Clone)]
pub struct ExtractedContent {
    /// Provider-specific stable id (`tool_use_id`, `call_id`, ...).
    pub id: String,
    /// The extracted text content.
    pub content: String,
    pub content_type: ContentType,
    /// Name of the tool, when resolvable from the companion call/use item.
    pub tool_name: Option<String>,
    /// Index of the message this entry was found in.
    pub message_index: usize,
    /// Index of the content block within that message, when the
    /// provider's shape has one.
    pub block_index: usize,
}

/// A caller-supplied replacement for one [`ExtractedContent`] entry.
#[derive(Debug, Clone)]
pub struct CompressedResult {
    pub id: String,
    pub compressed: String,
    /// For tool-discovery results only: `false` drops the definition.
    pub keep: bool,
}

/// Token accounting extracted from a provider's usage block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UsageInfo {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
}

/// Outcome of running the compaction-phrase detector against a body.
#[derive(Debug, Clone, Default)]
pub struct DetectionResult {
    pub is_compaction: bool,
    pub detected_by: Option<String>,
    pub confidence: f64,
    pub details: Option<String>,
}

impl DetectionResult {
    pub fn none() -> Self {
        Self::default()
    }
}

/// A model's context-window geometry, used as the denominator for usage
/// percent.
#[derive(Debug, Clone)]
pub struct ModelContextWindow {
    pub model: String,
    pub max_tokens: u64,
    pub output_max: u64,
}

impl ModelContextWindow {
    /// Input budget: total window minus reserved output space.
    pub fn effective_max(&self) -> u64 {
        self.max_tokens.saturating_sub(self.output_max)
    }
}
