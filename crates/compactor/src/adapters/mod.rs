//! Provider adapters (C1): a uniform contract for reading and writing
//! tool results, tool definitions, user queries, usage, and model
//! fields across incompatible wire formats.
//!
//! Every adapter is stateless and operates on an already-parsed
//! `serde_json::Value` tree rather than a per-provider typed schema —
//! see [`crate::json`] for why.

pub mod anthropic;
pub mod bedrock;
pub mod gemini;
pub mod ollama;
pub mod openai;
pub mod registry;

use serde_json::Value;

use crate::error::Result;
use crate::types::{CompressedResult, ExtractedContent, ProviderKind, UsageInfo};

/// Tunables for tool-discovery extraction; currently just a cap so a
/// runaway tool list can't blow up the summarizer call that inspects it.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiscoveryOptions {
    pub max_definitions: Option<usize>,
}

/// The operations every provider adapter implements.
pub trait Adapter: Send + Sync {
    fn name(&self) -> &'static str;
    fn provider(&self) -> ProviderKind;

    /// Emits one entry per tool-result carrier in `body`.
    fn extract_tool_output(&self, body: &Value) -> Result<Vec<ExtractedContent>>;

    /// Rewrites only the payload fields matching an id in `results`;
    /// returns `body` unchanged when `results` is empty or no matching
    /// structure is present.
    fn apply_tool_output(&self, body: &Value, results: &[CompressedResult]) -> Value;

    /// Emits one entry per tool definition in `body`.
    fn extract_tool_discovery(&self, body: &Value, opts: &DiscoveryOptions) -> Result<Vec<ExtractedContent>>;

    /// Rewrites the tool-definitions array; an entry with `keep = false`
    /// drops that definition entirely.
    fn apply_tool_discovery(&self, body: &Value, results: &[CompressedResult]) -> Value;

    /// Textual content of the last `role: "user"` message, walking
    /// backward from the end of `messages`.
    fn extract_user_query(&self, body: &Value) -> Result<String>;

    fn extract_usage(&self, response_body: &Value) -> Result<UsageInfo>;

    /// Model id with any provider prefix stripped.
    fn extract_model(&self, request_body: &Value) -> Result<String>;
}

/// Looks up `results` whose `id` matches `candidate_id`, if any.
pub(crate) fn find_result<'a>(results: &'a [CompressedResult], candidate_id: &str) -> Option<&'a CompressedResult> {
    results.iter().find(|r| r.id == candidate_id)
}
