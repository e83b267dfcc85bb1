//! Bedrock adapter. Amazon Bedrock's `InvokeModel` body for Anthropic
//! models is the Anthropic Messages format with the `model`/`anthropic_version`
//! fields handled by the URL path rather than the body, so every
//! operation here delegates straight to [`super::anthropic`].

use serde_json::Value;

use crate::error::Result;
use crate::types::{CompressedResult, ExtractedContent, ProviderKind, UsageInfo};

use super::anthropic::AnthropicAdapter;
use super::{Adapter, DiscoveryOptions};

pub struct BedrockAdapter {
    inner: AnthropicAdapter,
}

impl Default for BedrockAdapter {
    fn default() -> Self {
        Self { inner: AnthropicAdapter }
    }
}

impl Adapter for BedrockAdapter {
    fn name(&self) -> &'static str {
        "bedrock"
    }

    fn provider(&self) -> ProviderKind {
        ProviderKind::Bedrock
    }

    fn extract_tool_output(&self, body: &Value) -> Result<Vec<ExtractedContent>> {
        self.inner.extract_tool_output(body)
    }

    fn apply_tool_output(&self, body: &Value, results: &[CompressedResult]) -> Value {
        self.inner.apply_tool_output(body, results)
    }

    fn extract_tool_discovery(&self, body: &Value, opts: &DiscoveryOptions) -> Result<Vec<ExtractedContent>> {
        self.inner.extract_tool_discovery(body, opts)
    }

    fn apply_tool_discovery(&self, body: &Value, results: &[CompressedResult]) -> Value {
        self.inner.apply_tool_discovery(body, results)
    }

    fn extract_user_query(&self, body: &Value) -> Result<String> {
        self.inner.extract_user_query(body)
    }

    fn extract_usage(&self, response_body: &Value) -> Result<UsageInfo> {
        self.inner.extract_usage(response_body)
    }

    /// Bedrock model ids are ARN-like (`anthropic.claude-3-5-sonnet-20241022-v2:0`)
    /// and never carry the `anthropic/` prefix the bare Anthropic API
    /// uses, so this strips the Bedrock vendor segment instead of
    /// delegating.
    fn extract_model(&self, request_body: &Value) -> Result<String> {
        let model = request_body.get("model").and_then(Value::as_str).unwrap_or_default();
        Ok(model.strip_prefix("anthropic.").unwrap_or(model).to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn delegates_tool_output_extraction_to_anthropic() {
        let body = json!({
            "messages": [
                {"role": "user", "content": "go"},
                {"role": "assistant", "content": [{"type": "tool_use", "id": "toolu_1", "name": "ls", "input": {}}]},
                {"role": "user", "content": [{"type": "tool_result", "tool_use_id": "toolu_1", "content": "ok"}]}
            ]
        });

        let results = BedrockAdapter::default().extract_tool_output(&body).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].content, "ok");
    }

    #[test]
    fn strips_bedrock_vendor_prefix_from_model_id() {
        let body = json!({"model": "anthropic.claude-3-5-sonnet-20241022-v2:0"});
        assert_eq!(
            BedrockAdapter::default().extract_model(&body).unwrap(),
            "claude-3-5-sonnet-20241022-v2:0"
        );
    }
}
