//! Ollama adapter. Ollama's `messages` shape is the same id scheme as
//! OpenAI Chat Completions (`tool_call_id` on a `role: "tool"`
//! message), but older server versions omit the field entirely — this
//! adapter falls back to the message's own position as the
//! correlation id when that happens.

use serde_json::Value;

use crate::error::Result;
use crate::json::extract_text;
use crate::types::{CompressedResult, ContentType, ExtractedContent, ProviderKind, UsageInfo};

use super::{Adapter, DiscoveryOptions, find_result};

pub struct OllamaAdapter;

impl Adapter for OllamaAdapter {
    fn name(&self) -> &'static str {
        "ollama"
    }

    fn provider(&self) -> ProviderKind {
        ProviderKind::Ollama
    }

    fn extract_tool_output(&self, body: &Value) -> Result<Vec<ExtractedContent>> {
        let Some(messages) = body.get("messages").and_then(Value::as_array) else {
            return Ok(Vec::new());
        };

        let mut pending_names: Vec<String> = Vec::new();
        let mut out = Vec::new();

        for (message_index, message) in messages.iter().enumerate() {
            match message.get("role").and_then(Value::as_str) {
                Some("assistant") => {
                    if let Some(calls) = message.get("tool_calls").and_then(Value::as_array) {
                        for call in calls {
                            if let Some(name) = call.get("function").and_then(|f| f.get("name")).and_then(Value::as_str) {
                                pending_names.push(name.to_string());
                            }
                        }
                    }
                }
                Some("tool") => {
                    let id = message
                        .get("tool_call_id")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .unwrap_or_else(|| message_index.to_string());

                    out.push(ExtractedContent {
                        id,
                        content: extract_text(message.get("content").unwrap_or(&Value::Null)),
                        content_type: ContentType::ToolResult,
                        tool_name: if pending_names.is_empty() { None } else { Some(pending_names.remove(0)) },
                        message_index,
                        block_index: 0,
                    });
                }
                _ => {}
            }
        }

        Ok(out)
    }

    fn apply_tool_output(&self, body: &Value, results: &[CompressedResult]) -> Value {
        if results.is_empty() {
            return body.clone();
        }

        let mut body = body.clone();

        let Some(messages) = body.get_mut("messages").and_then(Value::as_array_mut) else {
            return body;
        };

        for (message_index, message) in messages.iter_mut().enumerate() {
            if message.get("role").and_then(Value::as_str) != Some("tool") {
                continue;
            }

            let id = message
                .get("tool_call_id")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| message_index.to_string());

            if let Some(result) = find_result(results, &id)
                && let Some(obj) = message.as_object_mut()
            {
                obj.insert("content".to_string(), Value::String(result.compressed.clone()));
            }
        }

        body
    }

    fn extract_tool_discovery(&self, body: &Value, opts: &DiscoveryOptions) -> Result<Vec<ExtractedContent>> {
        let Some(tools) = body.get("tools").and_then(Value::as_array) else {
            return Ok(Vec::new());
        };

        let limit = opts.max_definitions.unwrap_or(tools.len());

        let out = tools
            .iter()
            .enumerate()
            .take(limit)
            .filter_map(|(block_index, tool)| {
                let function = tool.get("function")?;
                let name = function.get("name").and_then(Value::as_str)?;

                Some(ExtractedContent {
                    id: name.to_string(),
                    content: function
                        .get("description")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .unwrap_or_else(|| tool.to_string()),
                    content_type: ContentType::ToolDef,
                    tool_name: Some(name.to_string()),
                    message_index: 0,
                    block_index,
                })
            })
            .collect();

        Ok(out)
    }

    fn apply_tool_discovery(&self, body: &Value, results: &[CompressedResult]) -> Value {
        if results.is_empty() {
            return body.clone();
        }

        let mut body = body.clone();

        let Some(tools) = body.get_mut("tools").and_then(Value::as_array_mut) else {
            return body;
        };

        tools.retain_mut(|tool| {
            let Some(name) = tool
                .get("function")
                .and_then(|f| f.get("name"))
                .and_then(Value::as_str)
                .map(str::to_string)
            else {
                return true;
            };

            match find_result(results, &name) {
                Some(result) if !result.keep => false,
                Some(result) => {
                    if let Some(function) = tool.get_mut("function").and_then(Value::as_object_mut) {
                        function.insert("description".to_string(), Value::String(result.compressed.clone()));
                    }
                    true
                }
                None => true,
            }
        });

        body
    }

    fn extract_user_query(&self, body: &Value) -> Result<String> {
        let Some(messages) = body.get("messages").and_then(Value::as_array) else {
            return Ok(String::new());
        };

        Ok(messages
            .iter()
            .rev()
            .find(|m| m.get("role").and_then(Value::as_str) == Some("user"))
            .map(|m| extract_text(m.get("content").unwrap_or(&Value::Null)))
            .unwrap_or_default())
    }

    /// Native Ollama counts come back as flat `prompt_eval_count`/
    /// `eval_count` fields; proxies fronting Ollama with an
    /// OpenAI-compatible endpoint instead send a nested `usage` block,
    /// so a zero native count falls through to that shape.
    fn extract_usage(&self, response_body: &Value) -> Result<UsageInfo> {
        let input_tokens = response_body.get("prompt_eval_count").and_then(Value::as_u64).unwrap_or(0);
        let output_tokens = response_body.get("eval_count").and_then(Value::as_u64).unwrap_or(0);

        if input_tokens == 0 && output_tokens == 0 {
            if let Some(usage) = response_body.get("usage") {
                let input_tokens = usage.get("prompt_tokens").and_then(Value::as_u64).unwrap_or(0);
                let output_tokens = usage.get("completion_tokens").and_then(Value::as_u64).unwrap_or(0);
                return Ok(UsageInfo {
                    input_tokens,
                    output_tokens,
                    total_tokens: input_tokens + output_tokens,
                });
            }
        }

        Ok(UsageInfo {
            input_tokens,
            output_tokens,
            total_tokens: input_tokens + output_tokens,
        })
    }

    fn extract_model(&self, request_body: &Value) -> Result<String> {
        let model = request_body.get("model").and_then(Value::as_str).unwrap_or_default();
        Ok(crate::json::strip_model_prefix(model).to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn adapter() -> OllamaAdapter {
        OllamaAdapter
    }

    fn sample_body() -> Value {
        json!({
            "model": "llama3.1",
            "messages": [
                {"role": "user", "content": "list files"},
                {"role": "assistant", "content": "", "tool_calls": [
                    {"function": {"name": "ls", "arguments": {}}}
                ]},
                {"role": "tool", "content": "a.txt\nb.txt"}
            ],
            "tools": [
                {"type": "function", "function": {"name": "ls", "description": "list directory contents"}}
            ]
        })
    }

    #[test]
    fn extracts_tool_result_by_position_and_resolves_name() {
        let results = adapter().extract_tool_output(&sample_body()).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].content, "a.txt\nb.txt");
        assert_eq!(results[0].tool_name.as_deref(), Some("ls"));
    }

    #[test]
    fn apply_rewrites_tool_message_content() {
        let body = sample_body();
        let extracted = adapter().extract_tool_output(&body).unwrap();
        let results = vec![CompressedResult { id: extracted[0].id.clone(), compressed: "2 files".into(), keep: true }];
        let applied = adapter().apply_tool_output(&body, &results);
        let re = adapter().extract_tool_output(&applied).unwrap();
        assert_eq!(re[0].content, "2 files");
    }

    #[test]
    fn extract_user_query_finds_last_user_turn() {
        assert_eq!(adapter().extract_user_query(&sample_body()).unwrap(), "list files");
    }

    #[test]
    fn extract_usage_reads_flat_eval_counts() {
        let response = json!({"prompt_eval_count": 10, "eval_count": 4});
        let usage = adapter().extract_usage(&response).unwrap();
        assert_eq!(usage.input_tokens, 10);
        assert_eq!(usage.output_tokens, 4);
        assert_eq!(usage.total_tokens, 14);
    }

    #[test]
    fn extract_usage_falls_through_to_openai_shape_when_native_counts_are_zero() {
        let response = json!({"usage": {"prompt_tokens": 7, "completion_tokens": 2}});
        let usage = adapter().extract_usage(&response).unwrap();
        assert_eq!(usage.input_tokens, 7);
        assert_eq!(usage.output_tokens, 2);
        assert_eq!(usage.total_tokens, 9);
    }
}
