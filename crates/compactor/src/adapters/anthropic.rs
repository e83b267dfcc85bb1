//! Anthropic Messages API adapter. Bedrock delegates to this one
//! directly (see [`super::bedrock`]).

use std::collections::HashMap;

use serde_json::{Value, json};

use crate::error::Result;
use crate::json::extract_text;
use crate::types::{CompressedResult, ContentType, ExtractedContent, ProviderKind, UsageInfo};

use super::{Adapter, DiscoveryOptions, find_result};

pub struct AnthropicAdapter;

impl Adapter for AnthropicAdapter {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    fn provider(&self) -> ProviderKind {
        ProviderKind::Anthropic
    }

    fn extract_tool_output(&self, body: &Value) -> Result<Vec<ExtractedContent>> {
        let Some(messages) = body.get("messages").and_then(Value::as_array) else {
            return Ok(Vec::new());
        };

        let tool_names = index_tool_names(messages);
        let mut out = Vec::new();

        for (message_index, message) in messages.iter().enumerate() {
            if message.get("role").and_then(Value::as_str) != Some("user") {
                continue;
            }

            let Some(blocks) = message.get("content").and_then(Value::as_array) else {
                continue;
            };

            for (block_index, block) in blocks.iter().enumerate() {
                if block.get("type").and_then(Value::as_str) != Some("tool_result") {
                    continue;
                }

                let Some(id) = block.get("tool_use_id").and_then(Value::as_str) else {
                    continue;
                };

                out.push(ExtractedContent {
                    id: id.to_string(),
                    content: extract_text(block.get("content").unwrap_or(&Value::Null)),
                    content_type: ContentType::ToolResult,
                    tool_name: tool_names.get(id).cloned(),
                    message_index,
                    block_index,
                });
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

        for message in messages.iter_mut() {
            if message.get("role").and_then(Value::as_str) != Some("user") {
                continue;
            }

            let Some(blocks) = message.get_mut("content").and_then(Value::as_array_mut) else {
                continue;
            };

            for block in blocks.iter_mut() {
                if block.get("type").and_then(Value::as_str) != Some("tool_result") {
                    continue;
                }

                let Some(id) = block.get("tool_use_id").and_then(Value::as_str).map(str::to_string) else {
                    continue;
                };

                if let Some(result) = find_result(results, &id)
                    && let Some(obj) = block.as_object_mut()
                {
                    obj.insert("content".to_string(), Value::String(result.compressed.clone()));
                }
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
                let name = tool.get("name").and_then(Value::as_str)?;

                Some(ExtractedContent {
                    id: name.to_string(),
                    content: tool
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
            let Some(name) = tool.get("name").and_then(Value::as_str).map(str::to_string) else {
                return true;
            };

            match find_result(results, &name) {
                Some(result) if !result.keep => false,
                Some(result) => {
                    if let Some(obj) = tool.as_object_mut() {
                        obj.insert("description".to_string(), Value::String(result.compressed.clone()));
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

    fn extract_usage(&self, response_body: &Value) -> Result<UsageInfo> {
        let usage = response_body.get("usage");
        let input_tokens = usage.and_then(|u| u.get("input_tokens")).and_then(Value::as_u64).unwrap_or(0);
        let output_tokens = usage.and_then(|u| u.get("output_tokens")).and_then(Value::as_u64).unwrap_or(0);

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

/// Scans assistant/model turns for `tool_use` blocks and indexes
/// `tool_use_id -> name`, so a later `tool_result` block (which only
/// carries the id) can be labeled with the tool that produced it.
fn index_tool_names(messages: &[Value]) -> HashMap<String, String> {
    let mut names = HashMap::new();

    for message in messages {
        if message.get("role").and_then(Value::as_str) != Some("assistant") {
            continue;
        }

        let Some(blocks) = message.get("content").and_then(Value::as_array) else {
            continue;
        };

        for block in blocks {
            if block.get("type").and_then(Value::as_str) != Some("tool_use") {
                continue;
            }

            if let (Some(id), Some(name)) = (
                block.get("id").and_then(Value::as_str),
                block.get("name").and_then(Value::as_str),
            ) {
                names.insert(id.to_string(), name.to_string());
            }
        }
    }

    names
}

/// Builds an Anthropic-shaped tool-result content block, used by the
/// synthetic-response builders that need to hand one back to a caller.
pub(crate) fn tool_result_block(tool_use_id: &str, content: &str) -> Value {
    json!({"type": "tool_result", "tool_use_id": tool_use_id, "content": content})
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn adapter() -> AnthropicAdapter {
        AnthropicAdapter
    }

    fn sample_body() -> Value {
        json!({
            "model": "claude-3-5-sonnet-20241022",
            "messages": [
                {"role": "user", "content": "list files"},
                {"role": "assistant", "content": [
                    {"type": "tool_use", "id": "toolu_1", "name": "ls", "input": {}}
                ]},
                {"role": "user", "content": [
                    {"type": "tool_result", "tool_use_id": "toolu_1", "content": "a.txt\nb.txt"}
                ]},
            ],
            "tools": [
                {"name": "ls", "description": "list directory contents", "input_schema": {}}
            ]
        })
    }

    #[test]
    fn extracts_tool_result_with_resolved_name() {
        let results = adapter().extract_tool_output(&sample_body()).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "toolu_1");
        assert_eq!(results[0].content, "a.txt\nb.txt");
        assert_eq!(results[0].tool_name.as_deref(), Some("ls"));
    }

    #[test]
    fn apply_tool_output_round_trips_content() {
        let body = sample_body();
        let extracted = adapter().extract_tool_output(&body).unwrap();
        let compressed: Vec<_> = extracted
            .iter()
            .map(|e| CompressedResult { id: e.id.clone(), compressed: "<1 file omitted>".into(), keep: true })
            .collect();

        let applied = adapter().apply_tool_output(&body, &compressed);
        let re_extracted = adapter().extract_tool_output(&applied).unwrap();

        assert_eq!(re_extracted[0].id, extracted[0].id);
        assert_eq!(re_extracted[0].content, "<1 file omitted>");
    }

    #[test]
    fn apply_with_empty_results_is_identity() {
        let body = sample_body();
        assert_eq!(adapter().apply_tool_output(&body, &[]), body);
    }

    #[test]
    fn extract_user_query_walks_backward() {
        let body = sample_body();
        assert_eq!(adapter().extract_user_query(&body).unwrap(), "list files");
    }

    #[test]
    fn extract_model_strips_prefix() {
        let body = json!({"model": "anthropic/claude-3-opus-20240229"});
        assert_eq!(adapter().extract_model(&body).unwrap(), "claude-3-opus-20240229");
    }

    #[test]
    fn tool_discovery_drop_removes_definition() {
        let body = sample_body();
        let results = vec![CompressedResult { id: "ls".into(), compressed: String::new(), keep: false }];
        let applied = adapter().apply_tool_discovery(&body, &results);
        assert!(applied["tools"].as_array().unwrap().is_empty());
    }

    #[test]
    fn tool_discovery_keep_all_preserves_order_and_length() {
        let body = sample_body();
        let extracted = adapter().extract_tool_discovery(&body, &DiscoveryOptions::default()).unwrap();
        let results: Vec<_> = extracted
            .iter()
            .map(|e| CompressedResult { id: e.id.clone(), compressed: e.content.clone(), keep: true })
            .collect();

        let applied = adapter().apply_tool_discovery(&body, &results);
        let original_tools = body["tools"].as_array().unwrap();
        let applied_tools = applied["tools"].as_array().unwrap();
        assert_eq!(original_tools.len(), applied_tools.len());
    }
}
