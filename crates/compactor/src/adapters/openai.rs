//! OpenAI adapter. Handles both wire shapes OpenAI ships under the
//! `openai` provider id: Chat Completions (`messages` + `tool_calls`)
//! and the newer Responses API (`input` + `function_call`/
//! `function_call_output` items). Which one a body uses is detected
//! structurally, not from a header.

use std::collections::HashMap;

use serde_json::Value;

use crate::error::Result;
use crate::json::extract_text;
use crate::types::{CompressedResult, ContentType, ExtractedContent, ProviderKind, UsageInfo};

use super::{Adapter, DiscoveryOptions, find_result};

pub struct OpenaiAdapter;

/// Chat Completions puts turns under `messages`; Responses puts items
/// under `input`. A body is never both.
fn items<'a>(body: &'a Value) -> Option<(&'a str, &'a Vec<Value>)> {
    if let Some(arr) = body.get("messages").and_then(Value::as_array) {
        return Some(("messages", arr));
    }
    if let Some(arr) = body.get("input").and_then(Value::as_array) {
        return Some(("input", arr));
    }
    None
}

impl Adapter for OpenaiAdapter {
    fn name(&self) -> &'static str {
        "openai"
    }

    fn provider(&self) -> ProviderKind {
        ProviderKind::Openai
    }

    fn extract_tool_output(&self, body: &Value) -> Result<Vec<ExtractedContent>> {
        let Some((kind, list)) = items(body) else {
            return Ok(Vec::new());
        };

        let mut out = Vec::new();

        if kind == "messages" {
            let tool_names = index_tool_call_names(list);

            for (message_index, message) in list.iter().enumerate() {
                if message.get("role").and_then(Value::as_str) != Some("tool") {
                    continue;
                }

                let Some(id) = message.get("tool_call_id").and_then(Value::as_str) else {
                    continue;
                };

                out.push(ExtractedContent {
                    id: id.to_string(),
                    content: extract_text(message.get("content").unwrap_or(&Value::Null)),
                    content_type: ContentType::ToolResult,
                    tool_name: tool_names.get(id).cloned(),
                    message_index,
                    block_index: 0,
                });
            }
        } else {
            let call_names = index_function_call_names(list);

            for (message_index, item) in list.iter().enumerate() {
                if item.get("type").and_then(Value::as_str) != Some("function_call_output") {
                    continue;
                }

                let Some(id) = item.get("call_id").and_then(Value::as_str) else {
                    continue;
                };

                out.push(ExtractedContent {
                    id: id.to_string(),
                    content: extract_text(item.get("output").unwrap_or(&Value::Null)),
                    content_type: ContentType::ToolResult,
                    tool_name: call_names.get(id).cloned(),
                    message_index,
                    block_index: 0,
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

        if let Some(messages) = body.get_mut("messages").and_then(Value::as_array_mut) {
            for message in messages.iter_mut() {
                if message.get("role").and_then(Value::as_str) != Some("tool") {
                    continue;
                }

                let Some(id) = message.get("tool_call_id").and_then(Value::as_str).map(str::to_string) else {
                    continue;
                };

                if let Some(result) = find_result(results, &id)
                    && let Some(obj) = message.as_object_mut()
                {
                    obj.insert("content".to_string(), Value::String(result.compressed.clone()));
                }
            }
        } else if let Some(input) = body.get_mut("input").and_then(Value::as_array_mut) {
            for item in input.iter_mut() {
                if item.get("type").and_then(Value::as_str) != Some("function_call_output") {
                    continue;
                }

                let Some(id) = item.get("call_id").and_then(Value::as_str).map(str::to_string) else {
                    continue;
                };

                if let Some(result) = find_result(results, &id)
                    && let Some(obj) = item.as_object_mut()
                {
                    obj.insert("output".to_string(), Value::String(result.compressed.clone()));
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
                let (name, description) = function_fields(tool)?;

                Some(ExtractedContent {
                    id: name.clone(),
                    content: description.unwrap_or_else(|| tool.to_string()),
                    content_type: ContentType::ToolDef,
                    tool_name: Some(name),
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
            let Some((name, _)) = function_fields(tool) else {
                return true;
            };

            match find_result(results, &name) {
                Some(result) if !result.keep => false,
                Some(result) => {
                    set_description(tool, &result.compressed);
                    true
                }
                None => true,
            }
        });

        body
    }

    fn extract_user_query(&self, body: &Value) -> Result<String> {
        let Some((kind, list)) = items(body) else {
            return Ok(String::new());
        };

        let text = if kind == "messages" {
            list.iter()
                .rev()
                .find(|m| m.get("role").and_then(Value::as_str) == Some("user"))
                .map(|m| extract_text(m.get("content").unwrap_or(&Value::Null)))
        } else {
            list.iter()
                .rev()
                .find(|m| {
                    m.get("type").and_then(Value::as_str).unwrap_or("message") == "message"
                        && m.get("role").and_then(Value::as_str) == Some("user")
                })
                .map(|m| extract_text(m.get("content").unwrap_or(&Value::Null)))
        };

        Ok(text.unwrap_or_default())
    }

    fn extract_usage(&self, response_body: &Value) -> Result<UsageInfo> {
        let Some(usage) = response_body.get("usage") else {
            return Ok(UsageInfo::default());
        };

        let input_tokens = usage
            .get("prompt_tokens")
            .or_else(|| usage.get("input_tokens"))
            .and_then(Value::as_u64)
            .unwrap_or(0);
        let output_tokens = usage
            .get("completion_tokens")
            .or_else(|| usage.get("output_tokens"))
            .and_then(Value::as_u64)
            .unwrap_or(0);

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

fn index_tool_call_names(messages: &[Value]) -> HashMap<String, String> {
    let mut names = HashMap::new();

    for message in messages {
        let Some(calls) = message.get("tool_calls").and_then(Value::as_array) else {
            continue;
        };

        for call in calls {
            if let (Some(id), Some(name)) = (
                call.get("id").and_then(Value::as_str),
                call.get("function").and_then(|f| f.get("name")).and_then(Value::as_str),
            ) {
                names.insert(id.to_string(), name.to_string());
            }
        }
    }

    names
}

fn index_function_call_names(input: &[Value]) -> HashMap<String, String> {
    input
        .iter()
        .filter(|item| item.get("type").and_then(Value::as_str) == Some("function_call"))
        .filter_map(|item| {
            let id = item.get("call_id").and_then(Value::as_str)?;
            let name = item.get("name").and_then(Value::as_str)?;
            Some((id.to_string(), name.to_string()))
        })
        .collect()
}

/// Reads `(name, description)` from either the Chat Completions nested
/// `{type, function: {name, description}}` shape or the Responses flat
/// `{type, name, description}` shape.
fn function_fields(tool: &Value) -> Option<(String, Option<String>)> {
    if let Some(function) = tool.get("function") {
        let name = function.get("name").and_then(Value::as_str)?.to_string();
        let description = function.get("description").and_then(Value::as_str).map(str::to_string);
        return Some((name, description));
    }

    let name = tool.get("name").and_then(Value::as_str)?.to_string();
    let description = tool.get("description").and_then(Value::as_str).map(str::to_string);
    Some((name, description))
}

fn set_description(tool: &mut Value, description: &str) {
    if let Some(function) = tool.get_mut("function").and_then(Value::as_object_mut) {
        function.insert("description".to_string(), Value::String(description.to_string()));
    } else if let Some(obj) = tool.as_object_mut() {
        obj.insert("description".to_string(), Value::String(description.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn adapter() -> OpenaiAdapter {
        OpenaiAdapter
    }

    fn chat_body() -> Value {
        json!({
            "model": "gpt-4o",
            "messages": [
                {"role": "user", "content": "what's the weather"},
                {"role": "assistant", "content": null, "tool_calls": [
                    {"id": "call_1", "type": "function", "function": {"name": "get_weather", "arguments": "{}"}}
                ]},
                {"role": "tool", "tool_call_id": "call_1", "content": "72F and sunny"}
            ],
            "tools": [
                {"type": "function", "function": {"name": "get_weather", "description": "gets current weather", "parameters": {}}}
            ]
        })
    }

    fn responses_body() -> Value {
        json!({
            "model": "gpt-4.1",
            "input": [
                {"type": "message", "role": "user", "content": "what's the weather"},
                {"type": "function_call", "call_id": "call_1", "name": "get_weather", "arguments": "{}"},
                {"type": "function_call_output", "call_id": "call_1", "output": "72F and sunny"}
            ],
            "tools": [
                {"type": "function", "name": "get_weather", "description": "gets current weather", "parameters": {}}
            ]
        })
    }

    #[test]
    fn extracts_tool_result_from_chat_completions() {
        let results = adapter().extract_tool_output(&chat_body()).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].content, "72F and sunny");
        assert_eq!(results[0].tool_name.as_deref(), Some("get_weather"));
    }

    #[test]
    fn extracts_tool_result_from_responses_api() {
        let results = adapter().extract_tool_output(&responses_body()).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].content, "72F and sunny");
        assert_eq!(results[0].tool_name.as_deref(), Some("get_weather"));
    }

    #[test]
    fn apply_rewrites_chat_completions_tool_content() {
        let body = chat_body();
        let results = vec![CompressedResult { id: "call_1".into(), compressed: "mild".into(), keep: true }];
        let applied = adapter().apply_tool_output(&body, &results);
        let re = adapter().extract_tool_output(&applied).unwrap();
        assert_eq!(re[0].content, "mild");
    }

    #[test]
    fn apply_rewrites_responses_api_output() {
        let body = responses_body();
        let results = vec![CompressedResult { id: "call_1".into(), compressed: "mild".into(), keep: true }];
        let applied = adapter().apply_tool_output(&body, &results);
        let re = adapter().extract_tool_output(&applied).unwrap();
        assert_eq!(re[0].content, "mild");
    }

    #[test]
    fn extracts_user_query_both_shapes() {
        assert_eq!(adapter().extract_user_query(&chat_body()).unwrap(), "what's the weather");
        assert_eq!(adapter().extract_user_query(&responses_body()).unwrap(), "what's the weather");
    }

    #[test]
    fn discovery_reads_nested_and_flat_tool_shapes() {
        let chat = adapter().extract_tool_discovery(&chat_body(), &DiscoveryOptions::default()).unwrap();
        let responses = adapter().extract_tool_discovery(&responses_body(), &DiscoveryOptions::default()).unwrap();
        assert_eq!(chat[0].content, "gets current weather");
        assert_eq!(responses[0].content, "gets current weather");
    }
}
