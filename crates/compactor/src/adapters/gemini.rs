//! Gemini adapter. Gemini's `functionResponse` parts carry no stable
//! id at all, so the correlation id is positional: `"{message_index}_{part_index}"`.

use std::collections::HashMap;

use serde_json::{Value, json};

use crate::error::Result;
use crate::json::extract_text;
use crate::types::{CompressedResult, ContentType, ExtractedContent, ProviderKind, UsageInfo};

use super::{Adapter, DiscoveryOptions, find_result};

pub struct GeminiAdapter;

impl Adapter for GeminiAdapter {
    fn name(&self) -> &'static str {
        "gemini"
    }

    fn provider(&self) -> ProviderKind {
        ProviderKind::Gemini
    }

    fn extract_tool_output(&self, body: &Value) -> Result<Vec<ExtractedContent>> {
        let Some(contents) = body.get("contents").and_then(Value::as_array) else {
            return Ok(Vec::new());
        };

        let mut out = Vec::new();

        for (message_index, content) in contents.iter().enumerate() {
            let Some(parts) = content.get("parts").and_then(Value::as_array) else {
                continue;
            };

            for (block_index, part) in parts.iter().enumerate() {
                let Some(response) = part.get("functionResponse") else {
                    continue;
                };

                let name = response.get("name").and_then(Value::as_str).unwrap_or_default();

                out.push(ExtractedContent {
                    id: format!("{message_index}_{block_index}"),
                    content: extract_text(response.get("response").unwrap_or(&Value::Null)),
                    content_type: ContentType::ToolResult,
                    tool_name: (!name.is_empty()).then(|| name.to_string()),
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

        let Some(contents) = body.get_mut("contents").and_then(Value::as_array_mut) else {
            return body;
        };

        for (message_index, content) in contents.iter_mut().enumerate() {
            let Some(parts) = content.get_mut("parts").and_then(Value::as_array_mut) else {
                continue;
            };

            for (block_index, part) in parts.iter_mut().enumerate() {
                let Some(response) = part.get_mut("functionResponse") else {
                    continue;
                };

                let id = format!("{message_index}_{block_index}");

                if let Some(result) = find_result(results, &id)
                    && let Some(obj) = response.as_object_mut()
                {
                    obj.insert("response".to_string(), json!({"result": result.compressed}));
                }
            }
        }

        body
    }

    fn extract_tool_discovery(&self, body: &Value, opts: &DiscoveryOptions) -> Result<Vec<ExtractedContent>> {
        let declarations = declarations(body);
        let limit = opts.max_definitions.unwrap_or(declarations.len());

        let out = declarations
            .into_iter()
            .take(limit)
            .enumerate()
            .filter_map(|(block_index, decl)| {
                let name = decl.get("name").and_then(Value::as_str)?;

                Some(ExtractedContent {
                    id: name.to_string(),
                    content: decl
                        .get("description")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .unwrap_or_else(|| decl.to_string()),
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

        for tool in tools.iter_mut() {
            let Some(decls) = tool.get_mut("functionDeclarations").and_then(Value::as_array_mut) else {
                continue;
            };

            decls.retain_mut(|decl| {
                let Some(name) = decl.get("name").and_then(Value::as_str).map(str::to_string) else {
                    return true;
                };

                match find_result(results, &name) {
                    Some(result) if !result.keep => false,
                    Some(result) => {
                        if let Some(obj) = decl.as_object_mut() {
                            obj.insert("description".to_string(), Value::String(result.compressed.clone()));
                        }
                        true
                    }
                    None => true,
                }
            });
        }

        body
    }

    fn extract_user_query(&self, body: &Value) -> Result<String> {
        let Some(contents) = body.get("contents").and_then(Value::as_array) else {
            return Ok(String::new());
        };

        let text = contents.iter().rev().find_map(|c| {
            if c.get("role").and_then(Value::as_str) != Some("user") {
                return None;
            }

            let parts = c.get("parts").and_then(Value::as_array)?;
            let has_text_part = parts.iter().any(|p| p.get("text").is_some());
            has_text_part.then(|| {
                parts
                    .iter()
                    .filter_map(|p| p.get("text").and_then(Value::as_str))
                    .collect::<Vec<_>>()
                    .join("\n")
            })
        });

        Ok(text.unwrap_or_default())
    }

    fn extract_usage(&self, response_body: &Value) -> Result<UsageInfo> {
        let Some(usage) = response_body.get("usageMetadata") else {
            return Ok(UsageInfo::default());
        };

        let input_tokens = usage.get("promptTokenCount").and_then(Value::as_u64).unwrap_or(0);
        let output_tokens = usage.get("candidatesTokenCount").and_then(Value::as_u64).unwrap_or(0);
        let total_tokens = usage
            .get("totalTokenCount")
            .and_then(Value::as_u64)
            .unwrap_or(input_tokens + output_tokens);

        Ok(UsageInfo { input_tokens, output_tokens, total_tokens })
    }

    fn extract_model(&self, request_body: &Value) -> Result<String> {
        let model = request_body.get("model").and_then(Value::as_str).unwrap_or_default();
        Ok(crate::json::strip_model_prefix(model).to_string())
    }
}

fn declarations(body: &Value) -> Vec<&Value> {
    let Some(tools) = body.get("tools").and_then(Value::as_array) else {
        return Vec::new();
    };

    tools
        .iter()
        .filter_map(|t| t.get("functionDeclarations").and_then(Value::as_array))
        .flatten()
        .collect()
}

/// Indexes `functionCall` parts by name, mirroring the Anthropic/OpenAI
/// adapters' id-resolution helper even though Gemini's own tool-result
/// matching rarely needs it (kept for symmetry and for callers that
/// want a name -> most-recent-call-index map).
#[allow(dead_code)]
fn index_function_call_names(contents: &[Value]) -> HashMap<String, usize> {
    let mut names = HashMap::new();

    for (index, content) in contents.iter().enumerate() {
        let Some(parts) = content.get("parts").and_then(Value::as_array) else {
            continue;
        };

        for part in parts {
            if let Some(name) = part.get("functionCall").and_then(|c| c.get("name")).and_then(Value::as_str) {
                names.insert(name.to_string(), index);
            }
        }
    }

    names
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn adapter() -> GeminiAdapter {
        GeminiAdapter
    }

    fn sample_body() -> Value {
        json!({
            "model": "gemini-1.5-pro",
            "contents": [
                {"role": "user", "parts": [{"text": "check the weather"}]},
                {"role": "model", "parts": [{"functionCall": {"name": "get_weather", "args": {}}}]},
                {"role": "user", "parts": [{"functionResponse": {"name": "get_weather", "response": {"result": "sunny"}}}]}
            ],
            "tools": [
                {"functionDeclarations": [{"name": "get_weather", "description": "gets current weather"}]}
            ]
        })
    }

    #[test]
    fn extracts_function_response_with_positional_id() {
        let results = adapter().extract_tool_output(&sample_body()).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, "2_0");
        assert_eq!(results[0].tool_name.as_deref(), Some("get_weather"));
        assert_eq!(results[0].content, "sunny");
    }

    #[test]
    fn apply_rewrites_function_response() {
        let body = sample_body();
        let results = vec![CompressedResult { id: "2_0".into(), compressed: "mild".into(), keep: true }];
        let applied = adapter().apply_tool_output(&body, &results);
        let re = adapter().extract_tool_output(&applied).unwrap();
        assert_eq!(re[0].content, "mild");
    }

    #[test]
    fn extract_user_query_skips_function_response_turns() {
        assert_eq!(adapter().extract_user_query(&sample_body()).unwrap(), "check the weather");
    }

    #[test]
    fn discovery_drops_definition_on_keep_false() {
        let body = sample_body();
        let results = vec![CompressedResult { id: "get_weather".into(), compressed: String::new(), keep: false }];
        let applied = adapter().apply_tool_discovery(&body, &results);
        assert!(applied["tools"][0]["functionDeclarations"].as_array().unwrap().is_empty());
    }
}
