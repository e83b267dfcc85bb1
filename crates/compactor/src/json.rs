//! Small accessors over `serde_json::Value` trees.
//!
//! Adapters never assume a fixed schema: the same position in a payload
//! might hold an object, an array, or a bare string depending on which
//! provider and which SDK version produced it. Rather than modeling
//! every provider with its own strongly-typed struct (which would
//! reject forward-compatible fields the providers add), adapters parse
//! into a generic `Value` tree and pick fields out with these helpers.

use serde_json::Value;

/// Text content at a message/content-block position, handling the three
/// shapes providers use: a bare string, an array of `{type, text}`
/// blocks, or a tool-result object.
///
/// For arrays, concatenates every block's `text` field (or, for
/// `tool_result` blocks, the nested content) with newlines. For an
/// object with exactly one of the conventional keys (`result`,
/// `content`, `output`) holding a string, returns that string;
/// otherwise falls back to the object's JSON serialization.
pub fn extract_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Array(blocks) => blocks
            .iter()
            .filter_map(extract_block_text)
            .collect::<Vec<_>>()
            .join("\n"),
        Value::Object(_) => extract_object_text(value),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

fn extract_block_text(block: &Value) -> Option<String> {
    if let Some(s) = block.as_str() {
        return Some(s.to_string());
    }

    let block_type = block.get("type").and_then(Value::as_str);

    match block_type {
        Some("text") => block.get("text").and_then(Value::as_str).map(str::to_string),
        Some("tool_result") => block.get("content").map(extract_text),
        _ => block.get("text").and_then(Value::as_str).map(str::to_string),
    }
}

/// Single-lone-key extraction used by the Gemini `functionResponse`
/// shape: `{"result": "..."}` yields `"..."`, but `{"foo": 1, "bar": 2}`
/// falls back to its own serialization.
fn extract_object_text(value: &Value) -> String {
    const CONVENTIONAL_KEYS: [&str; 3] = ["result", "content", "output"];

    if let Value::Object(map) = value
        && map.len() == 1
        && let Some((key, val)) = map.iter().next()
        && CONVENTIONAL_KEYS.contains(&key.as_str())
        && let Some(s) = val.as_str()
    {
        return s.to_string();
    }

    value.to_string()
}

/// Strips a leading `provider/` or `models/` prefix from a model id.
pub fn strip_model_prefix(model: &str) -> &str {
    for prefix in ["models/", "anthropic/", "openai/", "google/", "bedrock/", "ollama/"] {
        if let Some(stripped) = model.strip_prefix(prefix) {
            return stripped;
        }
    }

    model
}

/// Truncates a string to at most `max_chars` Unicode scalar values,
/// appending an ellipsis marker when truncated.
pub fn truncate_chars(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        return s.to_string();
    }

    let mut truncated: String = s.chars().take(max_chars).collect();
    truncated.push_str("...");
    truncated
}

/// Byte-length token-count heuristic shared by the orchestrator and the
/// summarizer: no tokenizer is used anywhere in this crate.
pub fn estimate_tokens(bytes_len: usize, ratio: u32) -> u64 {
    let ratio = ratio.max(1) as u64;
    (bytes_len as u64) / ratio
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extracts_plain_string() {
        assert_eq!(extract_text(&json!("hello")), "hello");
    }

    #[test]
    fn extracts_text_blocks() {
        let value = json!([{"type": "text", "text": "a"}, {"type": "text", "text": "b"}]);
        assert_eq!(extract_text(&value), "a\nb");
    }

    #[test]
    fn extracts_lone_conventional_key() {
        assert_eq!(extract_text(&json!({"result": "42"})), "42");
        assert_eq!(extract_text(&json!({"content": "ok"})), "ok");
    }

    #[test]
    fn falls_back_to_serialization_for_multi_key_object() {
        let value = json!({"a": 1, "b": 2});
        assert_eq!(extract_text(&value), value.to_string());
    }

    #[test]
    fn strips_known_prefixes() {
        assert_eq!(strip_model_prefix("models/gemini-1.5-pro"), "gemini-1.5-pro");
        assert_eq!(strip_model_prefix("anthropic/claude-3-opus"), "claude-3-opus");
        assert_eq!(strip_model_prefix("gpt-4o"), "gpt-4o");
    }

    #[test]
    fn truncates_long_strings() {
        let s = "a".repeat(10);
        assert_eq!(truncate_chars(&s, 5), "aaaaa...");
        assert_eq!(truncate_chars("short", 10), "short");
    }
}
