//! Compaction-phrase detector: recognizes a client's "summarize now"
//! turn from the text of its last user message.

use config::DetectorsConfig;
use serde_json::Value;

use crate::json::extract_text;
use crate::types::DetectionResult;

/// Stateless detector configured with one or more phrase lists.
///
/// Detection never looks past the last user message: the signal this
/// hunts for is "the agent has just asked us to summarize now", not
/// "the conversation has ever mentioned summarizing".
pub struct CompactionDetector {
    config: DetectorsConfig,
}

impl CompactionDetector {
    pub fn new(config: DetectorsConfig) -> Self {
        Self { config }
    }

    /// Inspects `body` (a parsed `{"messages": [...]}` document) and
    /// `headers` for a compaction request. Malformed bodies and bodies
    /// with no user message both return a zero result, not an error —
    /// detection failure is informational, never fatal.
    pub fn detect(&self, body: &Value, headers: &[(String, String)]) -> DetectionResult {
        if let Some(result) = self.detect_from_headers(headers) {
            return result;
        }

        let Some(last_user_text) = last_user_message_text(body) else {
            return DetectionResult::none();
        };

        let lowered = last_user_text.to_lowercase();

        for detector in [&self.config.claude_code, &self.config.codex, &self.config.generic] {
            if !detector.enabled {
                continue;
            }

            for pattern in &detector.prompt_patterns {
                if lowered.contains(&pattern.to_lowercase()) {
                    return DetectionResult {
                        is_compaction: true,
                        detected_by: Some(detector.detected_by.clone()),
                        confidence: detector.confidence,
                        details: Some(format!("matched pattern {pattern:?}")),
                    };
                }
            }
        }

        DetectionResult::none()
    }

    fn detect_from_headers(&self, headers: &[(String, String)]) -> Option<DetectionResult> {
        for detector in [&self.config.claude_code, &self.config.codex, &self.config.generic] {
            if !detector.enabled {
                continue;
            }

            let (Some(name), Some(expected)) = (&detector.header_name, &detector.header_value) else {
                continue;
            };

            let matched = headers
                .iter()
                .any(|(k, v)| k.eq_ignore_ascii_case(name) && v.eq_ignore_ascii_case(expected));

            if matched {
                return Some(DetectionResult {
                    is_compaction: true,
                    detected_by: Some(detector.detected_by.clone()),
                    confidence: detector.confidence,
                    details: Some(format!("matched header {name}")),
                });
            }
        }

        None
    }
}

/// Walks `messages` backward to the first `role: "user"` entry and
/// returns its flattened text, or `None` if the body is malformed or
/// has no user message.
fn last_user_message_text(body: &Value) -> Option<String> {
    let messages = body.get("messages")?.as_array()?;

    messages
        .iter()
        .rev()
        .find(|m| m.get("role").and_then(Value::as_str) == Some("user"))
        .map(|m| extract_text(m.get("content").unwrap_or(&Value::Null)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn detector() -> CompactionDetector {
        CompactionDetector::new(DetectorsConfig::default())
    }

    #[test]
    fn matches_claude_code_phrase_case_insensitively() {
        let body = json!({"messages": [
            {"role": "user", "content": "earlier turn"},
            {"role": "assistant", "content": "ok"},
            {"role": "user", "content": "YOUR TASK IS TO CREATE A DETAILED SUMMARY of the conversation so far, please."}
        ]});

        let result = detector().detect(&body, &[]);
        assert!(result.is_compaction);
        assert_eq!(result.detected_by.as_deref(), Some("claude_code_prompt"));
        assert_eq!(result.confidence, 0.95);
    }

    #[test]
    fn only_inspects_last_user_message() {
        let body = json!({"messages": [
            {"role": "user", "content": "your task is to create a detailed summary of the conversation so far"},
            {"role": "assistant", "content": "ok"},
            {"role": "user", "content": "just a normal follow-up"}
        ]});

        assert!(!detector().detect(&body, &[]).is_compaction);
    }

    #[test]
    fn malformed_body_returns_zero_result() {
        let body = json!({"not_messages": true});
        let result = detector().detect(&body, &[]);
        assert!(!result.is_compaction);
        assert_eq!(result.confidence, 0.0);
    }

    #[test]
    fn header_override_short_circuits_phrase_matching() {
        let mut config = DetectorsConfig::default();
        config.generic.enabled = true;

        let det = CompactionDetector::new(config);
        let body = json!({"messages": [{"role": "user", "content": "anything"}]});
        let headers = vec![("X-Request-Compaction".to_string(), "true".to_string())];

        let result = det.detect(&body, &headers);
        assert!(result.is_compaction);
        assert_eq!(result.detected_by.as_deref(), Some("generic_prompt"));
    }
}
