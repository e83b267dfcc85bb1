//! Compaction-detector configuration: phrase lists used to recognize a
//! client-initiated "please summarize" turn for a given agent family.

use serde::Deserialize;

/// A single detector: a list of lowercase phrases, the label and confidence
/// to report when one matches, plus an optional header override.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DetectorConfig {
    /// Whether this detector participates in compaction detection.
    pub enabled: bool,
    /// Lowercase substrings matched against the last user message.
    pub prompt_patterns: Vec<String>,
    /// Value reported in `DetectionResult::detected_by` on a match.
    pub detected_by: String,
    /// Confidence reported alongside `detected_by`.
    pub confidence: f64,
    /// Optional request header name that, when present with `header_value`,
    /// flags the request as a compaction request regardless of phrasing.
    pub header_name: Option<String>,
    /// Expected value for `header_name`.
    pub header_value: Option<String>,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            prompt_patterns: Vec::new(),
            detected_by: "generic_prompt".to_string(),
            confidence: 0.5,
            header_name: None,
            header_value: None,
        }
    }
}

/// Detectors recognized out of the box, one per known agent CLI plus a
/// catch-all generic detector driven purely by header.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DetectorsConfig {
    /// Claude Code's own compaction prompt.
    pub claude_code: DetectorConfig,
    /// Codex CLI's compaction prompt (OpenAI Responses API shaped).
    pub codex: DetectorConfig,
    /// Operator-supplied phrases or header for any other client.
    pub generic: DetectorConfig,
}

impl Default for DetectorsConfig {
    fn default() -> Self {
        Self {
            claude_code: DetectorConfig {
                enabled: true,
                prompt_patterns: vec![
                    "your task is to create a detailed summary of the conversation so far".to_string(),
                ],
                detected_by: "claude_code_prompt".to_string(),
                confidence: 0.95,
                header_name: None,
                header_value: None,
            },
            codex: DetectorConfig {
                enabled: true,
                prompt_patterns: vec!["start summarizing the conversation".to_string()],
                detected_by: "openai_prompt".to_string(),
                confidence: 0.70,
                header_name: None,
                header_value: None,
            },
            generic: DetectorConfig {
                enabled: false,
                prompt_patterns: Vec::new(),
                detected_by: "generic_prompt".to_string(),
                confidence: 0.5,
                header_name: Some("X-Request-Compaction".to_string()),
                header_value: Some("true".to_string()),
            },
        }
    }
}
