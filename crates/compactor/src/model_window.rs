//! Built-in table of context-window sizes, keyed by model family prefix.

use crate::types::ModelContextWindow;

const DEFAULT_MAX_TOKENS: u64 = 128_000;
const DEFAULT_OUTPUT_MAX: u64 = 4_096;

struct WindowEntry {
    prefix: &'static str,
    max_tokens: u64,
    output_max: u64,
}

// Ordered longest-prefix-first so e.g. "claude-3-5-sonnet" doesn't match
// the generic "claude-3" entry before the more specific one.
const TABLE: &[WindowEntry] = &[
    WindowEntry { prefix: "claude-opus-4", max_tokens: 200_000, output_max: 32_000 },
    WindowEntry { prefix: "claude-sonnet-4", max_tokens: 200_000, output_max: 64_000 },
    WindowEntry { prefix: "claude-haiku-4", max_tokens: 200_000, output_max: 64_000 },
    WindowEntry { prefix: "claude-3-5-sonnet", max_tokens: 200_000, output_max: 8_192 },
    WindowEntry { prefix: "claude-3-5-haiku", max_tokens: 200_000, output_max: 8_192 },
    WindowEntry { prefix: "claude-3-opus", max_tokens: 200_000, output_max: 4_096 },
    WindowEntry { prefix: "claude-3", max_tokens: 200_000, output_max: 4_096 },
    WindowEntry { prefix: "gpt-4o", max_tokens: 128_000, output_max: 16_384 },
    WindowEntry { prefix: "gpt-4-turbo", max_tokens: 128_000, output_max: 4_096 },
    WindowEntry { prefix: "gpt-4", max_tokens: 8_192, output_max: 4_096 },
    WindowEntry { prefix: "gpt-3.5", max_tokens: 16_385, output_max: 4_096 },
    WindowEntry { prefix: "gemini-1.5-pro", max_tokens: 2_097_152, output_max: 8_192 },
    WindowEntry { prefix: "gemini-1.5-flash", max_tokens: 1_048_576, output_max: 8_192 },
    WindowEntry { prefix: "gemini-2", max_tokens: 1_048_576, output_max: 8_192 },
    WindowEntry { prefix: "llama3", max_tokens: 8_192, output_max: 2_048 },
    WindowEntry { prefix: "mixtral", max_tokens: 32_768, output_max: 4_096 },
];

/// Looks up the context window for `model`, falling back to a
/// conservative default when the model isn't recognized or the window
/// would otherwise be non-positive.
pub fn lookup(model: &str, override_max_tokens: Option<u32>) -> ModelContextWindow {
    let stripped = crate::json::strip_model_prefix(model);

    let entry = TABLE
        .iter()
        .filter(|e| stripped.starts_with(e.prefix))
        .max_by_key(|e| e.prefix.len());

    let (max_tokens, output_max) = match entry {
        Some(e) => (e.max_tokens, e.output_max),
        None => (DEFAULT_MAX_TOKENS, DEFAULT_OUTPUT_MAX),
    };

    let max_tokens = match override_max_tokens {
        Some(v) if v > 0 => v as u64,
        _ if max_tokens == 0 => DEFAULT_MAX_TOKENS,
        _ => max_tokens,
    };

    ModelContextWindow {
        model: model.to_string(),
        max_tokens,
        output_max,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn picks_longest_matching_prefix() {
        let window = lookup("claude-3-5-sonnet-20241022", None);
        assert_eq!(window.max_tokens, 200_000);
        assert_eq!(window.output_max, 8_192);
    }

    #[test]
    fn falls_back_to_default_for_unknown_models() {
        let window = lookup("some-future-model-9000", None);
        assert_eq!(window.max_tokens, DEFAULT_MAX_TOKENS);
    }

    #[test]
    fn override_replaces_table_value() {
        let window = lookup("gpt-4o", Some(10_000));
        assert_eq!(window.max_tokens, 10_000);
        // output_max (16_384) still exceeds the overridden window; the
        // input budget saturates at zero rather than underflowing.
        assert_eq!(window.effective_max(), 0);
    }

    #[test]
    fn zero_max_tokens_default_triggers_fallback() {
        assert_eq!(lookup("gpt-4o", Some(0)).max_tokens, 128_000);
    }
}
