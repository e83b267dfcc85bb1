//! Background summarizer client (C5): picks a cutoff in the message
//! history, formats everything before it into a single prompt, and
//! calls out to a configured chat endpoint for the summary text.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use config::{KeepRecent, SummarizerConfig, SummarizerProvider};
use secrecy::ExposeSecret;
use serde_json::{Value, json};

use crate::error::{CompactorError, Result};
use crate::http_client::http_client;
use crate::json::{estimate_tokens, extract_text, truncate_chars};

const MAX_MESSAGE_CHARS: usize = 10_000;
const MAX_TOOL_RESULT_CHARS: usize = 500;

/// Outcome of a successful summarization call.
#[derive(Debug, Clone)]
pub struct SummarizeResult {
    pub summary: String,
    pub summary_tokens: u64,
    /// Last message index (inclusive) that went into the summary.
    pub last_summarized_index: i64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub duration: Duration,
}

/// The summarizer's only side-effecting dependency: one HTTP POST that
/// sends a JSON body and headers and returns a parsed JSON response.
/// Injected so tests can exercise cutoff selection, formatting, and
/// response parsing without a real network call.
#[async_trait]
pub trait SummarizerTransport: Send + Sync {
    async fn post_json(&self, url: &str, headers: &[(String, String)], body: Value) -> Result<Value>;
}

/// Production transport backed by the crate's shared [`reqwest::Client`].
pub struct ReqwestTransport;

#[async_trait]
impl SummarizerTransport for ReqwestTransport {
    async fn post_json(&self, url: &str, headers: &[(String, String)], body: Value) -> Result<Value> {
        let mut request = http_client().post(url).json(&body);
        for (name, value) in headers {
            request = request.header(name, value);
        }

        let response = request
            .send()
            .await
            .map_err(|e| CompactorError::SummarizerTransport(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| CompactorError::SummarizerTransport(e.to_string()))?;

        if !status.is_success() {
            return Err(CompactorError::SummarizerTransport(format!("status {status}: {text}")));
        }

        serde_json::from_str(&text).map_err(|e| CompactorError::SummarizerTransport(e.to_string()))
    }
}

pub struct Summarizer {
    config: SummarizerConfig,
    transport: Box<dyn SummarizerTransport>,
}

impl Summarizer {
    pub fn new(config: SummarizerConfig) -> Self {
        Self { config, transport: Box::new(ReqwestTransport) }
    }

    pub fn with_transport(config: SummarizerConfig, transport: Box<dyn SummarizerTransport>) -> Self {
        Self { config, transport }
    }

    /// Runs the full C5 pipeline: cutoff selection, formatting, the
    /// upstream call, and response parsing.
    pub async fn summarize(
        &self,
        messages: &[Value],
        trigger_threshold: u8,
        effective_max: u64,
        default_ratio: u32,
    ) -> Result<SummarizeResult> {
        let ratio = self.config.token_estimate_ratio.unwrap_or(default_ratio);
        let cutoff = find_summarization_cutoff(messages, &self.config.keep_recent, ratio, trigger_threshold, effective_max)?;

        let formatted = format_messages(messages, cutoff);
        let started = Instant::now();

        let (url, headers, request_body) = build_request(&self.config, &formatted);
        let response_body = self.transport.post_json(&url, &headers, request_body).await?;

        let (summary, input_tokens, output_tokens) = parse_response(self.config.provider, &response_body)?;

        if summary.trim().is_empty() {
            return Err(CompactorError::EmptySummary);
        }

        Ok(SummarizeResult {
            summary_tokens: estimate_tokens(summary.len(), ratio),
            summary,
            last_summarized_index: cutoff as i64,
            input_tokens,
            output_tokens,
            duration: started.elapsed(),
        })
    }
}

/// Picks the last message index to fold into the summary. Priority:
/// an explicit token budget, then a budget derived from
/// `trigger_threshold` and the model's effective context window, then
/// an explicit message-count budget.
pub fn find_summarization_cutoff(
    messages: &[Value],
    keep_recent: &KeepRecent,
    ratio: u32,
    trigger_threshold: u8,
    effective_max: u64,
) -> Result<usize> {
    if let Some(tokens) = keep_recent.tokens {
        return cutoff_by_tokens(messages, tokens as u64, ratio);
    }

    if effective_max > 0 {
        let keep_tokens = effective_max.saturating_mul(100u64.saturating_sub(trigger_threshold as u64)) / 100;
        return cutoff_by_tokens(messages, keep_tokens, ratio);
    }

    if let Some(count) = keep_recent.count {
        return cutoff_by_count(messages, count);
    }

    Err(CompactorError::NotEnoughContent)
}

fn cutoff_by_tokens(messages: &[Value], keep_recent_tokens: u64, ratio: u32) -> Result<usize> {
    let n = messages.len();
    let mut accumulated = 0u64;

    for index in (0..n).rev() {
        let raw_len = serde_json::to_vec(&messages[index]).map(|b| b.len()).unwrap_or(0);
        accumulated += estimate_tokens(raw_len, ratio);

        if accumulated >= keep_recent_tokens && index > 0 {
            return Ok(index - 1);
        }
    }

    if n >= 2 { Ok(n - 2) } else { Err(CompactorError::NotEnoughContent) }
}

fn cutoff_by_count(messages: &[Value], keep_recent_count: usize) -> Result<usize> {
    let n = messages.len();
    if n <= keep_recent_count {
        return Err(CompactorError::NotEnoughContent);
    }
    Ok(n - keep_recent_count - 1)
}

/// Renders `messages[0..=last_index]` as the text block handed to the
/// summarizer model, one `[Message i - role]` section per message.
fn format_messages(messages: &[Value], last_index: usize) -> String {
    messages
        .iter()
        .enumerate()
        .take(last_index + 1)
        .map(|(i, message)| {
            let role = message.get("role").and_then(Value::as_str).unwrap_or("user");
            let text = extract_text_for_summary(message.get("content").unwrap_or(&Value::Null));
            format!("[Message {i} - {role}]\n{}\n\n", truncate_chars(&text, MAX_MESSAGE_CHARS))
        })
        .collect()
}

/// Like [`extract_text`] but abbreviates tool activity instead of
/// dumping it verbatim: a summary doesn't need a tool's full output,
/// just that it ran and roughly what it returned.
fn extract_text_for_summary(content: &Value) -> String {
    match content {
        Value::Array(blocks) => blocks
            .iter()
            .filter_map(|block| {
                if let Some(s) = block.as_str() {
                    return Some(s.to_string());
                }

                match block.get("type").and_then(Value::as_str) {
                    Some("tool_use") => block
                        .get("name")
                        .and_then(Value::as_str)
                        .map(|name| format!("[Tool: {name}]")),
                    Some("tool_result") => {
                        let inner = extract_text(block.get("content").unwrap_or(&Value::Null));
                        Some(format!("[Tool Result: {}]", truncate_chars(&inner, MAX_TOOL_RESULT_CHARS)))
                    }
                    _ => extract_text_block_fallback(block),
                }
            })
            .collect::<Vec<_>>()
            .join("\n"),
        other => extract_text(other),
    }
}

fn extract_text_block_fallback(block: &Value) -> Option<String> {
    block.get("text").and_then(Value::as_str).map(str::to_string)
}

fn build_request(config: &SummarizerConfig, formatted: &str) -> (String, Vec<(String, String)>, Value) {
    let prompt = format!("Please summarize the following conversation:\n\n{formatted}");

    match config.provider {
        SummarizerProvider::Anthropic => {
            let body = json!({
                "model": config.model,
                "max_tokens": config.max_tokens,
                "system": config.system_prompt,
                "messages": [{"role": "user", "content": prompt}],
            });
            let headers = vec![
                ("Content-Type".to_string(), "application/json".to_string()),
                ("x-api-key".to_string(), config.api_key.expose_secret().to_string()),
                ("anthropic-version".to_string(), "2023-06-01".to_string()),
            ];
            (config.endpoint.clone(), headers, body)
        }
        SummarizerProvider::Openai => {
            let body = json!({
                "model": config.model,
                "max_tokens": config.max_tokens,
                "messages": [
                    {"role": "system", "content": config.system_prompt},
                    {"role": "user", "content": prompt},
                ],
            });
            let headers = vec![
                ("Content-Type".to_string(), "application/json".to_string()),
                ("Authorization".to_string(), format!("Bearer {}", config.api_key.expose_secret())),
            ];
            (config.endpoint.clone(), headers, body)
        }
    }
}

/// Extracts `(summary_text, input_tokens, output_tokens)` from the
/// provider's response shape.
fn parse_response(provider: SummarizerProvider, body: &Value) -> Result<(String, u64, u64)> {
    match provider {
        SummarizerProvider::Anthropic => {
            let text = body
                .get("content")
                .and_then(Value::as_array)
                .and_then(|blocks| blocks.iter().find(|b| b.get("type").and_then(Value::as_str) == Some("text")))
                .and_then(|b| b.get("text"))
                .and_then(Value::as_str)
                .ok_or_else(|| CompactorError::SummarizerTransport("no text content block in response".into()))?
                .to_string();

            let usage = body.get("usage");
            let input_tokens = usage.and_then(|u| u.get("input_tokens")).and_then(Value::as_u64).unwrap_or(0);
            let output_tokens = usage.and_then(|u| u.get("output_tokens")).and_then(Value::as_u64).unwrap_or(0);

            Ok((text, input_tokens, output_tokens))
        }
        SummarizerProvider::Openai => {
            let text = body
                .get("choices")
                .and_then(Value::as_array)
                .and_then(|c| c.first())
                .and_then(|c| c.get("message"))
                .and_then(|m| m.get("content"))
                .and_then(Value::as_str)
                .ok_or_else(|| CompactorError::SummarizerTransport("no message content in response".into()))?
                .to_string();

            let usage = body.get("usage");
            let input_tokens = usage.and_then(|u| u.get("prompt_tokens")).and_then(Value::as_u64).unwrap_or(0);
            let output_tokens = usage.and_then(|u| u.get("completion_tokens")).and_then(Value::as_u64).unwrap_or(0);

            Ok((text, input_tokens, output_tokens))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::SummarizerConfig;
    use serde_json::json;
    use std::sync::Mutex;

    struct RecordingTransport {
        response: Value,
        seen_url: Mutex<Option<String>>,
    }

    #[async_trait]
    impl SummarizerTransport for RecordingTransport {
        async fn post_json(&self, url: &str, _headers: &[(String, String)], _body: Value) -> Result<Value> {
            *self.seen_url.lock().unwrap() = Some(url.to_string());
            Ok(self.response.clone())
        }
    }

    fn messages(n: usize) -> Vec<Value> {
        (0..n)
            .map(|i| json!({"role": if i % 2 == 0 {"user"} else {"assistant"}, "content": format!("message {i}")}))
            .collect()
    }

    #[test]
    fn cutoff_by_tokens_stops_once_recent_budget_is_reached() {
        let msgs = messages(10);
        let cutoff = cutoff_by_tokens(&msgs, 1, 4).unwrap();
        assert!(cutoff < 9);
    }

    #[test]
    fn cutoff_by_tokens_falls_back_to_n_minus_2_when_budget_never_reached() {
        let msgs = messages(5);
        let cutoff = cutoff_by_tokens(&msgs, 1_000_000, 4).unwrap();
        assert_eq!(cutoff, 3);
    }

    #[test]
    fn cutoff_by_tokens_fails_with_fewer_than_two_messages() {
        let msgs = messages(1);
        assert!(matches!(cutoff_by_tokens(&msgs, 1_000_000, 4), Err(CompactorError::NotEnoughContent)));
    }

    #[test]
    fn cutoff_by_count_respects_keep_recent_count() {
        let msgs = messages(10);
        assert_eq!(cutoff_by_count(&msgs, 3).unwrap(), 6);
    }

    #[test]
    fn cutoff_by_count_fails_when_too_few_messages() {
        let msgs = messages(2);
        assert!(matches!(cutoff_by_count(&msgs, 5), Err(CompactorError::NotEnoughContent)));
    }

    #[test]
    fn find_cutoff_prefers_explicit_tokens_over_threshold_derivation() {
        let msgs = messages(10);
        let keep_recent = KeepRecent { tokens: Some(1), count: None };
        let cutoff = find_summarization_cutoff(&msgs, &keep_recent, 4, 75, 100_000).unwrap();
        assert!(cutoff < 9);
    }

    #[test]
    fn find_cutoff_prefers_threshold_derivation_over_explicit_count() {
        let msgs = messages(10);
        let keep_recent = KeepRecent { tokens: None, count: Some(9) };
        // count=9 would force cutoff=0; a non-zero effective_max must win instead.
        let cutoff = find_summarization_cutoff(&msgs, &keep_recent, 4, 75, 100_000).unwrap();
        assert_ne!(cutoff, 0);
    }

    #[test]
    fn find_cutoff_falls_back_to_explicit_count_without_a_context_window() {
        let msgs = messages(10);
        let keep_recent = KeepRecent { tokens: None, count: Some(3) };
        let cutoff = find_summarization_cutoff(&msgs, &keep_recent, 4, 75, 0).unwrap();
        assert_eq!(cutoff, 6);
    }

    #[test]
    fn format_messages_abbreviates_tool_activity() {
        let msgs = vec![
            json!({"role": "assistant", "content": [{"type": "tool_use", "name": "ls", "input": {}}]}),
            json!({"role": "user", "content": [{"type": "tool_result", "content": "a".repeat(600)}]}),
        ];
        let formatted = format_messages(&msgs, 1);
        assert!(formatted.contains("[Tool: ls]"));
        assert!(formatted.contains("[Tool Result:"));
        assert!(!formatted.contains(&"a".repeat(501)));
    }

    #[tokio::test]
    async fn summarize_parses_anthropic_response_and_rejects_empty_summary() {
        let config = SummarizerConfig { provider: SummarizerProvider::Anthropic, ..SummarizerConfig::default() };

        let ok_response = json!({
            "content": [{"type": "text", "text": "a recovery summary"}],
            "usage": {"input_tokens": 100, "output_tokens": 20},
        });
        let transport = RecordingTransport { response: ok_response, seen_url: Mutex::new(None) };
        let summarizer = Summarizer::with_transport(config.clone(), Box::new(transport));

        let result = summarizer.summarize(&messages(10), 75, 100_000, 4).await.unwrap();
        assert_eq!(result.summary, "a recovery summary");
        assert_eq!(result.input_tokens, 100);
        assert_eq!(result.output_tokens, 20);

        let empty_response = json!({"content": [{"type": "text", "text": "   "}]});
        let transport = RecordingTransport { response: empty_response, seen_url: Mutex::new(None) };
        let summarizer = Summarizer::with_transport(config, Box::new(transport));
        assert!(matches!(
            summarizer.summarize(&messages(10), 75, 100_000, 4).await,
            Err(CompactorError::EmptySummary)
        ));
    }
}
