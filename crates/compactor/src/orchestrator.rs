//! Preemptive manager (C7): the one entry point the gateway calls per
//! request. Classifies the request, drives the normal-path trigger or
//! the compaction-path cache/wait/synchronous strategies, and composes
//! the outgoing body.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use config::Config;
use serde_json::{Value, json};

use crate::adapters::registry::AdapterRegistry;
use crate::detector::CompactionDetector;
use crate::error::{CompactorError, Result};
use crate::eventlog::{EventKind, EventLog};
use crate::json::{estimate_tokens, extract_text};
use crate::model_window;
use crate::session::{SessionManager, SessionState, derive_legacy_session_id, derive_session_id};
use crate::summarizer::Summarizer;
use crate::types::ProviderKind;
use crate::worker::WorkerPool;

/// Detector labels whose match means the triggering user message *is*
/// the compaction instruction and must not reappear in the recent tail.
const DROP_LAST_MESSAGE_LABELS: [&str; 2] = ["claude_code_prompt", "openai_prompt"];

pub struct Orchestrator {
    config: Config,
    registry: Arc<AdapterRegistry>,
    detector: CompactionDetector,
    sessions: Arc<SessionManager>,
    summarizer: Arc<Summarizer>,
    worker_pool: Arc<WorkerPool>,
    event_log: Arc<EventLog>,
}

/// What `process_request` hands back to the gateway transport.
#[derive(Debug, Clone)]
pub struct ProcessResult {
    pub modified_body: Value,
    pub is_compaction: bool,
    /// Present only for the Anthropic-shaped providers on the
    /// compaction path; the gateway must reply with this directly
    /// instead of forwarding upstream.
    pub synthetic_response: Option<Value>,
    pub response_headers: Vec<(String, String)>,
}

impl ProcessResult {
    fn passthrough(body: Value) -> Self {
        Self { modified_body: body, is_compaction: false, synthetic_response: None, response_headers: Vec::new() }
    }
}

impl Orchestrator {
    pub fn new(
        config: Config,
        registry: Arc<AdapterRegistry>,
        sessions: Arc<SessionManager>,
        summarizer: Arc<Summarizer>,
        worker_pool: Arc<WorkerPool>,
        event_log: Arc<EventLog>,
    ) -> Self {
        let detector = CompactionDetector::new(config.detectors.clone());
        Self { config, registry, detector, sessions, summarizer, worker_pool, event_log }
    }

    pub async fn process_request(
        &self,
        headers: &[(String, String)],
        body: &Value,
        model: &str,
        provider: ProviderKind,
    ) -> Result<ProcessResult> {
        if !self.config.enabled {
            return Ok(ProcessResult::passthrough(body.clone()));
        }

        let Some(messages) = body.get("messages").and_then(Value::as_array) else {
            return Ok(ProcessResult::passthrough(body.clone()));
        };

        let detection = self.detector.detect(body, headers);
        let session_id = self.classify_session_id(messages, model, &detection);

        if !detection.is_compaction {
            return self.handle_normal_path(&session_id, model, body, messages);
        }

        self.event_log.write(EventKind::CompactionDetected, Some(&session_id), Some(model), json!({"detected_by": detection.detected_by}))?;

        self.handle_compaction_path(&session_id, model, body, messages, provider, detection.detected_by.as_deref()).await
    }

    /// Three-level session-id cascade plus the compaction-time fuzzy
    /// override described in §4.4/§4.7.
    fn classify_session_id(&self, messages: &[Value], model: &str, detection: &crate::types::DetectionResult) -> String {
        let mut session_id = derive_session_id(messages);

        if session_id.is_none() {
            session_id = self.sessions.fuzzy_match(None, model, messages.len());
        }

        if detection.is_compaction
            && let Some(id) = &session_id
        {
            let usable = self
                .sessions
                .get(id)
                .is_some_and(|s| matches!(s.state, SessionState::Ready | SessionState::Pending));

            if !usable && let Some(fuzzy_id) = self.sessions.fuzzy_match(Some(id), model, messages.len()) {
                session_id = Some(fuzzy_id);
            }
        }

        session_id.unwrap_or_else(|| derive_legacy_session_id(messages, self.config.session.hash_message_count))
    }

    fn handle_normal_path(&self, session_id: &str, model: &str, body: &Value, messages: &[Value]) -> Result<ProcessResult> {
        self.sessions.get_or_create(session_id, model);

        let body_len = serde_json::to_vec(body).map(|b| b.len()).unwrap_or(0);
        let input_tokens = estimate_tokens(body_len, self.config.token_estimate_ratio);

        let window = model_window::lookup(model, self.config.test_context_window_override);
        let effective_max = window.effective_max().max(1);
        let usage_percent = (100.0 * input_tokens as f64 / effective_max as f64).min(100.0);

        let session = self.sessions.record_usage(session_id, model, input_tokens, usage_percent);

        if usage_percent >= self.config.trigger_threshold as f64 && session.state == SessionState::Idle {
            self.sessions.trigger(session_id)?;
            self.worker_pool.submit(session_id, model, messages.to_vec());
            self.event_log.write(
                EventKind::PreemptiveTrigger,
                Some(session_id),
                Some(model),
                json!({"usage_percent": usage_percent, "input_tokens": input_tokens}),
            )?;
        }

        let session = self.sessions.get(session_id).unwrap_or(session);

        let mut result = ProcessResult::passthrough(body.clone());
        if self.config.add_response_headers {
            result.response_headers = normal_path_headers(&session, effective_max);
        }
        Ok(result)
    }

    async fn handle_compaction_path(
        &self,
        session_id: &str,
        model: &str,
        body: &Value,
        messages: &[Value],
        provider: ProviderKind,
        detected_by: Option<&str>,
    ) -> Result<ProcessResult> {
        let (summary, last_index, fell_back) = self.resolve_summary(session_id, model, messages).await?;

        self.sessions.increment_use_count(session_id)?;

        self.event_log.write(
            if fell_back { EventKind::CompactionFallback } else { EventKind::CompactionApplied },
            Some(session_id),
            Some(model),
            json!({"last_summarized_index": last_index}),
        )?;

        let drop_last = detected_by.is_some_and(|d| DROP_LAST_MESSAGE_LABELS.contains(&d));
        let end_index = messages.len().saturating_sub(if drop_last { 1 } else { 0 });
        let start_index = (last_index + 1).max(0) as usize;
        let recent = if start_index < end_index { &messages[start_index..end_index] } else { &[][..] };

        match provider {
            ProviderKind::Openai => {
                let rewritten = build_rewritten_openai_body(body, &summary, recent);
                Ok(ProcessResult {
                    modified_body: rewritten,
                    is_compaction: true,
                    synthetic_response: None,
                    response_headers: Vec::new(),
                })
            }
            _ => {
                let synthetic = build_synthetic_response(&summary, recent, model);
                Ok(ProcessResult {
                    modified_body: body.clone(),
                    is_compaction: true,
                    synthetic_response: Some(synthetic),
                    response_headers: Vec::new(),
                })
            }
        }
    }

    /// Tries precomputed, then pending-wait, then synchronous
    /// summarization, in that order. Returns `(summary, last_index,
    /// fell_back_to_synchronous)`.
    async fn resolve_summary(&self, session_id: &str, model: &str, messages: &[Value]) -> Result<(String, i64, bool)> {
        if let Some(session) = self.sessions.get(session_id)
            && !session.summary.is_empty()
            && matches!(session.state, SessionState::Ready | SessionState::Used)
        {
            return Ok((session.summary, session.summary_last_index, false));
        }

        if let Some(session) = self.sessions.get(session_id)
            && session.state == SessionState::Pending
        {
            let done = self.worker_pool.wait(session_id, self.config.pending_job_timeout).await;

            if done && let Some(session) = self.sessions.get(session_id)
                && session.state == SessionState::Ready
                && !session.summary.is_empty()
            {
                return Ok((session.summary, session.summary_last_index, false));
            }
        }

        let window = model_window::lookup(model, self.config.test_context_window_override);

        let result = tokio::time::timeout(
            self.config.sync_timeout,
            self.summarizer.summarize(messages, self.config.trigger_threshold, window.effective_max(), self.config.token_estimate_ratio),
        )
        .await;

        let result = match result {
            Ok(Ok(result)) => result,
            Ok(Err(err)) => {
                self.event_log.write(EventKind::CompactionError, Some(session_id), Some(model), json!({"reason": err.to_string()}))?;
                return Err(err);
            }
            Err(_elapsed) => {
                self.event_log.write(EventKind::CompactionError, Some(session_id), Some(model), json!({"reason": "timeout"}))?;
                return Err(CompactorError::Timeout);
            }
        };

        self.sessions.get_or_create(session_id, model);
        self.sessions.set_summary_ready(session_id, result.summary.clone(), result.summary_tokens, result.last_summarized_index, messages.len())?;

        Ok((result.summary, result.last_summarized_index, true))
    }
}

fn normal_path_headers(session: &crate::session::Session, effective_max: u64) -> Vec<(String, String)> {
    vec![
        ("X-Context-Usage".to_string(), format!("{:.1}%", session.last_usage_percent)),
        ("X-Context-Tokens".to_string(), format!("{}/{}", session.last_input_tokens, effective_max)),
        ("X-Session-ID".to_string(), session.id.clone()),
        ("X-Session-State".to_string(), format!("{:?}", session.state)),
        ("X-Summary-Ready".to_string(), (session.state == SessionState::Ready).to_string()),
        ("X-Summary-Tokens".to_string(), session.summary_tokens.to_string()),
    ]
}

fn format_recent_messages(recent: &[Value]) -> String {
    recent
        .iter()
        .map(|m| {
            let role = m.get("role").and_then(Value::as_str).unwrap_or("user");
            let text = extract_text(m.get("content").unwrap_or(&Value::Null));
            format!("[{role}]: {text}\n\n")
        })
        .collect()
}

/// Anthropic-shaped fabricated assistant turn served to the client
/// directly, without a round trip upstream.
fn build_synthetic_response(summary: &str, recent: &[Value], model: &str) -> Value {
    let text = format!(
        "<summary>\n{summary}\n</summary>\n\n<recent_messages>\n{}</recent_messages>",
        format_recent_messages(recent)
    );

    let nanos = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_nanos();
    let output_tokens = text.len().div_ceil(4);

    json!({
        "id": format!("msg_precomputed_{nanos}"),
        "type": "message",
        "role": "assistant",
        "model": model,
        "stop_reason": "end_turn",
        "stop_sequence": null,
        "content": [{"type": "text", "text": text}],
        "usage": {"input_tokens": 0, "output_tokens": output_tokens},
    })
}

/// OpenAI needs a real upstream completion, so the summary is spliced
/// into the request as two synthetic turns instead of faked locally.
fn build_rewritten_openai_body(body: &Value, summary: &str, recent: &[Value]) -> Value {
    let mut rewritten = body.clone();

    let mut messages = vec![
        json!({"role": "user", "content": format!("## Conversation Summary\n\n{summary}\n\n---\n\nPlease continue helping me.")}),
        json!({"role": "assistant", "content": "I've reviewed the summary. How can I help?"}),
    ];
    messages.extend(recent.iter().cloned());

    if let Some(obj) = rewritten.as_object_mut() {
        obj.insert("messages".to_string(), Value::Array(messages));
    }

    rewritten
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::registry::AdapterRegistry;
    use crate::clock::ManualClock;
    use crate::summarizer::{Summarizer, SummarizerTransport};
    use async_trait::async_trait;
    use config::SummarizerConfig;
    use std::sync::Mutex;
    use std::time::Duration;

    struct CannedTransport {
        response: Value,
    }

    #[async_trait]
    impl SummarizerTransport for CannedTransport {
        async fn post_json(&self, _url: &str, _headers: &[(String, String)], _body: Value) -> Result<Value> {
            Ok(self.response.clone())
        }
    }

    fn setup(config: Config) -> (Orchestrator, Arc<SessionManager>, tempfile::TempDir) {
        let clock = ManualClock::new();
        let sessions = SessionManager::new(clock, config.session.summary_ttl);
        let dir = tempfile::tempdir().unwrap();
        let event_log = Arc::new(EventLog::open(dir.path().join("events.jsonl")).unwrap());

        let response = json!({
            "content": [{"type": "text", "text": "a recovery summary"}],
            "usage": {"input_tokens": 50, "output_tokens": 10},
        });
        let summarizer = Arc::new(Summarizer::with_transport(SummarizerConfig::default(), Box::new(CannedTransport { response })));

        let worker_pool = WorkerPool::start_with_capacity(
            sessions.clone(),
            summarizer.clone(),
            event_log.clone(),
            config.trigger_threshold,
            config.test_context_window_override,
            config.token_estimate_ratio,
            100,
            1,
        );

        let registry = Arc::new(AdapterRegistry::default());
        let orchestrator = Orchestrator::new(config, registry, sessions.clone(), summarizer, worker_pool, event_log);

        (orchestrator, sessions, dir)
    }

    fn message_body(n: usize) -> Value {
        let messages: Vec<Value> = (0..n)
            .map(|i| json!({"role": if i % 2 == 0 {"user"} else {"assistant"}, "content": "x".repeat(200)}))
            .collect();
        json!({"model": "claude-opus-4", "messages": messages})
    }

    #[tokio::test]
    async fn normal_path_below_threshold_does_not_trigger() {
        let mut config = Config::default();
        config.trigger_threshold = 90;
        config.test_context_window_override = Some(100_000);
        let (orchestrator, sessions, _dir) = setup(config);

        let body = message_body(2);
        let result = orchestrator.process_request(&[], &body, "claude-opus-4", ProviderKind::Anthropic).await.unwrap();

        assert!(!result.is_compaction);
        assert_eq!(result.modified_body, body);

        let id = derive_session_id(body["messages"].as_array().unwrap()).unwrap();
        assert_eq!(sessions.get(&id).unwrap().state, SessionState::Idle);
    }

    #[tokio::test]
    async fn normal_path_above_threshold_triggers_and_completes() {
        let mut config = Config::default();
        config.trigger_threshold = 1;
        config.test_context_window_override = Some(1_000);
        let (orchestrator, sessions, _dir) = setup(config);

        let body = message_body(4);
        let result = orchestrator.process_request(&[], &body, "claude-opus-4", ProviderKind::Anthropic).await.unwrap();
        assert!(!result.is_compaction);

        let id = derive_session_id(body["messages"].as_array().unwrap()).unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        loop {
            if sessions.get(&id).unwrap().state == SessionState::Ready {
                break;
            }
            assert!(std::time::Instant::now() < deadline, "worker never completed");
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn compaction_path_serves_precomputed_summary_without_dropping_use_count_past_one() {
        let config = Config::default();
        let (orchestrator, sessions, _dir) = setup(config);

        let body = message_body(6);
        let messages = body["messages"].as_array().unwrap().clone();
        let id = derive_session_id(&messages).unwrap();

        sessions.get_or_create(&id, "claude-opus-4");
        sessions.trigger(&id).unwrap();
        sessions.set_summary_ready(&id, "precomputed summary".into(), 20, 3, 6).unwrap();

        let mut compaction_messages = messages.clone();
        *compaction_messages.last_mut().unwrap() =
            json!({"role": "user", "content": "your task is to create a detailed summary of the conversation so far"});
        let compaction_body = json!({"model": "claude-opus-4", "messages": compaction_messages});

        let result = orchestrator.process_request(&[], &compaction_body, "claude-opus-4", ProviderKind::Anthropic).await.unwrap();

        assert!(result.is_compaction);
        let synthetic = result.synthetic_response.unwrap();
        let text = synthetic["content"][0]["text"].as_str().unwrap();
        assert!(text.starts_with("<summary>\nprecomputed summary"));
        assert_eq!(synthetic["stop_reason"], "end_turn");

        assert_eq!(sessions.get(&id).unwrap().use_count, 1);
        assert_eq!(sessions.get(&id).unwrap().state, SessionState::Ready);
    }

    #[tokio::test]
    async fn compaction_path_falls_back_to_synchronous_and_drops_trigger_message() {
        let config = Config::default();
        let (orchestrator, sessions, _dir) = setup(config);

        let mut messages = message_body(4)["messages"].as_array().unwrap().clone();
        messages.push(json!({"role": "user", "content": "your task is to create a detailed summary of the conversation so far"}));
        let body = json!({"model": "claude-opus-4", "messages": messages.clone()});

        let result = orchestrator.process_request(&[], &body, "claude-opus-4", ProviderKind::Anthropic).await.unwrap();

        assert!(result.is_compaction);
        let synthetic = result.synthetic_response.unwrap();
        let text = synthetic["content"][0]["text"].as_str().unwrap();
        assert!(text.contains("a recovery summary"));
        assert!(!text.contains("your task is to create a detailed summary"));

        let id = derive_session_id(&messages).unwrap();
        assert_eq!(sessions.get(&id).unwrap().state, SessionState::Ready);
    }

    #[tokio::test]
    async fn openai_compaction_rewrites_request_instead_of_faking_a_response() {
        let config = Config::default();
        let (orchestrator, _sessions, _dir) = setup(config);

        let body = message_body(4);
        let result = orchestrator.process_request(&[], &body, "gpt-4o", ProviderKind::Openai).await.unwrap();

        assert!(result.is_compaction);
        assert!(result.synthetic_response.is_none());
        let messages = result.modified_body["messages"].as_array().unwrap();
        assert!(messages[0]["content"].as_str().unwrap().starts_with("## Conversation Summary"));
        assert_eq!(messages[1]["content"], "I've reviewed the summary. How can I help?");
    }

    #[tokio::test]
    async fn disabled_manager_passes_every_request_through_untouched() {
        let mut config = Config::default();
        config.enabled = false;
        let (orchestrator, _sessions, _dir) = setup(config);

        let body = message_body(4);
        let result = orchestrator.process_request(&[], &body, "claude-opus-4", ProviderKind::Anthropic).await.unwrap();
        assert!(!result.is_compaction);
        assert_eq!(result.modified_body, body);
    }

    #[tokio::test]
    async fn malformed_body_passes_through_without_error() {
        let config = Config::default();
        let (orchestrator, _sessions, _dir) = setup(config);

        let body = json!({"not_messages": true});
        let result = orchestrator.process_request(&[], &body, "claude-opus-4", ProviderKind::Anthropic).await.unwrap();
        assert!(!result.is_compaction);
    }

    #[tokio::test]
    async fn fuzzy_recovery_adopts_a_different_ready_session_at_compaction_time() {
        let config = Config::default();
        let (orchestrator, sessions, _dir) = setup(config);

        sessions.get_or_create("other-session", "claude-opus-4");
        sessions.trigger("other-session").unwrap();
        sessions.set_summary_ready("other-session", "fuzzy-recovered summary".into(), 15, 9, 20).unwrap();

        // No user message at all: primary hashing yields nothing, so the
        // normal path's session-id cascade falls through to fuzzy match.
        let body = json!({"messages": Value::Array(Vec::<Value>::new())});
        let result = orchestrator.process_request(&[], &body, "claude-opus-4", ProviderKind::Anthropic).await.unwrap();

        let session_id_header = result.response_headers.iter().find(|(k, _)| k == "X-Session-ID").map(|(_, v)| v.as_str());
        assert_eq!(session_id_header, Some("other-session"));
    }

    #[allow(dead_code)]
    fn assert_registry_type(_: &AdapterRegistry) {}
}
