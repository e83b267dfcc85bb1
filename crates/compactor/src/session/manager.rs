//! Owner of every [`Session`] record: a single readers-writer lock
//! guards the whole map. Reads (lookup, stats) take the shared mode;
//! every mutation takes the exclusive mode and refreshes `last_update`.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use crate::clock::Clock;
use crate::error::{CompactorError, Result};

use super::fuzzy::{self, FuzzyCandidate};
use super::{Session, SessionState};

pub struct SessionManager {
    sessions: RwLock<HashMap<String, Session>>,
    clock: Arc<dyn Clock>,
    summary_ttl: Duration,
}

impl SessionManager {
    pub fn new(clock: Arc<dyn Clock>, summary_ttl: Duration) -> Arc<Self> {
        Arc::new(Self {
            sessions: RwLock::new(HashMap::new()),
            clock,
            summary_ttl,
        })
    }

    fn now(&self) -> Instant {
        self.clock.now()
    }

    /// Returns a snapshot of the session, creating one in `Idle` state
    /// for `model` if it doesn't exist yet.
    pub fn get_or_create(&self, id: &str, model: &str) -> Session {
        if let Some(session) = self.sessions.read().unwrap().get(id) {
            return session.clone();
        }

        let mut sessions = self.sessions.write().unwrap();
        sessions
            .entry(id.to_string())
            .or_insert_with(|| Session::new(id.to_string(), model.to_string(), self.now()))
            .clone()
    }

    pub fn get(&self, id: &str) -> Option<Session> {
        self.sessions.read().unwrap().get(id).cloned()
    }

    /// Serializes a read-modify-write against one session and refreshes
    /// `last_update`. Every mutating operation below is built on this.
    fn update<F>(&self, id: &str, f: F) -> Result<Session>
    where
        F: FnOnce(&mut Session),
    {
        let mut sessions = self.sessions.write().unwrap();
        let session = sessions
            .get_mut(id)
            .ok_or_else(|| CompactorError::SessionNotFound(id.to_string()))?;

        f(session);
        session.last_update = self.now();
        Ok(session.clone())
    }

    /// Records the normal-path usage estimate on the session, creating
    /// it if necessary.
    pub fn record_usage(&self, id: &str, model: &str, input_tokens: u64, usage_percent: f64) -> Session {
        self.get_or_create(id, model);
        self.update(id, |s| {
            s.last_input_tokens = input_tokens;
            s.last_usage_percent = usage_percent;
        })
        .expect("just created")
    }

    /// Idle -> Pending. No-op (returns the session unchanged) if it's
    /// not currently Idle — callers check state before triggering.
    pub fn trigger(&self, id: &str) -> Result<Session> {
        self.update(id, |s| {
            if s.state == SessionState::Idle {
                s.state = SessionState::Pending;
                s.summary = String::new();
                s.triggered_at = Some(s.last_update);
            }
        })
    }

    /// Pending -> Ready on a successful background or synchronous
    /// summarization.
    pub fn set_summary_ready(
        &self,
        id: &str,
        summary: String,
        summary_tokens: u64,
        last_index: i64,
        message_count: usize,
    ) -> Result<Session> {
        self.update(id, |s| {
            s.state = SessionState::Ready;
            s.summary = summary;
            s.summary_tokens = summary_tokens;
            s.summary_last_index = last_index;
            s.summary_message_count = message_count;
            s.completed_at = Some(s.last_update);
        })
    }

    /// Pending -> Idle after a failed summarization attempt.
    pub fn fail(&self, id: &str) -> Result<Session> {
        self.update(id, |s| {
            if s.state == SessionState::Pending {
                s.state = SessionState::Idle;
            }
        })
    }

    /// `IncrementUseCount`: keeps a `Ready` session `Ready` across
    /// repeated compaction requests rather than consuming it.
    pub fn increment_use_count(&self, id: &str) -> Result<Session> {
        self.update(id, |s| {
            s.use_count += 1;
            if s.first_used_at.is_none() {
                s.first_used_at = Some(s.last_update);
            }
        })
    }

    /// Legacy `MarkUsed`: Ready -> Used. Kept for API compatibility; the
    /// orchestrator itself calls `increment_use_count` instead so a
    /// summary survives repeated use until invalidated or reaped.
    pub fn mark_used(&self, id: &str) -> Result<Session> {
        self.update(id, |s| {
            if s.state == SessionState::Ready {
                s.state = SessionState::Used;
            }
            s.use_count += 1;
        })
    }

    pub fn is_summary_valid_for(&self, id: &str, message_count: usize) -> bool {
        self.get(id).is_some_and(|s| s.is_summary_valid_for(message_count))
    }

    /// Resets the session to `Idle` with an empty summary iff
    /// `message_count` has grown past what the summary covers. Returns
    /// whether a reset happened.
    pub fn invalidate_summary_if_new_messages(&self, id: &str, message_count: usize) -> bool {
        let Some(session) = self.get(id) else { return false };

        if message_count <= session.summary_message_count {
            return false;
        }

        let _ = self.update(id, |s| {
            s.state = SessionState::Idle;
            s.summary = String::new();
            s.summary_tokens = 0;
            s.summary_last_index = -1;
            s.summary_message_count = 0;
            s.use_count = 0;
        });

        true
    }

    /// Scans live sessions for a fuzzy-match recovery candidate. See
    /// [`fuzzy::fuzzy_match`] for the scoring rule.
    pub fn fuzzy_match(&self, exclude_id: Option<&str>, model: &str, current_message_count: usize) -> Option<String> {
        let now = self.now();
        let candidates: Vec<FuzzyCandidate> = self
            .sessions
            .read()
            .unwrap()
            .values()
            .map(|s| FuzzyCandidate {
                id: s.id.clone(),
                model: s.model.clone(),
                state: s.state,
                last_update: s.last_update,
                summary_message_count: s.summary_message_count,
            })
            .collect();

        fuzzy::fuzzy_match(&candidates, exclude_id, model, current_message_count, now)
    }

    /// Deletes every session whose `last_update` age exceeds the
    /// configured TTL. Intended to be called from a periodic ticker.
    pub fn cleanup_expired(&self) -> usize {
        let now = self.now();
        let mut sessions = self.sessions.write().unwrap();
        let before = sessions.len();
        sessions.retain(|_, s| s.age(now) <= self.summary_ttl);
        before - sessions.len()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Spawns the periodic cleanup ticker described for the session
/// manager; intended to run every 5 minutes in production, but the
/// interval is a parameter so tests and alternate deployments can vary
/// it.
pub fn spawn_cleanup_ticker(manager: Arc<SessionManager>, interval: Duration) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let reaped = manager.cleanup_expired();
            if reaped > 0 {
                log::debug!("session cleanup reaped {reaped} expired session(s)");
            }
        }
    })
}
