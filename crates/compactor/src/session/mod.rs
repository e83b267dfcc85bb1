//! Session record and state machine (data model only; the owning map
//! lives in [`super::session::manager`]).

mod fuzzy;
mod id;
mod manager;

pub use fuzzy::fuzzy_match;
pub use id::{derive_legacy_session_id, derive_session_id};
pub use manager::SessionManager;

use std::time::Instant;

/// Lifecycle state of a [`Session`]'s summary.
///
/// ```text
///  Idle --trigger--> Pending --summary_ready--> Ready --reset--> Idle
///                       |                          |
///                       | failure                  `- increment_use_count (stays Ready)
///                       v
///                     Idle
/// ```
///
/// `Used` is a legacy alias reachable only through [`SessionManager::mark_used`];
/// the orchestrator itself only ever calls `increment_use_count`, which
/// keeps a session in `Ready` across repeated compaction requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Pending,
    Ready,
    Used,
}

/// The central per-conversation entity the whole core revolves around.
///
/// Invariants (enforced by [`SessionManager`], never by public setters
/// directly):
/// - `state = Ready | Used` implies `summary` is non-empty and
///   `summary_last_index >= 0`.
/// - `state = Pending` implies `summary` is empty — the old summary, if
///   any, is cleared on reset, not on trigger.
/// - `summary_last_index < summary_message_count`.
/// - `use_count` only increases; resetting a session clears it.
#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub state: SessionState,
    pub created_at: Instant,
    pub last_update: Instant,
    pub model: String,

    pub last_input_tokens: u64,
    pub last_usage_percent: f64,

    pub summary: String,
    pub summary_tokens: u64,
    /// Last message index (inclusive) covered by `summary`.
    pub summary_last_index: i64,
    /// Total message count present when `summary` was produced.
    pub summary_message_count: usize,

    pub triggered_at: Option<Instant>,
    pub completed_at: Option<Instant>,
    pub first_used_at: Option<Instant>,
    pub use_count: u64,
}

impl Session {
    pub fn new(id: String, model: String, now: Instant) -> Self {
        Self {
            id,
            state: SessionState::Idle,
            created_at: now,
            last_update: now,
            model,
            last_input_tokens: 0,
            last_usage_percent: 0.0,
            summary: String::new(),
            summary_tokens: 0,
            summary_last_index: -1,
            summary_message_count: 0,
            triggered_at: None,
            completed_at: None,
            first_used_at: None,
            use_count: 0,
        }
    }

    /// `is_summary_valid_for_messages`: true iff the session carries a
    /// usable summary that still covers a conversation of `message_count`
    /// messages.
    pub fn is_summary_valid_for(&self, message_count: usize) -> bool {
        matches!(self.state, SessionState::Ready | SessionState::Used) && message_count <= self.summary_message_count
    }

    pub fn age(&self, now: Instant) -> std::time::Duration {
        now.saturating_duration_since(self.last_update)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_session_starts_idle_with_no_summary() {
        let session = Session::new("abc".into(), "claude-opus-4".into(), Instant::now());
        assert_eq!(session.state, SessionState::Idle);
        assert!(session.summary.is_empty());
        assert_eq!(session.summary_last_index, -1);
        assert_eq!(session.use_count, 0);
    }

    #[test]
    fn summary_validity_respects_state_and_message_count() {
        let mut session = Session::new("abc".into(), "claude-opus-4".into(), Instant::now());
        session.state = SessionState::Ready;
        session.summary = "...".into();
        session.summary_message_count = 10;

        assert!(session.is_summary_valid_for(10));
        assert!(session.is_summary_valid_for(5));
        assert!(!session.is_summary_valid_for(11));

        session.state = SessionState::Idle;
        assert!(!session.is_summary_valid_for(5));
    }
}
