//! Scored, thresholded session recovery for when primary hashing can't
//! find a session — most commonly a subagent turn that starts without a
//! user message at all.

use std::time::{Duration, Instant};

use super::{Session, SessionState};

const MAX_AGE: Duration = Duration::from_secs(30 * 60);
const SCORE_THRESHOLD: f64 = 0.5;

/// A read-only view of a session's matching-relevant fields; kept
/// separate from [`Session`] so fuzzy matching never needs to hold the
/// session-map lock while scoring.
#[derive(Debug, Clone)]
pub struct FuzzyCandidate {
    pub id: String,
    pub model: String,
    pub state: SessionState,
    pub last_update: Instant,
    pub summary_message_count: usize,
}

/// Best-scoring candidate that shares a model family with `model`, is in
/// `Ready` or `Pending`, is no older than 30 minutes, and whose score
/// clears 0.5 — or `None`.
///
/// Ties are broken by (score desc, id asc) for reproducibility, which is
/// stricter than plain map-iteration order but never changes which
/// candidate wins when there's a unique best score.
pub fn fuzzy_match(
    candidates: &[FuzzyCandidate],
    exclude_id: Option<&str>,
    model: &str,
    current_message_count: usize,
    now: Instant,
) -> Option<String> {
    let family = model_family(model);

    candidates
        .iter()
        .filter(|c| exclude_id != Some(c.id.as_str()))
        .filter(|c| matches!(c.state, SessionState::Ready | SessionState::Pending))
        .filter(|c| model_family(&c.model) == family)
        .filter(|c| now.saturating_duration_since(c.last_update) <= MAX_AGE)
        .map(|c| (score(c, current_message_count, now), c))
        .filter(|(score, _)| *score >= SCORE_THRESHOLD)
        .max_by(|(score_a, a), (score_b, b)| {
            score_a
                .partial_cmp(score_b)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.id.cmp(&a.id))
        })
        .map(|(_, c)| c.id.clone())
}

fn score(candidate: &FuzzyCandidate, current_message_count: usize, now: Instant) -> f64 {
    let age_minutes = now.saturating_duration_since(candidate.last_update).as_secs_f64() / 60.0;
    let recency = (1.0 - age_minutes / 30.0).max(0.0);

    let delta = current_message_count as i64 - candidate.summary_message_count as i64;
    let count_similarity = match delta {
        d if (0..=30).contains(&d) => 1.0 - d as f64 / 50.0,
        d if (31..=100).contains(&d) => 0.5 - (d - 30) as f64 / 140.0,
        d if (-10..0).contains(&d) => 0.7,
        _ => 0.0,
    };

    let state_bonus = if candidate.state == SessionState::Ready { 0.2 } else { 0.0 };

    0.5 * recency + 0.3 * count_similarity + state_bonus
}

/// Family prefixes recognized for cross-model fuzzy matching; anything
/// else requires an exact model match.
const FAMILIES: [&str; 5] = ["claude-opus", "claude-sonnet", "claude-haiku", "gpt-4", "gpt-3.5"];

fn model_family(model: &str) -> &str {
    FAMILIES
        .iter()
        .find(|prefix| model.starts_with(*prefix))
        .copied()
        .unwrap_or(model)
}
