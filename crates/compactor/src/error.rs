//! Error types for the compaction core.
//!
//! The core never produces an HTTP response itself; transport is owned
//! by the caller, so these are plain [`thiserror`] types. Most call
//! sites absorb and log rather than propagate.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, CompactorError>;

/// Failures surfaced by adapters, the summarizer client, and the worker
/// pool.
#[derive(Debug, Error)]
pub enum CompactorError {
    /// The request/response body was not valid JSON, or lacked a
    /// `messages` array where one was required.
    #[error("malformed body: {0}")]
    MalformedBody(String),

    /// No provider adapter is registered under this name.
    #[error("unknown provider: {0}")]
    UnknownProvider(String),

    /// The summarizer found no content worth summarizing once the
    /// recent tail was excluded.
    #[error("not enough content to summarize")]
    NotEnoughContent,

    /// The summarizer's upstream HTTP call failed or returned a
    /// non-2xx status.
    #[error("summarizer request failed: {0}")]
    SummarizerTransport(String),

    /// The summarizer model produced an empty text block.
    #[error("summarizer returned an empty summary")]
    EmptySummary,

    /// The summarization call exceeded its deadline.
    #[error("summarization timed out")]
    Timeout,

    /// A session lookup or update referenced an id that isn't (or is no
    /// longer) present in the session map.
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// The background queue was at capacity when a job was submitted.
    #[error("queue full")]
    QueueFull,

    /// Failed to append a line to the compaction event log.
    #[error("compaction log write failed: {0}")]
    EventLog(#[from] std::io::Error),
}

impl CompactorError {
    /// True for the one failure mode the worker pool logs as a skip
    /// rather than an error.
    pub fn is_skip(&self) -> bool {
        matches!(self, Self::NotEnoughContent)
    }
}
