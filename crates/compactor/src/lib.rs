//! Preemptive conversation-summarization core: provider adapters,
//! session management, the background worker pool, and the
//! orchestrator that ties them together. The gateway binary owns HTTP
//! transport; this crate only ever sees parsed bodies and headers.

pub mod adapters;
pub mod clock;
pub mod detector;
pub mod error;
pub mod eventlog;
mod http_client;
pub mod json;
pub mod model_window;
pub mod orchestrator;
pub mod session;
pub mod summarizer;
pub mod types;
pub mod worker;

use std::sync::Arc;

use config::Config;

pub use adapters::registry::{AdapterRegistry, HeaderSource, identify_provider};
pub use error::{CompactorError, Result};
pub use orchestrator::{Orchestrator, ProcessResult};
pub use types::ProviderKind;

use clock::system_clock;
use eventlog::EventLog;
use session::SessionManager;
use summarizer::Summarizer;
use worker::WorkerPool;

/// Wires up every component from a loaded [`Config`] the way the
/// gateway binary needs at startup: one adapter registry, one session
/// manager, one event log, one worker pool, and the orchestrator that
/// owns them all.
pub fn build(config: Config) -> anyhow::Result<Arc<Orchestrator>> {
    let registry = Arc::new(AdapterRegistry::default());
    let sessions = SessionManager::new(system_clock(), config.session.summary_ttl);
    let event_log = Arc::new(EventLog::open(config.resolved_compaction_log_path())?);
    let summarizer = Arc::new(Summarizer::new(config.summarizer.clone()));

    let worker_pool = WorkerPool::start(
        sessions.clone(),
        summarizer.clone(),
        event_log.clone(),
        config.trigger_threshold,
        config.test_context_window_override,
        config.token_estimate_ratio,
    );

    Ok(Arc::new(Orchestrator::new(config, registry, sessions, summarizer, worker_pool, event_log)))
}
