//! Background worker pool (C6): a bounded FIFO queue fronts a fixed
//! set of workers that run the summarizer (C5) off the request path.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde_json::{Value, json};
use tokio::sync::{Mutex as AsyncMutex, mpsc, watch};

use crate::clock::Clock;
use crate::eventlog::{EventKind, EventLog};
use crate::error::CompactorError;
use crate::model_window;
use crate::session::SessionManager;
use crate::summarizer::Summarizer;

const DEFAULT_QUEUE_CAPACITY: usize = 100;
const DEFAULT_WORKER_COUNT: usize = 2;
const JOB_TIMEOUT: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

/// Result fields populated once a job closes. `Succeeded` carries the
/// summary; `Failed`/`Cancelled` carry a human-readable reason.
#[derive(Debug, Clone, Default)]
pub struct JobResult {
    pub summary: Option<String>,
    pub summary_tokens: Option<u64>,
    pub last_index: Option<usize>,
    pub error: Option<String>,
}

/// A submitted job's handle: callers poll [`JobHandle::status`] or
/// block on [`WorkerPool::wait`] for the `done` signal.
pub struct JobHandle {
    status: Mutex<JobStatus>,
    done_tx: watch::Sender<bool>,
    created_at: Instant,
    started_at: Mutex<Option<Instant>>,
    completed_at: Mutex<Option<Instant>>,
    result: Mutex<JobResult>,
}

impl JobHandle {
    fn new(clock: &dyn Clock) -> Arc<Self> {
        let (done_tx, _) = watch::channel(false);
        Arc::new(Self {
            status: Mutex::new(JobStatus::Queued),
            done_tx,
            created_at: clock.now(),
            started_at: Mutex::new(None),
            completed_at: Mutex::new(None),
            result: Mutex::new(JobResult::default()),
        })
    }

    pub fn status(&self) -> JobStatus {
        *self.status.lock().unwrap()
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn started_at(&self) -> Option<Instant> {
        *self.started_at.lock().unwrap()
    }

    pub fn completed_at(&self) -> Option<Instant> {
        *self.completed_at.lock().unwrap()
    }

    pub fn result(&self) -> JobResult {
        self.result.lock().unwrap().clone()
    }

    fn set_status(&self, status: JobStatus) {
        *self.status.lock().unwrap() = status;
    }

    fn start(&self, clock: &dyn Clock) {
        self.set_status(JobStatus::Running);
        *self.started_at.lock().unwrap() = Some(clock.now());
    }

    fn succeed(&self, clock: &dyn Clock, summary: String, summary_tokens: u64, last_index: usize) {
        *self.result.lock().unwrap() = JobResult { summary: Some(summary), summary_tokens: Some(summary_tokens), last_index: Some(last_index), error: None };
        self.close(clock, JobStatus::Succeeded);
    }

    fn fail(&self, clock: &dyn Clock, error: String) {
        *self.result.lock().unwrap() = JobResult { error: Some(error), ..Default::default() };
        self.close(clock, JobStatus::Failed);
    }

    /// Marks a still-queued or still-running job as cancelled, e.g. when
    /// the pool is stopped before the job ran to completion.
    fn cancel(&self, clock: &dyn Clock) {
        self.close(clock, JobStatus::Cancelled);
    }

    fn close(&self, clock: &dyn Clock, status: JobStatus) {
        self.set_status(status);
        *self.completed_at.lock().unwrap() = Some(clock.now());
        let _ = self.done_tx.send(true);
    }
}

struct WorkItem {
    session_id: String,
    model: String,
    messages: Vec<Value>,
    handle: Arc<JobHandle>,
}

/// Shared state the pool and its workers both need: where to submit
/// results, how to estimate tokens, and where to log.
struct WorkerContext {
    sessions: Arc<SessionManager>,
    summarizer: Arc<Summarizer>,
    event_log: Arc<EventLog>,
    clock: Arc<dyn Clock>,
    trigger_threshold: u8,
    test_context_window_override: Option<u32>,
    token_estimate_ratio: u32,
}

pub struct WorkerPool {
    jobs: Mutex<HashMap<String, Arc<JobHandle>>>,
    sender: mpsc::Sender<WorkItem>,
    stop_tx: watch::Sender<bool>,
    worker_handles: Mutex<Vec<tokio::task::JoinHandle<()>>>,
    clock: Arc<dyn Clock>,
}

impl WorkerPool {
    /// Spawns `worker_count` workers pulling from a queue of
    /// `queue_capacity`. Workers MUST NOT be started more than once per
    /// pool; call this exactly once per process.
    pub fn start(
        sessions: Arc<SessionManager>,
        summarizer: Arc<Summarizer>,
        event_log: Arc<EventLog>,
        trigger_threshold: u8,
        test_context_window_override: Option<u32>,
        token_estimate_ratio: u32,
    ) -> Arc<Self> {
        Self::start_with_capacity(
            sessions,
            summarizer,
            event_log,
            trigger_threshold,
            test_context_window_override,
            token_estimate_ratio,
            DEFAULT_QUEUE_CAPACITY,
            DEFAULT_WORKER_COUNT,
        )
    }

    pub fn start_with_capacity(
        sessions: Arc<SessionManager>,
        summarizer: Arc<Summarizer>,
        event_log: Arc<EventLog>,
        trigger_threshold: u8,
        test_context_window_override: Option<u32>,
        token_estimate_ratio: u32,
        queue_capacity: usize,
        worker_count: usize,
    ) -> Arc<Self> {
        Self::start_with_clock(
            sessions,
            summarizer,
            event_log,
            crate::clock::system_clock(),
            trigger_threshold,
            test_context_window_override,
            token_estimate_ratio,
            queue_capacity,
            worker_count,
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub fn start_with_clock(
        sessions: Arc<SessionManager>,
        summarizer: Arc<Summarizer>,
        event_log: Arc<EventLog>,
        clock: Arc<dyn Clock>,
        trigger_threshold: u8,
        test_context_window_override: Option<u32>,
        token_estimate_ratio: u32,
        queue_capacity: usize,
        worker_count: usize,
    ) -> Arc<Self> {
        let (sender, receiver) = mpsc::channel(queue_capacity);
        let (stop_tx, _) = watch::channel(false);
        let receiver = Arc::new(AsyncMutex::new(receiver));

        let context = Arc::new(WorkerContext {
            sessions,
            summarizer,
            event_log,
            clock: clock.clone(),
            trigger_threshold,
            test_context_window_override,
            token_estimate_ratio,
        });

        let mut worker_handles = Vec::with_capacity(worker_count);
        for _ in 0..worker_count {
            let receiver = receiver.clone();
            let context = context.clone();
            let mut stop_rx = stop_tx.subscribe();

            worker_handles.push(tokio::spawn(async move {
                loop {
                    let item = tokio::select! {
                        item = async {
                            let mut guard = receiver.lock().await;
                            guard.recv().await
                        } => item,
                        _ = stop_rx.changed() => None,
                    };

                    let Some(item) = item else { break };
                    run_job(&context, item).await;
                }
            }));
        }

        Arc::new(Self {
            jobs: Mutex::new(HashMap::new()),
            sender,
            stop_tx,
            worker_handles: Mutex::new(worker_handles),
            clock,
        })
    }

    /// Idempotent per session id: a job already `Queued` or `Running`
    /// is returned unchanged rather than duplicated.
    pub fn submit(&self, session_id: &str, model: &str, messages: Vec<Value>) -> Arc<JobHandle> {
        let mut jobs = self.jobs.lock().unwrap();

        if let Some(existing) = jobs.get(session_id) {
            match existing.status() {
                JobStatus::Queued | JobStatus::Running => return existing.clone(),
                _ => {}
            }
        }

        let handle = JobHandle::new(self.clock.as_ref());
        jobs.insert(session_id.to_string(), handle.clone());
        drop(jobs);

        let item = WorkItem { session_id: session_id.to_string(), model: model.to_string(), messages, handle: handle.clone() };

        if let Err(mpsc::error::TrySendError::Full(_)) = self.sender.try_send(item) {
            handle.fail(self.clock.as_ref(), CompactorError::QueueFull.to_string());
        }

        handle
    }

    /// Blocks until `session_id`'s job signals done or `timeout`
    /// elapses, returning whether it closed in time.
    pub async fn wait(&self, session_id: &str, timeout: Duration) -> bool {
        let Some(handle) = self.jobs.lock().unwrap().get(session_id).cloned() else {
            return false;
        };

        let mut rx = handle.done_tx.subscribe();
        if *rx.borrow() {
            return true;
        }

        tokio::time::timeout(timeout, rx.wait_for(|&done| done)).await.is_ok()
    }

    /// Signals every worker to stop after its current job and joins
    /// them. New submissions after this call are accepted into the
    /// queue but will never be picked up. Any job still `Queued` or
    /// `Running` once the workers have drained is marked `Cancelled`.
    pub async fn stop(&self) {
        let _ = self.stop_tx.send(true);
        let handles = std::mem::take(&mut *self.worker_handles.lock().unwrap());
        for handle in handles {
            let _ = handle.await;
        }

        let jobs = self.jobs.lock().unwrap();
        for job in jobs.values() {
            if matches!(job.status(), JobStatus::Queued | JobStatus::Running) {
                job.cancel(self.clock.as_ref());
            }
        }
    }
}

async fn run_job(context: &WorkerContext, item: WorkItem) {
    item.handle.start(context.clock.as_ref());

    if context.sessions.trigger(&item.session_id).is_err() {
        item.handle.fail(context.clock.as_ref(), CompactorError::SessionNotFound(item.session_id.clone()).to_string());
        return;
    }

    let window = model_window::lookup(&item.model, context.test_context_window_override);

    let result = tokio::time::timeout(
        JOB_TIMEOUT,
        context
            .summarizer
            .summarize(&item.messages, context.trigger_threshold, window.effective_max(), context.token_estimate_ratio),
    )
    .await;

    match result {
        Ok(Ok(summary)) => {
            let _ = context.sessions.set_summary_ready(
                &item.session_id,
                summary.summary,
                summary.summary_tokens,
                summary.last_summarized_index,
                item.messages.len(),
            );

            let _ = context.event_log.write(
                EventKind::PreemptiveComplete,
                Some(&item.session_id),
                Some(&item.model),
                json!({
                    "last_summarized_index": summary.last_summarized_index,
                    "summary_tokens": summary.summary_tokens,
                    "input_tokens": summary.input_tokens,
                    "output_tokens": summary.output_tokens,
                    "duration_ms": summary.duration.as_millis(),
                }),
            );

            item.handle.succeed(context.clock.as_ref(), summary.summary, summary.summary_tokens, summary.last_summarized_index);
        }
        Ok(Err(err)) => {
            let _ = context.sessions.fail(&item.session_id);

            let kind = if err.is_skip() { EventKind::PreemptiveSkip } else { EventKind::PreemptiveError };
            let _ = context
                .event_log
                .write(kind, Some(&item.session_id), Some(&item.model), json!({"reason": err.to_string()}));

            item.handle.fail(context.clock.as_ref(), err.to_string());
        }
        Err(_elapsed) => {
            let _ = context.sessions.fail(&item.session_id);
            let _ = context.event_log.write(
                EventKind::PreemptiveError,
                Some(&item.session_id),
                Some(&item.model),
                json!({"reason": CompactorError::Timeout.to_string()}),
            );
            item.handle.fail(context.clock.as_ref(), CompactorError::Timeout.to_string());
        }
    }
}
