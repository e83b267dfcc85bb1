//! The one external collaborator every timed decision in this crate
//! goes through: a monotonic clock. Injecting it lets tests simulate
//! session age, TTL expiry, and worker timeouts without sleeping.

use std::sync::{Arc, Mutex};
use std::time::Instant;

pub trait Clock: Send + Sync {
    fn now(&self) -> Instant;
}

/// The real clock, backed by [`Instant::now`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

pub fn system_clock() -> Arc<dyn Clock> {
    Arc::new(SystemClock)
}

/// A clock that only advances when told to, for deterministic tests of
/// TTL cleanup, fuzzy-match recency scoring, and job timeouts.
#[derive(Debug)]
pub struct ManualClock {
    current: Mutex<Instant>,
}

impl ManualClock {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            current: Mutex::new(Instant::now()),
        })
    }

    pub fn advance(&self, duration: std::time::Duration) {
        let mut current = self.current.lock().unwrap();
        *current += duration;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.current.lock().unwrap()
    }
}
