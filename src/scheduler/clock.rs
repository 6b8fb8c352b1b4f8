//! Time source abstraction.
//!
//! The scheduler never reads the wall clock or sets timers directly; it
//! goes through this trait so tests can run on manual time.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::Notify;

#[async_trait]
pub trait Clock: Send + Sync + 'static {
    /// Monotonic milliseconds. The zero point is the clock's own origin,
    /// not the unix epoch.
    fn now_ms(&self) -> u64;

    async fn sleep_ms(&self, ms: u64);
}

/// Real time via the tokio timer.
pub struct TokioClock {
    origin: Instant,
}

impl TokioClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Clock for TokioClock {
    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }

    async fn sleep_ms(&self, ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }
}

/// Test clock that only moves when told to.
///
/// Sleepers park on a notify and re-check the deadline after every
/// `advance`, so a test drives the scheduler forward step by step.
#[derive(Default)]
pub struct ManualClock {
    now: Mutex<u64>,
    tick: Notify,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn starting_at(start_ms: u64) -> Self {
        Self {
            now: Mutex::new(start_ms),
            tick: Notify::new(),
        }
    }

    pub fn advance(&self, ms: u64) {
        {
            let mut now = self.now.lock().unwrap();
            *now = now.saturating_add(ms);
        }
        self.tick.notify_waiters();
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        *self.now.lock().unwrap()
    }

    async fn sleep_ms(&self, ms: u64) {
        let deadline = self.now_ms().saturating_add(ms);
        loop {
            let notified = self.tick.notified();
            if self.now_ms() >= deadline {
                return;
            }
            notified.await;
        }
    }
}
