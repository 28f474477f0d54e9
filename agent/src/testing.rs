//! Test doubles shared by the agent's unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use earnwatch_core::config::EngineConfig;
use earnwatch_core::errors::FetchError;
use earnwatch_core::snapshot::{EarningsStatus, Period, Snapshot, SourceReport};
use earnwatch_core::source::{SnapshotSource, SystemClock};
use earnwatch_core::store::MemoryStore;

use crate::engine::Engine;

/// What the scripted source does on one call.
#[derive(Debug, Clone)]
pub enum Step {
    Reply(SourceReport),
    Fail(FetchError),
    /// Never answer; the engine's fetch timeout has to fire.
    Stall,
}

/// Source that replays a script, then repeats a fallback step.
///
/// Tracks total calls and the peak number of calls in flight at once.
pub struct ScriptedSource {
    script: Mutex<VecDeque<Step>>,
    fallback: Mutex<Step>,
    delay: Duration,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

struct InFlight<'a>(&'a ScriptedSource);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ScriptedSource {
    pub fn new(fallback: Step) -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Mutex::new(fallback),
            delay: Duration::ZERO,
            calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
        }
    }

    /// Answer every call with `released_report()`.
    pub fn released() -> Self {
        Self::new(Step::Reply(released_report()))
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn push(&self, step: Step) {
        self.script.lock().unwrap().push_back(step);
    }

    pub fn set_fallback(&self, step: Step) {
        *self.fallback.lock().unwrap() = step;
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    fn next_step(&self) -> Step {
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| self.fallback.lock().unwrap().clone())
    }

    /// Wait (in paused test time) until at least `n` calls started.
    pub async fn wait_for_calls(&self, n: usize) {
        for _ in 0..10_000 {
            if self.calls() >= n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        panic!("source saw {} calls, expected {}", self.calls(), n);
    }
}

#[async_trait::async_trait]
impl SnapshotSource for ScriptedSource {
    async fn fetch(&self, subject: &str) -> Result<Snapshot, FetchError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let _guard = InFlight(self);
        self.peak_in_flight.fetch_max(now, Ordering::SeqCst);
        self.calls.fetch_add(1, Ordering::SeqCst);

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        match self.next_step() {
            Step::Reply(report) => {
                Ok(report.into_snapshot(subject, Period::new("Q3", "FY2025"), Utc::now()))
            }
            Step::Fail(e) => Err(e),
            Step::Stall => std::future::pending().await,
        }
    }
}

/// `{status: released, revenue: $9.44B, eps: $2.41}`.
pub fn released_report() -> SourceReport {
    let mut report = SourceReport {
        status: EarningsStatus::Released,
        ..Default::default()
    };
    report.metrics.revenue_actual = Some("$9.44B".into());
    report.metrics.eps_actual = Some("$2.41".into());
    report
}

/// Config with short timings for paused-clock tests.
pub fn test_config() -> EngineConfig {
    EngineConfig {
        default_interval_ms: 60_000,
        min_interval_ms: 1_000,
        fetch_timeout_ms: 5_000,
        heartbeat_interval_ms: 30_000,
        ..Default::default()
    }
}

/// Engine over `source` with an in-memory store.
pub fn test_engine(source: Arc<ScriptedSource>) -> (Arc<Engine>, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let engine = Engine::new(
        test_config(),
        source,
        Some(store.clone()),
        Arc::new(SystemClock),
    );
    (Arc::new(engine), store)
}
