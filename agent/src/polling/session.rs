//! Per-subject polling session state.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use earnwatch_core::snapshot::Snapshot;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Mutable part of a session, guarded by a std mutex.
///
/// Cycles publish while holding this lock, so closing the gate in
/// [`SessionShared::deactivate`] fences off every later publish.
#[derive(Debug)]
pub(crate) struct SessionState {
    pub active: bool,
    pub last_snapshot: Option<Snapshot>,
}

/// State shared between the manager and the session's polling task.
pub(crate) struct SessionShared {
    pub subject: String,
    pub interval: Duration,
    /// Held for the whole fetch-compare-publish cycle so scheduled and
    /// manual cycles for one subject never overlap.
    pub cycle_lock: tokio::sync::Mutex<()>,
    state: Mutex<SessionState>,
}

impl SessionShared {
    pub fn new(subject: String, interval: Duration) -> Self {
        Self {
            subject,
            interval,
            cycle_lock: tokio::sync::Mutex::new(()),
            state: Mutex::new(SessionState {
                active: true,
                last_snapshot: None,
            }),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_active(&self) -> bool {
        self.lock_state().active
    }

    pub fn deactivate(&self) {
        self.lock_state().active = false;
    }

    pub fn last_snapshot(&self) -> Option<Snapshot> {
        self.lock_state().last_snapshot.clone()
    }

    pub fn last_updated(&self) -> Option<DateTime<Utc>> {
        self.lock_state().last_snapshot.as_ref().map(|s| s.fetched_at)
    }

    /// Run `f` under the state lock if the session is still active.
    ///
    /// Returns `false` (without calling `f`) once the session was stopped.
    pub fn commit(&self, f: impl FnOnce(&mut SessionState)) -> bool {
        let mut state = self.lock_state();
        if !state.active {
            return false;
        }
        f(&mut state);
        true
    }
}

/// An active polling session owned by the manager's map.
pub(crate) struct Session {
    pub shared: Arc<SessionShared>,
    pub cancel: CancellationToken,
    pub join_handle: JoinHandle<()>,
}

impl Session {
    /// Close the publish gate, cancel the timer task and wait for it to
    /// finish.
    pub async fn shutdown(self) {
        self.shared.deactivate();
        self.cancel.cancel();
        self.join_handle.abort();
        if let Err(e) = self.join_handle.await {
            if !e.is_cancelled() {
                debug!(
                    "Polling task for '{}' ended abnormally: {}",
                    self.shared.subject, e
                );
            }
        }
    }
}

/// Externally visible view of an active session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    pub subject: String,
    pub interval_ms: u64,
    pub last_updated: Option<DateTime<Utc>>,
}
