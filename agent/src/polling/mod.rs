//! Session Manager: per-subject polling sessions.
//!
//! Each session spawns a background tokio task that repeats the
//! fetch-compare-publish cycle at the session's interval. At most one
//! session exists per subject; starting an active subject replaces it.
//!
//! Stopping a session closes its publish gate, cancels its token and
//! aborts its task. A fetch that is in flight at that moment is dropped at
//! its await point; if it already returned, its result is discarded by the
//! closed gate. Either way nothing is published for the subject after
//! `polling_stopped`.

mod cycle;
mod session;

use std::collections::HashMap;
use std::sync::Arc;

use earnwatch_core::config::EngineConfig;
use earnwatch_core::errors::{CoreError, PollingError};
use earnwatch_core::events::PollEvent;
use earnwatch_core::snapshot::{EarningsStatus, Snapshot};
use earnwatch_core::source::{Clock, SnapshotSource};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use self::cycle::{polling_task, CycleContext, CycleOutcome};
use self::session::{Session, SessionShared};
use crate::bridge::PersistenceBridge;
use crate::bus::EventBus;

pub use self::session::SessionStatus;

/// Trim a subject and reject empty ones.
fn normalize_subject(subject: &str) -> Result<String, PollingError> {
    let subject = subject.trim();
    if subject.is_empty() {
        return Err(PollingError::EmptySubject);
    }
    Ok(subject.to_string())
}

/// Owns the map of active polling sessions.
pub struct PollingManager {
    sessions: Mutex<HashMap<String, Session>>,
    ctx: Arc<CycleContext>,
    config: EngineConfig,
}

impl PollingManager {
    pub fn new(
        config: &EngineConfig,
        source: Arc<dyn SnapshotSource>,
        bus: EventBus,
        clock: Arc<dyn Clock>,
        bridge: PersistenceBridge,
    ) -> Self {
        let ctx = CycleContext {
            source,
            bus,
            clock,
            calendar: config.fiscal_calendar.clone(),
            fetch_timeout: config.fetch_timeout(),
            bridge,
            persist_changes: config.persist_changes,
        };
        Self {
            sessions: Mutex::new(HashMap::new()),
            ctx: Arc::new(ctx),
            config: config.clone(),
        }
    }

    /// Start polling `subject`.
    ///
    /// An existing session for the subject is stopped first. The first
    /// cycle runs as soon as the new task is scheduled and
    /// `polling_started` is published right after its events, so the call
    /// returns while fresh data is already in flight. Returns the active
    /// subjects.
    pub async fn start(
        &self,
        subject: &str,
        interval_ms: Option<i64>,
    ) -> Result<Vec<String>, PollingError> {
        let subject = normalize_subject(subject)?;
        let interval = self.config.resolve_interval(interval_ms)?;

        let mut sessions = self.sessions.lock().await;
        if let Some(old) = sessions.remove(&subject) {
            old.shutdown().await;
            self.ctx.bus.publish(PollEvent::PollingStopped {
                subject: subject.clone(),
            });
            debug!("Replaced existing polling session for '{subject}'");
        }

        let shared = Arc::new(SessionShared::new(subject.clone(), interval));
        let cancel = CancellationToken::new();

        let join_handle = tokio::spawn(polling_task(
            self.ctx.clone(),
            shared.clone(),
            cancel.clone(),
        ));

        info!(
            "Started polling '{}' (interval: {}ms)",
            subject,
            interval.as_millis()
        );

        sessions.insert(
            subject,
            Session {
                shared,
                cancel,
                join_handle,
            },
        );

        Ok(sorted_keys(&sessions))
    }

    /// Stop polling `subject`. A subject without a session is a no-op.
    ///
    /// Returns the subjects still active.
    pub async fn stop(&self, subject: &str) -> Result<Vec<String>, PollingError> {
        let subject = normalize_subject(subject)?;

        let mut sessions = self.sessions.lock().await;
        match sessions.remove(&subject) {
            Some(session) => {
                session.shutdown().await;
                self.ctx.bus.publish(PollEvent::PollingStopped {
                    subject: subject.clone(),
                });
                info!("Stopped polling '{subject}'");
            }
            None => debug!("Stop requested for '{subject}' with no active session"),
        }

        Ok(sorted_keys(&sessions))
    }

    /// One entry per active session, sorted by subject.
    pub async fn status(&self) -> Vec<SessionStatus> {
        let sessions = self.sessions.lock().await;
        let mut entries: Vec<SessionStatus> = sessions
            .values()
            .filter(|s| s.shared.is_active())
            .map(|s| SessionStatus {
                subject: s.shared.subject.clone(),
                interval_ms: s.shared.interval.as_millis() as u64,
                last_updated: s.shared.last_updated(),
            })
            .collect();
        entries.sort_by(|a, b| a.subject.cmp(&b.subject));
        entries
    }

    pub async fn active_subjects(&self) -> Vec<String> {
        sorted_keys(&*self.sessions.lock().await)
    }

    pub async fn active_count(&self) -> usize {
        self.sessions.lock().await.len()
    }

    /// Run one cycle now, with or without an active session.
    ///
    /// With a session, the cycle is serialized behind any scheduled cycle
    /// and replaces the session's last snapshot. Without one, change
    /// detection starts cold. Publishes `manual_refresh` and persists the
    /// result when `persist` is set and the status is known.
    ///
    /// If the session is stopped while the fetch is in flight, the snapshot
    /// is still returned but nothing is published or persisted.
    pub async fn manual_refresh(
        &self,
        subject: &str,
        persist: bool,
    ) -> Result<Snapshot, PollingError> {
        let subject = normalize_subject(subject)?;

        let shared = self
            .sessions
            .lock()
            .await
            .get(&subject)
            .map(|s| s.shared.clone());

        let outcome = match shared {
            Some(shared) => {
                let _cycle = shared.cycle_lock.lock().await;
                let previous = shared.last_snapshot();
                let result = self.ctx.fetch(&subject).await;
                let outcome = self.ctx.evaluate(&subject, previous.as_ref(), result);
                let committed = shared.commit(|state| {
                    self.ctx.publish(&outcome, true);
                    if let CycleOutcome::Fetched { snapshot, .. } = &outcome {
                        state.last_snapshot = Some(snapshot.clone());
                    }
                });
                if !committed {
                    debug!("Session for '{subject}' stopped during manual refresh, result not published");
                    return Ok(outcome.into_snapshot());
                }
                outcome
            }
            None => {
                debug!("Manual refresh for '{subject}' without a session (cold start)");
                let result = self.ctx.fetch(&subject).await;
                let outcome = self.ctx.evaluate(&subject, None, result);
                self.ctx.publish(&outcome, true);
                outcome
            }
        };

        let snapshot = outcome.into_snapshot();
        if persist && snapshot.status != EarningsStatus::Unknown {
            self.ctx.bridge.persist(&snapshot).await;
        }
        Ok(snapshot)
    }

    /// Fetch once without touching sessions, events or the store.
    pub async fn fetch_once(&self, subject: &str) -> Result<Snapshot, CoreError> {
        let subject = normalize_subject(subject)?;
        Ok(self.ctx.fetch(&subject).await?)
    }

    /// Stop every session (agent shutdown).
    pub async fn shutdown(&self) {
        let mut sessions = self.sessions.lock().await;
        for (subject, session) in sessions.drain() {
            session.shutdown().await;
            self.ctx.bus.publish(PollEvent::PollingStopped {
                subject: subject.clone(),
            });
            debug!("Shutdown: stopped polling '{subject}'");
        }
    }
}

fn sorted_keys(sessions: &HashMap<String, Session>) -> Vec<String> {
    let mut keys: Vec<String> = sessions.keys().cloned().collect();
    keys.sort();
    keys
}
