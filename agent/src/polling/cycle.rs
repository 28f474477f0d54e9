//! The fetch-compare-publish cycle shared by scheduled and manual paths.

use std::sync::Arc;
use std::time::Duration;

use earnwatch_core::errors::FetchError;
use earnwatch_core::events::PollEvent;
use earnwatch_core::snapshot::{has_material_change, FiscalCalendar, Snapshot};
use earnwatch_core::source::{Clock, SnapshotSource};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::session::SessionShared;
use crate::bridge::PersistenceBridge;
use crate::bus::EventBus;

/// Result of one cycle after change detection.
#[derive(Debug, Clone)]
pub(crate) enum CycleOutcome {
    Fetched { snapshot: Snapshot, changed: bool },
    /// The source failed; `snapshot` is the degraded stand-in.
    Failed { snapshot: Snapshot, message: String },
}

impl CycleOutcome {
    pub fn into_snapshot(self) -> Snapshot {
        match self {
            Self::Fetched { snapshot, .. } | Self::Failed { snapshot, .. } => snapshot,
        }
    }
}

/// Everything a cycle needs, shared by the manager and all polling tasks.
pub(crate) struct CycleContext {
    pub source: Arc<dyn SnapshotSource>,
    pub bus: EventBus,
    pub clock: Arc<dyn Clock>,
    pub calendar: FiscalCalendar,
    pub fetch_timeout: Duration,
    pub bridge: PersistenceBridge,
    pub persist_changes: bool,
}

impl CycleContext {
    /// Call the source, bounded by the fetch timeout.
    pub async fn fetch(&self, subject: &str) -> Result<Snapshot, FetchError> {
        match tokio::time::timeout(self.fetch_timeout, self.source.fetch(subject)).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout(self.fetch_timeout.as_millis() as u64)),
        }
    }

    /// Run change detection, or build the degraded snapshot on failure.
    pub fn evaluate(
        &self,
        subject: &str,
        previous: Option<&Snapshot>,
        result: Result<Snapshot, FetchError>,
    ) -> CycleOutcome {
        match result {
            Ok(mut snapshot) => {
                if snapshot.subject != subject {
                    debug!(
                        "Source answered '{}' as '{}', keeping session key",
                        subject, snapshot.subject
                    );
                    snapshot.subject = subject.to_string();
                }
                let changed = has_material_change(previous, &snapshot);
                CycleOutcome::Fetched { snapshot, changed }
            }
            Err(e) => {
                let message = e.to_string();
                warn!("Fetch failed for '{}': {}", subject, message);
                let now = self.clock.now();
                let period = self.calendar.period_for(subject, now);
                CycleOutcome::Failed {
                    snapshot: Snapshot::unavailable(subject, period, now, &message),
                    message,
                }
            }
        }
    }

    /// Publish the events for `outcome`.
    ///
    /// Success: `update`, then `change` if material. Failure: `error` only.
    /// Manual cycles additionally end with `manual_refresh`.
    pub fn publish(&self, outcome: &CycleOutcome, manual: bool) {
        match outcome {
            CycleOutcome::Fetched { snapshot, changed } => {
                self.bus.publish(PollEvent::Update {
                    snapshot: snapshot.clone(),
                });
                if *changed {
                    debug!("Material change for '{}'", snapshot.subject);
                    self.bus.publish(PollEvent::Change {
                        snapshot: snapshot.clone(),
                    });
                }
            }
            CycleOutcome::Failed { snapshot, message } => {
                self.bus.publish(PollEvent::Error {
                    subject: snapshot.subject.clone(),
                    message: message.clone(),
                    timestamp: snapshot.fetched_at,
                });
            }
        }
        if manual {
            let snapshot = match outcome {
                CycleOutcome::Fetched { snapshot, .. } | CycleOutcome::Failed { snapshot, .. } => {
                    snapshot.clone()
                }
            };
            self.bus.publish(PollEvent::ManualRefresh { snapshot });
        }
    }
}

/// Background task that repeats the cycle every `shared.interval`.
///
/// The first cycle runs immediately and is followed by `polling_started`.
/// A cycle that outlasts the interval causes the missed ticks to be skipped
/// rather than run back to back.
pub(crate) async fn polling_task(
    ctx: Arc<CycleContext>,
    shared: Arc<SessionShared>,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(shared.interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    ticker.tick().await;
    run_scheduled_cycle(&ctx, &shared, &cancel).await;
    shared.commit(|_| {
        ctx.bus.publish(PollEvent::PollingStarted {
            subject: shared.subject.clone(),
            interval_ms: shared.interval.as_millis() as u64,
        });
    });

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("Polling task for '{}' cancelled", shared.subject);
                break;
            }
            _ = ticker.tick() => {
                run_scheduled_cycle(&ctx, &shared, &cancel).await;
            }
        }
    }
}

async fn run_scheduled_cycle(ctx: &CycleContext, shared: &SessionShared, cancel: &CancellationToken) {
    let _cycle = shared.cycle_lock.lock().await;
    let previous = shared.last_snapshot();

    let result = tokio::select! {
        _ = cancel.cancelled() => {
            debug!("In-flight fetch for '{}' cancelled by stop", shared.subject);
            return;
        }
        result = ctx.fetch(&shared.subject) => result,
    };

    let outcome = ctx.evaluate(&shared.subject, previous.as_ref(), result);

    let committed = shared.commit(|state| {
        ctx.publish(&outcome, false);
        if let CycleOutcome::Fetched { snapshot, .. } = &outcome {
            state.last_snapshot = Some(snapshot.clone());
        }
    });
    if !committed {
        debug!("Discarding result for stopped session '{}'", shared.subject);
        return;
    }

    if ctx.persist_changes {
        if let CycleOutcome::Fetched {
            snapshot,
            changed: true,
        } = &outcome
        {
            ctx.bridge.persist(snapshot).await;
        }
    }
}
