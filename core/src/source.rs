//! Contracts the polling engine consumes: a snapshot source and a clock.

use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};

use crate::errors::FetchError;
use crate::snapshot::Snapshot;

/// Best-effort structured snapshot provider.
///
/// Implementations must tolerate repeated calls and concurrent calls for
/// different subjects. The engine bounds every call with its own timeout.
#[async_trait::async_trait]
pub trait SnapshotSource: Send + Sync {
    /// Fetch the current snapshot for `subject`.
    async fn fetch(&self, subject: &str) -> Result<Snapshot, FetchError>;
}

/// Wall-clock abstraction so fetch timestamps and periods are reproducible
/// under test.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// The real UTC clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn set(&self, at: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) = at;
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
