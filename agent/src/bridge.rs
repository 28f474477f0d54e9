//! Persistence Bridge: hands snapshots to the durable store.
//!
//! Store failures are logged and swallowed; they never reach the fetch
//! cycle or the events already published.

use std::sync::Arc;

use earnwatch_core::snapshot::Snapshot;
use earnwatch_core::store::{EarningsRecord, SnapshotStore};
use tracing::{debug, warn};

#[derive(Clone)]
pub struct PersistenceBridge {
    store: Option<Arc<dyn SnapshotStore>>,
}

impl PersistenceBridge {
    pub fn new(store: Arc<dyn SnapshotStore>) -> Self {
        Self { store: Some(store) }
    }

    /// A bridge that never persists.
    pub fn disabled() -> Self {
        Self { store: None }
    }

    /// Upsert `snapshot` unless it carries no signal.
    ///
    /// Returns the stored record, or `None` when skipped or on failure.
    pub async fn persist(&self, snapshot: &Snapshot) -> Option<EarningsRecord> {
        let store = self.store.as_ref()?;

        if !snapshot.has_signal() {
            debug!(
                "Skipping persistence for '{}' ({}): nothing learned yet",
                snapshot.subject, snapshot.period
            );
            return None;
        }

        match store.upsert(snapshot).await {
            Ok(record) => {
                debug!(
                    "Persisted '{}' {} (revision {})",
                    record.subject, record.period, record.revision
                );
                Some(record)
            }
            Err(e) => {
                warn!(
                    "Failed to persist '{}' {}: {}",
                    snapshot.subject, snapshot.period, e
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use earnwatch_core::errors::PersistenceError;
    use earnwatch_core::snapshot::{EarningsStatus, Period};
    use earnwatch_core::store::MemoryStore;

    fn snapshot(status: EarningsStatus) -> Snapshot {
        let at = Utc.with_ymd_and_hms(2025, 10, 20, 14, 30, 0).unwrap();
        Snapshot::new("Acme", Period::new("Q3", "FY2025"), status, at)
    }

    struct FailingStore;

    #[async_trait::async_trait]
    impl SnapshotStore for FailingStore {
        async fn upsert(&self, _: &Snapshot) -> Result<EarningsRecord, PersistenceError> {
            Err(PersistenceError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "disk full",
            )))
        }

        async fn get(&self, _: &str, _: &Period) -> Option<EarningsRecord> {
            None
        }
    }

    #[tokio::test]
    async fn persists_snapshot_with_signal() {
        let store = Arc::new(MemoryStore::new());
        let bridge = PersistenceBridge::new(store.clone());

        let record = bridge.persist(&snapshot(EarningsStatus::Released)).await;
        assert_eq!(record.map(|r| r.revision), Some(1));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn skips_snapshot_without_signal() {
        let store = Arc::new(MemoryStore::new());
        let bridge = PersistenceBridge::new(store.clone());

        assert!(bridge.persist(&snapshot(EarningsStatus::Unknown)).await.is_none());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn store_failure_is_swallowed() {
        let bridge = PersistenceBridge::new(Arc::new(FailingStore));
        assert!(bridge.persist(&snapshot(EarningsStatus::Released)).await.is_none());
    }

    #[tokio::test]
    async fn disabled_bridge_never_persists() {
        let bridge = PersistenceBridge::disabled();
        assert!(bridge.persist(&snapshot(EarningsStatus::Released)).await.is_none());
    }
}
