//! Durable snapshot stores keyed by `(subject, period)`.
//!
//! [`JsonFileStore`] keeps the whole table in memory and rewrites a pretty
//! JSON file after every upsert; [`MemoryStore`] is the same table without
//! the file.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::errors::PersistenceError;
use crate::snapshot::{EarningsMetrics, EarningsStatus, Period, Snapshot};

/// A persisted earnings row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EarningsRecord {
    pub subject: String,
    pub period: Period,
    pub status: EarningsStatus,
    #[serde(flatten)]
    pub metrics: EarningsMetrics,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Number of upserts applied to this row (1 after insert).
    pub revision: u32,
}

/// Idempotent upsert sink for snapshots.
#[async_trait::async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Insert or fully replace the row for `(snapshot.subject, snapshot.period)`.
    async fn upsert(&self, snapshot: &Snapshot) -> Result<EarningsRecord, PersistenceError>;

    /// Look up a row.
    async fn get(&self, subject: &str, period: &Period) -> Option<EarningsRecord>;
}

/// Serialized form: a flat list keeps the file readable.
#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreFile {
    records: Vec<EarningsRecord>,
}

type Table = BTreeMap<(String, Period), EarningsRecord>;

fn apply_upsert(table: &mut Table, snapshot: &Snapshot) -> EarningsRecord {
    let key = (snapshot.subject.clone(), snapshot.period.clone());
    let record = match table.get(&key) {
        Some(existing) => EarningsRecord {
            subject: snapshot.subject.clone(),
            period: snapshot.period.clone(),
            status: snapshot.status,
            metrics: snapshot.metrics.clone(),
            created_at: existing.created_at,
            updated_at: snapshot.fetched_at,
            revision: existing.revision + 1,
        },
        None => EarningsRecord {
            subject: snapshot.subject.clone(),
            period: snapshot.period.clone(),
            status: snapshot.status,
            metrics: snapshot.metrics.clone(),
            created_at: snapshot.fetched_at,
            updated_at: snapshot.fetched_at,
            revision: 1,
        },
    };
    table.insert(key, record.clone());
    record
}

/// In-process store; contents are lost on exit.
#[derive(Debug, Default)]
pub struct MemoryStore {
    table: Mutex<Table>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.table.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait::async_trait]
impl SnapshotStore for MemoryStore {
    async fn upsert(&self, snapshot: &Snapshot) -> Result<EarningsRecord, PersistenceError> {
        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(apply_upsert(&mut table, snapshot))
    }

    async fn get(&self, subject: &str, period: &Period) -> Option<EarningsRecord> {
        let table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        table.get(&(subject.to_string(), period.clone())).cloned()
    }
}

/// Store backed by a JSON file.
///
/// Upserts hold an async lock across the file write, so writes never
/// interleave and the table never runs ahead of the file.
pub struct JsonFileStore {
    path: PathBuf,
    table: tokio::sync::Mutex<Table>,
}

impl JsonFileStore {
    /// Open the store at `path`.
    ///
    /// A missing or corrupt file yields an empty store; the file is
    /// (re)written on the first upsert.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let table = Self::load_from(&path);
        Self {
            path,
            table: tokio::sync::Mutex::new(table),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load_from(path: &Path) -> Table {
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(_) => {
                debug!("No store file at {}", path.display());
                return Table::new();
            }
        };
        match serde_json::from_str::<StoreFile>(&contents) {
            Ok(file) => {
                debug!(
                    "Loaded {} earnings records from {}",
                    file.records.len(),
                    path.display()
                );
                file.records
                    .into_iter()
                    .map(|r| ((r.subject.clone(), r.period.clone()), r))
                    .collect()
            }
            Err(e) => {
                warn!("Failed to parse store file {}: {}", path.display(), e);
                Table::new()
            }
        }
    }

    async fn save_to(path: &Path, table: &Table) -> Result<(), PersistenceError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let file = StoreFile {
            records: table.values().cloned().collect(),
        };
        let json = serde_json::to_string_pretty(&file)?;
        tokio::fs::write(path, json).await?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl SnapshotStore for JsonFileStore {
    async fn upsert(&self, snapshot: &Snapshot) -> Result<EarningsRecord, PersistenceError> {
        let mut table = self.table.lock().await;
        let key = (snapshot.subject.clone(), snapshot.period.clone());
        let previous = table.get(&key).cloned();
        let record = apply_upsert(&mut table, snapshot);
        if let Err(e) = Self::save_to(&self.path, &table).await {
            // Keep memory and disk in agreement.
            match previous {
                Some(row) => {
                    table.insert(key, row);
                }
                None => {
                    table.remove(&key);
                }
            }
            return Err(e);
        }
        Ok(record)
    }

    async fn get(&self, subject: &str, period: &Period) -> Option<EarningsRecord> {
        let table = self.table.lock().await;
        table.get(&(subject.to_string(), period.clone())).cloned()
    }
}
