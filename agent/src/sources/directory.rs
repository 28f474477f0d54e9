//! Source backed by a directory of JSON report files.

use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;

use earnwatch_core::errors::FetchError;
use earnwatch_core::snapshot::{FiscalCalendar, Snapshot, SourceReport};
use earnwatch_core::source::{Clock, SnapshotSource};
use tracing::debug;

use super::slug;

/// Reads `<root>/<slug>.json` on every fetch, so edits to the files show
/// up on the next poll.
pub struct DirectorySource {
    root: PathBuf,
    calendar: FiscalCalendar,
    clock: Arc<dyn Clock>,
}

impl DirectorySource {
    pub fn new(root: PathBuf, calendar: FiscalCalendar, clock: Arc<dyn Clock>) -> Self {
        Self {
            root,
            calendar,
            clock,
        }
    }

    /// Report file for `subject`; `None` when the subject has no
    /// alphanumeric characters to name a file after.
    pub fn path_for(&self, subject: &str) -> Option<PathBuf> {
        let slug = slug(subject);
        if slug.is_empty() {
            return None;
        }
        Some(self.root.join(format!("{slug}.json")))
    }
}

#[async_trait::async_trait]
impl SnapshotSource for DirectorySource {
    async fn fetch(&self, subject: &str) -> Result<Snapshot, FetchError> {
        let Some(path) = self.path_for(subject) else {
            debug!("Subject '{subject}' has no file name form");
            return Err(FetchError::NotFound(subject.to_string()));
        };
        debug!("Reading report for '{}' from {}", subject, path.display());

        let contents = match tokio::fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(FetchError::NotFound(subject.to_string()));
            }
            Err(e) => {
                return Err(FetchError::Transport(format!("{}: {e}", path.display())));
            }
        };

        let report: SourceReport = serde_json::from_str(&contents)
            .map_err(|e| FetchError::Malformed(format!("{}: {e}", path.display())))?;

        let now = self.clock.now();
        let period = self.calendar.period_for(subject, now);
        Ok(report.into_snapshot(subject, period, now))
    }
}
