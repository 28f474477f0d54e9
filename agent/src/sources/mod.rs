//! Concrete snapshot sources selected by the `source` config entry.

mod directory;
mod http;

use std::sync::Arc;

use earnwatch_core::config::{EngineConfig, SourceConfig};
use earnwatch_core::source::{Clock, SnapshotSource};
use tracing::info;

pub use directory::DirectorySource;
pub use http::HttpSource;

/// Build the source described by `source`.
pub fn build_source(
    source: &SourceConfig,
    config: &EngineConfig,
    clock: Arc<dyn Clock>,
) -> anyhow::Result<Arc<dyn SnapshotSource>> {
    let calendar = config.fiscal_calendar.clone();
    match source {
        SourceConfig::Http { base_url, api_key } => {
            info!("Using HTTP source at {base_url}");
            Ok(Arc::new(HttpSource::new(
                base_url,
                api_key.clone(),
                calendar,
                clock,
            )?))
        }
        SourceConfig::Directory { path } => {
            info!("Using directory source at {}", path.display());
            Ok(Arc::new(DirectorySource::new(path.clone(), calendar, clock)))
        }
    }
}

/// File-name form of a subject: lowercase ASCII alphanumerics, with every
/// other run of characters collapsed to a single `-`.
pub fn slug(subject: &str) -> String {
    let mut out = String::with_capacity(subject.len());
    for c in subject.trim().chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if !out.is_empty() && !out.ends_with('-') {
            out.push('-');
        }
    }
    while out.ends_with('-') {
        out.pop();
    }
    out
}
