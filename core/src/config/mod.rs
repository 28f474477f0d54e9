pub mod expand;

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{CoreError, PollingError};
use crate::snapshot::FiscalCalendar;

/// Where snapshots come from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum SourceConfig {
    /// JSON feed answering `GET <baseUrl>/<subject>`.
    #[serde(rename_all = "camelCase")]
    Http {
        base_url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        api_key: Option<String>,
    },
    /// Directory of `<slug>.json` report files.
    Directory { path: PathBuf },
}

/// Engine and agent configuration.
///
/// Every field has a default so an empty JSON object is a valid config.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    #[serde(default = "default_interval_ms")]
    pub default_interval_ms: u64,
    /// Positive intervals below this are raised to it.
    #[serde(default = "default_min_interval_ms")]
    pub min_interval_ms: u64,
    #[serde(default = "default_fetch_timeout_ms")]
    pub fetch_timeout_ms: u64,
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    /// Events a stream client may fall behind by before it is dropped.
    #[serde(default = "default_subscriber_buffer")]
    pub subscriber_buffer: usize,
    /// Persist snapshots whenever a scheduled cycle detects a material change.
    #[serde(default = "default_persist_changes")]
    pub persist_changes: bool,
    #[serde(default)]
    pub fiscal_calendar: FiscalCalendar,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<SourceConfig>,
    /// JSON-file durable store; in-memory when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub store_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub listen: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_interval_ms: default_interval_ms(),
            min_interval_ms: default_min_interval_ms(),
            fetch_timeout_ms: default_fetch_timeout_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            subscriber_buffer: default_subscriber_buffer(),
            persist_changes: default_persist_changes(),
            fiscal_calendar: FiscalCalendar::default(),
            source: None,
            store_path: None,
            listen: None,
        }
    }
}

impl EngineConfig {
    /// Load and validate a JSON config file.
    pub fn load(path: &Path) -> Result<Self, CoreError> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&contents)
            .map_err(|e| CoreError::Config(format!("{}: {e}", path.display())))?;
        let config = config.expand();
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<(), CoreError> {
        if self.fetch_timeout_ms == 0 {
            return Err(CoreError::Config("fetchTimeoutMs must be positive".into()));
        }
        if self.heartbeat_interval_ms == 0 {
            return Err(CoreError::Config(
                "heartbeatIntervalMs must be positive".into(),
            ));
        }
        if self.subscriber_buffer == 0 {
            return Err(CoreError::Config("subscriberBuffer must be positive".into()));
        }
        if self.default_interval_ms == 0 {
            return Err(CoreError::Config(
                "defaultIntervalMs must be positive".into(),
            ));
        }
        if self.default_interval_ms < self.min_interval_ms {
            return Err(CoreError::Config(format!(
                "defaultIntervalMs ({}) is below minIntervalMs ({})",
                self.default_interval_ms, self.min_interval_ms
            )));
        }
        if !self.fiscal_calendar.is_valid() {
            return Err(CoreError::Config(
                "fiscal year-end months must be in 1..=12".into(),
            ));
        }
        if let Some(SourceConfig::Http { base_url, .. }) = &self.source {
            if !(base_url.starts_with("http://") || base_url.starts_with("https://")) {
                return Err(CoreError::Config(format!(
                    "source baseUrl must be http(s): {base_url}"
                )));
            }
        }
        Ok(())
    }

    /// Return a copy with all `${env:...}` placeholders and `~` expanded.
    pub fn expand(mut self) -> Self {
        self.source = self.source.map(|source| match source {
            SourceConfig::Http { base_url, api_key } => SourceConfig::Http {
                base_url: expand::expand_env_placeholders(&base_url),
                api_key: api_key.map(|k| expand::expand_env_placeholders(&k)),
            },
            SourceConfig::Directory { path } => SourceConfig::Directory {
                path: expand_path(&path),
            },
        });
        self.store_path = self.store_path.map(|p| expand_path(&p));
        self
    }

    /// Resolve a requested interval.
    ///
    /// `None` selects the default; zero or negative values are rejected;
    /// positive values below the minimum are raised to it.
    pub fn resolve_interval(&self, requested_ms: Option<i64>) -> Result<Duration, PollingError> {
        let ms = match requested_ms {
            None => self.default_interval_ms,
            Some(ms) if ms <= 0 => return Err(PollingError::InvalidInterval(ms)),
            Some(ms) => (ms as u64).max(self.min_interval_ms),
        };
        Ok(Duration::from_millis(ms))
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }
}

fn expand_path(path: &Path) -> PathBuf {
    let raw = path.to_string_lossy();
    let with_env = expand::expand_env_placeholders(&raw);
    PathBuf::from(shellexpand::tilde(&with_env).into_owned())
}

// --- Default value functions ---

fn default_interval_ms() -> u64 {
    300_000
}

fn default_min_interval_ms() -> u64 {
    1_000
}

fn default_subscriber_buffer() -> usize {
    1024
}

fn default_fetch_timeout_ms() -> u64 {
    20_000
}

fn default_heartbeat_interval_ms() -> u64 {
    30_000
}

fn default_persist_changes() -> bool {
    true
}
