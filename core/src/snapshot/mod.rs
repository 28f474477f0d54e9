//! Earnings snapshot data model.
//!
//! A [`Snapshot`] is the result of one fetch for one subject. It is replaced
//! wholesale on every cycle and never merged with its predecessor.

pub mod change;
pub mod period;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use change::has_material_change;
pub use period::{FiscalCalendar, Period};

/// Reporting status of a subject for the current period.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EarningsStatus {
    Pending,
    InProgress,
    Released,
    #[default]
    Unknown,
}

impl EarningsStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Released => "released",
            Self::Unknown => "unknown",
        }
    }
}

/// Scalar earnings metrics extracted by the source adapter.
///
/// Every field is optional: `None` means "not yet known", never zero.
/// Values are kept as the source renders them (e.g. `"$9.44B"`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EarningsMetrics {
    #[serde(default)]
    pub revenue_actual: Option<String>,
    #[serde(default)]
    pub revenue_expected: Option<String>,
    #[serde(default)]
    pub revenue_beat_miss: Option<String>,
    #[serde(default)]
    pub revenue_yoy: Option<String>,
    #[serde(default)]
    pub eps_actual: Option<String>,
    #[serde(default)]
    pub eps_expected: Option<String>,
    #[serde(default)]
    pub eps_beat_miss: Option<String>,
    #[serde(default)]
    pub eps_yoy: Option<String>,
    #[serde(default)]
    pub guidance_direction: Option<String>,
    #[serde(default)]
    pub guidance_notes: Option<String>,
    #[serde(default)]
    pub market_reaction: Option<String>,
    #[serde(default)]
    pub analyst_reaction: Option<String>,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub headlines: Vec<String>,
}

impl EarningsMetrics {
    /// Whether any metric carries a value.
    pub fn any_known(&self) -> bool {
        let scalars = [
            &self.revenue_actual,
            &self.revenue_expected,
            &self.revenue_beat_miss,
            &self.revenue_yoy,
            &self.eps_actual,
            &self.eps_expected,
            &self.eps_beat_miss,
            &self.eps_yoy,
            &self.guidance_direction,
            &self.guidance_notes,
            &self.market_reaction,
            &self.analyst_reaction,
            &self.summary,
        ];
        scalars.iter().any(|v| v.is_some()) || !self.headlines.is_empty()
    }
}

/// One fetch result for one subject at one point in time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub subject: String,
    pub period: Period,
    pub status: EarningsStatus,
    pub fetched_at: DateTime<Utc>,
    #[serde(flatten)]
    pub metrics: EarningsMetrics,
}

impl Snapshot {
    /// Build a snapshot with no metrics known yet.
    pub fn new(
        subject: impl Into<String>,
        period: Period,
        status: EarningsStatus,
        fetched_at: DateTime<Utc>,
    ) -> Self {
        Self {
            subject: subject.into(),
            period,
            status,
            fetched_at,
            metrics: EarningsMetrics::default(),
        }
    }

    /// Degraded snapshot standing in for a failed fetch.
    ///
    /// Status is `unknown` and the summary carries the failure text.
    pub fn unavailable(
        subject: impl Into<String>,
        period: Period,
        fetched_at: DateTime<Utc>,
        message: &str,
    ) -> Self {
        let mut snapshot = Self::new(subject, period, EarningsStatus::Unknown, fetched_at);
        snapshot.metrics.summary = Some(format!("Fetch failed: {message}"));
        snapshot
    }

    /// Whether this snapshot says anything worth persisting.
    ///
    /// `unknown` status with every metric empty means nothing was learned.
    pub fn has_signal(&self) -> bool {
        self.status != EarningsStatus::Unknown || self.metrics.any_known()
    }
}

/// Structured payload a source returns for one subject.
///
/// Sources answer with status and metrics only; the engine stamps subject,
/// period and fetch time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceReport {
    #[serde(default)]
    pub status: EarningsStatus,
    #[serde(flatten)]
    pub metrics: EarningsMetrics,
}

impl SourceReport {
    pub fn into_snapshot(
        self,
        subject: impl Into<String>,
        period: Period,
        fetched_at: DateTime<Utc>,
    ) -> Snapshot {
        Snapshot {
            subject: subject.into(),
            period,
            status: self.status,
            fetched_at,
            metrics: self.metrics,
        }
    }
}
