//! Fiscal period derivation.
//!
//! The period a snapshot belongs to is a pure function of the subject and
//! the fetch time: the most recently completed fiscal quarter, labelled with
//! the calendar year in which that fiscal year ends.

use std::collections::HashMap;

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};

/// Fiscal year-end months of well-known off-calendar filers.
const BUILTIN_YEAR_ENDS: &[(&str, u32)] = &[
    ("microsoft", 6),
    ("apple", 9),
    ("nvidia", 1),
    ("oracle", 5),
    ("walmart", 1),
    ("cisco", 7),
];

/// Reporting cycle plus fiscal year label, e.g. `Q3` / `FY2025`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Period {
    pub quarter: String,
    pub fiscal_year: String,
}

impl Period {
    pub fn new(quarter: impl Into<String>, fiscal_year: impl Into<String>) -> Self {
        Self {
            quarter: quarter.into(),
            fiscal_year: fiscal_year.into(),
        }
    }
}

impl std::fmt::Display for Period {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.quarter, self.fiscal_year)
    }
}

/// Per-subject fiscal year-end months.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FiscalCalendar {
    /// Year-end month (1-12) for subjects without an override.
    #[serde(default = "default_year_end_month")]
    pub default_year_end_month: u32,
    /// Subject (case-insensitive) to year-end month.
    #[serde(default)]
    pub overrides: HashMap<String, u32>,
}

impl Default for FiscalCalendar {
    fn default() -> Self {
        Self {
            default_year_end_month: default_year_end_month(),
            overrides: HashMap::new(),
        }
    }
}

fn default_year_end_month() -> u32 {
    12
}

impl FiscalCalendar {
    /// Fiscal year-end month for `subject`.
    ///
    /// Configured overrides win over the built-in table, which wins over
    /// the default.
    pub fn year_end_month(&self, subject: &str) -> u32 {
        let key = subject.trim().to_lowercase();
        if let Some(month) = self
            .overrides
            .iter()
            .find(|(name, _)| name.trim().to_lowercase() == key)
            .map(|(_, m)| *m)
        {
            return month;
        }
        BUILTIN_YEAR_ENDS
            .iter()
            .find(|(name, _)| *name == key)
            .map(|(_, m)| *m)
            .unwrap_or(self.default_year_end_month)
    }

    /// Most recently completed fiscal quarter for `subject` at `at`.
    pub fn period_for(&self, subject: &str, at: DateTime<Utc>) -> Period {
        let year_end = self.year_end_month(subject).clamp(1, 12) as i32;
        let month = at.month() as i32;
        let year = at.year();

        // Months elapsed since the current fiscal year started (0..=11).
        let offset = (month - (year_end + 1)).rem_euclid(12);
        let current_quarter = offset / 3;
        let current_fy = if month > year_end { year + 1 } else { year };

        if current_quarter == 0 {
            Period::new("Q4", format!("FY{}", current_fy - 1))
        } else {
            Period::new(
                format!("Q{current_quarter}"),
                format!("FY{current_fy}"),
            )
        }
    }

    /// Whether every configured month is in range.
    pub fn is_valid(&self) -> bool {
        (1..=12).contains(&self.default_year_end_month)
            && self.overrides.values().all(|m| (1..=12).contains(m))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn date(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 12, 0, 0).unwrap()
    }

    #[test]
    fn calendar_year_filer() {
        let cal = FiscalCalendar::default();
        assert_eq!(
            cal.period_for("Acme", date(2025, 10, 20)),
            Period::new("Q3", "FY2025")
        );
        assert_eq!(
            cal.period_for("Acme", date(2025, 4, 2)),
            Period::new("Q1", "FY2025")
        );
        assert_eq!(
            cal.period_for("Acme", date(2025, 7, 31)),
            Period::new("Q2", "FY2025")
        );
    }

    #[test]
    fn january_reports_previous_year_q4() {
        let cal = FiscalCalendar::default();
        assert_eq!(
            cal.period_for("Acme", date(2025, 1, 28)),
            Period::new("Q4", "FY2024")
        );
        assert_eq!(
            cal.period_for("Acme", date(2025, 3, 31)),
            Period::new("Q4", "FY2024")
        );
    }

    #[test]
    fn june_year_end_rolls_mid_calendar_year() {
        let cal = FiscalCalendar::default();
        assert_eq!(cal.year_end_month("Microsoft"), 6);
        assert_eq!(
            cal.period_for("Microsoft", date(2025, 10, 29)),
            Period::new("Q1", "FY2026")
        );
        assert_eq!(
            cal.period_for("microsoft", date(2025, 7, 30)),
            Period::new("Q4", "FY2025")
        );
        assert_eq!(
            cal.period_for("MICROSOFT", date(2025, 4, 24)),
            Period::new("Q3", "FY2025")
        );
    }

    #[test]
    fn january_year_end() {
        let cal = FiscalCalendar::default();
        assert_eq!(
            cal.period_for("NVIDIA", date(2025, 2, 26)),
            Period::new("Q4", "FY2025")
        );
        assert_eq!(
            cal.period_for("NVIDIA", date(2025, 5, 28)),
            Period::new("Q1", "FY2026")
        );
    }

    #[test]
    fn override_beats_builtin_and_default() {
        let mut cal = FiscalCalendar::default();
        cal.overrides.insert("Apple".into(), 12);
        cal.overrides.insert("Globex".into(), 3);
        assert_eq!(cal.year_end_month("apple"), 12);
        assert_eq!(cal.year_end_month(" Globex "), 3);
        assert_eq!(cal.year_end_month("Initech"), 12);
        assert_eq!(
            cal.period_for("Globex", date(2025, 5, 15)),
            Period::new("Q4", "FY2025")
        );
    }

    #[test]
    fn derivation_is_pure() {
        let cal = FiscalCalendar::default();
        let at = date(2025, 8, 1);
        assert_eq!(cal.period_for("Apple", at), cal.period_for("Apple", at));
    }

    #[test]
    fn validity_checks_month_range() {
        let mut cal = FiscalCalendar::default();
        assert!(cal.is_valid());
        cal.overrides.insert("Bad".into(), 13);
        assert!(!cal.is_valid());
        cal.overrides.clear();
        cal.default_year_end_month = 0;
        assert!(!cal.is_valid());
    }

    #[test]
    fn period_display() {
        assert_eq!(Period::new("Q2", "FY2026").to_string(), "Q2 FY2026");
    }
}
