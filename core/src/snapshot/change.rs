//! Material-change detection between consecutive snapshots.

use super::Snapshot;

/// Whether `next` differs materially from `previous`.
///
/// Tracked fields are the status, the actual revenue and EPS figures, and
/// the summary. Everything else (expectations, headlines, reactions, fetch
/// time) may drift between polls without notifying subscribers. `None` only
/// equals `None`.
pub fn has_material_change(previous: Option<&Snapshot>, next: &Snapshot) -> bool {
    let Some(prev) = previous else {
        return true;
    };

    prev.status != next.status
        || prev.metrics.revenue_actual != next.metrics.revenue_actual
        || prev.metrics.eps_actual != next.metrics.eps_actual
        || prev.metrics.summary != next.metrics.summary
}
