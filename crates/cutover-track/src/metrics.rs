//! Observability metrics for policy tracking.
//!
//! Exported via the `metrics` crate facade; install any compatible recorder
//! (for example `metrics-exporter-prometheus`) to publish them.
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `cutover_track_registrations_total` | Counter | `location` | Policy registrations by location |
//! | `cutover_track_transitions_total` | Counter | `from`, `to` | Status transitions applied |
//! | `cutover_track_transition_rejections_total` | Counter | `from`, `to` | Illegal transitions rejected |
//! | `cutover_track_validations_total` | Counter | `outcome` | Validation passes/failures |
//! | `cutover_track_reconciliations_total` | Counter | - | Reconciliation runs |
//! | `cutover_track_cas_retries_total` | Counter | - | Registry CAS retries |

use metrics::counter;

/// Metric names as constants for consistency.
pub mod names {
    /// Counter: Policy registrations by location.
    pub const REGISTRATIONS_TOTAL: &str = "cutover_track_registrations_total";
    /// Counter: Status transitions applied.
    pub const TRANSITIONS_TOTAL: &str = "cutover_track_transitions_total";
    /// Counter: Illegal transitions rejected.
    pub const TRANSITION_REJECTIONS_TOTAL: &str = "cutover_track_transition_rejections_total";
    /// Counter: Validation runs by outcome.
    pub const VALIDATIONS_TOTAL: &str = "cutover_track_validations_total";
    /// Counter: Reconciliation runs.
    pub const RECONCILIATIONS_TOTAL: &str = "cutover_track_reconciliations_total";
    /// Counter: Registry CAS retries.
    pub const CAS_RETRIES_TOTAL: &str = "cutover_track_cas_retries_total";
}

/// Metrics recorder for the tracking domain.
#[derive(Debug, Clone, Copy, Default)]
pub struct TrackMetrics;

impl TrackMetrics {
    /// Creates a new metrics handle.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Records a policy registration.
    pub fn record_registration(&self, location: &str) {
        counter!(names::REGISTRATIONS_TOTAL, "location" => location.to_owned()).increment(1);
    }

    /// Records an applied status transition.
    pub fn record_transition(&self, from: &str, to: &str) {
        counter!(names::TRANSITIONS_TOTAL, "from" => from.to_owned(), "to" => to.to_owned())
            .increment(1);
    }

    /// Records a rejected status transition.
    pub fn record_transition_rejection(&self, from: &str, to: &str) {
        counter!(
            names::TRANSITION_REJECTIONS_TOTAL,
            "from" => from.to_owned(),
            "to" => to.to_owned()
        )
        .increment(1);
    }

    /// Records a validation run outcome.
    pub fn record_validation(&self, passed: bool) {
        let outcome = if passed { "passed" } else { "failed" };
        counter!(names::VALIDATIONS_TOTAL, "outcome" => outcome).increment(1);
    }

    /// Records a reconciliation run.
    pub fn record_reconciliation(&self) {
        counter!(names::RECONCILIATIONS_TOTAL).increment(1);
    }

    /// Records a registry CAS retry.
    pub fn record_cas_retry(&self) {
        counter!(names::CAS_RETRIES_TOTAL).increment(1);
    }
}
