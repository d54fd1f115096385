//! Observability metrics for migration orchestration.
//!
//! Exported via the `metrics` crate facade; install any compatible recorder
//! (for example `metrics-exporter-prometheus`) to publish them.
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `cutover_pipeline_operations_total` | Counter | `operation`, `outcome` | Pipeline operations by outcome |
//! | `cutover_saga_steps_total` | Counter | `step`, `outcome` | Saga forward steps by outcome |
//! | `cutover_compensations_total` | Counter | `handler`, `outcome` | Compensation handler runs |
//! | `cutover_collaborator_call_seconds` | Histogram | `operation` | Collaborator call latency |

use std::time::Duration;

use metrics::{counter, histogram};

/// Metric names as constants for consistency.
pub mod names {
    /// Counter: Pipeline operations by outcome.
    pub const PIPELINE_OPERATIONS_TOTAL: &str = "cutover_pipeline_operations_total";
    /// Counter: Saga forward steps by outcome.
    pub const SAGA_STEPS_TOTAL: &str = "cutover_saga_steps_total";
    /// Counter: Compensation handler runs by outcome.
    pub const COMPENSATIONS_TOTAL: &str = "cutover_compensations_total";
    /// Histogram: Collaborator call latency in seconds.
    pub const COLLABORATOR_CALL_SECONDS: &str = "cutover_collaborator_call_seconds";
}

fn outcome(success: bool) -> &'static str {
    if success { "succeeded" } else { "failed" }
}

/// Metrics recorder for the migration domain.
#[derive(Debug, Clone, Copy, Default)]
pub struct MigrateMetrics;

impl MigrateMetrics {
    /// Creates a new metrics handle.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Records a pipeline operation outcome.
    pub fn record_pipeline(&self, operation: &str, success: bool) {
        counter!(
            names::PIPELINE_OPERATIONS_TOTAL,
            "operation" => operation.to_owned(),
            "outcome" => outcome(success)
        )
        .increment(1);
    }

    /// Records a saga forward step outcome.
    pub fn record_step(&self, step: &str, success: bool) {
        counter!(
            names::SAGA_STEPS_TOTAL,
            "step" => step.to_owned(),
            "outcome" => outcome(success)
        )
        .increment(1);
    }

    /// Records a compensation handler outcome.
    pub fn record_compensation(&self, handler: &str, success: bool) {
        counter!(
            names::COMPENSATIONS_TOTAL,
            "handler" => handler.to_owned(),
            "outcome" => outcome(success)
        )
        .increment(1);
    }

    /// Records the latency of one collaborator call.
    pub fn observe_call(&self, operation: &str, elapsed: Duration) {
        histogram!(
            names::COLLABORATOR_CALL_SECONDS,
            "operation" => operation.to_owned()
        )
        .record(elapsed.as_secs_f64());
    }
}
