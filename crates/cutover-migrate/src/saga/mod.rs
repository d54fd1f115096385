//! Saga execution state and step contracts.
//!
//! A saga is one end-to-end migration attempt: an ordered list of forward
//! steps, each paired with an idempotent compensation. The
//! [`coordinator::SagaCoordinator`] runs the forward steps in order and, on
//! failure, unwinds the committed milestones in reverse. Everything a
//! compensation needs is captured at milestone completion time in a
//! [`SagaContext`] snapshot, so compensations stay addressable by
//! `(saga_id, milestone_id, context)` and replayable long after the forward
//! run.

pub mod coordinator;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use cutover_core::SagaId;

use crate::error::Result;

/// Saga execution status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SagaStatus {
    /// Forward steps are executing.
    InProgress,
    /// A forward step failed; compensations are running in reverse order.
    Compensating,
    /// Every forward step committed.
    Completed,
    /// A forward step failed and every committed milestone was compensated.
    Compensated,
    /// A forward step failed and at least one compensation also failed;
    /// the remaining work is queued for WAL replay.
    Failed,
}

impl SagaStatus {
    /// Returns true if this is a terminal status.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Compensated | Self::Failed)
    }
}

impl std::fmt::Display for SagaStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InProgress => write!(f, "in_progress"),
            Self::Compensating => write!(f, "compensating"),
            Self::Completed => write!(f, "completed"),
            Self::Compensated => write!(f, "compensated"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Key-value state threaded between saga steps.
///
/// Steps read their inputs from the context and write their outputs back
/// into it; each milestone additionally returns a compensation snapshot
/// taken from it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SagaContext {
    values: serde_json::Map<String, serde_json::Value>,
}

impl SagaContext {
    /// Creates an empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a value.
    pub fn insert(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.values.insert(key.into(), value);
    }

    /// Returns a value by key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.values.get(key)
    }

    /// Returns a string value by key.
    #[must_use]
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.values.get(key).and_then(serde_json::Value::as_str)
    }

    /// Returns a list of strings by key.
    #[must_use]
    pub fn get_str_list(&self, key: &str) -> Vec<String> {
        self.values
            .get(key)
            .and_then(serde_json::Value::as_array)
            .map(|values| {
                values
                    .iter()
                    .filter_map(serde_json::Value::as_str)
                    .map(ToOwned::to_owned)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Returns true if the context holds no values.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// A committed milestone and the snapshot its compensation needs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MilestoneRecord {
    /// The step that committed.
    pub milestone_id: String,
    /// When it committed.
    pub completed_at: DateTime<Utc>,
    /// Snapshot handed to the compensation handler.
    pub compensation: SagaContext,
}

/// One entry of a saga's execution history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SagaEvent {
    /// When the event occurred.
    pub at: DateTime<Utc>,
    /// What happened.
    pub kind: SagaEventKind,
}

/// Kinds of saga history events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SagaEventKind {
    /// The saga started executing forward steps.
    SagaStarted,
    /// A forward step committed.
    MilestoneCompleted {
        /// The committed step.
        milestone_id: String,
    },
    /// A forward step failed.
    StepFailed {
        /// The failed step.
        milestone_id: String,
        /// Failure description.
        error: String,
    },
    /// Reverse-order compensation began.
    CompensationStarted,
    /// A milestone was compensated.
    MilestoneCompensated {
        /// The compensated step.
        milestone_id: String,
    },
    /// A compensation handler failed; the work stays queued for replay.
    CompensationFailed {
        /// The step whose handler failed.
        milestone_id: String,
        /// Failure description.
        error: String,
    },
    /// The saga reached a terminal status.
    SagaFinished {
        /// The terminal status.
        status: SagaStatus,
    },
}

/// The tracked state of one saga execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SagaExecution {
    /// Saga identifier.
    pub saga_id: SagaId,
    /// Current status.
    pub status: SagaStatus,
    /// When execution started.
    pub started_at: DateTime<Utc>,
    /// When execution reached a terminal status.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Milestones committed so far, oldest first.
    pub milestones: Vec<MilestoneRecord>,
    /// Milestones compensated so far, in compensation order.
    pub compensated: Vec<String>,
    /// Why the saga failed, when it did.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<String>,
    /// Full execution history.
    pub history: Vec<SagaEvent>,
}

impl SagaExecution {
    /// Creates a fresh in-progress execution.
    #[must_use]
    pub fn new(saga_id: SagaId) -> Self {
        let now = Utc::now();
        Self {
            saga_id,
            status: SagaStatus::InProgress,
            started_at: now,
            completed_at: None,
            milestones: Vec::new(),
            compensated: Vec::new(),
            failure: None,
            history: vec![SagaEvent {
                at: now,
                kind: SagaEventKind::SagaStarted,
            }],
        }
    }

    /// Appends a history event.
    pub fn record_event(&mut self, kind: SagaEventKind) {
        self.history.push(SagaEvent {
            at: Utc::now(),
            kind,
        });
    }
}

/// Summary returned to the caller when a saga finishes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SagaReport {
    /// Saga identifier.
    pub saga_id: SagaId,
    /// Terminal status.
    pub status: SagaStatus,
    /// How many forward steps committed.
    pub completed_milestones: usize,
    /// How many milestones were compensated.
    pub compensated_milestones: usize,
    /// The step that failed, when one did.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_step: Option<String>,
    /// Failure description, when one occurred.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// A forward saga step.
///
/// Implementations read their inputs from the context, perform the step's
/// side effects, write outputs back into the context, and return the
/// snapshot their compensation will need. A failed step returns an error;
/// the coordinator converts it into a structured report and starts
/// unwinding.
#[async_trait]
pub trait StepHandler: Send + Sync {
    /// Executes the forward step.
    async fn execute(&self, saga_id: SagaId, ctx: &mut SagaContext) -> Result<SagaContext>;
}

/// A compensation handler paired with a forward step.
///
/// Must be idempotent: invoked twice with the same
/// `(saga_id, milestone_id, compensation)` it succeeds both times and never
/// errors on already-undone state.
#[async_trait]
pub trait CompensationHandler: Send + Sync {
    /// Handler name recorded in the WAL before every invocation.
    fn name(&self) -> &str;

    /// Undoes the milestone's work.
    async fn compensate(
        &self,
        saga_id: SagaId,
        milestone_id: &str,
        compensation: &SagaContext,
    ) -> Result<()>;
}

/// One step of a saga definition: a name, a forward handler, and an
/// optional compensation.
#[derive(Clone)]
pub struct SagaStep {
    /// Step name; doubles as the milestone ID.
    pub name: String,
    /// Forward operation.
    pub forward: Arc<dyn StepHandler>,
    /// Compensating operation, when the step has one.
    pub compensation: Option<Arc<dyn CompensationHandler>>,
}

impl SagaStep {
    /// Creates a step without compensation.
    #[must_use]
    pub fn new(name: impl Into<String>, forward: Arc<dyn StepHandler>) -> Self {
        Self {
            name: name.into(),
            forward,
            compensation: None,
        }
    }

    /// Attaches the compensating operation.
    #[must_use]
    pub fn with_compensation(mut self, compensation: Arc<dyn CompensationHandler>) -> Self {
        self.compensation = Some(compensation);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn saga_status_terminality() {
        assert!(!SagaStatus::InProgress.is_terminal());
        assert!(!SagaStatus::Compensating.is_terminal());
        assert!(SagaStatus::Completed.is_terminal());
        assert!(SagaStatus::Compensated.is_terminal());
        assert!(SagaStatus::Failed.is_terminal());
    }

    #[test]
    fn context_typed_accessors() {
        let mut ctx = SagaContext::new();
        ctx.insert("file_id", json!("file-1"));
        ctx.insert("file_ids", json!(["file-1", "file-2"]));

        assert_eq!(ctx.get_str("file_id"), Some("file-1"));
        assert_eq!(ctx.get_str_list("file_ids"), vec!["file-1", "file-2"]);
        assert!(ctx.get_str_list("missing").is_empty());
    }

    #[test]
    fn execution_history_starts_with_saga_started() {
        let execution = SagaExecution::new(SagaId::generate());
        assert_eq!(execution.status, SagaStatus::InProgress);
        assert_eq!(execution.history.len(), 1);
        assert!(matches!(
            execution.history[0].kind,
            SagaEventKind::SagaStarted
        ));
    }
}
