//! Rule-based post-migration validation.
//!
//! The validation engine reads a policy from the registry, evaluates an
//! ordered list of rules, and reports per-rule outcomes. A failing rule set
//! is a report, not an error. On a full pass the engine marks the policy
//! [`MigrationStatus::Validated`] as a side effect; re-validating an
//! already-validated policy is idempotent.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use cutover_core::{ActorContext, PolicyId, RetryPolicy, WalEntry, WalPayload, WalSink};

use crate::error::{Error, Result};
use crate::metrics::TrackMetrics;
use crate::policy::{MigrationStatus, PolicyLocation, PolicyRecord};
use crate::tracker::PolicyTracker;

/// A single validation rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ValidationRule {
    /// The policy must currently be at the expected location.
    LocationCheck {
        /// Location the policy must be at.
        expected: PolicyLocation,
    },
    /// The migration status must match the expected value.
    StatusCheck {
        /// Status the policy must have.
        expected: MigrationStatus,
    },
    /// Cross-system field comparison.
    ///
    /// Extension point with no built-in implementation: the outcome always
    /// passes with an explanatory detail until a comparator is plugged in.
    DataIntegrity {
        /// What the comparison would verify.
        description: String,
    },
}

impl ValidationRule {
    /// Human-readable description of the rule.
    #[must_use]
    pub fn description(&self) -> String {
        match self {
            Self::LocationCheck { expected } => {
                format!("policy must be at location '{expected}'")
            }
            Self::StatusCheck { expected } => {
                format!("migration status must be '{expected}'")
            }
            Self::DataIntegrity { description } => description.clone(),
        }
    }

    /// The default post-migration rule set: the policy must live in the new
    /// system and its migration must be completed.
    #[must_use]
    pub fn default_rules() -> Vec<Self> {
        vec![
            Self::LocationCheck {
                expected: PolicyLocation::NewSystem,
            },
            Self::StatusCheck {
                expected: MigrationStatus::Completed,
            },
        ]
    }

    fn evaluate(&self, record: &PolicyRecord) -> RuleOutcome {
        match self {
            Self::LocationCheck { expected } => RuleOutcome {
                description: self.description(),
                passed: record.current_location == *expected,
                expected: Some(expected.to_string()),
                actual: Some(record.current_location.to_string()),
                message: None,
            },
            Self::StatusCheck { expected } => {
                // A validated migration still satisfies a completed check;
                // this keeps re-validation after a pass idempotent.
                let passed = record.status == *expected
                    || (*expected == MigrationStatus::Completed
                        && record.status == MigrationStatus::Validated);
                RuleOutcome {
                    description: self.description(),
                    passed,
                    expected: Some(expected.to_string()),
                    actual: Some(record.status.to_string()),
                    message: None,
                }
            }
            Self::DataIntegrity { .. } => RuleOutcome {
                description: self.description(),
                passed: true,
                expected: None,
                actual: None,
                message: Some("data integrity comparison not implemented".into()),
            },
        }
    }
}

/// Outcome of evaluating one rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleOutcome {
    /// What the rule checked.
    pub description: String,
    /// Whether the rule passed.
    pub passed: bool,
    /// Expected value, where the rule compares one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected: Option<String>,
    /// Actual value observed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual: Option<String>,
    /// Additional context.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Result of a validation run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    /// The validated policy.
    pub policy_id: PolicyId,
    /// Conjunction of all rule outcomes.
    pub validation_passed: bool,
    /// Per-rule outcomes, in evaluation order.
    pub outcomes: Vec<RuleOutcome>,
}

/// Validates completed migrations against the registry.
pub struct ValidationEngine {
    tracker: Arc<PolicyTracker>,
    metrics: TrackMetrics,
}

impl ValidationEngine {
    /// Creates a validation engine over the given tracker.
    #[must_use]
    pub fn new(tracker: Arc<PolicyTracker>) -> Self {
        Self {
            tracker,
            metrics: TrackMetrics::new(),
        }
    }

    /// Validates a policy's migration.
    ///
    /// Runs the given rules (or [`ValidationRule::default_rules`]) in order.
    /// On a full pass the policy is marked [`MigrationStatus::Validated`];
    /// if it already is, the pass is reported without a status change.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PolicyNotFound`] for unknown IDs and
    /// [`Error::WalGuard`] if the intent could not be recorded. A failing
    /// rule set is NOT an error.
    #[tracing::instrument(skip(self, rules, actor), fields(policy_id = %policy_id))]
    pub async fn validate_migration(
        &self,
        policy_id: &PolicyId,
        rules: Option<Vec<ValidationRule>>,
        actor: Option<ActorContext>,
    ) -> Result<ValidationReport> {
        let mut entry = WalEntry::new(
            "policy_tracking",
            "policy_tracking_queue",
            WalPayload::ValidateMigration {
                policy_id: policy_id.to_string(),
            },
        )
        .with_lifecycle(RetryPolicy::retries(3));
        if let Some(actor) = actor.clone() {
            entry = entry.with_actor(actor);
        }
        self.tracker
            .wal()
            .record(entry)
            .await
            .map_err(|source| Error::WalGuard { source })?;

        let record = self.tracker.get_policy_location(policy_id).await?;

        let rules = rules.unwrap_or_else(ValidationRule::default_rules);
        let outcomes: Vec<RuleOutcome> = rules.iter().map(|rule| rule.evaluate(&record)).collect();
        let validation_passed = outcomes.iter().all(|outcome| outcome.passed);

        // Mark validated only where the transition is legal: a pass under
        // custom rules can happen in any status, and an already-validated
        // policy stays validated.
        if validation_passed && record.status.can_transition_to(MigrationStatus::Validated) {
            let mut details = BTreeMap::new();
            details.insert("validated_at".to_owned(), Utc::now().to_rfc3339());
            self.tracker
                .update_migration_status(
                    policy_id,
                    MigrationStatus::Validated,
                    None,
                    Some(details),
                    actor,
                )
                .await?;
        }

        self.metrics.record_validation(validation_passed);
        tracing::info!(
            policy_id = %policy_id,
            passed = validation_passed,
            rules = outcomes.len(),
            "validation complete"
        );

        Ok(ValidationReport {
            policy_id: policy_id.clone(),
            validation_passed,
            outcomes,
        })
    }
}
