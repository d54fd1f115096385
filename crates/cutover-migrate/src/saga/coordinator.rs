//! The saga coordinator: forward execution and reverse-order compensation.
//!
//! The coordinator owns the ordered step list and the per-step compensation
//! mapping. Forward steps run in order; the first failure flips the saga to
//! `Compensating` and the committed milestones are unwound newest-first.
//! Every compensation is WAL-logged before it runs — if the intent cannot
//! be recorded the handler does not run and the saga ends `Failed`, with
//! the remaining work visible in the execution history rather than silently
//! dropped.
//!
//! A forward step failure is a structured report, not an error: `execute`
//! returns `Ok` with the terminal status either way. Errors are reserved
//! for coordinator-internal faults.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use chrono::Utc;

use cutover_core::{RetryPolicy, SagaId, WalEntry, WalPayload, WalSink};
use std::sync::Arc;

use super::{
    CompensationHandler, MilestoneRecord, SagaContext, SagaEvent, SagaEventKind, SagaExecution,
    SagaReport, SagaStatus, SagaStep, StepHandler,
};
use crate::error::{Error, Result};
use crate::metrics::MigrateMetrics;

/// WAL namespace for compensation intents.
const COMPENSATION_NAMESPACE: &str = "saga_compensation";
/// Replay target queue for compensation intents.
const COMPENSATION_TARGET: &str = "compensation_queue";

/// Converts a lock poison error to a storage error.
fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::storage("lock poisoned")
}

/// Drives sagas to completion or compensated rollback.
pub struct SagaCoordinator {
    steps: Vec<SagaStep>,
    wal: Arc<dyn WalSink>,
    executions: RwLock<HashMap<SagaId, SagaExecution>>,
    metrics: MigrateMetrics,
}

impl SagaCoordinator {
    /// Creates a coordinator with no steps.
    #[must_use]
    pub fn new(wal: Arc<dyn WalSink>) -> Self {
        Self {
            steps: Vec::new(),
            wal,
            executions: RwLock::new(HashMap::new()),
            metrics: MigrateMetrics::new(),
        }
    }

    /// Appends a step to the saga definition.
    #[must_use]
    pub fn with_step(mut self, step: SagaStep) -> Self {
        self.steps.push(step);
        self
    }

    /// Returns the names of the configured steps, in execution order.
    #[must_use]
    pub fn step_names(&self) -> Vec<String> {
        self.steps.iter().map(|step| step.name.clone()).collect()
    }

    /// Executes a saga over the given context.
    ///
    /// Returns a report with the terminal status: `Completed` when every
    /// forward step committed, `Compensated` when a failure was fully
    /// unwound, `Failed` when some compensation also failed.
    ///
    /// # Errors
    ///
    /// Returns an error only on coordinator-internal faults; a failed
    /// forward step is reported through the returned [`SagaReport`].
    #[tracing::instrument(skip(self, ctx), fields(saga_id = tracing::field::Empty))]
    pub async fn execute(&self, mut ctx: SagaContext) -> Result<SagaReport> {
        let saga_id = SagaId::generate();
        tracing::Span::current().record("saga_id", tracing::field::display(saga_id));

        {
            let mut executions = self.executions.write().map_err(poison_err)?;
            executions.insert(saga_id, SagaExecution::new(saga_id));
        }
        tracing::info!(steps = self.steps.len(), "saga started");

        for step in &self.steps {
            match step.forward.execute(saga_id, &mut ctx).await {
                Ok(compensation) => {
                    self.metrics.record_step(&step.name, true);
                    self.with_execution(saga_id, |execution| {
                        execution.milestones.push(MilestoneRecord {
                            milestone_id: step.name.clone(),
                            completed_at: Utc::now(),
                            compensation,
                        });
                        execution.record_event(SagaEventKind::MilestoneCompleted {
                            milestone_id: step.name.clone(),
                        });
                    })?;
                }
                Err(err) => {
                    self.metrics.record_step(&step.name, false);
                    let message = err.to_string();
                    tracing::warn!(
                        step = %step.name,
                        error = %message,
                        "forward step failed, unwinding committed milestones"
                    );
                    self.with_execution(saga_id, |execution| {
                        execution.failure = Some(message.clone());
                        execution.record_event(SagaEventKind::StepFailed {
                            milestone_id: step.name.clone(),
                            error: message.clone(),
                        });
                    })?;
                    return self.compensate(saga_id, &step.name, message).await;
                }
            }
        }

        let completed = self.with_execution(saga_id, |execution| {
            execution.status = SagaStatus::Completed;
            execution.completed_at = Some(Utc::now());
            execution.record_event(SagaEventKind::SagaFinished {
                status: SagaStatus::Completed,
            });
            execution.milestones.len()
        })?;
        tracing::info!(milestones = completed, "saga completed");

        Ok(SagaReport {
            saga_id,
            status: SagaStatus::Completed,
            completed_milestones: completed,
            compensated_milestones: 0,
            failed_step: None,
            error: None,
        })
    }

    /// Unwinds committed milestones in reverse order.
    async fn compensate(
        &self,
        saga_id: SagaId,
        failed_step: &str,
        error: String,
    ) -> Result<SagaReport> {
        let milestones = self.with_execution(saga_id, |execution| {
            execution.status = SagaStatus::Compensating;
            execution.record_event(SagaEventKind::CompensationStarted);
            execution.milestones.clone()
        })?;

        let mut all_compensated = true;

        for milestone in milestones.iter().rev() {
            let handler = self
                .steps
                .iter()
                .find(|step| step.name == milestone.milestone_id)
                .and_then(|step| step.compensation.as_ref());

            let Some(handler) = handler else {
                tracing::warn!(
                    milestone = %milestone.milestone_id,
                    "no compensation handler registered, skipping"
                );
                continue;
            };

            // The intent must be durable before the handler runs; without it
            // the handler does not run and the milestone stays un-compensated.
            let entry = WalEntry::new(
                COMPENSATION_NAMESPACE,
                COMPENSATION_TARGET,
                WalPayload::Compensation {
                    saga_id: saga_id.to_string(),
                    milestone_id: milestone.milestone_id.clone(),
                    handler: handler.name().to_owned(),
                },
            )
            .with_lifecycle(RetryPolicy::retries(5).with_delay_ms(60_000).exponential());

            if let Err(wal_err) = self.wal.record(entry).await {
                all_compensated = false;
                self.metrics.record_compensation(handler.name(), false);
                tracing::error!(
                    milestone = %milestone.milestone_id,
                    error = %wal_err,
                    "compensation intent could not be recorded, handler not run"
                );
                self.with_execution(saga_id, |execution| {
                    execution.record_event(SagaEventKind::CompensationFailed {
                        milestone_id: milestone.milestone_id.clone(),
                        error: wal_err.to_string(),
                    });
                })?;
                continue;
            }

            match handler
                .compensate(saga_id, &milestone.milestone_id, &milestone.compensation)
                .await
            {
                Ok(()) => {
                    self.metrics.record_compensation(handler.name(), true);
                    self.with_execution(saga_id, |execution| {
                        execution.compensated.push(milestone.milestone_id.clone());
                        execution.record_event(SagaEventKind::MilestoneCompensated {
                            milestone_id: milestone.milestone_id.clone(),
                        });
                    })?;
                }
                Err(comp_err) => {
                    all_compensated = false;
                    self.metrics.record_compensation(handler.name(), false);
                    tracing::error!(
                        milestone = %milestone.milestone_id,
                        error = %comp_err,
                        "compensation handler failed, entry left for WAL replay"
                    );
                    self.with_execution(saga_id, |execution| {
                        execution.record_event(SagaEventKind::CompensationFailed {
                            milestone_id: milestone.milestone_id.clone(),
                            error: comp_err.to_string(),
                        });
                    })?;
                }
            }
        }

        let status = if all_compensated {
            SagaStatus::Compensated
        } else {
            SagaStatus::Failed
        };
        let (completed, compensated) = self.with_execution(saga_id, |execution| {
            execution.status = status;
            execution.completed_at = Some(Utc::now());
            execution.record_event(SagaEventKind::SagaFinished { status });
            (execution.milestones.len(), execution.compensated.len())
        })?;

        Ok(SagaReport {
            saga_id,
            status,
            completed_milestones: completed,
            compensated_milestones: compensated,
            failed_step: Some(failed_step.to_owned()),
            error: Some(error),
        })
    }

    /// Returns the current state of a saga execution.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SagaNotFound`] for unknown IDs.
    pub fn status(&self, saga_id: SagaId) -> Result<SagaExecution> {
        let executions = self.executions.read().map_err(poison_err)?;
        executions
            .get(&saga_id)
            .cloned()
            .ok_or(Error::SagaNotFound { saga_id })
    }

    /// Returns the execution history of a saga.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SagaNotFound`] for unknown IDs.
    pub fn history(&self, saga_id: SagaId) -> Result<Vec<SagaEvent>> {
        Ok(self.status(saga_id)?.history)
    }

    fn with_execution<R>(
        &self,
        saga_id: SagaId,
        f: impl FnOnce(&mut SagaExecution) -> R,
    ) -> Result<R> {
        let mut executions = self.executions.write().map_err(poison_err)?;
        let execution = executions
            .get_mut(&saga_id)
            .ok_or(Error::SagaNotFound { saga_id })?;
        Ok(f(execution))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use cutover_core::InMemoryWalSink;

    use crate::saga::{CompensationHandler, StepHandler};

    /// Step that records its name into a shared log and succeeds.
    struct LoggingStep {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
    }

    #[async_trait]
    impl StepHandler for LoggingStep {
        async fn execute(&self, _saga_id: SagaId, ctx: &mut SagaContext) -> Result<SagaContext> {
            self.log.lock().unwrap().push(format!("forward:{}", self.name));
            ctx.insert(self.name, json!("done"));
            let mut compensation = SagaContext::new();
            compensation.insert("step", json!(self.name));
            Ok(compensation)
        }
    }

    /// Step that always fails.
    struct FailingStep;

    #[async_trait]
    impl StepHandler for FailingStep {
        async fn execute(&self, _saga_id: SagaId, _ctx: &mut SagaContext) -> Result<SagaContext> {
            Err(Error::external("explode", "forced failure"))
        }
    }

    /// Compensation that records its invocations.
    struct LoggingCompensation {
        name: &'static str,
        log: Arc<Mutex<Vec<String>>>,
        invocations: AtomicUsize,
    }

    impl LoggingCompensation {
        fn new(name: &'static str, log: Arc<Mutex<Vec<String>>>) -> Self {
            Self {
                name,
                log,
                invocations: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl CompensationHandler for LoggingCompensation {
        fn name(&self) -> &str {
            self.name
        }

        async fn compensate(
            &self,
            _saga_id: SagaId,
            milestone_id: &str,
            _compensation: &SagaContext,
        ) -> Result<()> {
            self.invocations.fetch_add(1, Ordering::SeqCst);
            self.log
                .lock()
                .unwrap()
                .push(format!("compensate:{milestone_id}"));
            Ok(())
        }
    }

    fn logging_step(
        name: &'static str,
        log: &Arc<Mutex<Vec<String>>>,
    ) -> (SagaStep, Arc<LoggingCompensation>) {
        let compensation = Arc::new(LoggingCompensation::new(name, Arc::clone(log)));
        let step = SagaStep::new(name, Arc::new(LoggingStep {
            name,
            log: Arc::clone(log),
        }))
        .with_compensation(Arc::clone(&compensation) as Arc<dyn CompensationHandler>);
        (step, compensation)
    }

    #[tokio::test]
    async fn all_steps_committing_completes_the_saga() -> Result<()> {
        let log = Arc::new(Mutex::new(Vec::new()));
        let (first, _) = logging_step("first", &log);
        let (second, _) = logging_step("second", &log);

        let coordinator = SagaCoordinator::new(Arc::new(InMemoryWalSink::new()))
            .with_step(first)
            .with_step(second);

        let report = coordinator.execute(SagaContext::new()).await?;

        assert_eq!(report.status, SagaStatus::Completed);
        assert_eq!(report.completed_milestones, 2);
        assert_eq!(report.compensated_milestones, 0);
        assert_eq!(
            *log.lock().unwrap(),
            vec!["forward:first", "forward:second"]
        );

        Ok(())
    }

    #[tokio::test]
    async fn failure_compensates_in_reverse_order() -> Result<()> {
        let log = Arc::new(Mutex::new(Vec::new()));
        let (first, _) = logging_step("first", &log);
        let (second, _) = logging_step("second", &log);
        let failing = SagaStep::new("third", Arc::new(FailingStep));

        let wal = Arc::new(InMemoryWalSink::new());
        let coordinator = SagaCoordinator::new(Arc::clone(&wal) as Arc<dyn WalSink>)
            .with_step(first)
            .with_step(second)
            .with_step(failing);

        let report = coordinator.execute(SagaContext::new()).await?;

        assert_eq!(report.status, SagaStatus::Compensated);
        assert_eq!(report.completed_milestones, 2);
        assert_eq!(report.compensated_milestones, 2);
        assert_eq!(report.failed_step.as_deref(), Some("third"));

        // Newest milestone unwinds first.
        assert_eq!(
            *log.lock().unwrap(),
            vec![
                "forward:first",
                "forward:second",
                "compensate:second",
                "compensate:first"
            ]
        );

        // Each compensation was preceded by a WAL intent.
        let entries = wal.entries().map_err(Error::Core)?;
        let compensation_intents: Vec<String> = entries
            .iter()
            .filter_map(|entry| match &entry.payload {
                WalPayload::Compensation { milestone_id, .. } => Some(milestone_id.clone()),
                _ => None,
            })
            .collect();
        assert_eq!(compensation_intents, vec!["second", "first"]);

        Ok(())
    }

    #[tokio::test]
    async fn compensation_is_idempotent_across_replays() -> Result<()> {
        let log = Arc::new(Mutex::new(Vec::new()));
        let (step, compensation) = logging_step("first", &log);
        let saga_id = SagaId::generate();

        let milestone_ctx = SagaContext::new();
        // Simulates a WAL replay re-invoking the handler after the saga
        // already unwound it.
        compensation.compensate(saga_id, "first", &milestone_ctx).await?;
        compensation.compensate(saga_id, "first", &milestone_ctx).await?;

        assert_eq!(compensation.invocations.load(Ordering::SeqCst), 2);
        drop(step);

        Ok(())
    }

    #[tokio::test]
    async fn steps_without_compensation_are_skipped_during_unwind() -> Result<()> {
        let log = Arc::new(Mutex::new(Vec::new()));
        let bare = SagaStep::new("bare", Arc::new(LoggingStep {
            name: "bare",
            log: Arc::clone(&log),
        }));
        let failing = SagaStep::new("boom", Arc::new(FailingStep));

        let coordinator = SagaCoordinator::new(Arc::new(InMemoryWalSink::new()))
            .with_step(bare)
            .with_step(failing);

        let report = coordinator.execute(SagaContext::new()).await?;

        // Nothing to unwind, so the rollback trivially succeeds.
        assert_eq!(report.status, SagaStatus::Compensated);
        assert_eq!(report.compensated_milestones, 0);

        Ok(())
    }

    #[tokio::test]
    async fn failing_compensation_marks_saga_failed() -> Result<()> {
        struct BrokenCompensation;

        #[async_trait]
        impl CompensationHandler for BrokenCompensation {
            fn name(&self) -> &str {
                "broken"
            }

            async fn compensate(
                &self,
                _saga_id: SagaId,
                _milestone_id: &str,
                _compensation: &SagaContext,
            ) -> Result<()> {
                Err(Error::external("undo", "cannot undo"))
            }
        }

        let log = Arc::new(Mutex::new(Vec::new()));
        let step = SagaStep::new("first", Arc::new(LoggingStep {
            name: "first",
            log,
        }))
        .with_compensation(Arc::new(BrokenCompensation));
        let failing = SagaStep::new("boom", Arc::new(FailingStep));

        let coordinator = SagaCoordinator::new(Arc::new(InMemoryWalSink::new()))
            .with_step(step)
            .with_step(failing);

        let report = coordinator.execute(SagaContext::new()).await?;
        assert_eq!(report.status, SagaStatus::Failed);

        let history = coordinator.history(report.saga_id)?;
        assert!(history.iter().any(|event| matches!(
            event.kind,
            SagaEventKind::CompensationFailed { .. }
        )));

        Ok(())
    }

    #[tokio::test]
    async fn status_tracks_execution_state() -> Result<()> {
        let log = Arc::new(Mutex::new(Vec::new()));
        let (step, _) = logging_step("only", &log);
        let coordinator =
            SagaCoordinator::new(Arc::new(InMemoryWalSink::new())).with_step(step);

        let report = coordinator.execute(SagaContext::new()).await?;
        let execution = coordinator.status(report.saga_id)?;

        assert_eq!(execution.status, SagaStatus::Completed);
        assert_eq!(execution.milestones.len(), 1);
        assert!(execution.completed_at.is_some());

        Ok(())
    }

    #[test]
    fn unknown_saga_is_not_found() {
        let coordinator = SagaCoordinator::new(Arc::new(InMemoryWalSink::new()));
        let err = coordinator.status(SagaId::generate()).unwrap_err();
        assert!(matches!(err, Error::SagaNotFound { .. }));
    }
}
