//! The end-to-end migration saga definition.
//!
//! Binds the orchestrator's pipelines into saga steps — ingest, map to
//! canonical, route — each paired with its compensation handler. The
//! context keys used here form the contract between steps:
//!
//! | Key | Written by | Read by |
//! |-----|-----------|---------|
//! | `file_id` / `filename` + `file_text` | caller | ingest |
//! | `records` | ingest | map |
//! | `metadata_id` | ingest | map (stored schema) |
//! | `canonical_records` | map | route |
//! | `routing_decisions` | route | caller |

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use cutover_core::{SagaId, WalSink};

use crate::collaborators::apply_field_mappings;
use crate::error::{Error, Result};
use crate::orchestrator::{
    IngestRequest, IngestSource, MapRequest, MigrationOrchestrator, RouteRequest,
};
use crate::saga::coordinator::SagaCoordinator;
use crate::saga::{CompensationHandler, SagaContext, SagaStep, StepHandler};

/// Milestone name of the ingest step.
pub const INGEST_STEP: &str = "ingest_legacy_data";
/// Milestone name of the canonical-mapping step.
pub const MAP_STEP: &str = "map_to_canonical";
/// Milestone name of the routing step.
pub const ROUTE_STEP: &str = "route_policies";

/// Builds the standard three-step migration saga.
#[must_use]
pub fn migration_saga(
    orchestrator: Arc<MigrationOrchestrator>,
    wal: Arc<dyn WalSink>,
) -> SagaCoordinator {
    SagaCoordinator::new(wal)
        .with_step(
            SagaStep::new(INGEST_STEP, Arc::new(IngestStep {
                orchestrator: Arc::clone(&orchestrator),
            }))
            .with_compensation(Arc::new(DeleteIngestedData {
                orchestrator: Arc::clone(&orchestrator),
            })),
        )
        .with_step(
            SagaStep::new(MAP_STEP, Arc::new(MapStep {
                orchestrator: Arc::clone(&orchestrator),
            }))
            .with_compensation(Arc::new(RevertCanonicalMapping {
                orchestrator: Arc::clone(&orchestrator),
            })),
        )
        .with_step(
            SagaStep::new(ROUTE_STEP, Arc::new(RouteStep {
                orchestrator: Arc::clone(&orchestrator),
            }))
            .with_compensation(Arc::new(RevertRouting { orchestrator })),
        )
}

/// Forward step: ingest the legacy file named by the context.
struct IngestStep {
    orchestrator: Arc<MigrationOrchestrator>,
}

#[async_trait]
impl StepHandler for IngestStep {
    async fn execute(&self, _saga_id: SagaId, ctx: &mut SagaContext) -> Result<SagaContext> {
        let source = if let Some(file_id) = ctx.get_str("file_id") {
            IngestSource::ExistingFile {
                file_id: file_id.to_owned(),
            }
        } else {
            match (ctx.get_str("filename"), ctx.get_str("file_text")) {
                (Some(filename), Some(text)) => IngestSource::Upload {
                    filename: filename.to_owned(),
                    bytes: text.as_bytes().to_vec(),
                },
                _ => {
                    return Err(Error::InvalidRequest {
                        message: "context needs either file_id or filename + file_text".into(),
                    });
                }
            }
        };

        let outcome = self
            .orchestrator
            .ingest_legacy_data(IngestRequest {
                source,
                actor: None,
            })
            .await?;

        ctx.insert("file_id", json!(outcome.file_id));
        ctx.insert("records", json!(outcome.records));
        ctx.insert("metadata_id", json!(outcome.metadata_id));

        let mut compensation = SagaContext::new();
        compensation.insert("file_ids", json!(outcome.file_ids));
        Ok(compensation)
    }
}

/// Forward step: map every parsed record onto the canonical model.
///
/// The first record drives schema mapping; the resulting field mappings are
/// applied locally to the rest of the batch.
struct MapStep {
    orchestrator: Arc<MigrationOrchestrator>,
}

#[async_trait]
impl StepHandler for MapStep {
    async fn execute(&self, _saga_id: SagaId, ctx: &mut SagaContext) -> Result<SagaContext> {
        let records: Vec<serde_json::Value> = ctx
            .get("records")
            .and_then(serde_json::Value::as_array)
            .cloned()
            .unwrap_or_default();
        let Some(first) = records.first().cloned() else {
            return Err(Error::InvalidRequest {
                message: "context has no records to map".into(),
            });
        };

        let outcome = self
            .orchestrator
            .map_to_canonical(MapRequest {
                source_data: first,
                source_schema_id: ctx.get_str("metadata_id").map(ToOwned::to_owned),
                canonical_model: crate::orchestrator::DEFAULT_CANONICAL_MODEL.to_owned(),
                actor: None,
            })
            .await?;

        let canonical_records: Vec<serde_json::Value> = records
            .iter()
            .map(|record| apply_field_mappings(record, &outcome.field_mappings))
            .collect();

        ctx.insert("canonical_records", json!(canonical_records));
        ctx.insert("mapping_id", json!(outcome.mapping_id));

        let mut compensation = SagaContext::new();
        compensation.insert("mapping_rules_ids", json!([outcome.mapping_rules_id]));
        Ok(compensation)
    }
}

/// Forward step: route every canonical record.
struct RouteStep {
    orchestrator: Arc<MigrationOrchestrator>,
}

#[async_trait]
impl StepHandler for RouteStep {
    async fn execute(&self, _saga_id: SagaId, ctx: &mut SagaContext) -> Result<SagaContext> {
        let records: Vec<serde_json::Value> = ctx
            .get("canonical_records")
            .or_else(|| ctx.get("records"))
            .and_then(serde_json::Value::as_array)
            .cloned()
            .unwrap_or_default();
        if records.is_empty() {
            return Err(Error::InvalidRequest {
                message: "context has no records to route".into(),
            });
        }

        let mut decision_ids = Vec::new();
        let mut decisions = Vec::new();
        for record in records {
            let outcome = self
                .orchestrator
                .route_policies(RouteRequest {
                    policy: record.clone(),
                    namespace: ctx.get_str("namespace").unwrap_or("default").to_owned(),
                    actor: None,
                })
                .await?;
            decision_ids.push(outcome.routing_decision_id.clone());
            decisions.push(json!({
                "policy_id": record.get("policy_id"),
                "target_system": outcome.target_system,
                "routing_key": outcome.routing_key,
            }));
        }

        ctx.insert("routing_decisions", json!(decisions));

        let mut compensation = SagaContext::new();
        compensation.insert("routing_decision_ids", json!(decision_ids));
        Ok(compensation)
    }
}

/// Compensation for [`IngestStep`].
struct DeleteIngestedData {
    orchestrator: Arc<MigrationOrchestrator>,
}

#[async_trait]
impl CompensationHandler for DeleteIngestedData {
    fn name(&self) -> &str {
        "delete_ingested_data"
    }

    async fn compensate(
        &self,
        saga_id: SagaId,
        milestone_id: &str,
        compensation: &SagaContext,
    ) -> Result<()> {
        self.orchestrator
            .delete_ingested_data(saga_id, milestone_id, compensation)
            .await
            .map(|_| ())
            .map_err(|err| Error::CompensationFailed {
                saga_id,
                milestone_id: milestone_id.to_owned(),
                message: err.to_string(),
            })
    }
}

/// Compensation for [`MapStep`].
struct RevertCanonicalMapping {
    orchestrator: Arc<MigrationOrchestrator>,
}

#[async_trait]
impl CompensationHandler for RevertCanonicalMapping {
    fn name(&self) -> &str {
        "revert_canonical_mapping"
    }

    async fn compensate(
        &self,
        saga_id: SagaId,
        milestone_id: &str,
        compensation: &SagaContext,
    ) -> Result<()> {
        self.orchestrator
            .revert_canonical_mapping(saga_id, milestone_id, compensation)
            .await
            .map(|_| ())
            .map_err(|err| Error::CompensationFailed {
                saga_id,
                milestone_id: milestone_id.to_owned(),
                message: err.to_string(),
            })
    }
}

/// Compensation for [`RouteStep`].
struct RevertRouting {
    orchestrator: Arc<MigrationOrchestrator>,
}

#[async_trait]
impl CompensationHandler for RevertRouting {
    fn name(&self) -> &str {
        "revert_routing"
    }

    async fn compensate(
        &self,
        saga_id: SagaId,
        milestone_id: &str,
        compensation: &SagaContext,
    ) -> Result<()> {
        self.orchestrator
            .revert_routing(saga_id, milestone_id, compensation)
            .await
            .map(|_| ())
            .map_err(|err| Error::CompensationFailed {
                saga_id,
                milestone_id: milestone_id.to_owned(),
                message: err.to_string(),
            })
    }
}
