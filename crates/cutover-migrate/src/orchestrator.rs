//! The migration step executor.
//!
//! [`MigrationOrchestrator`] drives the three fixed pipelines — ingest,
//! map-to-canonical, and route — against collaborators obtained through the
//! resolver. Every pipeline:
//!
//! 1. records its intent to the WAL before any side effect (fail closed);
//! 2. resolves the collaborators it needs;
//! 3. invokes them under a uniform per-call timeout;
//! 4. records a lineage edge and a success metric on the way out.
//!
//! A collaborator fault becomes a structured error at this boundary —
//! nothing escapes as a panic, and no compensation is triggered from here.
//! Unwinding belongs to the saga coordinator, which invokes the
//! compensation handlers defined at the bottom of this module. Retry of a
//! failed pipeline is driven externally by the WAL lifecycle policy, never
//! by a loop in this executor.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;

use cutover_core::{ActorContext, PolicyId, RetryPolicy, SagaId, SystemId, WalEntry, WalPayload, WalSink};
use cutover_track::policy::MigrationStatus;
use cutover_track::tracker::PolicyTracker;

use crate::collaborators::{
    ContentStore, DataProfiler, DocumentStore, FieldMapping, FileParser, LineageEdge,
    LineageRecorder, ModelValidation, QualityProfile, RoutingEngine, SchemaDescriptor,
    SchemaMapper, apply_field_mappings,
};
use crate::error::{Error, Result};
use crate::metrics::MigrateMetrics;
use crate::resolver::Resolver;
use crate::saga::SagaContext;

/// WAL namespace for pipeline operations.
const WAL_NAMESPACE: &str = "policy_migration";
/// WAL namespace for compensation handlers.
const COMPENSATION_NAMESPACE: &str = "saga_compensation";
/// Replay target for compensation handlers.
const COMPENSATION_TARGET: &str = "compensation_queue";

/// Canonical model used when a request does not name one.
pub const DEFAULT_CANONICAL_MODEL: &str = "policy_v1";

/// Uniform per-call timeouts applied to every collaborator invocation.
#[derive(Debug, Clone, Copy)]
pub struct CallTimeouts {
    /// Budget for one collaborator call.
    pub collaborator: Duration,
}

impl Default for CallTimeouts {
    fn default() -> Self {
        Self {
            collaborator: Duration::from_secs(30),
        }
    }
}

/// Where the ingest pipeline gets its source file.
#[derive(Debug, Clone)]
pub enum IngestSource {
    /// A file already present in the content store.
    ExistingFile {
        /// Store-assigned file identifier.
        file_id: String,
    },
    /// Fresh content to upload first.
    Upload {
        /// Original filename.
        filename: String,
        /// File content.
        bytes: Vec<u8>,
    },
}

/// Request for the ingest pipeline.
#[derive(Debug, Clone)]
pub struct IngestRequest {
    /// Source file.
    pub source: IngestSource,
    /// Who requested the ingestion.
    pub actor: Option<ActorContext>,
}

/// Result of the ingest pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestOutcome {
    /// The ingested file.
    pub file_id: String,
    /// Parsed source records.
    pub records: Vec<serde_json::Value>,
    /// Discovered source schema.
    pub schema: SchemaDescriptor,
    /// Quality profile, when a profiler was available.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality: Option<QualityProfile>,
    /// Stored ingestion metadata document.
    pub metadata_id: String,
    /// Files created by this run, for the compensation handler.
    pub file_ids: Vec<String>,
}

/// Request for the map-to-canonical pipeline.
#[derive(Debug, Clone)]
pub struct MapRequest {
    /// Source record to map.
    pub source_data: serde_json::Value,
    /// Stored schema to reuse, when one was persisted earlier.
    pub source_schema_id: Option<String>,
    /// Target canonical model.
    pub canonical_model: String,
    /// Who requested the mapping.
    pub actor: Option<ActorContext>,
}

impl MapRequest {
    /// Creates a request against the default canonical model.
    #[must_use]
    pub fn new(source_data: serde_json::Value) -> Self {
        Self {
            source_data,
            source_schema_id: None,
            canonical_model: DEFAULT_CANONICAL_MODEL.to_owned(),
            actor: None,
        }
    }
}

/// Result of the map-to-canonical pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapOutcome {
    /// Mapper-assigned mapping identifier.
    pub mapping_id: String,
    /// Stored mapping-rules document.
    pub mapping_rules_id: String,
    /// The source record in canonical form.
    pub canonical_data: serde_json::Value,
    /// Per-field mappings used.
    pub field_mappings: Vec<FieldMapping>,
    /// Overall mapping confidence.
    pub confidence: f64,
    /// Canonical model validation result.
    pub validation: ModelValidation,
}

/// Request for the routing pipeline.
#[derive(Debug, Clone)]
pub struct RouteRequest {
    /// Policy to route (canonical form, must carry `policy_id`).
    pub policy: serde_json::Value,
    /// Routing rule namespace.
    pub namespace: String,
    /// Who requested the routing.
    pub actor: Option<ActorContext>,
}

impl RouteRequest {
    /// Creates a request in the default namespace.
    #[must_use]
    pub fn new(policy: serde_json::Value) -> Self {
        Self {
            policy,
            namespace: "default".to_owned(),
            actor: None,
        }
    }
}

/// Result of the routing pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteOutcome {
    /// Stored routing-decision document.
    pub routing_decision_id: String,
    /// The system the policy should land in.
    pub target_system: SystemId,
    /// Routing key used for evaluation.
    pub routing_key: String,
    /// Names of the rules that matched.
    pub matched_rules: Vec<String>,
    /// Engine confidence.
    pub confidence: f64,
    /// Tracked migration status at routing time, when the policy was
    /// registered.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy_status: Option<MigrationStatus>,
}

/// Result of a compensation handler run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompensationOutcome {
    /// The saga being unwound.
    pub saga_id: SagaId,
    /// The milestone that was compensated.
    pub milestone_id: String,
    /// Identifiers actually removed by this run (empty when everything was
    /// already gone).
    pub removed: Vec<String>,
}

/// Executes migration pipelines against resolved collaborators.
pub struct MigrationOrchestrator {
    resolver: Arc<Resolver>,
    wal: Arc<dyn WalSink>,
    tracker: Arc<PolicyTracker>,
    timeouts: CallTimeouts,
    metrics: MigrateMetrics,
}

impl MigrationOrchestrator {
    /// Creates an orchestrator.
    #[must_use]
    pub fn new(resolver: Arc<Resolver>, wal: Arc<dyn WalSink>, tracker: Arc<PolicyTracker>) -> Self {
        Self {
            resolver,
            wal,
            tracker,
            timeouts: CallTimeouts::default(),
            metrics: MigrateMetrics::new(),
        }
    }

    /// Overrides the per-call timeouts.
    #[must_use]
    pub const fn with_timeouts(mut self, timeouts: CallTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Returns the tracker this orchestrator reports progress to.
    #[must_use]
    pub fn tracker(&self) -> Arc<PolicyTracker> {
        Arc::clone(&self.tracker)
    }

    /// Ingests a legacy data file.
    ///
    /// Acquire the source file, parse it, profile quality (non-fatal when
    /// no profiler is available), discover the source schema, persist
    /// ingestion metadata, and record lineage.
    ///
    /// # Errors
    ///
    /// Returns [`Error::WalGuard`] when the intent cannot be recorded (the
    /// pipeline does not run), [`Error::CollaboratorUnavailable`] when a
    /// required service cannot be resolved, and
    /// [`Error::ExternalOperation`] when a collaborator call fails or times
    /// out.
    #[tracing::instrument(skip(self, request))]
    pub async fn ingest_legacy_data(&self, request: IngestRequest) -> Result<IngestOutcome> {
        let (wal_file_id, wal_filename) = match &request.source {
            IngestSource::ExistingFile { file_id } => (Some(file_id.clone()), None),
            IngestSource::Upload { filename, .. } => (None, Some(filename.clone())),
        };
        self.guard(
            WalPayload::IngestLegacyData {
                file_id: wal_file_id,
                filename: wal_filename,
            },
            "migration_ingest_queue",
            request.actor.clone(),
        )
        .await?;

        let result = self.run_ingest(request).await;
        self.metrics
            .record_pipeline("ingest_legacy_data", result.is_ok());
        result
    }

    async fn run_ingest(&self, request: IngestRequest) -> Result<IngestOutcome> {
        let content_store = self.resolver.content_store()?;

        let metadata = match request.source {
            IngestSource::Upload { filename, bytes } => {
                let metadata = self
                    .call("upload", content_store.upload(&filename, bytes))
                    .await?;
                tracing::info!(file_id = %metadata.file_id, "file uploaded");
                metadata
            }
            IngestSource::ExistingFile { file_id } => self
                .call("get_metadata", content_store.get_metadata(&file_id))
                .await?
                .ok_or_else(|| Error::external("get_metadata", format!("file not found: {file_id}")))?,
        };

        let parser = self.resolver.file_parser()?;
        let records = self.call("parse", parser.parse(&metadata.file_id)).await?;
        tracing::info!(records = records.len(), "file parsed");

        // Profiling is best-effort: a missing or failing profiler degrades
        // the pipeline, it does not stop it.
        let quality = match self.resolver.data_profiler() {
            Ok(profiler) => match self.call("profile", profiler.profile(&records)).await {
                Ok(profile) => Some(profile),
                Err(err) => {
                    tracing::warn!(error = %err, "quality profiling failed, continuing without profile");
                    None
                }
            },
            Err(Error::CollaboratorUnavailable { service }) => {
                tracing::warn!(%service, "no profiler available, continuing without profile");
                None
            }
            Err(err) => return Err(err),
        };

        let mapper = self.resolver.schema_mapper()?;
        let sample = &records[..records.len().min(10)];
        let schema = self
            .call(
                "discover_schema",
                mapper.discover_schema(&metadata.file_id, sample),
            )
            .await?;
        tracing::info!(fields = schema.fields.len(), "schema discovered");

        let documents = self.resolver.document_store()?;
        let metadata_body = json!({
            "file_id": &metadata.file_id,
            "filename": &metadata.filename,
            "schema": &schema,
            "quality": &quality,
            "record_count": records.len(),
            "ingested_at": Utc::now().to_rfc3339(),
        });
        let metadata_id = self
            .call(
                "store_document",
                documents.store_document("ingestion_metadata", metadata_body),
            )
            .await?;

        let lineage = self.resolver.lineage_recorder()?;
        let mut edge_metadata = BTreeMap::new();
        edge_metadata.insert("filename".to_owned(), metadata.filename.clone());
        edge_metadata.insert("record_count".to_owned(), records.len().to_string());
        if let Some(profile) = &quality {
            edge_metadata.insert("quality_score".to_owned(), profile.quality_score.to_string());
        }
        self.call(
            "track_lineage",
            lineage.track_lineage(LineageEdge {
                source: metadata.file_id.clone(),
                operation: "ingest_legacy_data".to_owned(),
                destination: metadata_id.clone(),
                metadata: edge_metadata,
            }),
        )
        .await?;

        tracing::info!(file_id = %metadata.file_id, metadata_id = %metadata_id, "ingestion complete");

        Ok(IngestOutcome {
            file_ids: vec![metadata.file_id.clone()],
            file_id: metadata.file_id,
            records,
            schema,
            quality,
            metadata_id,
        })
    }

    /// Maps a source record onto a canonical model.
    ///
    /// Resolve the source schema (stored document or fresh discovery), map
    /// fields, transform the record, validate it against the target model
    /// (validation issues are reported, not fatal), persist the mapping
    /// rules, and record lineage.
    ///
    /// # Errors
    ///
    /// Same contract as [`MigrationOrchestrator::ingest_legacy_data`].
    #[tracing::instrument(skip(self, request), fields(canonical_model = %request.canonical_model))]
    pub async fn map_to_canonical(&self, request: MapRequest) -> Result<MapOutcome> {
        self.guard(
            WalPayload::MapToCanonical {
                source_schema_id: request.source_schema_id.clone(),
                canonical_model: request.canonical_model.clone(),
            },
            "canonical_mapping_queue",
            request.actor.clone(),
        )
        .await?;

        let result = self.run_map(request).await;
        self.metrics
            .record_pipeline("map_to_canonical", result.is_ok());
        result
    }

    async fn run_map(&self, request: MapRequest) -> Result<MapOutcome> {
        let mapper = self.resolver.schema_mapper()?;
        let documents = self.resolver.document_store()?;

        let stored_schema = match &request.source_schema_id {
            Some(schema_id) => {
                let document = self
                    .call("retrieve_document", documents.retrieve_document(schema_id))
                    .await?;
                document.and_then(|doc| {
                    // Ingestion metadata nests the schema; a bare schema
                    // document is also accepted.
                    doc.body
                        .get("schema")
                        .cloned()
                        .or(Some(doc.body))
                        .and_then(|value| serde_json::from_value::<SchemaDescriptor>(value).ok())
                })
            }
            None => None,
        };

        let source_schema = match stored_schema {
            Some(schema) => schema,
            None => {
                let sample = std::slice::from_ref(&request.source_data);
                self.call("discover_schema", mapper.discover_schema("adhoc", sample))
                    .await?
            }
        };

        let mapping = self
            .call(
                "map_to_canonical",
                mapper.map_to_canonical(&source_schema, &request.canonical_model),
            )
            .await?;
        tracing::info!(
            mapping_id = %mapping.mapping_id,
            fields = mapping.field_mappings.len(),
            "field mapping produced"
        );

        let canonical_data = apply_field_mappings(&request.source_data, &mapping.field_mappings);

        let validation = self
            .call(
                "validate_against_model",
                mapper.validate_against_model(&canonical_data, &request.canonical_model),
            )
            .await?;
        if !validation.valid {
            tracing::warn!(issues = ?validation.issues, "canonical validation reported issues");
        }

        let rules_body = json!({
            "mapping_id": &mapping.mapping_id,
            "canonical_model": &request.canonical_model,
            "field_mappings": &mapping.field_mappings,
            "confidence": mapping.confidence,
            "created_at": Utc::now().to_rfc3339(),
        });
        let mapping_rules_id = self
            .call(
                "store_document",
                documents.store_document("canonical_mapping_rule", rules_body),
            )
            .await?;

        let lineage = self.resolver.lineage_recorder()?;
        let mut edge_metadata = BTreeMap::new();
        edge_metadata.insert("canonical_model".to_owned(), request.canonical_model.clone());
        edge_metadata.insert("mapping_id".to_owned(), mapping.mapping_id.clone());
        edge_metadata.insert("confidence".to_owned(), mapping.confidence.to_string());
        self.call(
            "track_lineage",
            lineage.track_lineage(LineageEdge {
                source: request
                    .source_schema_id
                    .unwrap_or_else(|| "discovered".to_owned()),
                operation: "map_to_canonical".to_owned(),
                destination: mapping_rules_id.clone(),
                metadata: edge_metadata,
            }),
        )
        .await?;

        tracing::info!(mapping_rules_id = %mapping_rules_id, "canonical mapping complete");

        Ok(MapOutcome {
            mapping_id: mapping.mapping_id,
            mapping_rules_id,
            canonical_data,
            field_mappings: mapping.field_mappings,
            confidence: mapping.confidence,
            validation,
        })
    }

    /// Routes a policy to a target system.
    ///
    /// Look up the tracked status, extract the routing key, evaluate the
    /// rules, persist the decision, report progress to the tracker, and
    /// record lineage.
    ///
    /// # Errors
    ///
    /// Same contract as [`MigrationOrchestrator::ingest_legacy_data`].
    #[tracing::instrument(skip(self, request), fields(namespace = %request.namespace))]
    pub async fn route_policies(&self, request: RouteRequest) -> Result<RouteOutcome> {
        let policy_id = request
            .policy
            .get("policy_id")
            .and_then(serde_json::Value::as_str)
            .map(ToOwned::to_owned);
        self.guard(
            WalPayload::RoutePolicies {
                policy_id: policy_id.clone(),
                namespace: request.namespace.clone(),
            },
            "routing_evaluation_queue",
            request.actor.clone(),
        )
        .await?;

        let result = self.run_route(request, policy_id).await;
        self.metrics.record_pipeline("route_policies", result.is_ok());
        result
    }

    async fn run_route(
        &self,
        request: RouteRequest,
        policy_id: Option<String>,
    ) -> Result<RouteOutcome> {
        let routing = self.resolver.routing_engine()?;

        let tracked_policy = match &policy_id {
            Some(raw) => Some(PolicyId::new(raw.clone())?),
            None => None,
        };

        let policy_status = match &tracked_policy {
            Some(id) => match self.tracker.get_policy_location(id).await {
                Ok(record) => Some(record.status),
                Err(cutover_track::error::Error::PolicyNotFound { .. }) => {
                    tracing::warn!(policy_id = %id, "policy not registered, routing without tracked status");
                    None
                }
                Err(err) => return Err(err.into()),
            },
            None => None,
        };

        let routing_key = match self
            .call(
                "get_routing_key",
                routing.get_routing_key(&request.policy, &request.namespace),
            )
            .await
        {
            Ok(key) => key,
            // Key extraction failure falls back to the policy ID when there
            // is one; routing can still proceed on the full record.
            Err(err) => match &policy_id {
                Some(id) => {
                    tracing::warn!(error = %err, "routing key extraction failed, falling back to policy_id");
                    id.clone()
                }
                None => return Err(err),
            },
        };

        let decision = self
            .call(
                "evaluate_routing",
                routing.evaluate_routing(&request.policy, &request.namespace),
            )
            .await?;
        tracing::info!(
            target_system = %decision.target_system,
            matched = decision.matched_rules.len(),
            "routing evaluated"
        );

        let documents = self.resolver.document_store()?;
        let decision_body = json!({
            "policy_id": &policy_id,
            "routing_key": &routing_key,
            "target_system": &decision.target_system,
            "matched_rules": &decision.matched_rules,
            "confidence": decision.confidence,
            "policy_status": policy_status,
            "routed_at": Utc::now().to_rfc3339(),
        });
        let routing_decision_id = self
            .call(
                "store_document",
                documents.store_document("routing_decision", decision_body),
            )
            .await?;

        // Report progress on the tracked record. Routing a policy that is
        // not registered, or whose status cannot legally move to
        // in_progress, is reported and skipped rather than failing the
        // pipeline.
        if let Some(id) = &tracked_policy {
            let mut details = BTreeMap::new();
            details.insert("routing_key".to_owned(), routing_key.clone());
            details.insert("target_system".to_owned(), decision.target_system.to_string());
            details.insert("matched_rules".to_owned(), decision.matched_rules.join(","));
            match self
                .tracker
                .update_migration_status(id, MigrationStatus::InProgress, None, Some(details), None)
                .await
            {
                Ok(_) => tracing::info!(policy_id = %id, "tracker updated with routing progress"),
                Err(
                    err @ (cutover_track::error::Error::PolicyNotFound { .. }
                    | cutover_track::error::Error::InvalidStatusTransition { .. }),
                ) => {
                    tracing::warn!(policy_id = %id, error = %err, "tracker not updated");
                }
                Err(err) => return Err(err.into()),
            }
        }

        let lineage = self.resolver.lineage_recorder()?;
        let mut edge_metadata = BTreeMap::new();
        edge_metadata.insert("routing_key".to_owned(), routing_key.clone());
        edge_metadata.insert("routing_decision_id".to_owned(), routing_decision_id.clone());
        self.call(
            "track_lineage",
            lineage.track_lineage(LineageEdge {
                source: policy_id.unwrap_or_else(|| routing_key.clone()),
                operation: "route_policies".to_owned(),
                destination: decision.target_system.to_string(),
                metadata: edge_metadata,
            }),
        )
        .await?;

        Ok(RouteOutcome {
            routing_decision_id,
            target_system: decision.target_system,
            routing_key,
            matched_rules: decision.matched_rules,
            confidence: decision.confidence,
            policy_status,
        })
    }

    /// Compensation: deletes files created by an ingest milestone.
    ///
    /// Idempotent: files already gone are skipped without error, so the
    /// handler can be replayed with the same `(saga_id, milestone_id,
    /// context)` any number of times.
    ///
    /// # Errors
    ///
    /// Returns [`Error::WalGuard`] when the intent cannot be recorded (the
    /// handler does not run) or a structured failure when the content store
    /// cannot be reached.
    #[tracing::instrument(skip(self, context), fields(saga_id = %saga_id, milestone_id))]
    pub async fn delete_ingested_data(
        &self,
        saga_id: SagaId,
        milestone_id: &str,
        context: &SagaContext,
    ) -> Result<CompensationOutcome> {
        self.guard_compensation(saga_id, milestone_id, "delete_ingested_data")
            .await?;

        let content_store = self.resolver.content_store()?;
        let mut removed = Vec::new();

        for file_id in context.get_str_list("file_ids") {
            let exists = self
                .call("get_metadata", content_store.get_metadata(&file_id))
                .await?
                .is_some();
            if exists {
                if self.call("delete", content_store.delete(&file_id)).await? {
                    removed.push(file_id);
                }
            } else {
                tracing::debug!(file_id = %file_id, "file already deleted");
            }
        }

        Ok(CompensationOutcome {
            saga_id,
            milestone_id: milestone_id.to_owned(),
            removed,
        })
    }

    /// Compensation: removes mapping-rule documents persisted by a mapping
    /// milestone. Idempotent.
    ///
    /// # Errors
    ///
    /// Same contract as [`MigrationOrchestrator::delete_ingested_data`].
    #[tracing::instrument(skip(self, context), fields(saga_id = %saga_id, milestone_id))]
    pub async fn revert_canonical_mapping(
        &self,
        saga_id: SagaId,
        milestone_id: &str,
        context: &SagaContext,
    ) -> Result<CompensationOutcome> {
        self.guard_compensation(saga_id, milestone_id, "revert_canonical_mapping")
            .await?;
        self.remove_documents(saga_id, milestone_id, context.get_str_list("mapping_rules_ids"))
            .await
    }

    /// Compensation: removes routing-decision documents persisted by a
    /// routing milestone. Idempotent.
    ///
    /// # Errors
    ///
    /// Same contract as [`MigrationOrchestrator::delete_ingested_data`].
    #[tracing::instrument(skip(self, context), fields(saga_id = %saga_id, milestone_id))]
    pub async fn revert_routing(
        &self,
        saga_id: SagaId,
        milestone_id: &str,
        context: &SagaContext,
    ) -> Result<CompensationOutcome> {
        self.guard_compensation(saga_id, milestone_id, "revert_routing")
            .await?;
        self.remove_documents(
            saga_id,
            milestone_id,
            context.get_str_list("routing_decision_ids"),
        )
        .await
    }

    async fn remove_documents(
        &self,
        saga_id: SagaId,
        milestone_id: &str,
        document_ids: Vec<String>,
    ) -> Result<CompensationOutcome> {
        let documents = self.resolver.document_store()?;
        let mut removed = Vec::new();

        for document_id in document_ids {
            if self
                .call("delete_document", documents.delete_document(&document_id))
                .await?
            {
                removed.push(document_id);
            } else {
                tracing::debug!(document_id = %document_id, "document already deleted");
            }
        }

        Ok(CompensationOutcome {
            saga_id,
            milestone_id: milestone_id.to_owned(),
            removed,
        })
    }

    /// Records the intent for a guarded pipeline, failing closed.
    async fn guard(
        &self,
        payload: WalPayload,
        target: &str,
        actor: Option<ActorContext>,
    ) -> Result<()> {
        let mut entry =
            WalEntry::new(WAL_NAMESPACE, target, payload).with_lifecycle(RetryPolicy::retries(3));
        if let Some(actor) = actor {
            entry = entry.with_actor(actor);
        }
        self.wal
            .record(entry)
            .await
            .map(|_| ())
            .map_err(|source| Error::WalGuard { source })
    }

    /// Records the intent for a compensation handler, failing closed.
    async fn guard_compensation(
        &self,
        saga_id: SagaId,
        milestone_id: &str,
        handler: &str,
    ) -> Result<()> {
        let entry = WalEntry::new(
            COMPENSATION_NAMESPACE,
            COMPENSATION_TARGET,
            WalPayload::Compensation {
                saga_id: saga_id.to_string(),
                milestone_id: milestone_id.to_owned(),
                handler: handler.to_owned(),
            },
        )
        .with_lifecycle(RetryPolicy::retries(5).with_delay_ms(60_000).exponential());
        self.wal
            .record(entry)
            .await
            .map(|_| ())
            .map_err(|source| Error::WalGuard { source })
    }

    /// Runs one collaborator call under the uniform timeout.
    async fn call<T>(
        &self,
        operation: &str,
        fut: impl Future<Output = Result<T>> + Send,
    ) -> Result<T> {
        let started = Instant::now();
        let result = match tokio::time::timeout(self.timeouts.collaborator, fut).await {
            Ok(result) => result,
            Err(_) => Err(Error::external(
                operation,
                format!(
                    "timed out after {}ms",
                    self.timeouts.collaborator.as_millis()
                ),
            )),
        };
        self.metrics.observe_call(operation, started.elapsed());
        result
    }
}
