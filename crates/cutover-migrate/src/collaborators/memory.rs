//! In-memory collaborator implementations for testing and development.
//!
//! These provide working stand-ins for the external services the pipelines
//! drive. They are single-process and lose all state on exit; production
//! deployments supply their own implementations of the collaborator traits.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use chrono::Utc;
use ulid::Ulid;

use cutover_core::SystemId;

use super::{
    ContentStore, DataProfiler, DocumentStore, FieldDescriptor, FieldMapping, FileMetadata,
    FileParser, LineageEdge, LineageRecorder, MappingOutcome, ModelValidation, QualityProfile,
    RoutingDecision, RoutingEngine, SchemaDescriptor, SchemaMapper, StoredDocument,
};
use crate::error::{Error, Result};

/// Converts a lock poison error to a storage error.
fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::storage("lock poisoned")
}

/// In-memory content store.
#[derive(Debug, Default)]
pub struct InMemoryContentStore {
    files: RwLock<HashMap<String, (FileMetadata, Vec<u8>)>>,
}

impl InMemoryContentStore {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored files.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn file_count(&self) -> Result<usize> {
        let files = self.files.read().map_err(poison_err)?;
        Ok(files.len())
    }
}

#[async_trait]
impl ContentStore for InMemoryContentStore {
    async fn upload(&self, filename: &str, bytes: Vec<u8>) -> Result<FileMetadata> {
        let metadata = FileMetadata {
            file_id: format!("file-{}", Ulid::new()),
            filename: filename.to_owned(),
            byte_size: bytes.len() as u64,
            uploaded_at: Utc::now(),
        };
        let mut files = self.files.write().map_err(poison_err)?;
        files.insert(metadata.file_id.clone(), (metadata.clone(), bytes));
        drop(files);
        Ok(metadata)
    }

    async fn get_metadata(&self, file_id: &str) -> Result<Option<FileMetadata>> {
        let files = self.files.read().map_err(poison_err)?;
        Ok(files.get(file_id).map(|(metadata, _)| metadata.clone()))
    }

    async fn delete(&self, file_id: &str) -> Result<bool> {
        let mut files = self.files.write().map_err(poison_err)?;
        Ok(files.remove(file_id).is_some())
    }
}

/// A file parser that returns a fixed record batch for every file.
///
/// Stands in for a real format-aware parser; the pipelines only care about
/// the records coming back.
#[derive(Debug, Default)]
pub struct StaticFileParser {
    records: Vec<serde_json::Value>,
}

impl StaticFileParser {
    /// Creates a parser that yields the given records.
    #[must_use]
    pub fn new(records: Vec<serde_json::Value>) -> Self {
        Self { records }
    }
}

#[async_trait]
impl FileParser for StaticFileParser {
    async fn parse(&self, _file_id: &str) -> Result<Vec<serde_json::Value>> {
        Ok(self.records.clone())
    }
}

/// A file parser that fails every call.
#[derive(Debug)]
pub struct FailingFileParser {
    message: String,
}

impl FailingFileParser {
    /// Creates a parser that fails with the given message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[async_trait]
impl FileParser for FailingFileParser {
    async fn parse(&self, _file_id: &str) -> Result<Vec<serde_json::Value>> {
        Err(Error::external("parse", self.message.clone()))
    }
}

/// A profiler that scores records by how many fields are non-null.
#[derive(Debug, Default)]
pub struct NullRatioProfiler;

#[async_trait]
impl DataProfiler for NullRatioProfiler {
    async fn profile(&self, records: &[serde_json::Value]) -> Result<QualityProfile> {
        let mut fields = 0usize;
        let mut populated = 0usize;
        let mut issues = Vec::new();

        for (index, record) in records.iter().enumerate() {
            let Some(object) = record.as_object() else {
                issues.push(format!("record {index} is not an object"));
                continue;
            };
            for (name, value) in object {
                fields += 1;
                if value.is_null() {
                    issues.push(format!("record {index}: field '{name}' is null"));
                } else {
                    populated += 1;
                }
            }
        }

        #[allow(clippy::cast_precision_loss)]
        let quality_score = if fields == 0 {
            0.0
        } else {
            populated as f64 / fields as f64
        };

        Ok(QualityProfile {
            quality_score,
            issues,
        })
    }
}

/// A schema mapper that derives schemas from record keys and maps fields by
/// lowercasing their names.
#[derive(Debug, Default)]
pub struct HeuristicSchemaMapper;

#[async_trait]
impl SchemaMapper for HeuristicSchemaMapper {
    async fn discover_schema(
        &self,
        schema_id: &str,
        sample: &[serde_json::Value],
    ) -> Result<SchemaDescriptor> {
        let mut fields: Vec<FieldDescriptor> = Vec::new();
        for record in sample {
            let Some(object) = record.as_object() else {
                continue;
            };
            for (name, value) in object {
                if fields.iter().any(|f| f.name == *name) {
                    continue;
                }
                let data_type = match value {
                    serde_json::Value::Number(_) => "number",
                    serde_json::Value::Bool(_) => "boolean",
                    serde_json::Value::Array(_) => "array",
                    serde_json::Value::Object(_) => "object",
                    _ => "string",
                };
                fields.push(FieldDescriptor {
                    name: name.clone(),
                    data_type: data_type.to_owned(),
                });
            }
        }

        Ok(SchemaDescriptor {
            schema_id: schema_id.to_owned(),
            fields,
        })
    }

    async fn map_to_canonical(
        &self,
        source_schema: &SchemaDescriptor,
        _canonical_model: &str,
    ) -> Result<MappingOutcome> {
        let field_mappings: Vec<FieldMapping> = source_schema
            .fields
            .iter()
            .map(|field| FieldMapping {
                source_field: field.name.clone(),
                target_field: field.name.to_lowercase(),
                confidence: 0.9,
            })
            .collect();

        Ok(MappingOutcome {
            mapping_id: format!("map-{}", Ulid::new()),
            field_mappings,
            confidence: 0.9,
        })
    }

    async fn validate_against_model(
        &self,
        record: &serde_json::Value,
        canonical_model: &str,
    ) -> Result<ModelValidation> {
        let Some(object) = record.as_object() else {
            return Ok(ModelValidation {
                valid: false,
                issues: vec![format!("record is not an object ({canonical_model})")],
            });
        };
        if object.is_empty() {
            return Ok(ModelValidation {
                valid: false,
                issues: vec!["record has no fields".into()],
            });
        }
        Ok(ModelValidation {
            valid: true,
            issues: Vec::new(),
        })
    }
}

/// One routing rule for [`TableRoutingEngine`].
#[derive(Debug, Clone)]
pub struct RoutingRule {
    /// Rule name reported in decisions.
    pub name: String,
    /// Field the rule inspects.
    pub field: String,
    /// Value the field must equal (as a string).
    pub equals: String,
    /// Target system when the rule matches.
    pub target_system: SystemId,
}

/// A routing engine driven by a fixed rule table.
///
/// Rules are evaluated in order; the first match wins. Without a match the
/// engine falls back to the default target, and without one of those the
/// policy is unroutable.
#[derive(Debug, Default)]
pub struct TableRoutingEngine {
    rules: Vec<RoutingRule>,
    default_target: Option<SystemId>,
}

impl TableRoutingEngine {
    /// Creates an engine with no rules and no default.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a rule.
    #[must_use]
    pub fn with_rule(mut self, rule: RoutingRule) -> Self {
        self.rules.push(rule);
        self
    }

    /// Sets the fallback target for unmatched policies.
    #[must_use]
    pub fn with_default(mut self, target: SystemId) -> Self {
        self.default_target = Some(target);
        self
    }
}

#[async_trait]
impl RoutingEngine for TableRoutingEngine {
    async fn get_routing_key(
        &self,
        policy: &serde_json::Value,
        namespace: &str,
    ) -> Result<String> {
        policy
            .get("policy_id")
            .and_then(serde_json::Value::as_str)
            .map(|id| format!("{namespace}:{id}"))
            .ok_or_else(|| Error::external("get_routing_key", "policy has no policy_id field"))
    }

    async fn evaluate_routing(
        &self,
        policy: &serde_json::Value,
        _namespace: &str,
    ) -> Result<RoutingDecision> {
        for rule in &self.rules {
            let matches = policy
                .get(&rule.field)
                .and_then(serde_json::Value::as_str)
                .is_some_and(|value| value == rule.equals);
            if matches {
                return Ok(RoutingDecision {
                    target_system: rule.target_system.clone(),
                    matched_rules: vec![rule.name.clone()],
                    confidence: 1.0,
                });
            }
        }

        match &self.default_target {
            Some(target) => Ok(RoutingDecision {
                target_system: target.clone(),
                matched_rules: Vec::new(),
                confidence: 0.5,
            }),
            None => Err(Error::external(
                "evaluate_routing",
                "no rule matched and no default target is configured",
            )),
        }
    }
}

/// A routing engine that fails every evaluation.
#[derive(Debug)]
pub struct FailingRoutingEngine {
    message: String,
}

impl FailingRoutingEngine {
    /// Creates an engine that fails with the given message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[async_trait]
impl RoutingEngine for FailingRoutingEngine {
    async fn get_routing_key(
        &self,
        _policy: &serde_json::Value,
        _namespace: &str,
    ) -> Result<String> {
        Err(Error::external("get_routing_key", self.message.clone()))
    }

    async fn evaluate_routing(
        &self,
        _policy: &serde_json::Value,
        _namespace: &str,
    ) -> Result<RoutingDecision> {
        Err(Error::external("evaluate_routing", self.message.clone()))
    }
}

/// In-memory document store.
#[derive(Debug, Default)]
pub struct InMemoryDocumentStore {
    documents: RwLock<HashMap<String, StoredDocument>>,
}

impl InMemoryDocumentStore {
    /// Creates a new empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all stored documents of the given kind.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn documents_of_kind(&self, kind: &str) -> Result<Vec<StoredDocument>> {
        let documents = self.documents.read().map_err(poison_err)?;
        Ok(documents
            .values()
            .filter(|doc| doc.kind == kind)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn store_document(&self, kind: &str, body: serde_json::Value) -> Result<String> {
        let document = StoredDocument {
            document_id: format!("doc-{}", Ulid::new()),
            kind: kind.to_owned(),
            body,
            stored_at: Utc::now(),
        };
        let document_id = document.document_id.clone();
        let mut documents = self.documents.write().map_err(poison_err)?;
        documents.insert(document_id.clone(), document);
        drop(documents);
        Ok(document_id)
    }

    async fn retrieve_document(&self, document_id: &str) -> Result<Option<StoredDocument>> {
        let documents = self.documents.read().map_err(poison_err)?;
        Ok(documents.get(document_id).cloned())
    }

    async fn delete_document(&self, document_id: &str) -> Result<bool> {
        let mut documents = self.documents.write().map_err(poison_err)?;
        Ok(documents.remove(document_id).is_some())
    }
}

/// A lineage recorder that remembers every edge, for inspection in tests.
#[derive(Debug, Default)]
pub struct RecordingLineageRecorder {
    edges: RwLock<Vec<LineageEdge>>,
}

impl RecordingLineageRecorder {
    /// Creates a new empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of recorded edges in insertion order.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn edges(&self) -> Result<Vec<LineageEdge>> {
        let edges = self.edges.read().map_err(poison_err)?;
        Ok(edges.clone())
    }
}

#[async_trait]
impl LineageRecorder for RecordingLineageRecorder {
    async fn track_lineage(&self, edge: LineageEdge) -> Result<()> {
        let mut edges = self.edges.write().map_err(poison_err)?;
        edges.push(edge);
        drop(edges);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn content_store_roundtrip() -> Result<()> {
        let store = InMemoryContentStore::new();

        let metadata = store.upload("claims.dat", b"records".to_vec()).await?;
        assert_eq!(metadata.byte_size, 7);

        let fetched = store.get_metadata(&metadata.file_id).await?;
        assert_eq!(fetched.as_ref().map(|m| m.filename.as_str()), Some("claims.dat"));

        assert!(store.delete(&metadata.file_id).await?);
        // Second delete is a no-op, not an error.
        assert!(!store.delete(&metadata.file_id).await?);

        Ok(())
    }

    #[tokio::test]
    async fn profiler_scores_null_ratio() -> Result<()> {
        let profiler = NullRatioProfiler;
        let records = vec![
            json!({"a": 1, "b": null}),
            json!({"a": 2, "b": "ok"}),
        ];

        let profile = profiler.profile(&records).await?;
        assert!((profile.quality_score - 0.75).abs() < f64::EPSILON);
        assert_eq!(profile.issues.len(), 1);

        Ok(())
    }

    #[tokio::test]
    async fn mapper_discovers_union_of_fields() -> Result<()> {
        let mapper = HeuristicSchemaMapper;
        let sample = vec![
            json!({"POLICY_NO": "POL-1"}),
            json!({"POLICY_NO": "POL-2", "PREMIUM": 120.5}),
        ];

        let schema = mapper.discover_schema("file-1", &sample).await?;
        assert_eq!(schema.fields.len(), 2);
        assert!(schema.fields.iter().any(|f| f.name == "PREMIUM" && f.data_type == "number"));

        let mapping = mapper.map_to_canonical(&schema, "policy_v1").await?;
        assert!(
            mapping
                .field_mappings
                .iter()
                .any(|m| m.source_field == "POLICY_NO" && m.target_field == "policy_no")
        );

        Ok(())
    }

    #[tokio::test]
    async fn routing_table_first_match_wins() -> Result<()> {
        let engine = TableRoutingEngine::new()
            .with_rule(RoutingRule {
                name: "life-to-hub".into(),
                field: "line_of_business".into(),
                equals: "life".into(),
                target_system: SystemId::new("PolicyHub"),
            })
            .with_default(SystemId::new("LegacyHold"));

        let decision = engine
            .evaluate_routing(&json!({"policy_id": "POL-1", "line_of_business": "life"}), "default")
            .await?;
        assert_eq!(decision.target_system, SystemId::new("PolicyHub"));
        assert_eq!(decision.matched_rules, vec!["life-to-hub"]);

        let fallback = engine
            .evaluate_routing(&json!({"policy_id": "POL-2", "line_of_business": "auto"}), "default")
            .await?;
        assert_eq!(fallback.target_system, SystemId::new("LegacyHold"));
        assert!(fallback.matched_rules.is_empty());

        Ok(())
    }

    #[tokio::test]
    async fn routing_without_match_or_default_fails() {
        let engine = TableRoutingEngine::new();
        let err = engine
            .evaluate_routing(&json!({"policy_id": "POL-1"}), "default")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ExternalOperation { .. }));
    }

    #[tokio::test]
    async fn document_store_delete_is_idempotent() -> Result<()> {
        let store = InMemoryDocumentStore::new();
        let id = store.store_document("routing_decision", json!({"x": 1})).await?;

        assert!(store.delete_document(&id).await?);
        assert!(!store.delete_document(&id).await?);
        assert!(store.retrieve_document(&id).await?.is_none());

        Ok(())
    }
}
