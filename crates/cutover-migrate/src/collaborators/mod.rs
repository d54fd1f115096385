//! Collaborator interfaces consumed by the migration pipelines.
//!
//! These are the external services the orchestrator drives: content
//! storage, file parsing, data profiling, schema mapping, routing
//! evaluation, document storage, and lineage recording. All of them are
//! black boxes behind async traits; the orchestrator never assumes anything
//! about their implementation beyond the contract here.
//!
//! In-memory implementations live in [`memory`] and double as test doubles.

pub mod memory;

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use cutover_core::SystemId;

use crate::error::Result;

/// The collaborator services the resolver can produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceKind {
    /// Raw file content storage.
    ContentStore,
    /// Legacy file parsing.
    FileParser,
    /// Data quality profiling.
    DataProfiler,
    /// Schema discovery and canonical mapping.
    SchemaMapper,
    /// Routing rule evaluation.
    RoutingEngine,
    /// Document and metadata storage.
    DocumentStore,
    /// Data provenance recording.
    LineageRecorder,
}

impl std::fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ContentStore => write!(f, "content_store"),
            Self::FileParser => write!(f, "file_parser"),
            Self::DataProfiler => write!(f, "data_profiler"),
            Self::SchemaMapper => write!(f, "schema_mapper"),
            Self::RoutingEngine => write!(f, "routing_engine"),
            Self::DocumentStore => write!(f, "document_store"),
            Self::LineageRecorder => write!(f, "lineage_recorder"),
        }
    }
}

/// Metadata for a stored source file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMetadata {
    /// Store-assigned file identifier.
    pub file_id: String,
    /// Original filename.
    pub filename: String,
    /// Content size in bytes.
    pub byte_size: u64,
    /// When the file was stored.
    pub uploaded_at: DateTime<Utc>,
}

/// One field of a discovered schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldDescriptor {
    /// Field name as it appears in the source.
    pub name: String,
    /// Coarse data type (`"string"`, `"number"`, `"boolean"`, ...).
    pub data_type: String,
}

/// A discovered source schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchemaDescriptor {
    /// Identifier of the schema (typically the source file ID).
    pub schema_id: String,
    /// Discovered fields.
    pub fields: Vec<FieldDescriptor>,
}

/// A mapping from one source field to one canonical field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldMapping {
    /// Source field name.
    pub source_field: String,
    /// Canonical model field name.
    pub target_field: String,
    /// Mapper confidence in `[0, 1]`.
    pub confidence: f64,
}

/// Result of mapping a source schema onto a canonical model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MappingOutcome {
    /// Mapper-assigned mapping identifier.
    pub mapping_id: String,
    /// Per-field mappings.
    pub field_mappings: Vec<FieldMapping>,
    /// Overall mapping confidence in `[0, 1]`.
    pub confidence: f64,
}

/// Result of validating a record against a canonical model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelValidation {
    /// Whether the record conforms.
    pub valid: bool,
    /// Human-readable issues when it does not.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub issues: Vec<String>,
}

/// A routing verdict for one policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingDecision {
    /// The system this policy should land in.
    pub target_system: SystemId,
    /// Names of the rules that matched.
    pub matched_rules: Vec<String>,
    /// Engine confidence in `[0, 1]`.
    pub confidence: f64,
}

/// Data quality summary for a batch of parsed records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityProfile {
    /// Overall score in `[0, 1]`.
    pub quality_score: f64,
    /// Notable problems found while profiling.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub issues: Vec<String>,
}

/// A document retrieved from the document store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredDocument {
    /// Store-assigned document identifier.
    pub document_id: String,
    /// Document kind (for example `"ingestion_metadata"`).
    pub kind: String,
    /// Document body.
    pub body: serde_json::Value,
    /// When the document was stored.
    pub stored_at: DateTime<Utc>,
}

/// A provenance edge recorded after a successful pipeline step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineageEdge {
    /// Where the data came from.
    pub source: String,
    /// The operation that moved it.
    pub operation: String,
    /// Where the data went.
    pub destination: String,
    /// Operation-specific annotations.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

/// Raw file content storage.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Stores file content and returns its metadata.
    async fn upload(&self, filename: &str, bytes: Vec<u8>) -> Result<FileMetadata>;

    /// Returns metadata for a stored file, or `None` if it does not exist.
    async fn get_metadata(&self, file_id: &str) -> Result<Option<FileMetadata>>;

    /// Deletes a stored file.
    ///
    /// Returns `false` when the file was already absent, so deletion is
    /// safe to repeat.
    async fn delete(&self, file_id: &str) -> Result<bool>;
}

/// Parses a stored legacy file into records.
#[async_trait]
pub trait FileParser: Send + Sync {
    /// Parses the file into one JSON object per source record.
    async fn parse(&self, file_id: &str) -> Result<Vec<serde_json::Value>>;
}

/// Profiles the quality of parsed records.
#[async_trait]
pub trait DataProfiler: Send + Sync {
    /// Computes a quality profile over the batch.
    async fn profile(&self, records: &[serde_json::Value]) -> Result<QualityProfile>;
}

/// Schema discovery and canonical mapping.
#[async_trait]
pub trait SchemaMapper: Send + Sync {
    /// Discovers a schema from a sample of records.
    async fn discover_schema(
        &self,
        schema_id: &str,
        sample: &[serde_json::Value],
    ) -> Result<SchemaDescriptor>;

    /// Maps a source schema onto the named canonical model.
    async fn map_to_canonical(
        &self,
        source_schema: &SchemaDescriptor,
        canonical_model: &str,
    ) -> Result<MappingOutcome>;

    /// Validates a canonical record against the named model.
    async fn validate_against_model(
        &self,
        record: &serde_json::Value,
        canonical_model: &str,
    ) -> Result<ModelValidation>;
}

/// Routing rule evaluation.
#[async_trait]
pub trait RoutingEngine: Send + Sync {
    /// Extracts the routing key for a policy.
    async fn get_routing_key(
        &self,
        policy: &serde_json::Value,
        namespace: &str,
    ) -> Result<String>;

    /// Evaluates routing rules and picks a target system.
    async fn evaluate_routing(
        &self,
        policy: &serde_json::Value,
        namespace: &str,
    ) -> Result<RoutingDecision>;
}

/// Document and metadata storage.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Stores a document and returns its identifier.
    async fn store_document(&self, kind: &str, body: serde_json::Value) -> Result<String>;

    /// Retrieves a document by identifier, or `None` if it does not exist.
    async fn retrieve_document(&self, document_id: &str) -> Result<Option<StoredDocument>>;

    /// Deletes a document.
    ///
    /// Returns `false` when the document was already absent, so deletion is
    /// safe to repeat.
    async fn delete_document(&self, document_id: &str) -> Result<bool>;
}

/// Data provenance recording.
#[async_trait]
pub trait LineageRecorder: Send + Sync {
    /// Records one provenance edge.
    async fn track_lineage(&self, edge: LineageEdge) -> Result<()>;
}

/// Applies field mappings to a source record, producing a canonical record.
///
/// Unmapped source fields are dropped. When no mappings are supplied the
/// source record is passed through unchanged (graceful degradation, matching
/// the behavior when the mapper cannot produce a mapping).
#[must_use]
pub fn apply_field_mappings(
    source: &serde_json::Value,
    mappings: &[FieldMapping],
) -> serde_json::Value {
    if mappings.is_empty() {
        return source.clone();
    }
    let Some(object) = source.as_object() else {
        return source.clone();
    };

    let mut canonical = serde_json::Map::new();
    for mapping in mappings {
        if let Some(value) = object.get(&mapping.source_field) {
            canonical.insert(mapping.target_field.clone(), value.clone());
        }
    }
    serde_json::Value::Object(canonical)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn apply_mappings_projects_and_renames() {
        let source = json!({"POLICY_NO": "POL-1", "HOLDER_NM": "A. Customer", "JUNK": 1});
        let mappings = vec![
            FieldMapping {
                source_field: "POLICY_NO".into(),
                target_field: "policy_id".into(),
                confidence: 1.0,
            },
            FieldMapping {
                source_field: "HOLDER_NM".into(),
                target_field: "holder_name".into(),
                confidence: 0.9,
            },
        ];

        let canonical = apply_field_mappings(&source, &mappings);
        assert_eq!(canonical, json!({"policy_id": "POL-1", "holder_name": "A. Customer"}));
    }

    #[test]
    fn apply_mappings_without_rules_passes_through() {
        let source = json!({"POLICY_NO": "POL-1"});
        assert_eq!(apply_field_mappings(&source, &[]), source);
    }

    #[test]
    fn apply_mappings_skips_absent_source_fields() {
        let source = json!({"POLICY_NO": "POL-1"});
        let mappings = vec![FieldMapping {
            source_field: "MISSING".into(),
            target_field: "gone".into(),
            confidence: 0.5,
        }];
        assert_eq!(apply_field_mappings(&source, &mappings), json!({}));
    }

    #[test]
    fn service_kind_display() {
        assert_eq!(ServiceKind::SchemaMapper.to_string(), "schema_mapper");
        assert_eq!(ServiceKind::LineageRecorder.to_string(), "lineage_recorder");
    }
}
