//! Write-ahead intent log.
//!
//! Every guarded operation records its intent here *before* producing any
//! externally visible side effect. The entry establishes a happens-before
//! edge: if the append fails, the guarded operation must not run (fail
//! closed). If the process crashes between the append and the side effect,
//! the orphaned intent is resolved by an external replay consumer reading
//! entries by `target` and applying the recorded [`RetryPolicy`].
//!
//! The writer itself never retries anything; the lifecycle fields describe
//! policy for the replay consumer only.
//!
//! ## Idempotency and Ordering
//!
//! Entry IDs are ULIDs, so lexicographic ordering of IDs equals
//! chronological ordering of appends. Each sink additionally assigns a
//! per-sink monotonic `sequence` so replay can establish a total order even
//! when two entries land in the same millisecond.

use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::actor::ActorContext;
use crate::error::{Error, Result};
use crate::id::WalEntryId;

/// Backoff strategy for external replay of a failed delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Backoff {
    /// Retry after a fixed delay.
    #[default]
    Fixed,
    /// Double the delay after each failed attempt.
    Exponential,
}

/// Retry policy recorded with a WAL entry.
///
/// Describes how an external replay consumer should retry failed deliveries
/// to the entry's `target` queue. Purely declarative at this layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryPolicy {
    /// Maximum delivery attempts before the entry is parked.
    pub max_retries: u32,
    /// Delay before the first retry, in milliseconds.
    pub delay_ms: u64,
    /// Backoff strategy applied to subsequent retries.
    pub backoff: Backoff,
}

impl RetryPolicy {
    /// A policy with the given retry count, one-second fixed delay.
    #[must_use]
    pub const fn retries(max_retries: u32) -> Self {
        Self {
            max_retries,
            delay_ms: 1_000,
            backoff: Backoff::Fixed,
        }
    }

    /// Sets the initial retry delay in milliseconds.
    #[must_use]
    pub const fn with_delay_ms(mut self, delay_ms: u64) -> Self {
        self.delay_ms = delay_ms;
        self
    }

    /// Switches to exponential backoff.
    #[must_use]
    pub const fn exponential(mut self) -> Self {
        self.backoff = Backoff::Exponential;
        self
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::retries(3)
    }
}

/// Typed payloads for WAL entries, tagged by operation.
///
/// Location and status values are carried in their wire form (the
/// snake_case strings shared with the registry) so this crate stays free of
/// the tracking domain's types.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum WalPayload {
    /// A policy is about to be registered at a location.
    RegisterPolicy {
        /// Policy being registered.
        policy_id: String,
        /// Location wire value (for example `"legacy_system"`).
        location: String,
        /// System of record, if known.
        #[serde(skip_serializing_if = "Option::is_none")]
        system_id: Option<String>,
    },

    /// A policy's migration status is about to change.
    UpdateMigrationStatus {
        /// Policy being updated.
        policy_id: String,
        /// Status wire value (for example `"in_progress"`).
        status: String,
        /// Wave this policy belongs to, if any.
        #[serde(skip_serializing_if = "Option::is_none")]
        wave_id: Option<String>,
    },

    /// A migration validation pass is about to run.
    ValidateMigration {
        /// Policy being validated.
        policy_id: String,
    },

    /// A cross-system reconciliation is about to run.
    ReconcileSystems {
        /// First system under comparison.
        system_a: String,
        /// Second system under comparison.
        system_b: String,
    },

    /// A legacy file ingestion pipeline is about to run.
    IngestLegacyData {
        /// Existing file identifier, if re-ingesting.
        #[serde(skip_serializing_if = "Option::is_none")]
        file_id: Option<String>,
        /// Original filename, if uploading.
        #[serde(skip_serializing_if = "Option::is_none")]
        filename: Option<String>,
    },

    /// A canonical-mapping pipeline is about to run.
    MapToCanonical {
        /// Stored source schema, if already discovered.
        #[serde(skip_serializing_if = "Option::is_none")]
        source_schema_id: Option<String>,
        /// Target canonical model name.
        canonical_model: String,
    },

    /// A routing pipeline is about to run.
    RoutePolicies {
        /// Policy being routed, if known up front.
        #[serde(skip_serializing_if = "Option::is_none")]
        policy_id: Option<String>,
        /// Routing rule namespace.
        namespace: String,
    },

    /// A compensation handler is about to run.
    Compensation {
        /// Saga whose milestone is being unwound.
        saga_id: String,
        /// Milestone being compensated.
        milestone_id: String,
        /// Name of the compensation handler.
        handler: String,
    },
}

impl WalPayload {
    /// Returns the operation name used in metrics and logs.
    #[must_use]
    pub const fn operation(&self) -> &'static str {
        match self {
            Self::RegisterPolicy { .. } => "register_policy",
            Self::UpdateMigrationStatus { .. } => "update_migration_status",
            Self::ValidateMigration { .. } => "validate_migration",
            Self::ReconcileSystems { .. } => "reconcile_systems",
            Self::IngestLegacyData { .. } => "ingest_legacy_data",
            Self::MapToCanonical { .. } => "map_to_canonical",
            Self::RoutePolicies { .. } => "route_policies",
            Self::Compensation { .. } => "compensation",
        }
    }
}

/// A single write-ahead log entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalEntry {
    /// Unique entry identifier (ULID, sortable by append time).
    pub id: WalEntryId,

    /// Logical namespace (for example `"policy_migration"`).
    pub namespace: String,

    /// Destination queue an external replay consumer delivers to.
    pub target: String,

    /// The recorded intent.
    pub payload: WalPayload,

    /// Replay policy for failed deliveries to `target`.
    pub lifecycle: RetryPolicy,

    /// Who requested the guarded operation, if known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actor: Option<ActorContext>,

    /// Per-sink monotonic sequence, assigned at append time.
    ///
    /// Zero until the entry has been recorded.
    #[serde(default)]
    pub sequence: u64,

    /// When the entry was created.
    pub recorded_at: DateTime<Utc>,
}

impl WalEntry {
    /// Creates a new entry with a generated ID and default retry policy.
    #[must_use]
    pub fn new(
        namespace: impl Into<String>,
        target: impl Into<String>,
        payload: WalPayload,
    ) -> Self {
        Self {
            id: WalEntryId::generate(),
            namespace: namespace.into(),
            target: target.into(),
            payload,
            lifecycle: RetryPolicy::default(),
            actor: None,
            sequence: 0,
            recorded_at: Utc::now(),
        }
    }

    /// Sets the replay lifecycle policy.
    #[must_use]
    pub const fn with_lifecycle(mut self, lifecycle: RetryPolicy) -> Self {
        self.lifecycle = lifecycle;
        self
    }

    /// Attaches the requesting actor.
    #[must_use]
    pub fn with_actor(mut self, actor: ActorContext) -> Self {
        self.actor = Some(actor);
        self
    }
}

/// A sink for write-ahead log entries.
///
/// `record` must complete before the caller proceeds with the guarded
/// operation. Implementations assign the entry's `sequence` and persist it
/// durably for their durability class (in-memory for tests, append-only
/// files for single-node deployments).
#[async_trait]
pub trait WalSink: Send + Sync {
    /// Appends an entry and returns its ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the entry could not be persisted. Callers must
    /// not run the guarded operation when this fails.
    async fn record(&self, entry: WalEntry) -> Result<WalEntryId>;
}

/// Converts a lock poison error to a storage error.
fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::storage("lock poisoned")
}

/// In-memory WAL sink for tests and development.
///
/// Entries are held in append order behind an `RwLock`. State is lost when
/// the process exits; production deployments use a durable sink such as
/// [`crate::ledger::JsonLedgerSink`].
#[derive(Debug, Default)]
pub struct InMemoryWalSink {
    entries: RwLock<Vec<WalEntry>>,
}

impl InMemoryWalSink {
    /// Creates a new empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of all recorded entries in append order.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn entries(&self) -> Result<Vec<WalEntry>> {
        let entries = self.entries.read().map_err(poison_err)?;
        Ok(entries.clone())
    }

    /// Returns the number of recorded entries.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn len(&self) -> Result<usize> {
        let entries = self.entries.read().map_err(poison_err)?;
        Ok(entries.len())
    }

    /// Returns true if no entries have been recorded.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

#[async_trait]
impl WalSink for InMemoryWalSink {
    async fn record(&self, mut entry: WalEntry) -> Result<WalEntryId> {
        let id = entry.id;
        let mut entries = self.entries.write().map_err(poison_err)?;
        entry.sequence = entries.len() as u64 + 1;
        entries.push(entry);
        drop(entries);
        Ok(id)
    }
}

/// A WAL sink that fails every append.
///
/// Used in tests to verify that guarded operations fail closed.
#[derive(Debug, Default)]
pub struct FailingWalSink;

#[async_trait]
impl WalSink for FailingWalSink {
    async fn record(&self, _entry: WalEntry) -> Result<WalEntryId> {
        Err(Error::wal_append("sink unavailable"))
    }
}
