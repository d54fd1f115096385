//! Pluggable storage for the policy registry.
//!
//! The [`RegistryStore`] trait defines the persistence layer for policy
//! records. Writes use compare-and-swap on the record version so concurrent
//! read-modify-write cycles on the same policy ID serialize instead of
//! silently losing location entries.
//!
//! ## Design Principles
//!
//! - **CAS semantics**: `put_versioned` only applies when the caller saw the
//!   latest version
//! - **Append-only**: Records are inserted and replaced, never deleted
//! - **Testability**: In-memory implementation here, durable store in
//!   production

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;

use cutover_core::PolicyId;

use crate::error::{Error, Result};
use crate::policy::PolicyRecord;

/// Result of a compare-and-swap write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CasOutcome {
    /// The record was stored.
    Stored,
    /// The expected version did not match the stored record.
    VersionConflict {
        /// The version actually stored.
        actual: u64,
    },
}

impl CasOutcome {
    /// Returns true if the write was applied.
    #[must_use]
    pub const fn is_stored(&self) -> bool {
        matches!(self, Self::Stored)
    }
}

/// Storage abstraction for policy records.
///
/// All methods are `Send + Sync` to support concurrent access from multiple
/// tracker tasks. Implementations must provide durability appropriate for
/// the deployment; [`InMemoryRegistry`] survives only for the life of the
/// process and cannot be the sole source of truth across restarts.
#[async_trait]
pub trait RegistryStore: Send + Sync {
    /// Gets a record by policy ID.
    ///
    /// Returns `None` if the policy has never been registered.
    async fn get(&self, policy_id: &PolicyId) -> Result<Option<PolicyRecord>>;

    /// Stores a record if the expected version still matches.
    ///
    /// `expected_version` is `None` for a first insert (the policy must not
    /// exist yet) and `Some(v)` for an update of a record read at version
    /// `v`. On mismatch the write is not applied and the actual version is
    /// returned so the caller can re-read and retry.
    async fn put_versioned(
        &self,
        record: PolicyRecord,
        expected_version: Option<u64>,
    ) -> Result<CasOutcome>;

    /// Returns all records, ordered by policy ID for determinism.
    async fn list(&self) -> Result<Vec<PolicyRecord>>;
}

/// Converts a lock poison error to a storage error.
fn poison_err<T>(_: PoisonError<T>) -> Error {
    Error::storage("lock poisoned")
}

/// In-memory registry for tests and development.
#[derive(Debug, Default)]
pub struct InMemoryRegistry {
    records: RwLock<HashMap<PolicyId, PolicyRecord>>,
}

impl InMemoryRegistry {
    /// Creates a new empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of tracked policies.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock is poisoned.
    pub fn policy_count(&self) -> Result<usize> {
        let records = self.records.read().map_err(poison_err)?;
        Ok(records.len())
    }
}

#[async_trait]
impl RegistryStore for InMemoryRegistry {
    async fn get(&self, policy_id: &PolicyId) -> Result<Option<PolicyRecord>> {
        let result = {
            let records = self.records.read().map_err(poison_err)?;
            records.get(policy_id).cloned()
        };
        Ok(result)
    }

    async fn put_versioned(
        &self,
        record: PolicyRecord,
        expected_version: Option<u64>,
    ) -> Result<CasOutcome> {
        let mut records = self.records.write().map_err(poison_err)?;

        let actual = records.get(&record.policy_id).map(|r| r.version);
        if actual != expected_version {
            drop(records);
            return Ok(CasOutcome::VersionConflict {
                actual: actual.unwrap_or(0),
            });
        }

        records.insert(record.policy_id.clone(), record);
        drop(records);
        Ok(CasOutcome::Stored)
    }

    async fn list(&self) -> Result<Vec<PolicyRecord>> {
        let mut result = {
            let records = self.records.read().map_err(poison_err)?;
            records.values().cloned().collect::<Vec<_>>()
        };
        result.sort_by(|a, b| a.policy_id.cmp(&b.policy_id));
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::PolicyLocation;

    fn fresh_record(id: &str) -> PolicyRecord {
        let mut record = PolicyRecord::new(PolicyId::new(id).unwrap());
        record.apply_registration(PolicyLocation::LegacySystem, None, None);
        record
    }

    #[tokio::test]
    async fn insert_and_get() -> Result<()> {
        let registry = InMemoryRegistry::new();
        let record = fresh_record("POL-1");
        let policy_id = record.policy_id.clone();

        assert!(registry.get(&policy_id).await?.is_none());

        let outcome = registry.put_versioned(record, None).await?;
        assert!(outcome.is_stored());

        let stored = registry.get(&policy_id).await?;
        assert_eq!(stored.map(|r| r.version), Some(1));

        Ok(())
    }

    #[tokio::test]
    async fn insert_conflicts_with_existing_record() -> Result<()> {
        let registry = InMemoryRegistry::new();
        registry.put_versioned(fresh_record("POL-1"), None).await?;

        let outcome = registry.put_versioned(fresh_record("POL-1"), None).await?;
        assert_eq!(outcome, CasOutcome::VersionConflict { actual: 1 });

        Ok(())
    }

    #[tokio::test]
    async fn stale_update_conflicts() -> Result<()> {
        let registry = InMemoryRegistry::new();
        let record = fresh_record("POL-1");
        let policy_id = record.policy_id.clone();
        registry.put_versioned(record, None).await?;

        // Two readers take the same snapshot.
        let mut first = registry.get(&policy_id).await?.unwrap();
        let mut second = registry.get(&policy_id).await?.unwrap();

        first.apply_registration(PolicyLocation::NewSystem, None, None);
        let outcome = registry.put_versioned(first, Some(1)).await?;
        assert!(outcome.is_stored());

        second.apply_registration(PolicyLocation::Coexistence, None, None);
        let outcome = registry.put_versioned(second, Some(1)).await?;
        assert_eq!(outcome, CasOutcome::VersionConflict { actual: 2 });

        Ok(())
    }

    #[tokio::test]
    async fn list_orders_by_policy_id() -> Result<()> {
        let registry = InMemoryRegistry::new();
        registry.put_versioned(fresh_record("POL-3"), None).await?;
        registry.put_versioned(fresh_record("POL-1"), None).await?;
        registry.put_versioned(fresh_record("POL-2"), None).await?;

        let ids: Vec<String> = registry
            .list()
            .await?
            .into_iter()
            .map(|r| r.policy_id.to_string())
            .collect();
        assert_eq!(ids, vec!["POL-1", "POL-2", "POL-3"]);

        Ok(())
    }
}
