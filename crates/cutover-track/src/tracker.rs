//! The policy tracker: WAL-guarded operations over the registry.
//!
//! Every mutating operation records its intent to the write-ahead log
//! *before* touching the registry; if the WAL append fails the operation
//! does not run. Mutations go through a read/modify/compare-and-swap loop so
//! concurrent writers to the same policy ID serialize rather than losing
//! entries.

use std::collections::BTreeMap;
use std::sync::Arc;

use cutover_core::{ActorContext, PolicyId, RetryPolicy, SystemId, WalEntry, WalPayload, WalSink, WaveId};

use crate::error::{Error, Result};
use crate::metrics::TrackMetrics;
use crate::policy::{MigrationStatus, PolicyLocation, PolicyRecord};
use crate::registry::{CasOutcome, RegistryStore};

/// WAL namespace for tracking operations.
const WAL_NAMESPACE: &str = "policy_tracking";
/// Replay target queue for tracking operations.
const WAL_TARGET: &str = "policy_tracking_queue";
/// Bound on compare-and-swap retries before reporting contention.
///
/// Every lost race means another writer made progress, so the bound only
/// trips under sustained contention on one policy ID.
const MAX_CAS_ATTEMPTS: u32 = 32;

/// Tracks policy location and migration status across systems.
pub struct PolicyTracker {
    registry: Arc<dyn RegistryStore>,
    wal: Arc<dyn WalSink>,
    metrics: TrackMetrics,
}

impl PolicyTracker {
    /// Creates a tracker over the given registry and WAL sink.
    #[must_use]
    pub fn new(registry: Arc<dyn RegistryStore>, wal: Arc<dyn WalSink>) -> Self {
        Self {
            registry,
            wal,
            metrics: TrackMetrics::new(),
        }
    }

    /// Returns the registry this tracker writes to.
    #[must_use]
    pub fn registry(&self) -> Arc<dyn RegistryStore> {
        Arc::clone(&self.registry)
    }

    /// Returns the WAL sink guarding this tracker's operations.
    #[must_use]
    pub fn wal(&self) -> Arc<dyn WalSink> {
        Arc::clone(&self.wal)
    }

    /// Registers a policy at a location.
    ///
    /// Idempotent append: a policy may be registered any number of times,
    /// each registration appends a location entry and the most recent one
    /// becomes current. A policy seen for the first time starts at
    /// [`MigrationStatus::NotStarted`].
    ///
    /// # Errors
    ///
    /// Returns [`Error::WalGuard`] if the intent could not be recorded (the
    /// registry is untouched), or [`Error::VersionConflict`] if contention
    /// persisted past the retry bound.
    #[tracing::instrument(skip(self, metadata, actor), fields(policy_id = %policy_id, location = %location))]
    pub async fn register_policy(
        &self,
        policy_id: &PolicyId,
        location: PolicyLocation,
        system_id: Option<SystemId>,
        metadata: Option<BTreeMap<String, String>>,
        actor: Option<ActorContext>,
    ) -> Result<PolicyRecord> {
        self.guard(
            WalPayload::RegisterPolicy {
                policy_id: policy_id.to_string(),
                location: location.to_string(),
                system_id: system_id.as_ref().map(ToString::to_string),
            },
            actor,
        )
        .await?;

        for _ in 0..MAX_CAS_ATTEMPTS {
            let (mut record, expected) = match self.registry.get(policy_id).await? {
                Some(record) => {
                    let version = record.version;
                    (record, Some(version))
                }
                None => (PolicyRecord::new(policy_id.clone()), None),
            };

            record.apply_registration(location, system_id.clone(), metadata.clone());

            match self
                .registry
                .put_versioned(record.clone(), expected)
                .await?
            {
                CasOutcome::Stored => {
                    self.metrics.record_registration(&location.to_string());
                    tracing::info!(policy_id = %policy_id, location = %location, "policy registered");
                    return Ok(record);
                }
                CasOutcome::VersionConflict { .. } => {
                    self.metrics.record_cas_retry();
                }
            }
        }

        Err(Error::VersionConflict {
            policy_id: policy_id.clone(),
            attempts: MAX_CAS_ATTEMPTS,
        })
    }

    /// Updates a policy's migration status.
    ///
    /// Transitions are validated against the legal status table, and the
    /// statuses that force a location rewrite the record's current location
    /// as a side effect. Location is never settable through this operation
    /// independently of status.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PolicyNotFound`] for unknown IDs,
    /// [`Error::InvalidStatusTransition`] for illegal transitions, and
    /// [`Error::WalGuard`] if the intent could not be recorded.
    #[tracing::instrument(skip(self, details, actor), fields(policy_id = %policy_id, status = %status))]
    pub async fn update_migration_status(
        &self,
        policy_id: &PolicyId,
        status: MigrationStatus,
        wave_id: Option<WaveId>,
        details: Option<BTreeMap<String, String>>,
        actor: Option<ActorContext>,
    ) -> Result<PolicyRecord> {
        self.guard(
            WalPayload::UpdateMigrationStatus {
                policy_id: policy_id.to_string(),
                status: status.to_string(),
                wave_id: wave_id.as_ref().map(ToString::to_string),
            },
            actor,
        )
        .await?;

        for _ in 0..MAX_CAS_ATTEMPTS {
            let Some(mut record) = self.registry.get(policy_id).await? else {
                return Err(Error::PolicyNotFound {
                    policy_id: policy_id.clone(),
                });
            };
            let expected = record.version;
            let from = record.status;

            if let Err(err) = record.apply_status(status, wave_id.clone(), details.clone()) {
                self.metrics
                    .record_transition_rejection(&from.to_string(), &status.to_string());
                return Err(err);
            }

            match self
                .registry
                .put_versioned(record.clone(), Some(expected))
                .await?
            {
                CasOutcome::Stored => {
                    self.metrics
                        .record_transition(&from.to_string(), &status.to_string());
                    tracing::info!(policy_id = %policy_id, from = %from, to = %status, "migration status updated");
                    return Ok(record);
                }
                CasOutcome::VersionConflict { .. } => {
                    self.metrics.record_cas_retry();
                }
            }
        }

        Err(Error::VersionConflict {
            policy_id: policy_id.clone(),
            attempts: MAX_CAS_ATTEMPTS,
        })
    }

    /// Returns the full tracked state of a policy, history included.
    ///
    /// # Errors
    ///
    /// Returns [`Error::PolicyNotFound`] for unknown IDs.
    pub async fn get_policy_location(&self, policy_id: &PolicyId) -> Result<PolicyRecord> {
        self.registry
            .get(policy_id)
            .await?
            .ok_or_else(|| Error::PolicyNotFound {
                policy_id: policy_id.clone(),
            })
    }

    /// Returns all policies currently at the given location, optionally
    /// narrowed to one system.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry read fails.
    pub async fn get_policies_by_location(
        &self,
        location: PolicyLocation,
        system_id: Option<&SystemId>,
    ) -> Result<Vec<PolicyRecord>> {
        let records = self.registry.list().await?;
        Ok(records
            .into_iter()
            .filter(|record| record.current_location == location)
            .filter(|record| {
                system_id.is_none_or(|wanted| record.current_system_id.as_ref() == Some(wanted))
            })
            .collect())
    }

    /// Records the intent for a guarded operation, failing closed.
    async fn guard(&self, payload: WalPayload, actor: Option<ActorContext>) -> Result<()> {
        let mut entry = WalEntry::new(WAL_NAMESPACE, WAL_TARGET, payload)
            .with_lifecycle(RetryPolicy::retries(3));
        if let Some(actor) = actor {
            entry = entry.with_actor(actor);
        }
        self.wal
            .record(entry)
            .await
            .map(|_| ())
            .map_err(|source| Error::WalGuard { source })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cutover_core::{FailingWalSink, InMemoryWalSink};

    use crate::registry::InMemoryRegistry;

    fn tracker() -> (PolicyTracker, Arc<InMemoryWalSink>, Arc<InMemoryRegistry>) {
        let wal = Arc::new(InMemoryWalSink::new());
        let registry = Arc::new(InMemoryRegistry::new());
        let tracker = PolicyTracker::new(
            Arc::clone(&registry) as Arc<dyn RegistryStore>,
            Arc::clone(&wal) as Arc<dyn WalSink>,
        );
        (tracker, wal, registry)
    }

    fn pol(id: &str) -> PolicyId {
        PolicyId::new(id).unwrap()
    }

    #[tokio::test]
    async fn register_then_lookup() -> Result<()> {
        let (tracker, _, _) = tracker();
        let policy = pol("POL-1");

        tracker
            .register_policy(
                &policy,
                PolicyLocation::LegacySystem,
                Some(SystemId::new("Mainframe")),
                None,
                None,
            )
            .await?;

        let record = tracker.get_policy_location(&policy).await?;
        assert_eq!(record.current_location, PolicyLocation::LegacySystem);
        assert_eq!(record.status, MigrationStatus::NotStarted);
        assert_eq!(record.current_system_id, Some(SystemId::new("Mainframe")));
        assert_eq!(record.locations.len(), 1);

        Ok(())
    }

    #[tokio::test]
    async fn unknown_policy_is_not_found() {
        let (tracker, _, _) = tracker();
        let err = tracker.get_policy_location(&pol("POL-404")).await.unwrap_err();
        assert!(matches!(err, Error::PolicyNotFound { .. }));
    }

    #[tokio::test]
    async fn update_status_requires_registration() {
        let (tracker, _, _) = tracker();
        let err = tracker
            .update_migration_status(&pol("POL-404"), MigrationStatus::InProgress, None, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PolicyNotFound { .. }));
    }

    #[tokio::test]
    async fn status_updates_drive_location() -> Result<()> {
        let (tracker, _, _) = tracker();
        let policy = pol("POL-1");

        tracker
            .register_policy(&policy, PolicyLocation::LegacySystem, None, None, None)
            .await?;

        let record = tracker
            .update_migration_status(&policy, MigrationStatus::InProgress, None, None, None)
            .await?;
        assert_eq!(record.current_location, PolicyLocation::InTransit);

        let record = tracker
            .update_migration_status(&policy, MigrationStatus::Completed, None, None, None)
            .await?;
        assert_eq!(record.current_location, PolicyLocation::NewSystem);

        Ok(())
    }

    #[tokio::test]
    async fn wal_entry_precedes_registry_mutation() -> Result<()> {
        let (tracker, wal, registry) = tracker();
        let policy = pol("POL-1");

        tracker
            .register_policy(&policy, PolicyLocation::LegacySystem, None, None, None)
            .await?;

        let entries = wal.entries().map_err(Error::Core)?;
        assert_eq!(entries.len(), 1);
        assert!(matches!(
            entries[0].payload,
            WalPayload::RegisterPolicy { .. }
        ));
        assert_eq!(registry.policy_count()?, 1);

        Ok(())
    }

    #[tokio::test]
    async fn failed_wal_append_fails_closed() {
        let registry = Arc::new(InMemoryRegistry::new());
        let tracker = PolicyTracker::new(
            Arc::clone(&registry) as Arc<dyn RegistryStore>,
            Arc::new(FailingWalSink),
        );

        let err = tracker
            .register_policy(&pol("POL-1"), PolicyLocation::LegacySystem, None, None, None)
            .await
            .unwrap_err();

        assert!(matches!(err, Error::WalGuard { .. }));
        // The guarded operation must not have run.
        assert_eq!(registry.policy_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn illegal_transition_is_structured_error() -> Result<()> {
        let (tracker, _, _) = tracker();
        let policy = pol("POL-1");

        tracker
            .register_policy(&policy, PolicyLocation::LegacySystem, None, None, None)
            .await?;

        let err = tracker
            .update_migration_status(&policy, MigrationStatus::Validated, None, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidStatusTransition { .. }));

        Ok(())
    }

    #[tokio::test]
    async fn retry_after_rollback_is_allowed() -> Result<()> {
        let (tracker, _, _) = tracker();
        let policy = pol("POL-1");

        tracker
            .register_policy(&policy, PolicyLocation::LegacySystem, None, None, None)
            .await?;
        tracker
            .update_migration_status(&policy, MigrationStatus::InProgress, None, None, None)
            .await?;
        tracker
            .update_migration_status(&policy, MigrationStatus::Failed, None, None, None)
            .await?;
        tracker
            .update_migration_status(&policy, MigrationStatus::RolledBack, None, None, None)
            .await?;

        let record = tracker
            .update_migration_status(&policy, MigrationStatus::InProgress, None, None, None)
            .await?;
        assert_eq!(record.status, MigrationStatus::InProgress);
        assert_eq!(record.current_location, PolicyLocation::InTransit);

        Ok(())
    }

    #[tokio::test]
    async fn concurrent_registrations_lose_no_entries() -> Result<()> {
        let (tracker, _, _) = tracker();
        let tracker = Arc::new(tracker);
        let policy = pol("POL-1");

        let mut handles = Vec::new();
        for i in 0..16 {
            let tracker = Arc::clone(&tracker);
            let policy = policy.clone();
            handles.push(tokio::spawn(async move {
                let location = if i % 2 == 0 {
                    PolicyLocation::LegacySystem
                } else {
                    PolicyLocation::NewSystem
                };
                tracker
                    .register_policy(&policy, location, None, None, None)
                    .await
            }));
        }
        for handle in handles {
            handle.await.expect("task panicked")?;
        }

        let record = tracker.get_policy_location(&policy).await?;
        assert_eq!(record.locations.len(), 16);
        assert_eq!(record.version, 16);

        Ok(())
    }

    #[tokio::test]
    async fn filter_by_location_and_system() -> Result<()> {
        let (tracker, _, _) = tracker();

        tracker
            .register_policy(
                &pol("POL-1"),
                PolicyLocation::LegacySystem,
                Some(SystemId::new("Mainframe")),
                None,
                None,
            )
            .await?;
        tracker
            .register_policy(
                &pol("POL-2"),
                PolicyLocation::LegacySystem,
                Some(SystemId::new("Vsam")),
                None,
                None,
            )
            .await?;
        tracker
            .register_policy(
                &pol("POL-3"),
                PolicyLocation::NewSystem,
                Some(SystemId::new("PolicyHub")),
                None,
                None,
            )
            .await?;

        let legacy = tracker
            .get_policies_by_location(PolicyLocation::LegacySystem, None)
            .await?;
        assert_eq!(legacy.len(), 2);

        let mainframe = tracker
            .get_policies_by_location(
                PolicyLocation::LegacySystem,
                Some(&SystemId::new("Mainframe")),
            )
            .await?;
        assert_eq!(mainframe.len(), 1);
        assert_eq!(mainframe[0].policy_id, pol("POL-1"));

        Ok(())
    }
}
