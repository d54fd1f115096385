//! Cross-system reconciliation over the registry.
//!
//! Reconciliation partitions tracked policies by which systems their
//! location history mentions. It is purely registry-local and
//! point-in-time: it never queries live systems, so its accuracy is only as
//! good as how faithfully registrations have been reported. It is
//! descriptive, never self-healing — the registry is not mutated.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use cutover_core::{ActorContext, PolicyId, RetryPolicy, SystemId, WalEntry, WalPayload, WalSink};

use crate::error::{Error, Result};
use crate::metrics::TrackMetrics;
use crate::registry::RegistryStore;

/// A policy present in exactly one of the two systems.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Discrepancy {
    /// The affected policy.
    pub policy_id: PolicyId,
    /// Whether the policy was seen in system A.
    pub in_system_a: bool,
    /// Whether the policy was seen in system B.
    pub in_system_b: bool,
}

/// Result of a reconciliation run.
///
/// The four partitions are pairwise disjoint and their union equals the
/// full set of IDs considered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconciliationReport {
    /// First system under comparison.
    pub system_a: SystemId,
    /// Second system under comparison.
    pub system_b: SystemId,
    /// How many policies were considered.
    pub total_policies: usize,
    /// Present in both systems.
    pub in_both: Vec<PolicyId>,
    /// Present only in system A.
    pub in_a_only: Vec<PolicyId>,
    /// Present only in system B.
    pub in_b_only: Vec<PolicyId>,
    /// Present in neither system (including IDs the registry has never
    /// seen).
    pub in_neither: Vec<PolicyId>,
    /// One entry per policy whose presence differs between the systems.
    pub discrepancies: Vec<Discrepancy>,
}

/// Computes presence differences between two systems.
pub struct ReconciliationEngine {
    registry: Arc<dyn RegistryStore>,
    wal: Arc<dyn WalSink>,
    metrics: TrackMetrics,
}

impl ReconciliationEngine {
    /// Creates a reconciliation engine over the given registry.
    #[must_use]
    pub fn new(registry: Arc<dyn RegistryStore>, wal: Arc<dyn WalSink>) -> Self {
        Self {
            registry,
            wal,
            metrics: TrackMetrics::new(),
        }
    }

    /// Reconciles the two systems over the given IDs, or over every tracked
    /// policy when `policy_ids` is `None`.
    ///
    /// A policy counts as present in a system when any entry of its
    /// location history names that system.
    ///
    /// # Errors
    ///
    /// Returns [`Error::WalGuard`] if the intent could not be recorded, or
    /// a storage error if the registry read fails.
    #[tracing::instrument(skip(self, policy_ids, actor), fields(system_a = %system_a, system_b = %system_b))]
    pub async fn reconcile(
        &self,
        system_a: &SystemId,
        system_b: &SystemId,
        policy_ids: Option<Vec<PolicyId>>,
        actor: Option<ActorContext>,
    ) -> Result<ReconciliationReport> {
        let mut entry = WalEntry::new(
            "policy_tracking",
            "policy_tracking_queue",
            WalPayload::ReconcileSystems {
                system_a: system_a.to_string(),
                system_b: system_b.to_string(),
            },
        )
        .with_lifecycle(RetryPolicy::retries(3));
        if let Some(actor) = actor {
            entry = entry.with_actor(actor);
        }
        self.wal
            .record(entry)
            .await
            .map_err(|source| Error::WalGuard { source })?;

        let ids = match policy_ids {
            Some(ids) => ids,
            None => self
                .registry
                .list()
                .await?
                .into_iter()
                .map(|record| record.policy_id)
                .collect(),
        };

        let mut report = ReconciliationReport {
            system_a: system_a.clone(),
            system_b: system_b.clone(),
            total_policies: ids.len(),
            in_both: Vec::new(),
            in_a_only: Vec::new(),
            in_b_only: Vec::new(),
            in_neither: Vec::new(),
            discrepancies: Vec::new(),
        };

        for policy_id in ids {
            let (in_a, in_b) = match self.registry.get(&policy_id).await? {
                Some(record) => (record.seen_in(system_a), record.seen_in(system_b)),
                // Never registered: not present anywhere.
                None => (false, false),
            };

            match (in_a, in_b) {
                (true, true) => report.in_both.push(policy_id.clone()),
                (true, false) => report.in_a_only.push(policy_id.clone()),
                (false, true) => report.in_b_only.push(policy_id.clone()),
                (false, false) => report.in_neither.push(policy_id.clone()),
            }

            if in_a != in_b {
                report.discrepancies.push(Discrepancy {
                    policy_id,
                    in_system_a: in_a,
                    in_system_b: in_b,
                });
            }
        }

        self.metrics.record_reconciliation();
        tracing::info!(
            in_both = report.in_both.len(),
            discrepancies = report.discrepancies.len(),
            "reconciliation complete"
        );

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cutover_core::InMemoryWalSink;

    use crate::policy::PolicyLocation;
    use crate::registry::InMemoryRegistry;
    use crate::tracker::PolicyTracker;

    fn pol(id: &str) -> PolicyId {
        PolicyId::new(id).unwrap()
    }

    async fn seeded() -> Result<(ReconciliationEngine, Arc<PolicyTracker>)> {
        let registry = Arc::new(InMemoryRegistry::new());
        let wal = Arc::new(InMemoryWalSink::new());
        let tracker = Arc::new(PolicyTracker::new(
            Arc::clone(&registry) as Arc<dyn RegistryStore>,
            Arc::clone(&wal) as Arc<dyn WalSink>,
        ));

        // POL-1 seen in both systems, POL-2 only in the legacy one.
        tracker
            .register_policy(
                &pol("POL-1"),
                PolicyLocation::LegacySystem,
                Some(SystemId::new("Legacy")),
                None,
                None,
            )
            .await?;
        tracker
            .register_policy(
                &pol("POL-1"),
                PolicyLocation::NewSystem,
                Some(SystemId::new("New")),
                None,
                None,
            )
            .await?;
        tracker
            .register_policy(
                &pol("POL-2"),
                PolicyLocation::LegacySystem,
                Some(SystemId::new("Legacy")),
                None,
                None,
            )
            .await?;

        let engine = ReconciliationEngine::new(
            Arc::clone(&registry) as Arc<dyn RegistryStore>,
            wal as Arc<dyn WalSink>,
        );
        Ok((engine, tracker))
    }

    #[tokio::test]
    async fn partitions_by_history_presence() -> Result<()> {
        let (engine, _) = seeded().await?;

        let report = engine
            .reconcile(
                &SystemId::new("Legacy"),
                &SystemId::new("New"),
                Some(vec![pol("POL-1"), pol("POL-2")]),
                None,
            )
            .await?;

        assert_eq!(report.in_both, vec![pol("POL-1")]);
        assert_eq!(report.in_a_only, vec![pol("POL-2")]);
        assert!(report.in_b_only.is_empty());
        assert!(report.in_neither.is_empty());

        assert_eq!(report.discrepancies.len(), 1);
        let discrepancy = &report.discrepancies[0];
        assert_eq!(discrepancy.policy_id, pol("POL-2"));
        assert!(discrepancy.in_system_a);
        assert!(!discrepancy.in_system_b);

        Ok(())
    }

    #[tokio::test]
    async fn partitions_are_disjoint_and_exhaustive() -> Result<()> {
        let (engine, _) = seeded().await?;

        let ids = vec![pol("POL-1"), pol("POL-2"), pol("POL-3")];
        let report = engine
            .reconcile(
                &SystemId::new("Legacy"),
                &SystemId::new("New"),
                Some(ids.clone()),
                None,
            )
            .await?;

        let mut union: Vec<PolicyId> = report
            .in_both
            .iter()
            .chain(&report.in_a_only)
            .chain(&report.in_b_only)
            .chain(&report.in_neither)
            .cloned()
            .collect();
        union.sort();
        let mut expected = ids;
        expected.sort();

        assert_eq!(union, expected);
        assert_eq!(report.total_policies, 3);

        Ok(())
    }

    #[tokio::test]
    async fn unknown_ids_land_in_neither() -> Result<()> {
        let (engine, _) = seeded().await?;

        let report = engine
            .reconcile(
                &SystemId::new("Legacy"),
                &SystemId::new("New"),
                Some(vec![pol("POL-999")]),
                None,
            )
            .await?;

        assert_eq!(report.in_neither, vec![pol("POL-999")]);
        // Absent everywhere is not a presence mismatch.
        assert!(report.discrepancies.is_empty());

        Ok(())
    }

    #[tokio::test]
    async fn defaults_to_full_registry() -> Result<()> {
        let (engine, _) = seeded().await?;

        let report = engine
            .reconcile(&SystemId::new("Legacy"), &SystemId::new("New"), None, None)
            .await?;

        assert_eq!(report.total_policies, 2);

        Ok(())
    }

    #[tokio::test]
    async fn reconciliation_does_not_mutate_the_registry() -> Result<()> {
        let (engine, tracker) = seeded().await?;

        let before = tracker.get_policy_location(&pol("POL-2")).await?;
        engine
            .reconcile(&SystemId::new("Legacy"), &SystemId::new("New"), None, None)
            .await?;
        let after = tracker.get_policy_location(&pol("POL-2")).await?;

        assert_eq!(before, after);

        Ok(())
    }
}
