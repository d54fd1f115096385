//! End-to-end tracking lifecycle tests: register, migrate, validate,
//! reconcile.

use std::sync::Arc;

use cutover_core::{InMemoryWalSink, PolicyId, SystemId, WalPayload, WalSink};
use cutover_track::error::Result;
use cutover_track::policy::{MigrationStatus, PolicyLocation};
use cutover_track::reconcile::ReconciliationEngine;
use cutover_track::registry::{InMemoryRegistry, RegistryStore};
use cutover_track::tracker::PolicyTracker;
use cutover_track::validate::ValidationEngine;

struct Harness {
    tracker: Arc<PolicyTracker>,
    validation: ValidationEngine,
    reconciliation: ReconciliationEngine,
    wal: Arc<InMemoryWalSink>,
}

fn harness() -> Harness {
    let registry = Arc::new(InMemoryRegistry::new());
    let wal = Arc::new(InMemoryWalSink::new());
    let tracker = Arc::new(PolicyTracker::new(
        Arc::clone(&registry) as Arc<dyn RegistryStore>,
        Arc::clone(&wal) as Arc<dyn WalSink>,
    ));
    Harness {
        validation: ValidationEngine::new(Arc::clone(&tracker)),
        reconciliation: ReconciliationEngine::new(
            registry as Arc<dyn RegistryStore>,
            Arc::clone(&wal) as Arc<dyn WalSink>,
        ),
        tracker,
        wal,
    }
}

fn pol(id: &str) -> PolicyId {
    PolicyId::new(id).unwrap()
}

/// Registering a policy on the mainframe leaves it trackable at the legacy
/// system with no migration activity.
#[tokio::test]
async fn registration_establishes_legacy_baseline() -> Result<()> {
    let h = harness();
    let policy = pol("POL-1");

    h.tracker
        .register_policy(
            &policy,
            PolicyLocation::LegacySystem,
            Some(SystemId::new("Mainframe")),
            None,
            None,
        )
        .await?;

    let record = h.tracker.get_policy_location(&policy).await?;
    assert_eq!(record.current_location.to_string(), "legacy_system");
    assert_eq!(record.status.to_string(), "not_started");
    assert_eq!(record.current_system_id, Some(SystemId::new("Mainframe")));

    Ok(())
}

/// Walking a policy through the full migration: in_progress puts it in
/// transit, completed lands it in the new system, and validation marks it
/// validated.
#[tokio::test]
async fn full_migration_walk() -> Result<()> {
    let h = harness();
    let policy = pol("POL-1");

    h.tracker
        .register_policy(
            &policy,
            PolicyLocation::LegacySystem,
            Some(SystemId::new("Mainframe")),
            None,
            None,
        )
        .await?;

    let record = h
        .tracker
        .update_migration_status(&policy, MigrationStatus::InProgress, None, None, None)
        .await?;
    assert_eq!(record.current_location, PolicyLocation::InTransit);

    let record = h
        .tracker
        .update_migration_status(&policy, MigrationStatus::Completed, None, None, None)
        .await?;
    assert_eq!(record.current_location, PolicyLocation::NewSystem);

    let report = h.validation.validate_migration(&policy, None, None).await?;
    assert!(report.validation_passed);

    let record = h.tracker.get_policy_location(&policy).await?;
    assert_eq!(record.status, MigrationStatus::Validated);

    Ok(())
}

/// Reconciling two systems where one policy is registered under both and the
/// other only under the legacy system yields one discrepancy.
#[tokio::test]
async fn reconciliation_finds_the_straggler() -> Result<()> {
    let h = harness();

    h.tracker
        .register_policy(
            &pol("POL-1"),
            PolicyLocation::LegacySystem,
            Some(SystemId::new("Legacy")),
            None,
            None,
        )
        .await?;
    h.tracker
        .register_policy(
            &pol("POL-1"),
            PolicyLocation::Coexistence,
            Some(SystemId::new("New")),
            None,
            None,
        )
        .await?;
    h.tracker
        .register_policy(
            &pol("POL-2"),
            PolicyLocation::LegacySystem,
            Some(SystemId::new("Legacy")),
            None,
            None,
        )
        .await?;

    let report = h
        .reconciliation
        .reconcile(
            &SystemId::new("Legacy"),
            &SystemId::new("New"),
            Some(vec![pol("POL-1"), pol("POL-2")]),
            None,
        )
        .await?;

    assert_eq!(report.in_both, vec![pol("POL-1")]);
    assert_eq!(report.in_a_only, vec![pol("POL-2")]);
    assert_eq!(report.discrepancies.len(), 1);
    assert_eq!(report.discrepancies[0].policy_id, pol("POL-2"));

    Ok(())
}

/// Every mutating operation leaves an intent entry in the WAL, in operation
/// order, before the registry reflects the change.
#[tokio::test]
async fn wal_captures_every_guarded_operation() -> Result<()> {
    let h = harness();
    let policy = pol("POL-1");

    h.tracker
        .register_policy(&policy, PolicyLocation::LegacySystem, None, None, None)
        .await?;
    h.tracker
        .update_migration_status(&policy, MigrationStatus::InProgress, None, None, None)
        .await?;
    h.tracker
        .update_migration_status(&policy, MigrationStatus::Completed, None, None, None)
        .await?;
    h.validation.validate_migration(&policy, None, None).await?;

    let entries = h.wal.entries().map_err(cutover_track::error::Error::Core)?;
    let operations: Vec<&str> = entries.iter().map(|e| e.payload.operation()).collect();
    assert_eq!(
        operations,
        vec![
            "register_policy",
            "update_migration_status",
            "update_migration_status",
            "validate_migration",
            // The validated transition applied on a passing run is itself
            // a guarded status update.
            "update_migration_status",
        ]
    );

    // Sequences are strictly increasing.
    let sequences: Vec<u64> = entries.iter().map(|e| e.sequence).collect();
    assert!(sequences.windows(2).all(|w| w[0] < w[1]));

    // The validated transition entry carries the wire status value.
    assert!(matches!(
        &entries[4].payload,
        WalPayload::UpdateMigrationStatus { status, .. } if status == "validated"
    ));

    Ok(())
}
