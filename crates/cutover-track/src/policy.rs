//! Policy records and the migration state machine.
//!
//! A policy record is an append-only audit trail: every registration appends
//! a [`LocationEntry`], and the current location/system are always the most
//! recently appended values. Status changes are validated against the
//! transition table in [`MigrationStatus::can_transition_to`] and several
//! statuses force the current location (see [`MigrationStatus::forced_location`]) —
//! status drives location, the two are never independently settable. This
//! coupling removes a class of operator error (marking a migration complete
//! while leaving the record pointing at the legacy system) and is relied on
//! by the validation engine.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use cutover_core::{PolicyId, SystemId, WaveId};

use crate::error::{Error, Result};

/// Where a policy currently lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PolicyLocation {
    /// The legacy system of record.
    LegacySystem,
    /// The target system of record.
    NewSystem,
    /// Mid-migration, owned by neither system.
    InTransit,
    /// Present in both systems during a coexistence window.
    Coexistence,
    /// Location has not been established.
    #[default]
    Unknown,
}

impl std::fmt::Display for PolicyLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LegacySystem => write!(f, "legacy_system"),
            Self::NewSystem => write!(f, "new_system"),
            Self::InTransit => write!(f, "in_transit"),
            Self::Coexistence => write!(f, "coexistence"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// Migration progress of a policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MigrationStatus {
    /// No migration activity yet.
    #[default]
    NotStarted,
    /// Migration is underway.
    InProgress,
    /// Forward migration finished.
    Completed,
    /// Forward migration failed.
    Failed,
    /// Compensations restored the legacy state.
    RolledBack,
    /// Post-migration validation passed.
    Validated,
}

impl MigrationStatus {
    /// Returns true if this is a terminal status.
    ///
    /// `Failed` and `RolledBack` are retryable and therefore not terminal.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Validated)
    }

    /// Returns true if the transition from self to target is valid.
    #[must_use]
    pub fn can_transition_to(&self, target: Self) -> bool {
        match self {
            Self::NotStarted => matches!(target, Self::InProgress),
            Self::InProgress => matches!(target, Self::Completed | Self::Failed),
            Self::Completed => matches!(target, Self::Validated),
            // Failed and RolledBack may be retried.
            Self::Failed => matches!(target, Self::RolledBack | Self::InProgress),
            Self::RolledBack => matches!(target, Self::InProgress),
            Self::Validated => false,
        }
    }

    /// Returns the location this status forces, if any.
    ///
    /// Entering `InProgress`, `Completed`, or `RolledBack` rewrites the
    /// record's current location; the remaining statuses leave it alone.
    #[must_use]
    pub const fn forced_location(&self) -> Option<PolicyLocation> {
        match self {
            Self::InProgress => Some(PolicyLocation::InTransit),
            Self::Completed => Some(PolicyLocation::NewSystem),
            Self::RolledBack => Some(PolicyLocation::LegacySystem),
            Self::NotStarted | Self::Failed | Self::Validated => None,
        }
    }
}

impl std::fmt::Display for MigrationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotStarted => write!(f, "not_started"),
            Self::InProgress => write!(f, "in_progress"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
            Self::RolledBack => write!(f, "rolled_back"),
            Self::Validated => write!(f, "validated"),
        }
    }
}

/// One observation of a policy at a location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationEntry {
    /// Where the policy was observed.
    pub location: PolicyLocation,
    /// System of record at that location, if known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_id: Option<SystemId>,
    /// When the observation was recorded.
    pub recorded_at: DateTime<Utc>,
    /// Caller-supplied metadata.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
}

/// The tracked state of one policy.
///
/// Owned exclusively by the registry; mutated only through
/// [`PolicyRecord::apply_registration`] and [`PolicyRecord::apply_status`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyRecord {
    /// Policy identifier.
    pub policy_id: PolicyId,
    /// Append-only location history, oldest first.
    pub locations: Vec<LocationEntry>,
    /// Most recently recorded location.
    pub current_location: PolicyLocation,
    /// Most recently recorded system of record.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_system_id: Option<SystemId>,
    /// Migration progress.
    pub status: MigrationStatus,
    /// Wave this policy is migrating with, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wave_id: Option<WaveId>,
    /// Free-form detail attached to the last status change.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub status_details: BTreeMap<String, String>,
    /// When the record was first created.
    pub created_at: DateTime<Utc>,
    /// When the record was last mutated.
    pub updated_at: DateTime<Utc>,
    /// Optimistic concurrency version, incremented on every mutation.
    #[serde(default)]
    pub version: u64,
}

impl PolicyRecord {
    /// Creates a fresh record for a policy seen for the first time.
    #[must_use]
    pub fn new(policy_id: PolicyId) -> Self {
        let now = Utc::now();
        Self {
            policy_id,
            locations: Vec::new(),
            current_location: PolicyLocation::Unknown,
            current_system_id: None,
            status: MigrationStatus::NotStarted,
            wave_id: None,
            status_details: BTreeMap::new(),
            created_at: now,
            updated_at: now,
            version: 0,
        }
    }

    /// Appends a location observation and makes it current.
    ///
    /// Always appends: re-registering the same location is a legitimate
    /// observation, not an error. Last write wins by registration order.
    pub fn apply_registration(
        &mut self,
        location: PolicyLocation,
        system_id: Option<SystemId>,
        metadata: Option<BTreeMap<String, String>>,
    ) {
        let now = Utc::now();
        self.locations.push(LocationEntry {
            location,
            system_id: system_id.clone(),
            recorded_at: now,
            metadata: metadata.unwrap_or_default(),
        });
        self.current_location = location;
        self.current_system_id = system_id;
        self.updated_at = now;
        self.version += 1;
    }

    /// Applies a status transition, rewriting location where the status
    /// forces one.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidStatusTransition`] if the transition is not
    /// in the legal table.
    #[tracing::instrument(
        skip(self, details),
        fields(policy_id = %self.policy_id, from = %self.status, to = %status)
    )]
    pub fn apply_status(
        &mut self,
        status: MigrationStatus,
        wave_id: Option<WaveId>,
        details: Option<BTreeMap<String, String>>,
    ) -> Result<()> {
        if !self.status.can_transition_to(status) {
            return Err(Error::InvalidStatusTransition {
                from: self.status.to_string(),
                to: status.to_string(),
                reason: "transition not in the legal status table".into(),
            });
        }

        self.status = status;
        if let Some(forced) = status.forced_location() {
            self.current_location = forced;
        }
        if let Some(wave_id) = wave_id {
            self.wave_id = Some(wave_id);
        }
        if let Some(details) = details {
            self.status_details = details;
        }
        self.updated_at = Utc::now();
        self.version += 1;
        Ok(())
    }

    /// Returns true if any location entry was recorded under the given
    /// system.
    #[must_use]
    pub fn seen_in(&self, system: &SystemId) -> bool {
        self.locations
            .iter()
            .any(|entry| entry.system_id.as_ref() == Some(system))
    }
}
