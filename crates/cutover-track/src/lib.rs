//! # cutover-track
//!
//! Policy tracking domain for the cutover migration engine.
//!
//! This crate is the system of record for migration progress:
//!
//! - **State Machine**: Legal location/status transitions, with status
//!   driving location
//! - **Policy Registry**: Versioned, append-only record store with
//!   compare-and-swap writes
//! - **Validation Engine**: Rule-based post-migration checks
//! - **Reconciliation Engine**: Cross-system presence comparison over the
//!   registry
//!
//! ## Guarantees
//!
//! - **Append-only**: Location history is never rewritten; records are
//!   never hard-deleted
//! - **Status drives location**: `Completed` forces `NewSystem`,
//!   `InProgress` forces `InTransit`, `RolledBack` forces `LegacySystem`
//! - **Serialized writes**: Concurrent writes to one policy ID are
//!   serialized via optimistic versioning
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use cutover_core::{InMemoryWalSink, PolicyId, SystemId};
//! use cutover_track::policy::PolicyLocation;
//! use cutover_track::registry::InMemoryRegistry;
//! use cutover_track::tracker::PolicyTracker;
//!
//! # async fn demo() -> cutover_track::error::Result<()> {
//! let tracker = PolicyTracker::new(
//!     Arc::new(InMemoryRegistry::new()),
//!     Arc::new(InMemoryWalSink::new()),
//! );
//!
//! let policy = PolicyId::new("POL-1")?;
//! tracker
//!     .register_policy(&policy, PolicyLocation::LegacySystem, Some(SystemId::new("Mainframe")), None, None)
//!     .await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod metrics;
pub mod policy;
pub mod reconcile;
pub mod registry;
pub mod tracker;
pub mod validate;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::policy::{LocationEntry, MigrationStatus, PolicyLocation, PolicyRecord};
    pub use crate::reconcile::{Discrepancy, ReconciliationEngine, ReconciliationReport};
    pub use crate::registry::{CasOutcome, InMemoryRegistry, RegistryStore};
    pub use crate::tracker::PolicyTracker;
    pub use crate::validate::{RuleOutcome, ValidationEngine, ValidationReport, ValidationRule};
}
