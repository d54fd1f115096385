//! # cutover-core
//!
//! Core abstractions for the cutover policy migration engine.
//!
//! This crate provides the foundational types and traits used across all
//! cutover components:
//!
//! - **Identifiers**: Strongly-typed IDs for policies, sagas, and WAL entries
//! - **Actor Context**: Who requested an operation, scoped to a tenant
//! - **Write-Ahead Log**: The intent-log contract every guarded operation
//!   writes to before producing side effects
//! - **Error Types**: Shared error definitions and result types
//!
//! ## Crate Boundary
//!
//! `cutover-core` is the only crate allowed to define shared primitives.
//! Domain logic lives in `cutover-track` (policy state) and
//! `cutover-migrate` (saga orchestration).
//!
//! ## Example
//!
//! ```rust
//! use cutover_core::prelude::*;
//!
//! let policy = PolicyId::new("POL-1").unwrap();
//! let saga = SagaId::generate();
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod actor;
pub mod error;
pub mod id;
pub mod ledger;
pub mod wal;

pub use actor::ActorContext;
pub use error::{Error, Result};
pub use id::{PolicyId, SagaId, SystemId, WalEntryId, WaveId};
pub use ledger::JsonLedgerSink;
pub use wal::{Backoff, FailingWalSink, InMemoryWalSink, RetryPolicy, WalEntry, WalPayload, WalSink};

/// Prelude module for convenient imports.
///
/// # Example
///
/// ```rust
/// use cutover_core::prelude::*;
/// ```
pub mod prelude {
    pub use crate::actor::ActorContext;
    pub use crate::error::{Error, Result};
    pub use crate::id::{PolicyId, SagaId, SystemId, WalEntryId, WaveId};
    pub use crate::ledger::JsonLedgerSink;
    pub use crate::wal::{
        Backoff, FailingWalSink, InMemoryWalSink, RetryPolicy, WalEntry, WalPayload, WalSink,
    };
}
