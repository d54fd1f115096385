//! # cutover-migrate
//!
//! Saga-style migration orchestration for the cutover engine.
//!
//! This crate drives multi-step policy migrations against external
//! collaborators:
//!
//! - **Collaborator traits**: Content store, file parser, profiler, schema
//!   mapper, routing engine, document store, lineage recorder
//! - **Two-tier resolver**: Catalog discovery chained with direct
//!   construction
//! - **Step executor**: WAL-guarded pipelines with structured failures and
//!   no automatic rollback
//! - **Saga coordinator**: Forward execution, reverse-order compensation,
//!   execution history
//!
//! ## Guarantees
//!
//! - **WAL before effect**: Every guarded operation records its intent
//!   before any externally visible side effect
//! - **Structured failures**: Collaborator faults surface as error values
//!   at the method boundary, never as panics
//! - **Idempotent compensation**: Handlers are safe to replay with the same
//!   `(saga_id, milestone_id, context)`
//! - **No internal retries**: Retry is delegated to an external consumer of
//!   the WAL lifecycle policy
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use cutover_core::{InMemoryWalSink, WalSink};
//! use cutover_migrate::orchestrator::MigrationOrchestrator;
//! use cutover_migrate::pipeline::migration_saga;
//! use cutover_migrate::resolver::{Resolver, ServiceCatalog};
//! use cutover_migrate::saga::SagaContext;
//! use cutover_track::registry::{InMemoryRegistry, RegistryStore};
//! use cutover_track::tracker::PolicyTracker;
//!
//! # async fn demo() -> cutover_migrate::error::Result<()> {
//! let wal: Arc<dyn WalSink> = Arc::new(InMemoryWalSink::new());
//! let tracker = Arc::new(PolicyTracker::new(
//!     Arc::new(InMemoryRegistry::new()) as Arc<dyn RegistryStore>,
//!     Arc::clone(&wal),
//! ));
//! let orchestrator = Arc::new(MigrationOrchestrator::new(
//!     Arc::new(Resolver::new(ServiceCatalog::new())),
//!     Arc::clone(&wal),
//!     tracker,
//! ));
//!
//! let saga = migration_saga(orchestrator, wal);
//! let report = saga.execute(SagaContext::new()).await?;
//! println!("saga finished: {}", report.status);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod collaborators;
pub mod error;
pub mod metrics;
pub mod orchestrator;
pub mod pipeline;
pub mod resolver;
pub mod saga;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::collaborators::{
        ContentStore, DataProfiler, DocumentStore, FileParser, LineageRecorder, RoutingEngine,
        SchemaMapper, ServiceKind,
    };
    pub use crate::error::{Error, Result};
    pub use crate::orchestrator::{
        CallTimeouts, IngestRequest, IngestSource, MapRequest, MigrationOrchestrator,
        RouteRequest,
    };
    pub use crate::pipeline::migration_saga;
    pub use crate::resolver::{Resolver, ServiceCatalog, ServiceFactory};
    pub use crate::saga::coordinator::SagaCoordinator;
    pub use crate::saga::{
        CompensationHandler, SagaContext, SagaExecution, SagaReport, SagaStatus, SagaStep,
        StepHandler,
    };
}
