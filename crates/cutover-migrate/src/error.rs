//! Error types for the migration orchestration domain.

use cutover_core::SagaId;

use crate::collaborators::ServiceKind;

/// The result type used throughout cutover-migrate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in migration operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Neither resolver tier could produce the needed collaborator.
    ///
    /// Fail fast: no partial state has been committed when this is
    /// returned.
    #[error("collaborator unavailable: {service}")]
    CollaboratorUnavailable {
        /// The service that could not be resolved.
        service: ServiceKind,
    },

    /// A collaborator call failed or timed out.
    ///
    /// Surfaced as a structured failure; compensation is never triggered
    /// automatically from here.
    #[error("external operation '{operation}' failed: {message}")]
    ExternalOperation {
        /// The operation that failed (for example `"parse"`).
        operation: String,
        /// Description of the failure.
        message: String,
    },

    /// A request was malformed before any collaborator was called.
    #[error("invalid request: {message}")]
    InvalidRequest {
        /// What was wrong with the request.
        message: String,
    },

    /// A saga execution was not found.
    #[error("saga not found: {saga_id}")]
    SagaNotFound {
        /// The saga ID that was looked up.
        saga_id: SagaId,
    },

    /// A compensation handler failed.
    ///
    /// The WAL entry written before the handler ran remains queued for
    /// external replay; this error is never silently dropped.
    #[error("compensation for milestone '{milestone_id}' of saga {saga_id} failed: {message}")]
    CompensationFailed {
        /// The saga being unwound.
        saga_id: SagaId,
        /// The milestone whose handler failed.
        milestone_id: String,
        /// Description of the failure.
        message: String,
    },

    /// The write-ahead log append for a guarded operation failed.
    ///
    /// The guarded operation was not run (fail closed).
    #[error("WAL guard failed: {source}")]
    WalGuard {
        /// The underlying WAL failure.
        #[source]
        source: cutover_core::Error,
    },

    /// An internal storage failure (lock poisoning and similar).
    #[error("storage error: {message}")]
    Storage {
        /// Description of the storage failure.
        message: String,
    },

    /// An error from the tracking domain.
    #[error("tracking error: {0}")]
    Track(#[from] cutover_track::error::Error),

    /// An error from cutover-core.
    #[error("core error: {0}")]
    Core(#[from] cutover_core::Error),
}

impl Error {
    /// Creates a new external operation error.
    #[must_use]
    pub fn external(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ExternalOperation {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Creates a new storage error.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unavailable_display_names_the_service() {
        let err = Error::CollaboratorUnavailable {
            service: ServiceKind::RoutingEngine,
        };
        assert!(err.to_string().contains("routing_engine"));
    }

    #[test]
    fn external_operation_display() {
        let err = Error::external("parse", "unexpected record layout");
        let msg = err.to_string();
        assert!(msg.contains("parse"));
        assert!(msg.contains("unexpected record layout"));
    }
}
