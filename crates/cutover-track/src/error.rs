//! Error types for the policy tracking domain.

use cutover_core::PolicyId;

/// The result type used throughout cutover-track.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in tracking operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A policy was not found in the registry.
    ///
    /// An unknown ID is always surfaced as this error, never as an empty
    /// record.
    #[error("policy not found: {policy_id}")]
    PolicyNotFound {
        /// The policy ID that was looked up.
        policy_id: PolicyId,
    },

    /// An invalid migration status transition was attempted.
    #[error("invalid status transition: {from} -> {to} ({reason})")]
    InvalidStatusTransition {
        /// The current status.
        from: String,
        /// The attempted target status.
        to: String,
        /// The reason the transition is invalid.
        reason: String,
    },

    /// Optimistic concurrency retries were exhausted for a policy.
    #[error("version conflict on {policy_id} after {attempts} attempts")]
    VersionConflict {
        /// The contended policy ID.
        policy_id: PolicyId,
        /// How many compare-and-swap attempts were made.
        attempts: u32,
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

    /// A registry storage operation failed.
    #[error("registry storage error: {message}")]
    Storage {
        /// Description of the storage failure.
        message: String,
    },

    /// An error from cutover-core.
    #[error("core error: {0}")]
    Core(#[from] cutover_core::Error),
}

impl Error {
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
    fn not_found_display_names_the_policy() {
        let err = Error::PolicyNotFound {
            policy_id: PolicyId::new("POL-404").unwrap(),
        };
        assert!(err.to_string().contains("POL-404"));
    }

    #[test]
    fn transition_error_display() {
        let err = Error::InvalidStatusTransition {
            from: "not_started".into(),
            to: "validated".into(),
            reason: "must complete before validation".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("not_started"));
        assert!(msg.contains("validated"));
    }
}
