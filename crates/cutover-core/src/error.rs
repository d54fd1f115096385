//! Error types and result aliases shared across cutover components.
//!
//! Errors are structured for programmatic handling and include context for
//! debugging. Domain crates define their own error enums and convert from
//! these where they wrap core operations.

/// The result type used throughout cutover-core.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in core operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// An invalid identifier was provided.
    #[error("invalid identifier: {message}")]
    InvalidId {
        /// Description of what made the ID invalid.
        message: String,
    },

    /// A write-ahead log append failed.
    ///
    /// Callers must treat this as fatal for the guarded operation: if the
    /// intent cannot be recorded, the operation must not run.
    #[error("WAL append failed: {message}")]
    WalAppend {
        /// Description of the append failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A storage operation failed.
    #[error("storage error: {message}")]
    Storage {
        /// Description of the storage failure.
        message: String,
        /// The underlying cause, if any.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A serialization or deserialization error occurred.
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of the serialization failure.
        message: String,
    },
}

impl Error {
    /// Creates a new storage error.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new WAL append error.
    #[must_use]
    pub fn wal_append(message: impl Into<String>) -> Self {
        Self::WalAppend {
            message: message.into(),
            source: None,
        }
    }

    /// Creates a new WAL append error with a source.
    #[must_use]
    pub fn wal_append_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::WalAppend {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as StdError;

    #[test]
    fn invalid_id_display() {
        let err = Error::InvalidId {
            message: "policy ID cannot be empty".into(),
        };
        assert!(err.to_string().contains("invalid identifier"));
    }

    #[test]
    fn wal_append_with_source() {
        let source = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "read-only");
        let err = Error::wal_append_with_source("failed to persist intent", source);
        assert!(err.to_string().contains("WAL append failed"));
        assert!(StdError::source(&err).is_some());
    }
}
