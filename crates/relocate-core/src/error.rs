//! Unified error types for Relocate.
//!
//! All errors are represented by [`RelocateError`], using `thiserror`
//! for ergonomic error definitions. Library code never uses `unwrap()`;
//! all fallible operations return `Result<T, RelocateError>`.

use thiserror::Error;

/// The unified error type for all Relocate operations.
#[derive(Error, Debug)]
pub enum RelocateError {
    /// A storage operation failed. Treated as transient: the caller may retry.
    #[error("Storage error: {message}")]
    Storage {
        /// Human-readable description of the failure.
        message: String,
        /// The underlying error, if available.
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The requested key was not found in storage.
    #[error("Not found: {key}")]
    NotFound {
        /// The storage key that was not found.
        key: String,
    },

    /// One or more keys could not be moved during a migration.
    #[error("Migration from {origin} to {destination} failed for {} key(s): {}", failed_keys.len(), failed_keys.join(", "))]
    MigrationFailed {
        /// Name of the backend data was moved out of.
        origin: String,
        /// Name of the backend data was moved into.
        destination: String,
        /// Keys whose get, put or delete failed.
        failed_keys: Vec<String>,
    },

    /// A placement invariant was broken (e.g. the origin was not empty after
    /// a migration, or a flip was attempted while another was in progress).
    #[error("Invariant violation: {message}")]
    InvariantViolation {
        /// Description of the violated invariant.
        message: String,
    },

    /// The adaptation request named a policy type that does not exist.
    #[error("Unknown policy type: {code}")]
    UnknownPolicy {
        /// The raw policy code that was received.
        code: String,
    },

    /// The adaptation request was malformed.
    #[error("Invalid request: {message}")]
    InvalidRequest {
        /// Description of the problem.
        message: String,
    },

    /// Invalid configuration was provided.
    #[error("Configuration error: {message}")]
    Config {
        /// Description of the configuration problem.
        message: String,
    },

    /// Failed to serialize or deserialize a value.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// An internal error (bug).
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl RelocateError {
    /// Create a storage error from a message and source error.
    pub fn storage(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Storage {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a storage error from a message only.
    pub fn storage_msg(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
            source: None,
        }
    }

    /// Create an invariant violation from a message.
    pub fn invariant(message: impl Into<String>) -> Self {
        Self::InvariantViolation {
            message: message.into(),
        }
    }

    /// Whether retrying the same operation later may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Storage { .. } | Self::MigrationFailed { .. })
    }
}
