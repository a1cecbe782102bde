//! Error types for the memory subsystem

use thiserror::Error;

/// Result alias used throughout the memory crate
pub type MemoryResult<T> = Result<T, MemoryError>;

/// Errors raised by memory operations
///
/// Keyed lookups that simply miss return `Option`/`bool` instead of an
/// error; only malformed input, storage failures and external-service
/// failures surface here.
#[derive(Debug, Error)]
pub enum MemoryError {
    /// A required record was expected to exist but did not
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Kind of record (session, memory, metadata, ...)
        kind: &'static str,
        /// Identifier that missed
        id: String,
    },

    /// Input failed validation before any mutation happened
    #[error("validation failed for '{field}': {reason}")]
    Validation {
        /// Field or argument that failed
        field: &'static str,
        /// Human-readable reason
        reason: String,
    },

    /// An external collaborator (reranking service) failed or timed out
    #[error("external service '{service}' failed: {reason}")]
    ExternalService {
        /// Service name
        service: &'static str,
        /// Failure description
        reason: String,
    },

    /// A storage operation failed; batched mutations abort as a whole
    #[error("storage operation '{operation}' failed: {reason}")]
    Storage {
        /// Operation that failed
        operation: &'static str,
        /// Failure description
        reason: String,
    },
}

impl MemoryError {
    /// A missing record that the caller required to exist
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }

    /// Malformed input
    pub fn validation(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Validation {
            field,
            reason: reason.into(),
        }
    }

    /// External service failure, timeout or unparsable payload
    pub fn external(service: &'static str, reason: impl Into<String>) -> Self {
        Self::ExternalService {
            service,
            reason: reason.into(),
        }
    }

    /// Storage failure
    pub fn storage(operation: &'static str, reason: impl Into<String>) -> Self {
        Self::Storage {
            operation,
            reason: reason.into(),
        }
    }
}
