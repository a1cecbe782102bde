//! Error types for the entity graph

use thiserror::Error;

/// Result alias used throughout the graph crate
pub type GraphResult<T> = Result<T, GraphError>;

/// Errors raised by graph operations
///
/// Lookups that simply miss return `Option`; only structurally invalid
/// requests surface here.
#[derive(Debug, Error)]
pub enum GraphError {
    /// A referenced node or relation does not exist
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Kind of record (entity, relation)
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
}

impl GraphError {
    /// A missing record the caller required to exist
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
}
