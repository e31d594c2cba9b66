//! Error types for the replica engine.

use crate::{MutationName, SchemaVersion};
use thiserror::Error;

/// All possible errors from the replica engine.
///
/// Merge anomalies (missing items, incomplete items, stale versions, stale
/// timestamps) are resolved by policy and never surface here.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Definition errors
    #[error("mutation already registered: {0}")]
    DuplicateMutation(MutationName),

    #[error("name already defined in schema: {0}")]
    DuplicateDefinition(String),

    // Mutation errors
    #[error("no handler registered for mutation: {0}")]
    UnregisteredMutation(MutationName),

    #[error("invalid input for mutation '{mutation}': {reason}")]
    InvalidInput {
        mutation: MutationName,
        reason: String,
    },

    // Validation errors
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("missing required field: {0}")]
    MissingRequiredField(String),

    #[error("type mismatch for field '{field}': expected {expected}, got {got}")]
    TypeMismatch {
        field: String,
        expected: String,
        got: String,
    },

    #[error("invalid server update: {0}")]
    InvalidUpdate(String),

    // State errors
    #[error("invalid snapshot: {0}")]
    InvalidSnapshot(String),

    #[error("schema version mismatch: expected {expected}, got {actual}")]
    SchemaVersionMismatch {
        expected: SchemaVersion,
        actual: SchemaVersion,
    },
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;
