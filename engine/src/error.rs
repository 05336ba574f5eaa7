//! Error types for the fieldsync engine.

use crate::{FieldKey, SchemaVersion};
use thiserror::Error;

/// All possible errors from the fieldsync engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Inbound data errors
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    #[error("unknown field: {0}")]
    UnknownField(FieldKey),

    #[error("type mismatch for field '{field}': expected {expected}, got {got}")]
    TypeMismatch {
        field: FieldKey,
        expected: String,
        got: String,
    },

    // Clock errors
    #[error("clock has not been synchronized")]
    ClockUnsynced,

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
