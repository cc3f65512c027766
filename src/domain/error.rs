//! Domain-level errors (no external dependencies)

use thiserror::Error;

/// Domain errors are fatal for the whole `arrange`/`build` call.
/// No partial result is ever returned alongside one of these.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    #[error("field {field:?} cannot be split into table and field by separator {separator:?}")]
    MalformedField { field: String, separator: String },

    #[error("missing identity field {field:?} for entity {entity:?}")]
    MissingIdentity { entity: String, field: String },

    #[error("join {join:?} has data but its parent entity {entity:?} has none")]
    OrphanedData { entity: String, join: String },

    #[error("needs at least one row to build a tree")]
    EmptyInput,

    #[error("row {row} is missing bound field {field:?}")]
    MissingBounds { row: usize, field: String },

    #[error("row {row} has invalid bounds: {reason}")]
    InvalidBounds { row: usize, reason: String },

    #[error("unbalanced interval at row {row}: {reason}")]
    UnbalancedInterval { row: usize, reason: String },

    #[error("invalid join spec: {reason}")]
    InvalidSpec { reason: String },

    #[error("unknown join: {0}")]
    UnknownJoin(String),
}

/// Result type for domain operations.
pub type DomainResult<T> = Result<T, DomainError>;
