//! Error taxonomy shared across the query, relation, and mutation layers.
//!
//! Validation failures are always raised before any storage access; constraint
//! and storage failures carry enough structure (kind plus affected field or
//! constraint name) for callers to branch on them programmatically.

use std::fmt;

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, TesseraError>;

/// Detail attached to a [`TesseraError::Constraint`] failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintKind {
    /// A unique-key collision.
    Unique,
    /// A foreign key referenced a row that does not exist.
    ForeignKey,
    /// An ownership rule was violated (missing or reassigned owner).
    Ownership,
    /// A delete was blocked by a `Restrict` referential action.
    Restrict,
    /// A parent reassignment would have produced a cycle.
    Cycle,
}

impl fmt::Display for ConstraintKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConstraintKind::Unique => "unique",
            ConstraintKind::ForeignKey => "foreign key",
            ConstraintKind::Ownership => "ownership",
            ConstraintKind::Restrict => "restrict",
            ConstraintKind::Cycle => "cycle",
        };
        f.write_str(s)
    }
}

/// Phase in which a transaction deadline elapsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutPhase {
    /// Waiting to acquire the transactional context (`max_wait`).
    Acquire,
    /// Executing the transaction body (`timeout`).
    Execute,
}

impl fmt::Display for TimeoutPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeoutPhase::Acquire => f.write_str("acquire (max_wait)"),
            TimeoutPhase::Execute => f.write_str("execute (timeout)"),
        }
    }
}

/// Structured errors surfaced by the data-access core.
///
/// Each variant maps to one failure class of the public contract; `code()`
/// returns a stable machine-readable identifier for programmatic handling.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TesseraError {
    /// Malformed filter, projection conflict, or invalid group-by shape.
    /// Raised before any storage access.
    #[error("validation error: {message}")]
    Validation {
        /// Human-readable description of the rejected input.
        message: String,
    },
    /// An `OrThrow` operation matched zero rows, or a strict cursor resolved
    /// to nothing.
    #[error("no {entity} row matched the request")]
    NotFound {
        /// Entity the lookup ran against.
        entity: &'static str,
    },
    /// Unique-key collision, foreign-key/ownership violation, or a delete
    /// blocked by a restrict policy.
    #[error("{kind} constraint violated on {entity}.{name}")]
    Constraint {
        /// Entity the violation occurred on.
        entity: &'static str,
        /// Violation class.
        kind: ConstraintKind,
        /// Affected field or constraint name.
        name: String,
    },
    /// A transaction exceeded `max_wait` or `timeout`.
    #[error("transaction timed out during {phase}")]
    TransactionTimeout {
        /// Phase in which the deadline elapsed.
        phase: TimeoutPhase,
    },
    /// Opaque failure surfaced from the storage backend.
    #[error("storage error: {0}")]
    Storage(String),
}

impl TesseraError {
    /// Builds a [`TesseraError::Validation`] from any displayable message.
    pub fn validation(message: impl Into<String>) -> Self {
        TesseraError::Validation {
            message: message.into(),
        }
    }

    /// Builds a [`TesseraError::Constraint`] for the given entity and field.
    pub fn constraint(entity: &'static str, kind: ConstraintKind, name: impl Into<String>) -> Self {
        TesseraError::Constraint {
            entity,
            kind,
            name: name.into(),
        }
    }

    /// Returns a machine-readable code for the error variant.
    pub fn code(&self) -> &'static str {
        match self {
            TesseraError::Validation { .. } => "Validation",
            TesseraError::NotFound { .. } => "NotFound",
            TesseraError::Constraint { .. } => "ConstraintViolation",
            TesseraError::TransactionTimeout { .. } => "TransactionTimeout",
            TesseraError::Storage(_) => "StorageError",
        }
    }
}
