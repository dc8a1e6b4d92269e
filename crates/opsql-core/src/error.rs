//! Error types for the execution engine.
//!
//! Assertion failures are not errors: they are reports with `pass: false`.
//! The types here cover what cannot be expressed as a report.

use thiserror::Error;

use crate::operation::OperationType;

/// Failure surfaced by a database driver through the access port.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PortError {
    #[error("failed to connect to database: {0}")]
    Connect(String),

    #[error("{0}")]
    Query(String),

    #[error("{0}")]
    Exec(String),

    #[error("failed to begin transaction: {0}")]
    Begin(String),

    #[error("failed to commit transaction: {0}")]
    Commit(String),

    #[error("failed to roll back transaction: {0}")]
    Rollback(String),

    #[error("unsupported database driver in DSN: {dsn}")]
    UnsupportedDriver { dsn: String },
}

/// A definition-layer bug. Never becomes a report.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigurationError {
    #[error("unsupported operation type: {found} (allowed: select, insert, update, delete)")]
    UnsupportedType { found: String },

    #[error("{kind} operation has no {expected} block")]
    MissingExpectation {
        kind: OperationType,
        expected: &'static str,
    },
}

/// Why a run stopped early. The reports collected up to that point are
/// returned alongside.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RunError {
    #[error("operation[{id}]: {reason}")]
    Configuration {
        id: String,
        reason: ConfigurationError,
    },

    #[error(transparent)]
    Transaction(PortError),

    #[error("assertion failed for operation[{id}]: {message}")]
    AssertionFailed { id: String, message: String },

    /// The driver rejected the statement in apply mode.
    #[error("operation[{id}] failed: {message}")]
    OperationFailed { id: String, message: String },

    #[error("run cancelled at operation[{id}]")]
    Cancelled { id: String },
}

impl RunError {
    /// Id of the operation the run stopped at, if any.
    pub fn operation_id(&self) -> Option<&str> {
        match self {
            RunError::Configuration { id, .. }
            | RunError::AssertionFailed { id, .. }
            | RunError::OperationFailed { id, .. }
            | RunError::Cancelled { id } => Some(id),
            RunError::Transaction(_) => None,
        }
    }
}
