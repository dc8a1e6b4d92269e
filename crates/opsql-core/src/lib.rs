//! opsql-core - execution and validation engine for declared SQL operations
//!
//! A definition is an ordered list of [`Operation`]s. The [`Orchestrator`]
//! runs them inside one database transaction and produces a [`Report`] per
//! operation:
//!
//! - `select` operations are checked against expected rows (see
//!   [`validate_select`]); extra actual columns are ignored.
//! - `insert`, `update` and `delete` operations are checked against an
//!   expected affected-row count (see [`validate_dml`]).
//!
//! [`RunMode::Plan`] always rolls back. [`RunMode::Apply`] commits only when
//! every operation passed.
//!
//! Drivers are reached through the [`port`] traits; sqlx-backed adapters for
//! PostgreSQL, MySQL and SQLite live under [`database`] behind cargo
//! features of the same names.

pub mod compare;
pub mod database;
pub mod error;
pub mod executor;
pub mod operation;
pub mod orchestrator;
pub mod port;
pub mod validate;
pub mod value;

#[cfg(test)]
mod testing;

pub use compare::compare;
pub use database::{connect, mask_dsn, DatabaseConfig, Driver};
pub use error::{ConfigurationError, PortError, RunError};
pub use executor::OperationExecutor;
pub use operation::{Expectation, Operation, OperationResult, OperationType, Report};
pub use orchestrator::{Orchestrator, RunMode, RunOutcome};
pub use port::{Database, SqlPort, Transaction};
pub use validate::{validate_dml, validate_select, Verdict};
pub use value::{Row, Value, ValueKind};

pub use tokio_util::sync::CancellationToken;
