//! Operation definitions
//!
//! Definitions are YAML files listing the operations to run, with optional
//! `params` substituted into each statement. Several files can be given for
//! one run; they are merged in order (see [`load_definitions`]).

mod loader;
mod types;

use std::path::PathBuf;

use opsql_core::ConfigurationError;
use thiserror::Error;

pub use loader::{load_definitions, parse_definition, Definition};
pub use types::{DefinitionFile, RawOperation};

/// Why a set of definition files could not be turned into operations.
#[derive(Error, Debug)]
pub enum DefinitionError {
    #[error("at least one definition file is required")]
    NoFiles,

    #[error("failed to read config file {}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse YAML in {}", path.display())]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("unsupported version: {0}")]
    Version(u32),

    #[error("version mismatch in {}: expected {expected}, found {found}", path.display())]
    VersionMismatch {
        path: PathBuf,
        expected: u32,
        found: u32,
    },

    #[error("operation[{index}]: sql is required")]
    MissingSql { index: usize },

    #[error("operation[{id}]: unable to detect SQL type from query")]
    UndetectableType { id: String },

    #[error("operation[{id}]: {reason}")]
    UnsupportedType {
        id: String,
        reason: ConfigurationError,
    },

    #[error("duplicate operation ID: {0}")]
    DuplicateId(String),

    #[error("operation[{id}]: expected is required for SELECT")]
    MissingExpected { id: String },

    #[error("operation[{id}]: expected_changes is required for DML")]
    MissingExpectedChanges { id: String },

    #[error("operation[{id}]: failed to render SQL template: {message}")]
    Template { id: String, message: String },
}
