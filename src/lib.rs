//! opsql - operational SQL with plan and apply modes
//!
//! Operations are declared in YAML with the rows or affected-row counts they
//! are expected to produce. `plan` runs them inside a transaction that is
//! always rolled back; `apply` commits only when every assertion holds.
//! Results are printed as JSON and can be posted to a GitHub pull request
//! or a Slack channel.
//!
//! The execution engine lives in [`opsql_core`]; this crate adds definition
//! loading, configuration, output and notifications.

pub mod commands;
pub mod config;
pub mod definition;
pub mod notify;
pub mod output;

pub use config::{CommonArgs, RunConfig};
pub use definition::{load_definitions, Definition, DefinitionError};
