//! Database access port.
//!
//! The engine talks to the database only through these traits. A plain
//! connection and an open transaction expose the same [`SqlPort`]
//! capabilities; a transaction additionally finalises itself exactly once
//! through [`Transaction::commit`] or [`Transaction::rollback`], both of
//! which consume it.

use async_trait::async_trait;

use crate::error::PortError;
use crate::value::Row;

/// Run statements and read rows back.
#[async_trait]
pub trait SqlPort: Send {
    /// Run a query and return every row, each as column name to value.
    async fn query_rows(&mut self, sql: &str) -> Result<Vec<Row>, PortError>;

    /// Run a statement and return the number of affected rows.
    async fn exec(&mut self, sql: &str) -> Result<u64, PortError>;
}

/// An open transaction.
#[async_trait]
pub trait Transaction: SqlPort {
    async fn commit(self: Box<Self>) -> Result<(), PortError>;
    async fn rollback(self: Box<Self>) -> Result<(), PortError>;
}

/// A connection able to start transactions.
#[async_trait]
pub trait Database: SqlPort + Sync {
    async fn begin(&self) -> Result<Box<dyn Transaction>, PortError>;

    /// Driver name for logs, e.g. `postgres`.
    fn driver_name(&self) -> &'static str;

    async fn close(&self);
}
