//! SQLite adapter for the database access port.
//!
//! SQLite columns are dynamically typed, so values are decoded by the
//! storage class of each value rather than by the declared column type.

use async_trait::async_trait;
use sqlx::sqlite::{Sqlite, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Column, Row as _, TypeInfo, ValueRef};

use super::DatabaseConfig;
use crate::error::PortError;
use crate::port::{Database, SqlPort, Transaction};
use crate::value::{Row, Value};

pub struct SqliteDatabase {
    pool: SqlitePool,
}

impl SqliteDatabase {
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, PortError> {
        // An in-memory database lives only as long as its connection
        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.connection_timeout)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect(&config.dsn)
            .await
            .map_err(|e| PortError::Connect(e.to_string()))?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SqlPort for SqliteDatabase {
    async fn query_rows(&mut self, sql: &str) -> Result<Vec<Row>, PortError> {
        let rows = sqlx::query(sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| PortError::Query(e.to_string()))?;
        decode_rows(&rows)
    }

    async fn exec(&mut self, sql: &str) -> Result<u64, PortError> {
        let result = sqlx::query(sql)
            .execute(&self.pool)
            .await
            .map_err(|e| PortError::Exec(e.to_string()))?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl Database for SqliteDatabase {
    async fn begin(&self) -> Result<Box<dyn Transaction>, PortError> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| PortError::Begin(e.to_string()))?;
        Ok(Box::new(SqliteTransaction { tx }))
    }

    fn driver_name(&self) -> &'static str {
        "sqlite"
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

pub struct SqliteTransaction {
    tx: sqlx::Transaction<'static, Sqlite>,
}

#[async_trait]
impl SqlPort for SqliteTransaction {
    async fn query_rows(&mut self, sql: &str) -> Result<Vec<Row>, PortError> {
        let rows = sqlx::query(sql)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| PortError::Query(e.to_string()))?;
        decode_rows(&rows)
    }

    async fn exec(&mut self, sql: &str) -> Result<u64, PortError> {
        let result = sqlx::query(sql)
            .execute(&mut *self.tx)
            .await
            .map_err(|e| PortError::Exec(e.to_string()))?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl Transaction for SqliteTransaction {
    async fn commit(self: Box<Self>) -> Result<(), PortError> {
        let Self { tx } = *self;
        tx.commit()
            .await
            .map_err(|e| PortError::Commit(e.to_string()))
    }

    async fn rollback(self: Box<Self>) -> Result<(), PortError> {
        let Self { tx } = *self;
        tx.rollback()
            .await
            .map_err(|e| PortError::Rollback(e.to_string()))
    }
}

fn decode_rows(rows: &[SqliteRow]) -> Result<Vec<Row>, PortError> {
    rows.iter()
        .map(|row| decode_row(row).map_err(|e| PortError::Query(e.to_string())))
        .collect()
}

fn decode_row(row: &SqliteRow) -> Result<Row, sqlx::Error> {
    let mut out = Row::new();

    for column in row.columns() {
        let i = column.ordinal();
        let raw = row.try_get_raw(i)?;
        let value = if raw.is_null() {
            Value::Null
        } else {
            let storage = raw.type_info().name().to_string();
            match storage.as_str() {
                "INTEGER" | "INT8" | "BOOLEAN" => Value::Int(row.try_get_unchecked::<i64, _>(i)?),
                "REAL" => Value::Float(row.try_get_unchecked::<f64, _>(i)?),
                "BLOB" => Value::Bytes(row.try_get_unchecked::<Vec<u8>, _>(i)?),
                _ => Value::Text(row.try_get_unchecked::<String, _>(i)?),
            }
        };
        out.insert(column.name().to_string(), value);
    }

    Ok(out)
}
