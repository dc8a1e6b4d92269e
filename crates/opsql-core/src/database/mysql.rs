//! MySQL adapter for the database access port.

use async_trait::async_trait;
use sqlx::mysql::{MySql, MySqlPool, MySqlPoolOptions, MySqlRow};
use sqlx::{Column, Row as _, TypeInfo};

use super::{normalize_mysql_dsn, DatabaseConfig};
use crate::error::PortError;
use crate::port::{Database, SqlPort, Transaction};
use crate::value::{Row, Value};

/// Plain (non-transactional) MySQL connection.
pub struct MySqlDatabase {
    pool: MySqlPool,
}

impl MySqlDatabase {
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, PortError> {
        let pool = MySqlPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.connection_timeout)
            .idle_timeout(config.idle_timeout)
            .max_lifetime(config.max_lifetime)
            .connect(&normalize_mysql_dsn(&config.dsn))
            .await
            .map_err(|e| PortError::Connect(e.to_string()))?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl SqlPort for MySqlDatabase {
    async fn query_rows(&mut self, sql: &str) -> Result<Vec<Row>, PortError> {
        let rows = sqlx::query(sql)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| PortError::Query(e.to_string()))?;
        decode_rows(&rows)
    }

    async fn exec(&mut self, sql: &str) -> Result<u64, PortError> {
        sqlx::query(sql)
            .execute(&self.pool)
            .await
            .map(|r| r.rows_affected())
            .map_err(|e| PortError::Exec(e.to_string()))
    }
}

#[async_trait]
impl Database for MySqlDatabase {
    async fn begin(&self) -> Result<Box<dyn Transaction>, PortError> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| PortError::Begin(e.to_string()))?;
        Ok(Box::new(MySqlTransaction { tx }))
    }

    fn driver_name(&self) -> &'static str {
        "mysql"
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

pub struct MySqlTransaction {
    tx: sqlx::Transaction<'static, MySql>,
}

#[async_trait]
impl SqlPort for MySqlTransaction {
    async fn query_rows(&mut self, sql: &str) -> Result<Vec<Row>, PortError> {
        let rows = sqlx::query(sql)
            .fetch_all(&mut *self.tx)
            .await
            .map_err(|e| PortError::Query(e.to_string()))?;
        decode_rows(&rows)
    }

    async fn exec(&mut self, sql: &str) -> Result<u64, PortError> {
        sqlx::query(sql)
            .execute(&mut *self.tx)
            .await
            .map(|r| r.rows_affected())
            .map_err(|e| PortError::Exec(e.to_string()))
    }
}

#[async_trait]
impl Transaction for MySqlTransaction {
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

fn decode_rows(rows: &[MySqlRow]) -> Result<Vec<Row>, PortError> {
    rows.iter()
        .map(|row| decode_row(row).map_err(|e| PortError::Query(e.to_string())))
        .collect()
}

/// How a column is read off the binary protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Decoding {
    Signed,
    Unsigned,
    Float,
    Double,
    Decimal,
    Date,
    Time,
    DateTime,
    Timestamp,
    Json,
    Bytes,
    Text,
}

fn decoding_for(type_name: &str) -> Decoding {
    match type_name {
        // TINYINT(1) is reported as BOOLEAN; flag columns keep their integer value
        "BOOLEAN" | "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" => Decoding::Signed,
        t if t.ends_with("UNSIGNED") => Decoding::Unsigned,
        "FLOAT" => Decoding::Float,
        "DOUBLE" => Decoding::Double,
        "DECIMAL" => Decoding::Decimal,
        "DATE" => Decoding::Date,
        "TIME" => Decoding::Time,
        "DATETIME" => Decoding::DateTime,
        "TIMESTAMP" => Decoding::Timestamp,
        "JSON" => Decoding::Json,
        "BINARY" | "VARBINARY" | "TINYBLOB" | "BLOB" | "MEDIUMBLOB" | "LONGBLOB" | "BIT" => {
            Decoding::Bytes
        }
        // VARCHAR, CHAR, TEXT, ENUM, SET, YEAR; binary collations surface as bytes
        _ => Decoding::Text,
    }
}

fn decode_row(row: &MySqlRow) -> Result<Row, sqlx::Error> {
    let mut out = Row::new();

    for column in row.columns() {
        let i = column.ordinal();
        let value = match decoding_for(column.type_info().name()) {
            Decoding::Signed => row.try_get_unchecked::<Option<i64>, _>(i)?.into(),
            Decoding::Unsigned => match row.try_get_unchecked::<Option<u64>, _>(i)? {
                Some(u) => i64::try_from(u)
                    .map(Value::Int)
                    .unwrap_or_else(|_| Value::Text(u.to_string())),
                None => Value::Null,
            },
            Decoding::Float => row.try_get::<Option<f32>, _>(i)?.map(f64::from).into(),
            Decoding::Double => row.try_get::<Option<f64>, _>(i)?.into(),
            Decoding::Decimal => row
                .try_get::<Option<rust_decimal::Decimal>, _>(i)?
                .map_or(Value::Null, Value::Decimal),
            Decoding::Date => row
                .try_get::<Option<chrono::NaiveDate>, _>(i)?
                .map_or(Value::Null, Value::Date),
            Decoding::Time => row
                .try_get::<Option<chrono::NaiveTime>, _>(i)?
                .map_or(Value::Null, Value::Time),
            Decoding::DateTime => row
                .try_get::<Option<chrono::NaiveDateTime>, _>(i)?
                .map_or(Value::Null, Value::DateTime),
            Decoding::Timestamp => row
                .try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(i)?
                .map_or(Value::Null, Value::Timestamp),
            Decoding::Json => row
                .try_get::<Option<serde_json::Value>, _>(i)?
                .map_or(Value::Null, Value::Json),
            Decoding::Bytes => row.try_get_unchecked::<Option<Vec<u8>>, _>(i)?.into(),
            Decoding::Text => match row.try_get_unchecked::<Option<String>, _>(i) {
                Ok(text) => text.into(),
                Err(_) => row.try_get_unchecked::<Option<Vec<u8>>, _>(i)?.into(),
            },
        };
        out.insert(column.name().to_string(), value);
    }

    Ok(out)
}
