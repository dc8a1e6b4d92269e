//! PostgreSQL adapter for the database access port.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::types::{Oid, PgInterval};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow, PgTypeInfo, PgTypeKind};
use sqlx::{Column, Postgres, Row as _, TypeInfo};

use super::DatabaseConfig;
use crate::error::PortError;
use crate::port::{Database, SqlPort, Transaction};
use crate::value::{Row, Value};

/// Plain (non-transactional) PostgreSQL connection.
pub struct PgDatabase {
    pool: PgPool,
}

impl PgDatabase {
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, PortError> {
        let mut options = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.connection_timeout)
            .idle_timeout(config.idle_timeout);
        if let Some(max_lifetime) = config.max_lifetime {
            options = options.max_lifetime(max_lifetime);
        }

        let pool = options
            .connect(&config.dsn)
            .await
            .map_err(|e| PortError::Connect(e.to_string()))?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SqlPort for PgDatabase {
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
impl Database for PgDatabase {
    async fn begin(&self) -> Result<Box<dyn Transaction>, PortError> {
        let tx = self
            .pool
            .begin()
            .await
            .map_err(|e| PortError::Begin(e.to_string()))?;
        Ok(Box::new(PgTransaction { tx }))
    }

    fn driver_name(&self) -> &'static str {
        "postgres"
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}

/// An open PostgreSQL transaction.
pub struct PgTransaction {
    tx: sqlx::Transaction<'static, Postgres>,
}

#[async_trait]
impl SqlPort for PgTransaction {
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
impl Transaction for PgTransaction {
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

fn decode_rows(rows: &[PgRow]) -> Result<Vec<Row>, PortError> {
    rows.iter()
        .map(|row| decode_row(row).map_err(|e| PortError::Query(e.to_string())))
        .collect()
}

/// How a column is read off the binary protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Decoding {
    Bool,
    Int2,
    Int4,
    Int8,
    Oid,
    Float4,
    Float8,
    Numeric,
    Uuid,
    Json,
    TimestampTz,
    Timestamp,
    Date,
    Time,
    Interval,
    Bytes,
    Text,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColumnDecoding {
    Scalar(Decoding),
    Array(Decoding),
    Unsupported,
}

fn scalar_decoding(name: &str, kind: &PgTypeKind) -> Option<Decoding> {
    let decoding = match name {
        "BOOL" => Decoding::Bool,
        "INT2" => Decoding::Int2,
        "INT4" => Decoding::Int4,
        "INT8" => Decoding::Int8,
        "OID" => Decoding::Oid,
        "FLOAT4" => Decoding::Float4,
        "FLOAT8" => Decoding::Float8,
        "NUMERIC" => Decoding::Numeric,
        "UUID" => Decoding::Uuid,
        "JSON" | "JSONB" => Decoding::Json,
        "TIMESTAMPTZ" => Decoding::TimestampTz,
        "TIMESTAMP" => Decoding::Timestamp,
        "DATE" => Decoding::Date,
        "TIME" => Decoding::Time,
        "INTERVAL" => Decoding::Interval,
        "BYTEA" => Decoding::Bytes,
        // the binary form of these is their UTF-8 text
        "TEXT" | "VARCHAR" | "CHAR" | "\"CHAR\"" | "NAME" | "UNKNOWN" | "XML" => Decoding::Text,
        _ if name.eq_ignore_ascii_case("citext") => Decoding::Text,
        _ if matches!(kind, PgTypeKind::Enum(_)) => Decoding::Text,
        _ => return None,
    };
    Some(decoding)
}

fn column_decoding(info: &PgTypeInfo) -> ColumnDecoding {
    let decoding = match info.kind() {
        PgTypeKind::Array(element) => {
            scalar_decoding(element.name(), element.kind()).map(ColumnDecoding::Array)
        }
        kind => scalar_decoding(info.name(), kind).map(ColumnDecoding::Scalar),
    };
    decoding.unwrap_or(ColumnDecoding::Unsupported)
}

/// Convert a row into column name to [`Value`], by declared column type.
///
/// Types without a lossless host representation (`INET`, `MONEY`, `BIT`,
/// ranges, ...) are rejected rather than read as raw wire bytes.
fn decode_row(row: &PgRow) -> Result<Row, sqlx::Error> {
    let mut out = Row::new();

    for column in row.columns() {
        let i = column.ordinal();
        let value = match column_decoding(column.type_info()) {
            ColumnDecoding::Scalar(decoding) => decode_scalar(row, i, decoding)?,
            ColumnDecoding::Array(element) => decode_array(row, i, element)?,
            ColumnDecoding::Unsupported => {
                return Err(sqlx::Error::ColumnDecode {
                    index: format!("{:?}", column.name()),
                    source: format!(
                        "unsupported column type {}; cast it to text in the query",
                        column.type_info().name()
                    )
                    .into(),
                })
            }
        };
        out.insert(column.name().to_string(), value);
    }

    Ok(out)
}

fn decode_scalar(row: &PgRow, i: usize, decoding: Decoding) -> Result<Value, sqlx::Error> {
    let value = match decoding {
        Decoding::Bool => row.try_get::<Option<bool>, _>(i)?.into(),
        Decoding::Int2 => row.try_get::<Option<i16>, _>(i)?.map(i64::from).into(),
        Decoding::Int4 => row.try_get::<Option<i32>, _>(i)?.map(i64::from).into(),
        Decoding::Int8 => row.try_get::<Option<i64>, _>(i)?.into(),
        Decoding::Oid => row.try_get::<Option<Oid>, _>(i)?.map(|o| i64::from(o.0)).into(),
        Decoding::Float4 => row.try_get::<Option<f32>, _>(i)?.map(f64::from).into(),
        Decoding::Float8 => row.try_get::<Option<f64>, _>(i)?.into(),
        Decoding::Numeric => row
            .try_get::<Option<Decimal>, _>(i)?
            .map_or(Value::Null, Value::Decimal),
        Decoding::Uuid => row
            .try_get::<Option<uuid::Uuid>, _>(i)?
            .map(|u| u.to_string())
            .into(),
        Decoding::Json => row
            .try_get::<Option<serde_json::Value>, _>(i)?
            .map_or(Value::Null, Value::Json),
        Decoding::TimestampTz => row
            .try_get::<Option<DateTime<Utc>>, _>(i)?
            .map_or(Value::Null, Value::Timestamp),
        Decoding::Timestamp => row
            .try_get::<Option<NaiveDateTime>, _>(i)?
            .map_or(Value::Null, Value::DateTime),
        Decoding::Date => row
            .try_get::<Option<NaiveDate>, _>(i)?
            .map_or(Value::Null, Value::Date),
        Decoding::Time => row
            .try_get::<Option<NaiveTime>, _>(i)?
            .map_or(Value::Null, Value::Time),
        Decoding::Interval => row
            .try_get::<Option<PgInterval>, _>(i)?
            .map(|iv| format_interval(&iv))
            .into(),
        Decoding::Bytes => row.try_get::<Option<Vec<u8>>, _>(i)?.into(),
        Decoding::Text => row.try_get_unchecked::<Option<String>, _>(i)?.into(),
    };
    Ok(value)
}

/// Read a one-dimensional array and render it as a Postgres array literal,
/// e.g. `{1,2,NULL}`.
fn decode_array(row: &PgRow, i: usize, element: Decoding) -> Result<Value, sqlx::Error> {
    fn get<'r, T>(row: &'r PgRow, i: usize) -> Result<Option<Vec<Option<T>>>, sqlx::Error>
    where
        Option<Vec<Option<T>>>: sqlx::Decode<'r, Postgres>,
    {
        row.try_get_unchecked(i)
    }

    let literal = match element {
        Decoding::Bool => array_literal(get::<bool>(row, i)?, |b| {
            String::from(if b { "t" } else { "f" })
        }),
        Decoding::Int2 => array_literal(get::<i16>(row, i)?, |n| n.to_string()),
        Decoding::Int4 => array_literal(get::<i32>(row, i)?, |n| n.to_string()),
        Decoding::Int8 => array_literal(get::<i64>(row, i)?, |n| n.to_string()),
        Decoding::Oid => array_literal(get::<Oid>(row, i)?, |o| o.0.to_string()),
        Decoding::Float4 => array_literal(get::<f32>(row, i)?, |x| Value::Float(x.into()).render()),
        Decoding::Float8 => array_literal(get::<f64>(row, i)?, |x| Value::Float(x).render()),
        Decoding::Numeric => array_literal(get::<Decimal>(row, i)?, |d| Value::Decimal(d).render()),
        Decoding::Uuid => array_literal(get::<uuid::Uuid>(row, i)?, |u| u.to_string()),
        Decoding::Json => array_literal(get::<serde_json::Value>(row, i)?, |j| j.to_string()),
        Decoding::TimestampTz => {
            array_literal(get::<DateTime<Utc>>(row, i)?, |t| Value::Timestamp(t).render())
        }
        Decoding::Timestamp => array_literal(get::<NaiveDateTime>(row, i)?, |t| t.to_string()),
        Decoding::Date => array_literal(get::<NaiveDate>(row, i)?, |d| d.to_string()),
        Decoding::Time => array_literal(get::<NaiveTime>(row, i)?, |t| t.to_string()),
        Decoding::Interval => array_literal(get::<PgInterval>(row, i)?, |iv| format_interval(&iv)),
        Decoding::Bytes => array_literal(get::<Vec<u8>>(row, i)?, |b| Value::Bytes(b).render()),
        Decoding::Text => array_literal(get::<String>(row, i)?, |s| s),
    };
    Ok(literal.into())
}

fn array_literal<T>(items: Option<Vec<Option<T>>>, render: impl Fn(T) -> String) -> Option<String> {
    let items = items?;
    let elements: Vec<String> = items
        .into_iter()
        .map(|item| match item {
            Some(v) => quote_array_element(render(v)),
            None => "NULL".to_string(),
        })
        .collect();
    Some(format!("{{{}}}", elements.join(",")))
}

fn quote_array_element(text: String) -> String {
    let needs_quotes = text.is_empty()
        || text.eq_ignore_ascii_case("NULL")
        || text
            .chars()
            .any(|c| matches!(c, '{' | '}' | ',' | '"' | '\\') || c.is_whitespace());
    if !needs_quotes {
        return text;
    }
    let escaped = text.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{}\"", escaped)
}

/// Render an interval the way the server does with the default
/// `IntervalStyle = postgres`, e.g. `1 year 2 mons -3 days +04:05:06.5`.
fn format_interval(interval: &PgInterval) -> String {
    let mut out = String::new();
    let mut is_zero = true;
    let mut is_before = false;

    let years = interval.months / 12;
    let months = interval.months % 12;
    for (value, unit) in [(years, "year"), (months, "mon"), (interval.days, "day")] {
        if value == 0 {
            continue;
        }
        if !is_zero {
            out.push(' ');
        }
        if is_before && value > 0 {
            out.push('+');
        }
        out.push_str(&format!("{} {}{}", value, unit, if value != 1 { "s" } else { "" }));
        is_before = value < 0;
        is_zero = false;
    }

    let micros = interval.microseconds;
    if is_zero || micros != 0 {
        if !is_zero {
            out.push(' ');
        }
        if micros < 0 {
            out.push('-');
        } else if is_before {
            out.push('+');
        }
        let abs = micros.unsigned_abs();
        let hours = abs / 3_600_000_000;
        let minutes = abs / 60_000_000 % 60;
        let seconds = abs / 1_000_000 % 60;
        let fraction = abs % 1_000_000;
        out.push_str(&format!("{:02}:{:02}:{:02}", hours, minutes, seconds));
        if fraction != 0 {
            let digits = format!("{:06}", fraction);
            out.push('.');
            out.push_str(digits.trim_end_matches('0'));
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::postgres::types::PgMoney;
    use sqlx::Type;
    use std::sync::Arc;

    fn interval(months: i32, days: i32, microseconds: i64) -> PgInterval {
        PgInterval {
            months,
            days,
            microseconds,
        }
    }

    #[test]
    fn test_interval_renders_server_text() {
        assert_eq!(format_interval(&interval(0, 1, 0)), "1 day");
        assert_eq!(format_interval(&interval(0, 0, 0)), "00:00:00");
        assert_eq!(format_interval(&interval(0, 0, 1_500_000)), "00:00:01.5");
        assert_eq!(format_interval(&interval(0, 2, 3_600_000_000)), "2 days 01:00:00");
        assert_eq!(
            format_interval(&interval(14, 3, 14_706_000_000)),
            "1 year 2 mons 3 days 04:05:06"
        );
        assert_eq!(format_interval(&interval(0, -1, 7_200_000_000)), "-1 days +02:00:00");
        assert_eq!(format_interval(&interval(0, 0, -90_000_000)), "-00:01:30");
        assert_eq!(format_interval(&interval(0, 0, 100 * 3_600_000_000)), "100:00:00");
    }

    #[test]
    fn test_array_literal_quotes_like_the_server() {
        assert_eq!(
            array_literal(Some(vec![Some(1), None, Some(3)]), |n: i32| n.to_string()),
            Some("{1,NULL,3}".to_string())
        );
        assert_eq!(
            array_literal(
                Some(vec![
                    Some("a".to_string()),
                    Some(String::new()),
                    Some("two words".to_string()),
                    Some("null".to_string()),
                    Some(r#"say "hi""#.to_string()),
                ]),
                |s| s
            ),
            Some(r#"{a,"","two words","null","say \"hi\""}"#.to_string())
        );
        assert_eq!(array_literal(Some(Vec::<Option<i32>>::new()), |n| n.to_string()), Some("{}".to_string()));
        assert_eq!(array_literal(None::<Vec<Option<i32>>>, |n| n.to_string()), None);
    }

    #[test]
    fn test_column_decoding_by_type() {
        assert_eq!(
            column_decoding(&<i32 as Type<Postgres>>::type_info()),
            ColumnDecoding::Scalar(Decoding::Int4)
        );
        assert_eq!(
            column_decoding(&<PgInterval as Type<Postgres>>::type_info()),
            ColumnDecoding::Scalar(Decoding::Interval)
        );
        assert_eq!(
            column_decoding(&<Vec<i64> as Type<Postgres>>::type_info()),
            ColumnDecoding::Array(Decoding::Int8)
        );
        assert_eq!(
            column_decoding(&<Vec<String> as Type<Postgres>>::type_info()),
            ColumnDecoding::Array(Decoding::Text)
        );
        assert_eq!(
            column_decoding(&<PgMoney as Type<Postgres>>::type_info()),
            ColumnDecoding::Unsupported
        );
    }

    #[test]
    fn test_enums_and_citext_read_as_text() {
        let enum_kind = PgTypeKind::Enum(Arc::from(vec!["happy".to_string(), "sad".to_string()]));
        assert_eq!(scalar_decoding("mood", &enum_kind), Some(Decoding::Text));
        assert_eq!(scalar_decoding("citext", &PgTypeKind::Simple), Some(Decoding::Text));
        assert_eq!(scalar_decoding("inet", &PgTypeKind::Simple), None);
    }

    /// Needs TEST_POSTGRES_DSN pointing at a disposable database.
    #[tokio::test]
    #[ignore]
    async fn test_interval_array_and_unsupported_columns() {
        let Ok(dsn) = std::env::var("TEST_POSTGRES_DSN") else {
            return;
        };
        let mut db = PgDatabase::connect(&DatabaseConfig::new(dsn)).await.unwrap();

        let rows = db
            .query_rows(
                "SELECT INTERVAL '1 day' AS age, ARRAY[1, 2] AS ids, \
                 ARRAY['a', NULL]::text[] AS tags, 'x'::citext AS label",
            )
            .await;
        // citext is an extension; fall back without it
        let rows = match rows {
            Ok(rows) => rows,
            Err(_) => db
                .query_rows(
                    "SELECT INTERVAL '1 day' AS age, ARRAY[1, 2] AS ids, \
                     ARRAY['a', NULL]::text[] AS tags, 'x'::text AS label",
                )
                .await
                .unwrap(),
        };
        assert_eq!(rows[0]["age"], Value::from("1 day"));
        assert_eq!(rows[0]["ids"], Value::from("{1,2}"));
        assert_eq!(rows[0]["tags"], Value::from("{a,NULL}"));
        assert_eq!(rows[0]["label"], Value::from("x"));

        let err = db
            .query_rows("SELECT '10.0.0.1'::inet AS addr")
            .await
            .unwrap_err();
        assert!(err.to_string().contains("unsupported column type INET"), "{}", err);

        db.pool.close().await;
    }
}
