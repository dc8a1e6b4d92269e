//! Operations to execute and the reports they produce.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigurationError;
use crate::value::Row;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    Select,
    Insert,
    Update,
    Delete,
}

impl OperationType {
    pub const ALL: [OperationType; 4] = [
        OperationType::Select,
        OperationType::Insert,
        OperationType::Update,
        OperationType::Delete,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::Select => "select",
            OperationType::Insert => "insert",
            OperationType::Update => "update",
            OperationType::Delete => "delete",
        }
    }

    /// Data-modifying types are validated by affected-row count.
    pub fn is_dml(&self) -> bool {
        !matches!(self, OperationType::Select)
    }

    /// Detect the type from the leading keyword of a statement.
    pub fn detect(sql: &str) -> Option<Self> {
        let head: String = sql
            .trim_start()
            .chars()
            .take_while(|c| c.is_ascii_alphabetic())
            .collect();
        head.parse().ok()
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationType {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "select" => Ok(OperationType::Select),
            "insert" => Ok(OperationType::Insert),
            "update" => Ok(OperationType::Update),
            "delete" => Ok(OperationType::Delete),
            _ => Err(ConfigurationError::UnsupportedType {
                found: s.to_string(),
            }),
        }
    }
}

/// What an operation is asserted against.
#[derive(Debug, Clone, PartialEq)]
pub enum Expectation {
    /// Ordered expected rows for a `select`; each row lists only the
    /// columns it asserts on.
    Rows(Vec<Row>),
    /// Expected affected-row count keyed by operation type.
    ChangeCounts(BTreeMap<OperationType, u64>),
}

/// One step of a definition, with its type resolved and its statement
/// fully rendered.
#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    pub id: String,
    pub description: String,
    pub kind: OperationType,
    pub sql: String,
    pub expectation: Expectation,
}

impl Operation {
    pub fn select(id: impl Into<String>, sql: impl Into<String>, expected: Vec<Row>) -> Self {
        Self {
            id: id.into(),
            description: String::new(),
            kind: OperationType::Select,
            sql: sql.into(),
            expectation: Expectation::Rows(expected),
        }
    }

    /// A DML operation expecting `count` affected rows for its own type.
    pub fn dml(
        id: impl Into<String>,
        kind: OperationType,
        sql: impl Into<String>,
        count: u64,
    ) -> Self {
        Self {
            id: id.into(),
            description: String::new(),
            kind,
            sql: sql.into(),
            expectation: Expectation::ChangeCounts(BTreeMap::from([(kind, count)])),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// Observed outcome of an operation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum OperationResult {
    Rows(Vec<Row>),
    Affected(u64),
}

/// Pass/fail record for one executed operation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Report {
    pub id: String,
    pub description: String,
    #[serde(rename = "type")]
    pub kind: OperationType,
    pub result: Option<OperationResult>,
    pub pass: bool,
    pub message: String,
    /// Original statement, carried for human display.
    pub sql: String,
}

impl Report {
    pub fn new(
        op: &Operation,
        result: Option<OperationResult>,
        pass: bool,
        message: String,
    ) -> Self {
        Self {
            id: op.id.clone(),
            description: op.description.clone(),
            kind: op.kind,
            result,
            pass,
            message,
            sql: op.sql.clone(),
        }
    }

    pub fn affected_rows(&self) -> Option<u64> {
        match self.result {
            Some(OperationResult::Affected(n)) => Some(n),
            _ => None,
        }
    }

    pub fn rows(&self) -> Option<&[Row]> {
        match &self.result {
            Some(OperationResult::Rows(rows)) => Some(rows),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;

    #[test]
    fn test_detect_from_leading_keyword() {
        assert_eq!(
            OperationType::detect("  select * from users"),
            Some(OperationType::Select)
        );
        assert_eq!(
            OperationType::detect("\nINSERT INTO t VALUES (1)"),
            Some(OperationType::Insert)
        );
        assert_eq!(
            OperationType::detect("Update t SET a = 1"),
            Some(OperationType::Update)
        );
        assert_eq!(
            OperationType::detect("DELETE FROM t"),
            Some(OperationType::Delete)
        );
        assert_eq!(OperationType::detect("TRUNCATE t"), None);
        assert_eq!(OperationType::detect("SELECTED"), None);
    }

    #[test]
    fn test_unsupported_type_is_configuration_error() {
        let err = "upsert".parse::<OperationType>().unwrap_err();
        assert!(err.to_string().contains("unsupported operation type: upsert"));
    }

    #[test]
    fn test_report_serializes_with_type_key() {
        let op = Operation::dml("op1", OperationType::Update, "UPDATE t SET a = 1", 1);
        let report = Report::new(
            &op,
            Some(OperationResult::Affected(1)),
            true,
            "assertion passed".into(),
        );
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["type"], "update");
        assert_eq!(json["result"], 1);
        assert_eq!(json["pass"], true);
        assert_eq!(json["sql"], "UPDATE t SET a = 1");
    }

    #[test]
    fn test_failed_report_has_null_result() {
        let op = Operation::select("q", "SELECT 1", vec![Row::from([("a".into(), Value::Int(1))])]);
        let report = Report::new(&op, None, false, "query failed: boom".into());
        let json = serde_json::to_value(&report).unwrap();
        assert!(json["result"].is_null());
    }
}
