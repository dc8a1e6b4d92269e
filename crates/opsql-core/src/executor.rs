//! Operation Executor - runs one operation and turns its outcome into a Report
//!
//! Driver failures and assertion failures both become `pass: false`
//! reports. Only a mismatch between an operation's type and its expectation
//! block, or cancellation, is returned as an error.

use std::future::Future;
use std::time::Instant;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{ConfigurationError, PortError, RunError};
use crate::operation::{Expectation, Operation, OperationResult, OperationType, Report};
use crate::port::SqlPort;
use crate::validate::{validate_dml, validate_select};

/// Executes single operations against an open port.
#[derive(Debug, Clone, Default)]
pub struct OperationExecutor {
    cancel: CancellationToken,
}

impl OperationExecutor {
    pub fn new(cancel: CancellationToken) -> Self {
        Self { cancel }
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Execute a single operation
    pub async fn execute<P>(&self, port: &mut P, op: &Operation) -> Result<Report, RunError>
    where
        P: SqlPort + ?Sized,
    {
        let start = Instant::now();
        debug!(id = %op.id, kind = %op.kind, "executing operation");

        let report = match (op.kind, &op.expectation) {
            (OperationType::Select, Expectation::Rows(expected)) => {
                match self.guarded(&op.id, port.query_rows(&op.sql)).await? {
                    Ok(rows) => {
                        let verdict = validate_select(&rows, expected);
                        Report::new(
                            op,
                            Some(OperationResult::Rows(rows)),
                            verdict.pass,
                            verdict.message,
                        )
                    }
                    Err(e) => Report::new(op, None, false, format!("query failed: {}", e)),
                }
            }
            (kind, Expectation::ChangeCounts(expected)) if kind.is_dml() => {
                match self.guarded(&op.id, port.exec(&op.sql)).await? {
                    Ok(affected) => {
                        let verdict = validate_dml(affected, expected, kind);
                        Report::new(
                            op,
                            Some(OperationResult::Affected(affected)),
                            verdict.pass,
                            verdict.message,
                        )
                    }
                    Err(e) => Report::new(op, None, false, format!("execution failed: {}", e)),
                }
            }
            (kind, _) => {
                return Err(RunError::Configuration {
                    id: op.id.clone(),
                    reason: ConfigurationError::MissingExpectation {
                        kind,
                        expected: if kind.is_dml() {
                            "expected_changes"
                        } else {
                            "expected"
                        },
                    },
                });
            }
        };

        if report.pass {
            debug!(
                id = %op.id,
                duration_ms = start.elapsed().as_millis() as u64,
                "operation passed"
            );
        } else {
            warn!("Operation[{}] failed: {}", report.id, report.message);
        }

        Ok(report)
    }

    /// Race a port call against cancellation.
    async fn guarded<T>(
        &self,
        id: &str,
        call: impl Future<Output = Result<T, PortError>>,
    ) -> Result<Result<T, PortError>, RunError> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(RunError::Cancelled { id: id.to_string() }),
            result = call => Ok(result),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::ScriptedPort;
    use crate::value::{Row, Value};
    use pretty_assertions::assert_eq;

    fn alice() -> Row {
        Row::from([
            ("id".to_string(), Value::Int(1)),
            ("name".to_string(), Value::from("Alice")),
        ])
    }

    #[tokio::test]
    async fn test_select_passes_and_keeps_rows() {
        let mut port = ScriptedPort::new().with_rows("SELECT id, name FROM users", vec![alice()]);
        let op = Operation::select("users", "SELECT id, name FROM users", vec![alice()])
            .with_description("read users");

        let report = OperationExecutor::default()
            .execute(&mut port, &op)
            .await
            .unwrap();

        assert!(report.pass);
        assert_eq!(report.message, "assertion passed");
        assert_eq!(report.description, "read users");
        assert_eq!(report.rows(), Some(&[alice()][..]));
    }

    #[tokio::test]
    async fn test_query_failure_becomes_report() {
        let mut port = ScriptedPort::new().with_error("SELECT broken", "syntax error at or near \"broken\"");
        let op = Operation::select("bad", "SELECT broken", vec![alice()]);

        let report = OperationExecutor::default()
            .execute(&mut port, &op)
            .await
            .unwrap();

        assert!(!report.pass);
        assert!(report.result.is_none());
        assert_eq!(
            report.message,
            "query failed: syntax error at or near \"broken\""
        );
    }

    #[tokio::test]
    async fn test_dml_count_scenarios() {
        let sql = "UPDATE users SET name = 'Bob' WHERE id = 1";
        let op = Operation::dml("rename", OperationType::Update, sql, 1);

        let mut hit = ScriptedPort::new().with_affected(sql, 1);
        let report = OperationExecutor::default()
            .execute(&mut hit, &op)
            .await
            .unwrap();
        assert!(report.pass);
        assert_eq!(report.message, "assertion passed");
        assert_eq!(report.affected_rows(), Some(1));

        let mut miss = ScriptedPort::new().with_affected(sql, 0);
        let report = OperationExecutor::default()
            .execute(&mut miss, &op)
            .await
            .unwrap();
        assert!(!report.pass);
        assert!(report.message.contains("expected 1, got 0"));
        assert_eq!(report.affected_rows(), Some(0));
    }

    #[tokio::test]
    async fn test_exec_failure_becomes_report() {
        let sql = "DELETE FROM missing_table";
        let mut port = ScriptedPort::new().with_error(sql, "relation \"missing_table\" does not exist");
        let op = Operation::dml("purge", OperationType::Delete, sql, 3);

        let report = OperationExecutor::default()
            .execute(&mut port, &op)
            .await
            .unwrap();
        assert!(!report.pass);
        assert!(report.message.starts_with("execution failed: "));
        assert!(report.result.is_none());
    }

    #[tokio::test]
    async fn test_mismatched_expectation_is_configuration_error() {
        let mut op = Operation::dml("oops", OperationType::Insert, "INSERT INTO t VALUES (1)", 1);
        op.expectation = Expectation::Rows(vec![alice()]);
        let mut port = ScriptedPort::new();

        let err = OperationExecutor::default()
            .execute(&mut port, &op)
            .await
            .unwrap_err();
        assert!(matches!(err, RunError::Configuration { ref id, .. } if id == "oops"));
        assert!(port.statements().is_empty(), "no SQL may run on a config error");
    }

    #[tokio::test]
    async fn test_cancelled_token_stops_before_port_call_completes() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut port = ScriptedPort::new().with_rows("SELECT 1 AS one", vec![]);
        let op = Operation::select("one", "SELECT 1 AS one", vec![alice()]);

        let err = OperationExecutor::new(cancel)
            .execute(&mut port, &op)
            .await
            .unwrap_err();
        assert_eq!(err, RunError::Cancelled { id: "one".into() });
    }
}
