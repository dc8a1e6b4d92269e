//! Plan/Apply Orchestrator - drives a full definition through one transaction
//!
//! Both modes run every operation in declaration order inside a single
//! transaction, so the side effects of operation `k` are visible to
//! operation `k + 1`.
//!
//! - **Plan** always rolls back. Assertion and driver failures are recorded
//!   and the run continues.
//! - **Apply** commits only if every report passes. The first failing
//!   report rolls the transaction back and ends the run.
//!
//! Configuration errors and cancellation stop either mode immediately; the
//! transaction is still rolled back before the error is returned.

use std::fmt;
use std::time::Instant;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::RunError;
use crate::executor::OperationExecutor;
use crate::operation::{Operation, Report};
use crate::port::{Database, Transaction};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// Execute and always roll back.
    Plan,
    /// Execute and commit if every operation passes.
    Apply,
}

impl RunMode {
    pub fn is_dry_run(&self) -> bool {
        matches!(self, RunMode::Plan)
    }
}

impl fmt::Display for RunMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunMode::Plan => f.write_str("plan"),
            RunMode::Apply => f.write_str("apply"),
        }
    }
}

/// Reports collected by a run, plus the error that ended it early, if any.
///
/// Reports are valid even when `error` is set and should still be rendered.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    pub mode: RunMode,
    pub reports: Vec<Report>,
    pub error: Option<RunError>,
    /// Whether the transaction was committed.
    pub committed: bool,
}

impl RunOutcome {
    pub fn passed(&self) -> usize {
        self.reports.iter().filter(|r| r.pass).count()
    }

    pub fn failed(&self) -> usize {
        self.reports.len() - self.passed()
    }

    /// True iff no error ended the run and every report passed.
    pub fn is_success(&self) -> bool {
        self.error.is_none() && self.reports.iter().all(|r| r.pass)
    }
}

/// Runs a definition's operations against a database in plan or apply mode.
#[derive(Debug, Clone)]
pub struct Orchestrator {
    mode: RunMode,
    executor: OperationExecutor,
}

impl Orchestrator {
    pub fn new(mode: RunMode, cancel: CancellationToken) -> Self {
        Self {
            mode,
            executor: OperationExecutor::new(cancel),
        }
    }

    pub fn plan() -> Self {
        Self::new(RunMode::Plan, CancellationToken::new())
    }

    pub fn apply() -> Self {
        Self::new(RunMode::Apply, CancellationToken::new())
    }

    pub fn mode(&self) -> RunMode {
        self.mode
    }

    /// Run every operation in order inside one transaction.
    pub async fn run(&self, db: &dyn Database, operations: &[Operation]) -> RunOutcome {
        let start = Instant::now();
        info!(
            mode = %self.mode,
            driver = db.driver_name(),
            operations = operations.len(),
            "starting run"
        );

        let mut outcome = RunOutcome {
            mode: self.mode,
            reports: Vec::with_capacity(operations.len()),
            error: None,
            committed: false,
        };

        let mut tx = match db.begin().await {
            Ok(tx) => tx,
            Err(e) => {
                error!("{}", e);
                outcome.error = Some(RunError::Transaction(e));
                return outcome;
            }
        };

        for op in operations {
            let report = match self.executor.execute(tx.as_mut(), op).await {
                Ok(report) => report,
                Err(e) => {
                    warn!("{}", e);
                    outcome.error = Some(self.abort(tx, e).await);
                    return outcome;
                }
            };

            let failed = !report.pass;
            // no result means the driver rejected the statement
            let driver_failure = report.result.is_none();
            let message = report.message.clone();
            outcome.reports.push(report);

            if failed && self.mode == RunMode::Apply {
                let id = op.id.clone();
                let err = if driver_failure {
                    RunError::OperationFailed { id, message }
                } else {
                    RunError::AssertionFailed { id, message }
                };
                error!("{}", err);
                outcome.error = Some(self.abort(tx, err).await);
                return outcome;
            }
        }

        if self.executor.cancellation().is_cancelled() {
            let id = operations.last().map(|op| op.id.clone()).unwrap_or_default();
            outcome.error = Some(self.abort(tx, RunError::Cancelled { id }).await);
            return outcome;
        }

        let finalised = match self.mode {
            RunMode::Plan => tx.rollback().await,
            RunMode::Apply => tx.commit().await,
        };
        match finalised {
            Ok(()) => outcome.committed = self.mode == RunMode::Apply,
            Err(e) => {
                error!("{}", e);
                outcome.error = Some(RunError::Transaction(e));
            }
        }

        info!(
            mode = %self.mode,
            passed = outcome.passed(),
            failed = outcome.failed(),
            committed = outcome.committed,
            duration_ms = start.elapsed().as_millis() as u64,
            "run finished"
        );
        outcome
    }

    /// Roll back after an early stop. A rollback failure is logged; the
    /// original cause is what the caller needs to see.
    async fn abort(&self, tx: Box<dyn Transaction>, cause: RunError) -> RunError {
        if let Err(e) = tx.rollback().await {
            error!("rollback after aborted {} run failed: {}", self.mode, e);
        }
        cause
    }
}
