//! Report output
//!
//! Reports go to stdout as a pretty-printed JSON array; everything else the
//! tool prints goes to stderr through `tracing`.

use std::fmt;
use std::io::Write;

use anyhow::{Context, Result};
use opsql_core::Report;
use serde::Serialize;

/// Pass/fail counts over a set of reports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub passed: usize,
    pub failed: usize,
}

impl Summary {
    pub fn from_reports(reports: &[Report]) -> Self {
        let passed = reports.iter().filter(|r| r.pass).count();
        Self {
            passed,
            failed: reports.len() - passed,
        }
    }

    pub fn all_passed(&self) -> bool {
        self.failed == 0
    }
}

impl fmt::Display for Summary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} passed, {} failed", self.passed, self.failed)
    }
}

pub fn render_reports(reports: &[Report]) -> Result<String> {
    serde_json::to_string_pretty(reports).context("failed to serialize reports")
}

/// Print reports to stdout.
pub fn print_reports(reports: &[Report]) -> Result<()> {
    let json = render_reports(reports)?;
    let mut stdout = std::io::stdout().lock();
    writeln!(stdout, "{}", json).context("failed to write reports")?;
    Ok(())
}
