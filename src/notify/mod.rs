//! Run notifications
//!
//! Notifiers are best-effort: a failed delivery is logged and never changes
//! the outcome of the run.

pub mod github;
pub mod slack;

use anyhow::Result;
use async_trait::async_trait;
use opsql_core::{Report, RunMode};
use tracing::{info, warn};

use crate::output::Summary;

/// Everything a notifier needs to describe one run.
#[derive(Debug, Clone, Copy)]
pub struct Notification<'a> {
    pub mode: RunMode,
    pub environment: &'a str,
    pub reports: &'a [Report],
    /// Set when the run failed before or while executing.
    pub error: Option<&'a str>,
}

impl<'a> Notification<'a> {
    pub fn summary(&self) -> Summary {
        Summary::from_reports(self.reports)
    }

    /// `[env] opsql Execution Results (Dry Run)`, parts omitted as needed.
    pub fn title(&self) -> String {
        let mut title = String::new();
        if !self.environment.is_empty() {
            title.push_str(&format!("[{}] ", self.environment));
        }
        title.push_str("opsql Execution Results");
        if self.mode.is_dry_run() {
            title.push_str(" (Dry Run)");
        }
        title
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    fn name(&self) -> &'static str;

    async fn notify(&self, notification: &Notification<'_>) -> Result<()>;
}

/// Deliver to every notifier, logging failures.
pub async fn notify_all(notifiers: &[Box<dyn Notifier>], notification: &Notification<'_>) {
    for notifier in notifiers {
        match notifier.notify(notification).await {
            Ok(()) => info!("Sent {} notification", notifier.name()),
            Err(e) => warn!("Failed to send {} notification: {:#}", notifier.name(), e),
        }
    }
}
