//! Command handlers
//!
//! `run` wires the pieces together: load definitions, connect, execute in
//! plan or apply mode, print reports, notify.

use anyhow::{anyhow, Result};
use opsql_core::{database, CancellationToken, DatabaseConfig, Orchestrator, Report, RunMode};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::RunConfig;
use crate::definition::load_definitions;
use crate::notify::github::GitHubClient;
use crate::notify::slack::SlackClient;
use crate::notify::{notify_all, Notification, Notifier};
use crate::output::{self, Summary};

/// Execute the configured definitions.
///
/// Returns `Ok(true)` when every operation passed, `Ok(false)` when a plan
/// completed with failing assertions, and `Err` when the run could not
/// start or was aborted.
pub async fn run(config: &RunConfig) -> Result<bool> {
    let notifiers = build_notifiers(config);

    let definition = match load_definitions(&config.config_files) {
        Ok(definition) => definition,
        Err(e) => {
            let err = anyhow!(e).context("failed to load definition");
            notify(config, &notifiers, &[], Some(&err)).await;
            return Err(err);
        }
    };

    let db_config = DatabaseConfig::new(&config.dsn).with_connection_timeout(config.connect_timeout);
    let db = match database::connect(&db_config).await {
        Ok(db) => db,
        Err(e) => {
            let err = anyhow!(e).context("failed to connect to database");
            notify(config, &notifiers, &[], Some(&err)).await;
            return Err(err);
        }
    };

    let cancel = CancellationToken::new();
    let watcher = spawn_cancel_watcher(cancel.clone(), config.timeout);
    let outcome = Orchestrator::new(config.mode, cancel)
        .run(db.as_ref(), &definition.operations)
        .await;
    watcher.abort();
    db.close().await;

    if !outcome.reports.is_empty() {
        if let Err(e) = output::print_reports(&outcome.reports) {
            warn!("Failed to output reports: {:#}", e);
        }
    }

    let summary = Summary::from_reports(&outcome.reports);
    info!("{} run finished: {}", config.mode, summary);

    match outcome.error {
        Some(e) => {
            let err = anyhow!(e).context(match config.mode {
                RunMode::Plan => "failed to execute dry run",
                RunMode::Apply => "failed to execute",
            });
            notify(config, &notifiers, &outcome.reports, Some(&err)).await;
            Err(err)
        }
        None => {
            notify(config, &notifiers, &outcome.reports, None).await;
            Ok(summary.all_passed())
        }
    }
}

fn build_notifiers(config: &RunConfig) -> Vec<Box<dyn Notifier>> {
    let mut notifiers: Vec<Box<dyn Notifier>> = Vec::new();

    match GitHubClient::from_settings(&config.github) {
        Ok(Some(client)) => notifiers.push(Box::new(client)),
        Ok(None) => info!("GitHub token not configured, skipping PR comment"),
        Err(e) => warn!("GitHub comment disabled: {:#}", e),
    }
    if let Some(url) = &config.slack_webhook {
        notifiers.push(Box::new(SlackClient::new(url)));
    }

    notifiers
}

async fn notify(
    config: &RunConfig,
    notifiers: &[Box<dyn Notifier>],
    reports: &[Report],
    error: Option<&anyhow::Error>,
) {
    if notifiers.is_empty() {
        return;
    }
    let error = error.map(|e| format!("{:#}", e));
    let notification = Notification {
        mode: config.mode,
        environment: &config.environment,
        reports,
        error: error.as_deref(),
    };
    notify_all(notifiers, &notification).await;
}

/// Cancel on Ctrl-C, or when the timeout elapses.
fn spawn_cancel_watcher(
    cancel: CancellationToken,
    timeout: Option<std::time::Duration>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let deadline = async {
            match timeout {
                Some(timeout) => tokio::time::sleep(timeout).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(deadline);

        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                if let Err(e) = result {
                    warn!("Failed to listen for Ctrl-C: {}", e);
                    // the deadline still applies without the signal
                    (&mut deadline).await;
                    warn!("Run timed out, cancelling");
                } else {
                    warn!("Interrupted, cancelling run");
                }
            }
            _ = &mut deadline => warn!("Run timed out, cancelling"),
        }
        cancel.cancel();
    })
}
