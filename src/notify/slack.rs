//! Slack webhook notifier (Block Kit payload).

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use opsql_core::Report;
use serde_json::{json, Value};

use super::{Notification, Notifier};

/// Slack rejects messages with more than 50 blocks.
const MAX_BLOCKS: usize = 50;

#[derive(Clone)]
pub struct SlackClient {
    client: reqwest::Client,
    webhook_url: String,
}

impl SlackClient {
    pub fn new(webhook_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            webhook_url: webhook_url.into(),
        }
    }
}

#[async_trait]
impl Notifier for SlackClient {
    fn name(&self) -> &'static str {
        "Slack"
    }

    async fn notify(&self, notification: &Notification<'_>) -> Result<()> {
        let response = self
            .client
            .post(&self.webhook_url)
            .json(&build_payload(notification))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("Slack webhook error {}: {}", status, body));
        }
        Ok(())
    }
}

pub fn build_payload(notification: &Notification<'_>) -> Value {
    let summary = notification.summary();
    let mut blocks = vec![
        json!({
            "type": "header",
            "text": {
                "type": "plain_text",
                "text": format!("🔧 {}", notification.title()),
            }
        }),
        mrkdwn_section(format!(
            "{} *Summary:* {}",
            if summary.all_passed() && notification.error.is_none() {
                "✅"
            } else {
                "❌"
            },
            summary
        )),
    ];

    if let Some(error) = notification.error {
        blocks.push(mrkdwn_section(format!("*Error:*\n```{}```", error)));
    }
    blocks.push(json!({ "type": "divider" }));

    let room = MAX_BLOCKS - blocks.len();
    let reports = notification.reports;
    if reports.len() > room {
        let shown = room - 1;
        blocks.extend(reports[..shown].iter().map(report_block));
        blocks.push(json!({
            "type": "context",
            "elements": [{
                "type": "mrkdwn",
                "text": format!("…and {} more operations", reports.len() - shown),
            }]
        }));
    } else {
        blocks.extend(reports.iter().map(report_block));
    }

    json!({ "blocks": blocks })
}

fn mrkdwn_section(text: String) -> Value {
    json!({
        "type": "section",
        "text": { "type": "mrkdwn", "text": text }
    })
}

fn report_block(report: &Report) -> Value {
    let status = if report.pass { "✅ PASS" } else { "❌ FAIL" };
    let mut fields = vec![
        json!({ "type": "mrkdwn", "text": format!("*Type:*\n{}", report.kind) }),
        json!({ "type": "mrkdwn", "text": format!("*Status:*\n{}", report.message) }),
    ];
    if let Some(affected) = report.affected_rows() {
        fields.push(json!({
            "type": "mrkdwn",
            "text": format!("*Affected Rows:*\n{}", affected),
        }));
    }

    json!({
        "type": "section",
        "text": {
            "type": "mrkdwn",
            "text": format!("*{}* `{}`\n{}", status, report.id, report.description),
        },
        "fields": fields,
    })
}
