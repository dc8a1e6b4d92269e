//! GitHub PR comment notifier
//!
//! Posts the run as a Markdown comment on a pull request. If the PR already
//! carries a comment from an earlier run for the same environment, that
//! comment is edited in place instead.
//!
//! Authenticates as a GitHub App installation when App credentials are
//! configured, otherwise with a plain token.

use std::fmt::Write as _;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use opsql_core::{OperationResult, Report};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{Notification, Notifier};
use crate::config::GitHubSettings;

/// How requests to the GitHub API are authorised.
#[derive(Clone)]
pub enum Credentials {
    Token(String),
    App(AppCredentials),
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credentials::Token(_) => f.write_str("Token(***)"),
            Credentials::App(app) => f
                .debug_struct("App")
                .field("app_id", &app.app_id)
                .field("installation_id", &app.installation_id)
                .finish_non_exhaustive(),
        }
    }
}

/// A GitHub App installation. Each notification mints a short-lived
/// installation token from these.
#[derive(Clone)]
pub struct AppCredentials {
    pub app_id: String,
    pub installation_id: u64,
    /// PEM-encoded RSA private key.
    pub private_key: String,
}

/// Claims of the JWT that authenticates as the App itself.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
struct AppClaims {
    iat: i64,
    exp: i64,
    iss: String,
}

impl AppCredentials {
    /// Sign an RS256 App JWT valid for nine minutes from `now` (unix
    /// seconds), backdated a minute for clock drift.
    fn jwt(&self, now: i64) -> Result<String> {
        let claims = AppClaims {
            iat: now - 60,
            exp: now + 9 * 60,
            iss: self.app_id.clone(),
        };
        let key = EncodingKey::from_rsa_pem(self.private_key.as_bytes())
            .context("invalid GitHub App private key")?;
        encode(&Header::new(Algorithm::RS256), &claims, &key)
            .context("failed to sign GitHub App JWT")
    }
}

/// Pick the credentials to use: App credentials when complete, the token
/// otherwise. `Ok(None)` when neither is configured.
pub fn select_credentials(settings: &GitHubSettings) -> Result<Option<Credentials>> {
    if let (Some(app_id), Some(installation_id)) =
        (settings.app_id.as_deref(), settings.app_installation_id)
    {
        let private_key = match (&settings.app_private_key, &settings.app_private_key_path) {
            (Some(pem), _) => Some(pem.clone()),
            (None, Some(path)) => Some(std::fs::read_to_string(path).with_context(|| {
                format!("failed to read GitHub App private key {}", path.display())
            })?),
            (None, None) => None,
        };
        if let Some(private_key) = private_key {
            return Ok(Some(Credentials::App(AppCredentials {
                app_id: app_id.to_string(),
                installation_id,
                private_key,
            })));
        }
        debug!("GitHub App private key not configured, falling back to token");
    }

    Ok(settings.token.clone().map(Credentials::Token))
}

/// GitHub REST client scoped to one pull request.
#[derive(Clone)]
pub struct GitHubClient {
    client: reqwest::Client,
    credentials: Credentials,
    api_url: String,
    owner: String,
    repo: String,
    pr: u64,
}

impl GitHubClient {
    pub fn new(credentials: Credentials, repository: &str, pr: u64) -> Result<Self> {
        let (owner, repo) = split_repository(repository)?;
        Ok(Self {
            client: reqwest::Client::new(),
            credentials,
            api_url: "https://api.github.com".to_string(),
            owner,
            repo,
            pr,
        })
    }

    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into().trim_end_matches('/').to_string();
        self
    }

    /// `Ok(None)` when neither App credentials nor a token are configured.
    pub fn from_settings(settings: &GitHubSettings) -> Result<Option<Self>> {
        let Some(credentials) = select_credentials(settings)? else {
            return Ok(None);
        };
        let (Some(repository), Some(pr)) = (settings.repository.as_deref(), settings.pr) else {
            bail!("GitHub repository or PR number not specified");
        };
        Ok(Some(
            Self::new(credentials, repository, pr)?.with_api_url(&settings.api_url),
        ))
    }

    /// Bearer token for API calls, minting an installation token for Apps.
    async fn access_token(&self) -> Result<String> {
        let app = match &self.credentials {
            Credentials::Token(token) => return Ok(token.clone()),
            Credentials::App(app) => app,
        };

        #[derive(Deserialize)]
        struct InstallationToken {
            token: String,
        }

        let jwt = app.jwt(chrono::Utc::now().timestamp())?;
        let url = format!(
            "{}/app/installations/{}/access_tokens",
            self.api_url, app.installation_id
        );
        let response = self
            .request(reqwest::Method::POST, url, &jwt)
            .send()
            .await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!(
                "failed to create installation token: GitHub API error {}: {}",
                status,
                body
            ));
        }

        let token: InstallationToken = response
            .json()
            .await
            .context("failed to decode installation token")?;
        debug!("Created installation token for GitHub App {}", app.app_id);
        Ok(token.token)
    }

    fn request(
        &self,
        method: reqwest::Method,
        url: String,
        token: &str,
    ) -> reqwest::RequestBuilder {
        self.client
            .request(method, url)
            .bearer_auth(token)
            .header("accept", "application/vnd.github+json")
            .header("x-github-api-version", "2022-11-28")
            .header("user-agent", "opsql")
    }

    /// Id of the first PR comment whose body starts with `prefix`.
    async fn find_comment(&self, token: &str, prefix: &str) -> Result<Option<u64>> {
        #[derive(Deserialize)]
        struct IssueComment {
            id: u64,
            #[serde(default)]
            body: Option<String>,
        }

        let url = format!(
            "{}/repos/{}/{}/issues/{}/comments?per_page=100",
            self.api_url, self.owner, self.repo, self.pr
        );
        let response = self
            .request(reqwest::Method::GET, url, token)
            .send()
            .await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("GitHub API error {}: {}", status, body));
        }

        let comments: Vec<IssueComment> = response
            .json()
            .await
            .context("failed to decode PR comments")?;
        Ok(comments
            .into_iter()
            .find(|c| c.body.as_deref().is_some_and(|b| b.starts_with(prefix)))
            .map(|c| c.id))
    }

    /// Create the comment, or edit the existing one from an earlier run.
    pub async fn upsert_comment(&self, prefix: &str, body: &str) -> Result<()> {
        let token = self.access_token().await?;
        let (method, url) = match self.find_comment(&token, prefix).await? {
            Some(id) => {
                debug!("Updating existing PR comment {}", id);
                (
                    reqwest::Method::PATCH,
                    format!(
                        "{}/repos/{}/{}/issues/comments/{}",
                        self.api_url, self.owner, self.repo, id
                    ),
                )
            }
            None => (
                reqwest::Method::POST,
                format!(
                    "{}/repos/{}/{}/issues/{}/comments",
                    self.api_url, self.owner, self.repo, self.pr
                ),
            ),
        };

        let response = self
            .request(method, url, &token)
            .json(&serde_json::json!({ "body": body }))
            .send()
            .await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow!("failed to post comment: GitHub API error {}: {}", status, body));
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for GitHubClient {
    fn name(&self) -> &'static str {
        "GitHub"
    }

    async fn notify(&self, notification: &Notification<'_>) -> Result<()> {
        let body = format_comment(notification);
        self.upsert_comment(&comment_prefix(notification.environment), &body)
            .await
    }
}

/// Prefix shared by every comment for an environment, dry run or not.
pub fn comment_prefix(environment: &str) -> String {
    if environment.is_empty() {
        "## opsql Execution Results".to_string()
    } else {
        format!("## [{}] opsql Execution Results", environment)
    }
}

/// Render the run as a Markdown comment body.
pub fn format_comment(notification: &Notification<'_>) -> String {
    let mut buf = String::new();
    let _ = writeln!(buf, "## {}\n", notification.title());
    let _ = writeln!(buf, "**Summary:** {}\n", notification.summary());

    if let Some(error) = notification.error {
        let _ = writeln!(buf, "**Error:**\n```\n{}\n```\n", error);
    }

    for report in notification.reports {
        write_report(&mut buf, report);
    }
    buf
}

fn write_report(buf: &mut String, report: &Report) {
    let status = if report.pass { "✅" } else { "❌" };
    let _ = writeln!(buf, "### {} {} - {}", status, report.id, report.description);
    let _ = writeln!(buf, "**Type:** {}", report.kind);
    let _ = writeln!(buf, "**Status:** {}", report.message);

    if !report.sql.is_empty() {
        let _ = writeln!(buf, "**Query:**\n```sql\n{}\n```", report.sql.trim());
    }

    match &report.result {
        Some(OperationResult::Rows(rows)) if !rows.is_empty() => {
            if let Ok(json) = serde_json::to_string_pretty(rows) {
                let _ = writeln!(buf, "**Result:**\n```json\n{}\n```", json);
            }
        }
        Some(OperationResult::Affected(n)) => {
            let _ = writeln!(buf, "**Affected Rows:** {}", n);
        }
        _ => {}
    }
    buf.push('\n');
}

/// PR number from a `refs/pull/<n>/merge` ref.
pub fn extract_pr_number(git_ref: &str) -> Option<u64> {
    git_ref
        .strip_prefix("refs/pull/")?
        .strip_suffix("/merge")?
        .parse()
        .ok()
}

fn split_repository(repository: &str) -> Result<(String, String)> {
    match repository.split('/').collect::<Vec<_>>().as_slice() {
        [owner, repo] if !owner.is_empty() && !repo.is_empty() => {
            Ok((owner.to_string(), repo.to_string()))
        }
        _ => bail!(
            "invalid repository format: {} (expected owner/repo)",
            repository
        ),
    }
}
