//! Run configuration
//!
//! Command-line flags (with their environment fallbacks) resolved into a
//! [`RunConfig`]. Nothing below the command layer reads the environment.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Result};
use clap::Args;
use opsql_core::RunMode;

use crate::notify::github::extract_pr_number;

const DEFAULT_GITHUB_API_URL: &str = "https://api.github.com";

/// Flags shared by `run`, `plan` and `apply`.
#[derive(Debug, Clone, Args)]
pub struct CommonArgs {
    /// YAML definition files, merged in the order given
    #[arg(short = 'c', long = "config", required = true, value_delimiter = ',')]
    pub config: Vec<PathBuf>,

    /// Environment name shown in notifications (e.g. dev, staging, prod)
    #[arg(short = 'e', long, env = "OPSQL_ENVIRONMENT")]
    pub environment: Option<String>,

    /// Database DSN (postgres://, mysql://, user:pass@tcp(host)/db, sqlite:)
    #[arg(long, env = "DATABASE_DSN", hide_env_values = true)]
    pub dsn: Option<String>,

    /// GitHub repository (owner/repo) for the PR comment
    #[arg(long, env = "GITHUB_REPOSITORY")]
    pub github_repo: Option<String>,

    /// GitHub PR number; derived from GITHUB_REF when omitted
    #[arg(long)]
    pub github_pr: Option<u64>,

    /// Token used to post the PR comment
    #[arg(long, env = "GITHUB_TOKEN", hide_env_values = true)]
    pub github_token: Option<String>,

    /// GitHub App id (or client id; falls back to GITHUB_CLIENT_ID).
    /// Complete App credentials take precedence over the token.
    #[arg(long, env = "GITHUB_APP_ID")]
    pub github_app_id: Option<String>,

    #[arg(long, env = "GITHUB_APP_INSTALLATION_ID")]
    pub github_app_installation_id: Option<u64>,

    /// PEM private key of the GitHub App
    #[arg(long, env = "GITHUB_APP_PRIVATE_KEY", hide_env_values = true)]
    pub github_app_private_key: Option<String>,

    /// File holding the GitHub App private key
    #[arg(long, env = "GITHUB_APP_PRIVATE_KEY_PATH")]
    pub github_app_private_key_path: Option<PathBuf>,

    #[arg(long, env = "GITHUB_API_URL", default_value = DEFAULT_GITHUB_API_URL, hide = true)]
    pub github_api_url: String,

    /// Slack incoming webhook URL
    #[arg(long, env = "SLACK_WEBHOOK_URL", hide_env_values = true)]
    pub slack_webhook: Option<String>,

    /// Cancel the run (and roll back) after this many seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Seconds to wait for a database connection
    #[arg(long, value_name = "SECS", default_value_t = 30)]
    pub connect_timeout: u64,
}

/// Where and how to post the PR comment.
#[derive(Clone, PartialEq, Eq)]
pub struct GitHubSettings {
    pub token: Option<String>,
    pub app_id: Option<String>,
    pub app_installation_id: Option<u64>,
    pub app_private_key: Option<String>,
    pub app_private_key_path: Option<PathBuf>,
    pub repository: Option<String>,
    pub pr: Option<u64>,
    pub api_url: String,
}

impl Default for GitHubSettings {
    fn default() -> Self {
        Self {
            token: None,
            app_id: None,
            app_installation_id: None,
            app_private_key: None,
            app_private_key_path: None,
            repository: None,
            pr: None,
            api_url: DEFAULT_GITHUB_API_URL.to_string(),
        }
    }
}

impl std::fmt::Debug for GitHubSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let redact = |secret: &Option<String>| secret.as_ref().map(|_| "***");
        f.debug_struct("GitHubSettings")
            .field("token", &redact(&self.token))
            .field("app_id", &self.app_id)
            .field("app_installation_id", &self.app_installation_id)
            .field("app_private_key", &redact(&self.app_private_key))
            .field("app_private_key_path", &self.app_private_key_path)
            .field("repository", &self.repository)
            .field("pr", &self.pr)
            .field("api_url", &self.api_url)
            .finish()
    }
}

/// Fully resolved settings for one invocation.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub config_files: Vec<PathBuf>,
    pub mode: RunMode,
    pub dsn: String,
    pub environment: String,
    pub github: GitHubSettings,
    pub slack_webhook: Option<String>,
    pub timeout: Option<Duration>,
    pub connect_timeout: Duration,
}

impl RunConfig {
    pub fn from_args(args: CommonArgs, mode: RunMode) -> Result<Self> {
        let dsn = resolve_dsn(args.dsn, std::env::var("DATABASE_URL").ok())?;
        let pr = args.github_pr.or_else(|| {
            std::env::var("GITHUB_REF")
                .ok()
                .and_then(|r| extract_pr_number(&r))
        });

        Ok(Self {
            config_files: args.config,
            mode,
            dsn,
            environment: args.environment.unwrap_or_default(),
            github: GitHubSettings {
                token: non_empty(args.github_token),
                app_id: non_empty(args.github_app_id)
                    .or_else(|| non_empty(std::env::var("GITHUB_CLIENT_ID").ok())),
                app_installation_id: args.github_app_installation_id,
                app_private_key: non_empty(args.github_app_private_key),
                app_private_key_path: args.github_app_private_key_path,
                repository: non_empty(args.github_repo),
                pr,
                api_url: args.github_api_url,
            },
            slack_webhook: non_empty(args.slack_webhook),
            timeout: args.timeout.map(Duration::from_secs),
            connect_timeout: Duration::from_secs(args.connect_timeout),
        })
    }
}

/// The explicit DSN wins; `DATABASE_URL` is the fallback.
fn resolve_dsn(dsn: Option<String>, fallback: Option<String>) -> Result<String> {
    match non_empty(dsn).or_else(|| non_empty(fallback)) {
        Some(dsn) => Ok(dsn),
        None => bail!("DATABASE_DSN environment variable is required"),
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
