//! Startup configuration from environment variables.

use std::env::VarError;
use std::fmt;
use std::time::Duration;

use reqwest::Method;
use thiserror::Error;
use tracing::warn;

use crate::dispatch::{DEFAULT_TIMEOUT, WorkflowTarget};
use crate::git::CommitIdentity;
use crate::processor::MaterializeSettings;
use crate::types::BranchSets;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {var}: {message}")]
    InvalidValue { var: &'static str, message: String },

    #[error("branches configured as both main and staging: {}", .0.join(", "))]
    OverlappingBranches(Vec<String>),
}

/// Service configuration, read once at startup.
#[derive(Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub github_secret: Option<String>,
    pub gitlab_secret: Option<String>,
    pub branches: BranchSets,
    pub workflow_targets: Vec<WorkflowTarget>,
    /// `None` when post-merge branch creation is off.
    pub materialize: Option<MaterializeSettings>,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("github_secret", &self.github_secret.as_ref().map(|_| "<redacted>"))
            .field("gitlab_secret", &self.gitlab_secret.as_ref().map(|_| "<redacted>"))
            .field("branches", &self.branches)
            .field("workflow_targets", &self.workflow_targets)
            .field("materialize", &self.materialize)
            .finish()
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_reader(|key| std::env::var(key))
    }

    /// Loads configuration from a custom variable reader, so tests never
    /// touch the process environment.
    pub fn from_reader<F>(reader: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Result<String, VarError>,
    {
        let get = |key: &str| reader(key).ok().filter(|v| !v.trim().is_empty());

        let host = get("HOST").unwrap_or_else(|| "0.0.0.0".to_string());
        let port = match get("PORT") {
            Some(raw) => parse_number("PORT", &raw)?,
            None => 8000,
        };

        let branches = BranchSets {
            main: branch_list("MAIN_BRANCHES", get("MAIN_BRANCHES"), &["main", "master"])?,
            staging: branch_list(
                "STAGING_BRANCHES",
                get("STAGING_BRANCHES"),
                &["staging", "develop", "dev"],
            )?,
        };
        let overlap = branches.overlapping();
        if !overlap.is_empty() {
            return Err(ConfigError::OverlappingBranches(
                overlap.into_iter().map(String::from).collect(),
            ));
        }

        let method = match get("WORKFLOW_METHOD") {
            Some(raw) => Method::from_bytes(raw.trim().to_ascii_uppercase().as_bytes()).map_err(
                |e| ConfigError::InvalidValue {
                    var: "WORKFLOW_METHOD",
                    message: e.to_string(),
                },
            )?,
            None => Method::POST,
        };
        let timeout = match get("WORKFLOW_TIMEOUT") {
            Some(raw) => Duration::from_secs(parse_number::<u64>("WORKFLOW_TIMEOUT", &raw)?),
            None => DEFAULT_TIMEOUT,
        };
        let workflow_targets = get("WORKFLOW_WEBHOOK_URL")
            .map(|urls| {
                split_list(&urls)
                    .map(|url| {
                        WorkflowTarget::new(url)
                            .with_method(method.clone())
                            .with_timeout(timeout)
                    })
                    .collect()
            })
            .unwrap_or_default();

        let enabled = parse_flag(
            "AUTO_CREATE_POST_MERGE_BRANCH",
            get("AUTO_CREATE_POST_MERGE_BRANCH"),
        )?;
        let materialize = if enabled {
            match get("POST_MERGE_REPO_PATH") {
                Some(path) => Some(MaterializeSettings {
                    repository_path: path.into(),
                    remote_name: get("POST_MERGE_REMOTE_NAME")
                        .unwrap_or_else(|| "origin".to_string()),
                    remote_url: get("POST_MERGE_REMOTE_URL"),
                    branch_prefix: get("POST_MERGE_BRANCH_PREFIX")
                        .map(|p| p.trim_end_matches('/').to_string())
                        .unwrap_or_else(|| "post-merge".to_string()),
                    push_force: parse_flag("POST_MERGE_PUSH_FORCE", get("POST_MERGE_PUSH_FORCE"))?,
                    identity: CommitIdentity {
                        name: get("GIT_COMMITTER_NAME")
                            .unwrap_or_else(|| CommitIdentity::default().name),
                        email: get("GIT_COMMITTER_EMAIL")
                            .unwrap_or_else(|| CommitIdentity::default().email),
                    },
                }),
                None => {
                    warn!(
                        "AUTO_CREATE_POST_MERGE_BRANCH is set but POST_MERGE_REPO_PATH is not; \
                         post-merge branches are disabled"
                    );
                    None
                }
            }
        } else {
            None
        };

        Ok(Config {
            host,
            port,
            github_secret: get("GITHUB_WEBHOOK_SECRET"),
            gitlab_secret: get("GITLAB_WEBHOOK_SECRET"),
            branches,
            workflow_targets,
            materialize,
        })
    }

    /// `host:port` for the listener.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn split_list(raw: &str) -> impl Iterator<Item = &str> {
    raw.split(',').map(str::trim).filter(|s| !s.is_empty())
}

fn branch_list(
    var: &'static str,
    raw: Option<String>,
    default: &[&str],
) -> Result<Vec<String>, ConfigError> {
    let Some(raw) = raw else {
        return Ok(default.iter().map(|s| s.to_string()).collect());
    };
    let branches: Vec<String> = split_list(&raw).map(String::from).collect();
    if branches.is_empty() {
        return Err(ConfigError::InvalidValue {
            var,
            message: "no branch names given".to_string(),
        });
    }
    Ok(branches)
}

fn parse_number<T>(var: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: fmt::Display,
{
    raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
        var,
        message: e.to_string(),
    })
}

fn parse_flag(var: &'static str, raw: Option<String>) -> Result<bool, ConfigError> {
    let Some(raw) = raw else {
        return Ok(false);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        other => Err(ConfigError::InvalidValue {
            var,
            message: format!("expected a boolean, got {other:?}"),
        }),
    }
}
