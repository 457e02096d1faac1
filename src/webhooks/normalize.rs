//! Normalization of provider events into canonical merge event drafts.
//!
//! This is the only place that knows how each provider expresses "a change
//! landed on a branch". Everything downstream works on [`MergeEventDraft`]
//! and [`MergeEvent`](crate::types::MergeEvent).

use std::fmt;

use chrono::{DateTime, NaiveDateTime, Utc};
use thiserror::Error;

use crate::types::{BranchSets, MergeEventDraft, PrNumber, Provider, Sha};

use super::events::{GitHubPullRequestEvent, GitLabMergeRequestEvent, ProviderEvent, PushEvent};

/// Format GitLab uses for timestamps in older webhook payloads.
const GITLAB_LEGACY_TIMESTAMP: &str = "%Y-%m-%d %H:%M:%S UTC";

/// Error type for normalization failures.
#[derive(Debug, Error)]
pub enum NormalizeError {
    /// A timestamp field was present but could not be parsed.
    #[error("invalid timestamp in {field}: {value:?}")]
    InvalidTimestamp { field: &'static str, value: String },
}

/// Why an event was not turned into a merge event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IgnoreReason {
    /// The event type header named an event merge-relay does not handle.
    UnsupportedEvent { event_type: String },
    /// A merge-request event whose action is not a completed merge.
    NotMerged { action: String },
    /// The target branch is in neither the main nor the staging set.
    IneligibleBranch { branch: String },
}

impl fmt::Display for IgnoreReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IgnoreReason::UnsupportedEvent { event_type } => {
                write!(f, "unsupported event type {event_type:?}")
            }
            IgnoreReason::NotMerged { action } => write!(f, "not a merge (action {action:?})"),
            IgnoreReason::IneligibleBranch { branch } => {
                write!(f, "branch {branch:?} is not a target branch")
            }
        }
    }
}

/// Outcome of normalizing a provider event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Normalized {
    Accepted(MergeEventDraft),
    Ignored(IgnoreReason),
}

/// Maps provider events to merge event drafts and applies the branch filter.
#[derive(Debug, Clone, Default)]
pub struct Normalizer {
    branches: BranchSets,
}

impl Normalizer {
    pub fn new(branches: BranchSets) -> Self {
        Normalizer { branches }
    }

    pub fn branches(&self) -> &BranchSets {
        &self.branches
    }

    /// Normalizes an event, stamping push events with the current time.
    pub fn normalize(&self, event: ProviderEvent) -> Result<Normalized, NormalizeError> {
        self.normalize_at(event, Utc::now())
    }

    /// Normalizes an event using `now` as the merge time of push events.
    ///
    /// A missing or empty branch is not filtered here; it is left for
    /// required-field validation to reject.
    pub fn normalize_at(
        &self,
        event: ProviderEvent,
        now: DateTime<Utc>,
    ) -> Result<Normalized, NormalizeError> {
        match event {
            ProviderEvent::GitHubPullRequest(pr) => {
                if !pr.is_merge() {
                    return Ok(Normalized::Ignored(IgnoreReason::NotMerged {
                        action: pr.action,
                    }));
                }
                if let Some(reason) = self.branch_filter(pr.base_ref.as_deref()) {
                    return Ok(Normalized::Ignored(reason));
                }
                github_pull_request(pr).map(Normalized::Accepted)
            }
            ProviderEvent::GitLabMergeRequest(mr) => {
                if !mr.is_merge() {
                    return Ok(Normalized::Ignored(IgnoreReason::NotMerged {
                        action: mr.action.unwrap_or_default(),
                    }));
                }
                if let Some(reason) = self.branch_filter(mr.target_branch.as_deref()) {
                    return Ok(Normalized::Ignored(reason));
                }
                gitlab_merge_request(mr).map(Normalized::Accepted)
            }
            ProviderEvent::GitHubPush(push) => Ok(self.push(Provider::GitHub, push, now)),
            ProviderEvent::GitLabPush(push) => Ok(self.push(Provider::GitLab, push, now)),
        }
    }

    fn branch_filter(&self, branch: Option<&str>) -> Option<IgnoreReason> {
        match branch {
            Some(b) if !b.is_empty() && !self.branches.is_eligible(b) => {
                Some(IgnoreReason::IneligibleBranch {
                    branch: b.to_string(),
                })
            }
            _ => None,
        }
    }

    fn push(&self, provider: Provider, push: PushEvent, now: DateTime<Utc>) -> Normalized {
        let branch = push.branch().to_string();
        if let Some(reason) = self.branch_filter(Some(&branch)) {
            return Normalized::Ignored(reason);
        }

        Normalized::Accepted(MergeEventDraft {
            provider: Some(provider),
            repository: push.repository,
            pr_number: Some(PrNumber::DIRECT_PUSH),
            pr_title: format!("Direct push to {branch}"),
            pr_description: None,
            author: push.pusher.unwrap_or_default(),
            commit_sha: push.head_sha.map(Sha::new),
            merged_at: Some(now),
            base_branch: branch.clone(),
            head_branch: branch.clone(),
            branch: Some(branch),
            ..Default::default()
        })
    }
}

fn github_pull_request(pr: GitHubPullRequestEvent) -> Result<MergeEventDraft, NormalizeError> {
    let merged_at = parse_timestamp("merged_at", pr.merged_at.as_deref())?;
    let base = pr.base_ref.unwrap_or_default();

    Ok(MergeEventDraft {
        provider: Some(Provider::GitHub),
        repository: pr.repository,
        branch: Some(base.clone()),
        pr_number: pr.number.map(PrNumber),
        pr_title: pr.title.unwrap_or_default(),
        pr_description: pr.body,
        author: pr.author.unwrap_or_default(),
        commit_sha: pr.merge_commit_sha.map(Sha::new),
        merged_at,
        base_branch: base,
        head_branch: pr.head_ref.unwrap_or_default(),
        files_changed: Vec::new(),
        additions: pr.additions,
        deletions: pr.deletions,
        changed_files_count: pr.changed_files,
    })
}

fn gitlab_merge_request(mr: GitLabMergeRequestEvent) -> Result<MergeEventDraft, NormalizeError> {
    let merged_at = parse_timestamp("updated_at", mr.updated_at.as_deref())?;
    let target = mr.target_branch.unwrap_or_default();

    Ok(MergeEventDraft {
        provider: Some(Provider::GitLab),
        repository: mr.repository,
        branch: Some(target.clone()),
        pr_number: mr.iid.map(PrNumber),
        pr_title: mr.title.unwrap_or_default(),
        pr_description: mr.description,
        author: mr.author.unwrap_or_default(),
        commit_sha: mr.merge_commit_sha.map(Sha::new),
        merged_at,
        base_branch: target,
        head_branch: mr.source_branch.unwrap_or_default(),
        ..Default::default()
    })
}

/// Parses an optional provider timestamp.
///
/// `None` and the empty string mean absent. Anything else must parse as
/// RFC 3339 or as GitLab's legacy `YYYY-MM-DD HH:MM:SS UTC` form.
fn parse_timestamp(
    field: &'static str,
    value: Option<&str>,
) -> Result<Option<DateTime<Utc>>, NormalizeError> {
    let Some(value) = value.filter(|v| !v.is_empty()) else {
        return Ok(None);
    };

    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Ok(Some(ts.with_timezone(&Utc)));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(value, GITLAB_LEGACY_TIMESTAMP) {
        return Ok(Some(naive.and_utc()));
    }

    Err(NormalizeError::InvalidTimestamp {
        field,
        value: value.to_string(),
    })
}
