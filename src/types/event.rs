//! Canonical merge event types.
//!
//! Every provider payload is normalized into a [`MergeEventDraft`] at the
//! ingestion boundary. Validation turns a draft into a [`MergeEvent`], and
//! enrichment turns that into the [`EnrichedEvent`] sent to workflow targets.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::branch::{BranchType, RiskLevel};
use super::ids::{EventId, PrNumber, Sha};

/// Source-control provider that delivered the webhook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    GitHub,
    GitLab,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::GitHub => "github",
            Provider::GitLab => "gitlab",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A merge (or direct push) that landed on a branch, independent of provider.
///
/// Only constructed through [`MergeEventDraft::validate`], so the required
/// fields are always present and `commit_sha` is never empty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeEvent {
    pub provider: Provider,
    /// Repository identifier (`owner/name` or a GitLab namespace path).
    pub repository: String,
    /// Branch the change landed on.
    pub branch: String,
    /// PR/MR number, or `0` for a direct push.
    pub pr_number: PrNumber,
    pub pr_title: String,
    pub pr_description: Option<String>,
    pub author: String,
    pub commit_sha: Sha,
    pub merged_at: DateTime<Utc>,
    pub base_branch: String,
    pub head_branch: String,
    pub files_changed: Vec<String>,
    pub additions: u64,
    pub deletions: u64,
    pub changed_files_count: u64,
}

impl MergeEvent {
    /// Computes the deterministic event ID for this event.
    pub fn event_id(&self) -> EventId {
        let raw = format!(
            "{}_{}_{}_{}",
            self.provider,
            self.repository,
            self.pr_number.0,
            self.commit_sha.prefix(8)
        );
        EventId(raw.replace('/', "_"))
    }
}

/// A required field was missing from a normalized event.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("missing required field: {0}")]
    MissingField(&'static str),
}

/// Output of normalization, before required-field validation.
///
/// The required fields are optional here because provider payloads are
/// semi-structured and any of them may be absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeEventDraft {
    pub provider: Option<Provider>,
    pub repository: Option<String>,
    pub branch: Option<String>,
    pub pr_number: Option<PrNumber>,
    pub pr_title: String,
    pub pr_description: Option<String>,
    pub author: String,
    pub commit_sha: Option<Sha>,
    pub merged_at: Option<DateTime<Utc>>,
    pub base_branch: String,
    pub head_branch: String,
    pub files_changed: Vec<String>,
    pub additions: u64,
    pub deletions: u64,
    pub changed_files_count: u64,
}

impl MergeEventDraft {
    /// Checks the required fields and builds the canonical event.
    ///
    /// Fields are checked in the order `provider, repository, branch,
    /// pr_number, commit_sha, merged_at`; the first missing one is reported.
    /// Empty strings count as missing.
    pub fn validate(self) -> Result<MergeEvent, ValidationError> {
        let provider = self.provider.ok_or(ValidationError::MissingField("provider"))?;
        let repository =
            non_empty(self.repository).ok_or(ValidationError::MissingField("repository"))?;
        let branch = non_empty(self.branch).ok_or(ValidationError::MissingField("branch"))?;
        let pr_number = self.pr_number.ok_or(ValidationError::MissingField("pr_number"))?;
        let commit_sha = self
            .commit_sha
            .filter(|sha| !sha.is_empty())
            .ok_or(ValidationError::MissingField("commit_sha"))?;
        let merged_at = self.merged_at.ok_or(ValidationError::MissingField("merged_at"))?;

        Ok(MergeEvent {
            provider,
            repository,
            branch,
            pr_number,
            pr_title: self.pr_title,
            pr_description: self.pr_description,
            author: self.author,
            commit_sha,
            merged_at,
            base_branch: self.base_branch,
            head_branch: self.head_branch,
            files_changed: self.files_changed,
            additions: self.additions,
            deletions: self.deletions,
            changed_files_count: self.changed_files_count,
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.is_empty())
}

/// The payload forwarded to workflow targets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnrichedEvent {
    /// Always `"pr_merge"`; downstream workflow servers key on it.
    pub event_type: String,
    #[serde(flatten)]
    pub event: MergeEvent,
    pub processed_at: DateTime<Utc>,
    pub event_id: EventId,
    pub branch_type: BranchType,
    pub risk_level: RiskLevel,
}

impl EnrichedEvent {
    pub const EVENT_TYPE: &'static str = "pr_merge";
}
