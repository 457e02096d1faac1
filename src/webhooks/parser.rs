//! Provider webhook payload parser.
//!
//! Parses raw webhook JSON into [`ProviderEvent`] values. The event type comes
//! from a header (`X-GitHub-Event` or `X-Gitlab-Event`); the body only decides
//! the field values.
//!
//! Unknown event types return `Ok(None)`. Payloads that are not JSON objects
//! of the expected shape return `Err`. Missing fields are not an error here:
//! every field is optional at this layer and required-field checks happen
//! after normalization.

use serde::Deserialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

use super::events::{GitHubPullRequestEvent, GitLabMergeRequestEvent, ProviderEvent, PushEvent};

/// Error type for webhook parsing failures.
#[derive(Debug, Error)]
pub enum ParseError {
    /// The body was not valid JSON, or a field had the wrong JSON type.
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Parses a GitHub webhook payload.
///
/// # Examples
///
/// ```
/// use merge_relay::webhooks::{ProviderEvent, parse_github};
///
/// let payload = br#"{
///     "action": "closed",
///     "pull_request": { "number": 7, "merged": true, "base": { "ref": "main" } },
///     "repository": { "full_name": "octo/app" }
/// }"#;
///
/// let event = parse_github("pull_request", payload).unwrap().unwrap();
/// assert!(matches!(event, ProviderEvent::GitHubPullRequest(ref pr) if pr.is_merge()));
///
/// assert!(parse_github("issues", b"{}").unwrap().is_none());
/// ```
pub fn parse_github(event_type: &str, payload: &[u8]) -> Result<Option<ProviderEvent>, ParseError> {
    match event_type {
        "pull_request" => {
            let raw: RawGitHubPullRequestPayload = decode(payload)?;
            Ok(Some(ProviderEvent::GitHubPullRequest(raw.into())))
        }
        "push" => {
            let raw: RawGitHubPushPayload = decode(payload)?;
            Ok(Some(ProviderEvent::GitHubPush(raw.into())))
        }
        _ => Ok(None),
    }
}

/// Parses a GitLab webhook payload.
///
/// GitLab event names are the `X-Gitlab-Event` header values, such as
/// `Merge Request Hook`.
pub fn parse_gitlab(event_type: &str, payload: &[u8]) -> Result<Option<ProviderEvent>, ParseError> {
    match event_type {
        "Merge Request Hook" => {
            let raw: RawGitLabMergeRequestPayload = decode(payload)?;
            Ok(Some(ProviderEvent::GitLabMergeRequest(raw.into())))
        }
        "Push Hook" => {
            let raw: RawGitLabPushPayload = decode(payload)?;
            Ok(Some(ProviderEvent::GitLabPush(raw.into())))
        }
        _ => Ok(None),
    }
}

fn decode<T: DeserializeOwned>(payload: &[u8]) -> Result<T, ParseError> {
    Ok(serde_json::from_slice(payload)?)
}

// ============================================================================
// Raw payload structures for deserialization
//
// These mirror the provider JSON. Everything is optional so that sparse or
// partial payloads still parse; unknown fields are ignored.
// ============================================================================

#[derive(Debug, Default, Deserialize)]
struct RawGitHubRepository {
    full_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawGitHubUser {
    login: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawRef {
    #[serde(rename = "ref")]
    git_ref: Option<String>,
}

// ============================================================================
// GitHub pull_request
// ============================================================================

#[derive(Debug, Deserialize)]
struct RawGitHubPullRequestPayload {
    action: Option<String>,
    pull_request: Option<RawGitHubPullRequest>,
    repository: Option<RawGitHubRepository>,
}

#[derive(Debug, Default, Deserialize)]
struct RawGitHubPullRequest {
    number: Option<u64>,
    merged: Option<bool>,
    title: Option<String>,
    body: Option<String>,
    user: Option<RawGitHubUser>,
    merge_commit_sha: Option<String>,
    merged_at: Option<String>,
    base: Option<RawRef>,
    head: Option<RawRef>,
    additions: Option<u64>,
    deletions: Option<u64>,
    changed_files: Option<u64>,
}

impl From<RawGitHubPullRequestPayload> for GitHubPullRequestEvent {
    fn from(raw: RawGitHubPullRequestPayload) -> Self {
        let pr = raw.pull_request.unwrap_or_default();
        GitHubPullRequestEvent {
            action: raw.action.unwrap_or_default(),
            merged: pr.merged.unwrap_or(false),
            repository: raw.repository.and_then(|r| r.full_name),
            number: pr.number,
            title: pr.title,
            body: pr.body,
            author: pr.user.and_then(|u| u.login),
            merge_commit_sha: pr.merge_commit_sha,
            merged_at: pr.merged_at,
            base_ref: pr.base.and_then(|r| r.git_ref),
            head_ref: pr.head.and_then(|r| r.git_ref),
            additions: pr.additions.unwrap_or(0),
            deletions: pr.deletions.unwrap_or(0),
            changed_files: pr.changed_files.unwrap_or(0),
        }
    }
}

// ============================================================================
// GitHub push
// ============================================================================

#[derive(Debug, Deserialize)]
struct RawGitHubPushPayload {
    #[serde(rename = "ref")]
    git_ref: Option<String>,
    repository: Option<RawGitHubRepository>,
    pusher: Option<RawGitHubPusher>,
    head_commit: Option<RawGitHubCommit>,
}

#[derive(Debug, Deserialize)]
struct RawGitHubPusher {
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawGitHubCommit {
    id: Option<String>,
}

impl From<RawGitHubPushPayload> for PushEvent {
    fn from(raw: RawGitHubPushPayload) -> Self {
        PushEvent {
            repository: raw.repository.and_then(|r| r.full_name),
            git_ref: raw.git_ref.unwrap_or_default(),
            pusher: raw.pusher.and_then(|p| p.name),
            head_sha: raw.head_commit.and_then(|c| c.id),
        }
    }
}

// ============================================================================
// GitLab Merge Request Hook
// ============================================================================

#[derive(Debug, Default, Deserialize)]
struct RawGitLabProject {
    path_with_namespace: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawGitLabMergeRequestPayload {
    object_attributes: Option<RawGitLabMergeRequest>,
    project: Option<RawGitLabProject>,
    user: Option<RawGitLabUser>,
}

#[derive(Debug, Deserialize)]
struct RawGitLabUser {
    username: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawGitLabMergeRequest {
    action: Option<String>,
    iid: Option<u64>,
    title: Option<String>,
    description: Option<String>,
    merge_commit_sha: Option<String>,
    updated_at: Option<String>,
    target_branch: Option<String>,
    source_branch: Option<String>,
}

impl From<RawGitLabMergeRequestPayload> for GitLabMergeRequestEvent {
    fn from(raw: RawGitLabMergeRequestPayload) -> Self {
        let mr = raw.object_attributes.unwrap_or_default();
        GitLabMergeRequestEvent {
            action: mr.action,
            repository: raw.project.and_then(|p| p.path_with_namespace),
            iid: mr.iid,
            title: mr.title,
            description: mr.description,
            author: raw.user.and_then(|u| u.username),
            merge_commit_sha: mr.merge_commit_sha,
            updated_at: mr.updated_at,
            target_branch: mr.target_branch,
            source_branch: mr.source_branch,
        }
    }
}

// ============================================================================
// GitLab Push Hook
// ============================================================================

#[derive(Debug, Deserialize)]
struct RawGitLabPushPayload {
    #[serde(rename = "ref")]
    git_ref: Option<String>,
    project: Option<RawGitLabProject>,
    user_username: Option<String>,
    checkout_sha: Option<String>,
}

impl From<RawGitLabPushPayload> for PushEvent {
    fn from(raw: RawGitLabPushPayload) -> Self {
        PushEvent {
            repository: raw.project.and_then(|p| p.path_with_namespace),
            git_ref: raw.git_ref.unwrap_or_default(),
            pusher: raw.user_username,
            head_sha: raw.checkout_sha,
        }
    }
}
