//! Provider webhook event types.
//!
//! Each variant of [`ProviderEvent`] carries the fields merge-relay needs from
//! one provider payload shape. Fields stay optional here; the normalizer
//! decides what is required.
//!
//! # Event Types
//!
//! | Provider | Header value | Variant |
//! |----------|--------------|---------|
//! | GitHub | `pull_request` | [`ProviderEvent::GitHubPullRequest`] |
//! | GitHub | `push` | [`ProviderEvent::GitHubPush`] |
//! | GitLab | `Merge Request Hook` | [`ProviderEvent::GitLabMergeRequest`] |
//! | GitLab | `Push Hook` | [`ProviderEvent::GitLabPush`] |

use crate::types::Provider;

/// A parsed provider webhook event.
///
/// Unknown event types are represented by the parser returning `None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderEvent {
    GitHubPullRequest(GitHubPullRequestEvent),
    GitHubPush(PushEvent),
    GitLabMergeRequest(GitLabMergeRequestEvent),
    GitLabPush(PushEvent),
}

impl ProviderEvent {
    /// Returns the provider that sent this event.
    pub fn provider(&self) -> Provider {
        match self {
            ProviderEvent::GitHubPullRequest(_) | ProviderEvent::GitHubPush(_) => Provider::GitHub,
            ProviderEvent::GitLabMergeRequest(_) | ProviderEvent::GitLabPush(_) => Provider::GitLab,
        }
    }

    /// Returns the repository identifier, if the payload carried one.
    pub fn repository(&self) -> Option<&str> {
        match self {
            ProviderEvent::GitHubPullRequest(e) => e.repository.as_deref(),
            ProviderEvent::GitLabMergeRequest(e) => e.repository.as_deref(),
            ProviderEvent::GitHubPush(e) | ProviderEvent::GitLabPush(e) => e.repository.as_deref(),
        }
    }
}

/// A GitHub `pull_request` event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GitHubPullRequestEvent {
    /// The action that triggered the event (`opened`, `closed`, ...).
    pub action: String,
    /// `pull_request.merged`; only meaningful for `closed`.
    pub merged: bool,
    /// `repository.full_name`.
    pub repository: Option<String>,
    pub number: Option<u64>,
    pub title: Option<String>,
    pub body: Option<String>,
    /// `pull_request.user.login`.
    pub author: Option<String>,
    pub merge_commit_sha: Option<String>,
    /// Raw `merged_at` timestamp string.
    pub merged_at: Option<String>,
    /// `pull_request.base.ref`.
    pub base_ref: Option<String>,
    /// `pull_request.head.ref`.
    pub head_ref: Option<String>,
    pub additions: u64,
    pub deletions: u64,
    pub changed_files: u64,
}

impl GitHubPullRequestEvent {
    /// GitHub reports a merge as `closed` with `merged: true`.
    pub fn is_merge(&self) -> bool {
        self.action == "closed" && self.merged
    }
}

/// A GitLab `Merge Request Hook` event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GitLabMergeRequestEvent {
    /// `object_attributes.action` (`open`, `update`, `merge`, ...).
    pub action: Option<String>,
    /// `project.path_with_namespace`.
    pub repository: Option<String>,
    /// `object_attributes.iid`.
    pub iid: Option<u64>,
    pub title: Option<String>,
    pub description: Option<String>,
    /// `user.username`.
    pub author: Option<String>,
    pub merge_commit_sha: Option<String>,
    /// Raw `object_attributes.updated_at`, used as the merge time.
    pub updated_at: Option<String>,
    pub target_branch: Option<String>,
    pub source_branch: Option<String>,
}

impl GitLabMergeRequestEvent {
    pub fn is_merge(&self) -> bool {
        self.action.as_deref() == Some("merge")
    }
}

/// A push to a branch, from either provider.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PushEvent {
    pub repository: Option<String>,
    /// Full ref name, e.g. `refs/heads/main`.
    pub git_ref: String,
    /// GitHub `pusher.name` or GitLab `user_username`.
    pub pusher: Option<String>,
    /// GitHub `head_commit.id` or GitLab `checkout_sha`.
    pub head_sha: Option<String>,
}

impl PushEvent {
    /// The branch name with any `refs/heads/` prefix removed.
    pub fn branch(&self) -> &str {
        self.git_ref
            .strip_prefix("refs/heads/")
            .unwrap_or(&self.git_ref)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn github_merge_requires_closed_and_merged() {
        let mut event = GitHubPullRequestEvent {
            action: "closed".to_string(),
            merged: true,
            ..Default::default()
        };
        assert!(event.is_merge());

        event.merged = false;
        assert!(!event.is_merge());

        event.action = "opened".to_string();
        event.merged = true;
        assert!(!event.is_merge());
    }

    #[test]
    fn gitlab_merge_requires_merge_action() {
        let mut event = GitLabMergeRequestEvent {
            action: Some("merge".to_string()),
            ..Default::default()
        };
        assert!(event.is_merge());

        event.action = Some("close".to_string());
        assert!(!event.is_merge());

        event.action = None;
        assert!(!event.is_merge());
    }

    #[test]
    fn push_branch_strips_heads_prefix() {
        let push = PushEvent {
            git_ref: "refs/heads/release/1.2".to_string(),
            ..Default::default()
        };
        assert_eq!(push.branch(), "release/1.2");
    }

    #[test]
    fn push_branch_keeps_tag_refs() {
        let push = PushEvent {
            git_ref: "refs/tags/v1.0".to_string(),
            ..Default::default()
        };
        assert_eq!(push.branch(), "refs/tags/v1.0");
    }

    #[test]
    fn provider_follows_variant() {
        let gh = ProviderEvent::GitHubPush(PushEvent::default());
        let gl = ProviderEvent::GitLabPush(PushEvent::default());
        assert_eq!(gh.provider(), Provider::GitHub);
        assert_eq!(gl.provider(), Provider::GitLab);
    }

    #[test]
    fn repository_from_any_variant() {
        let pr = ProviderEvent::GitHubPullRequest(GitHubPullRequestEvent {
            repository: Some("octo/repo".to_string()),
            ..Default::default()
        });
        let push = ProviderEvent::GitLabPush(PushEvent {
            repository: Some("group/sub/project".to_string()),
            ..Default::default()
        });
        let sparse = ProviderEvent::GitLabMergeRequest(GitLabMergeRequestEvent::default());

        assert_eq!(pr.repository(), Some("octo/repo"));
        assert_eq!(push.repository(), Some("group/sub/project"));
        assert_eq!(sparse.repository(), None);
    }
}
