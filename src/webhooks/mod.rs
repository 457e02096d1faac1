//! Webhook ingestion for GitHub and GitLab.
//!
//! This module provides:
//! - Authenticity checks (GitHub HMAC-SHA256, GitLab shared token)
//! - Payload parsing into a provider-tagged [`ProviderEvent`]
//! - Normalization into canonical merge event drafts, with branch filtering

pub mod events;
pub mod normalize;
pub mod parser;
pub mod signature;

pub use events::{GitHubPullRequestEvent, GitLabMergeRequestEvent, ProviderEvent, PushEvent};
pub use normalize::{IgnoreReason, NormalizeError, Normalized, Normalizer};
pub use parser::{ParseError, parse_github, parse_gitlab};
pub use signature::{
    compute_signature, format_signature_header, parse_signature_header, sign_payload,
    verify_signature, verify_token,
};
