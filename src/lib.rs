//! merge-relay: receives GitHub and GitLab merge webhooks, forwards them to
//! workflow endpoints, and optionally materializes post-merge branches.
//!
//! The pipeline is: [`webhooks`] (authenticate, parse, normalize) ->
//! [`processor`] (validate, enrich, log) -> [`dispatch`] and
//! [`materialize`], which run independently of each other.

pub mod config;
pub mod dispatch;
pub mod git;
pub mod materialize;
pub mod processor;
pub mod server;
pub mod types;
pub mod webhooks;

#[cfg(test)]
pub(crate) mod test_utils;
