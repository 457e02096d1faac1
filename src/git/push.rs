//! Push a local branch to a remote.
//!
//! Pushes use a `<branch>:<branch>` refspec so the remote branch name always
//! matches the local one, independent of any upstream configuration.

use std::path::Path;

use crate::types::Sha;

use super::{GitError, GitResult, git_command, rev_parse};

/// Result of a push operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushResult {
    /// Push succeeded.
    Success {
        /// The SHA that was pushed.
        pushed_sha: Sha,
    },

    /// Push was rejected (non-fast-forward, protected branch, hook).
    Rejected {
        /// Details about why the push was rejected.
        details: String,
    },

    /// The remote branch already pointed at this commit.
    AlreadyUpToDate,
}

impl PushResult {
    /// Returns true if the remote branch now matches the local branch.
    pub fn is_pushed(&self) -> bool {
        matches!(
            self,
            PushResult::Success { .. } | PushResult::AlreadyUpToDate
        )
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, PushResult::Rejected { .. })
    }
}

/// Pushes local `branch` to `remote` under the same name.
pub fn push_branch(
    workdir: &Path,
    remote: &str,
    branch: &str,
    force: bool,
) -> GitResult<PushResult> {
    let refspec = format!("{branch}:{branch}");
    let local_ref = format!("refs/heads/{branch}");
    let branch_sha = rev_parse(workdir, &local_ref)?;

    let mut args = vec!["push"];
    if force {
        args.push("--force");
    }
    args.push(remote);
    args.push(&refspec);

    let output = git_command(workdir).args(&args).output()?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);

    if output.status.success() {
        if stdout.contains("Everything up-to-date") || stderr.contains("Everything up-to-date") {
            return Ok(PushResult::AlreadyUpToDate);
        }
        return Ok(PushResult::Success {
            pushed_sha: branch_sha,
        });
    }

    if stderr.contains("non-fast-forward")
        || stderr.contains("rejected")
        || stderr.contains("failed to push")
    {
        return Ok(PushResult::Rejected {
            details: stderr.to_string(),
        });
    }

    Err(GitError::CommandFailed {
        command: format!("git {}", args.join(" ")),
        stderr: stderr.to_string(),
    })
}
