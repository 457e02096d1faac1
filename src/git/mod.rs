//! Local git operations for post-merge branch materialization.
//!
//! This module wraps the git CLI:
//! - Remote resolution (create or re-point a remote)
//! - Merge operations (`merge --no-ff` with abort on conflict)
//! - Patch application (`git am`, falling back to `git apply --index`)
//! - Push operations (`<branch>:<branch>` refspecs, optionally forced)
//!
//! Every command runs with system and global git configuration disabled, so
//! behavior does not depend on the host. Commits take their identity from a
//! [`CommitIdentity`] passed per command.

pub mod merge;
pub mod patch;
pub mod push;
pub mod remote;

use std::path::Path;
use std::process::Output;

use thiserror::Error;

use crate::types::Sha;

pub use merge::{MergeResult, merge_no_ff};
pub use patch::{PatchMethod, apply_patch};
pub use push::{PushResult, push_branch};
pub use remote::{RemoteAction, ensure_remote};

/// Errors from git operations.
#[derive(Debug, Error)]
pub enum GitError {
    /// Git command failed.
    #[error("git command failed: {command}\nstderr: {stderr}")]
    CommandFailed { command: String, stderr: String },

    /// The named remote does not exist and no URL was given to create it.
    #[error("remote '{remote}' not found and no URL provided to create it")]
    RemoteNotFound { remote: String },

    /// Neither `git am` nor `git apply` could apply the patch.
    #[error("patch could not be applied\nam: {am_stderr}\napply: {apply_stderr}")]
    PatchRejected {
        am_stderr: String,
        apply_stderr: String,
    },

    /// IO error (spawning git, writing the patch file).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for git operations.
pub type GitResult<T> = Result<T, GitError>;

/// Identity used for creating commits.
///
/// Passed via `-c` flags so commits work without any user or repository
/// git configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitIdentity {
    /// The committer/author name (git `user.name`).
    pub name: String,

    /// The committer/author email (git `user.email`).
    pub email: String,
}

impl Default for CommitIdentity {
    fn default() -> Self {
        CommitIdentity {
            name: "merge-relay".to_string(),
            email: "merge-relay@localhost".to_string(),
        }
    }
}

/// Create a git Command with clean environment (no system/user config).
pub(crate) fn git_command(workdir: &Path) -> std::process::Command {
    use std::process::Command;

    let mut cmd = Command::new("git");
    cmd.current_dir(workdir);

    cmd.env("GIT_CONFIG_NOSYSTEM", "1");
    cmd.env("GIT_CONFIG_GLOBAL", "/dev/null");
    cmd.env("GIT_TERMINAL_PROMPT", "0");

    cmd
}

/// Create a git Command configured for operations that write commits.
///
/// Prepends `-c user.name=<name> -c user.email=<email>` to [`git_command`].
pub(crate) fn git_commit_command(
    workdir: &Path,
    identity: &CommitIdentity,
) -> std::process::Command {
    let mut cmd = git_command(workdir);
    cmd.arg("-c");
    cmd.arg(format!("user.name={}", identity.name));
    cmd.arg("-c");
    cmd.arg(format!("user.email={}", identity.email));
    cmd
}

/// Turns a finished command into `Ok(output)` or [`GitError::CommandFailed`].
pub(crate) fn check_output(args: &[&str], output: Output) -> GitResult<Output> {
    if output.status.success() {
        Ok(output)
    } else {
        Err(GitError::CommandFailed {
            command: format!("git {}", args.join(" ")),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}

/// Run a git command in the given working directory.
///
/// Returns the command output on success, or a GitError on failure.
pub fn run_git_sync(workdir: &Path, args: &[&str]) -> GitResult<Output> {
    let output = git_command(workdir).args(args).output()?;
    check_output(args, output)
}

/// Run a git command and return stdout as a string.
pub fn run_git_stdout(workdir: &Path, args: &[&str]) -> GitResult<String> {
    let output = run_git_sync(workdir, args)?;
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Get the SHA of a revision.
pub fn rev_parse(workdir: &Path, rev: &str) -> GitResult<Sha> {
    run_git_stdout(workdir, &["rev-parse", "--verify", rev]).map(Sha::new)
}

/// Returns true if a local branch with this name exists.
pub fn branch_exists(workdir: &Path, branch: &str) -> GitResult<bool> {
    ref_exists(workdir, &format!("refs/heads/{branch}"))
}

/// Returns true if `<remote>/<branch>` is known locally (as of the last fetch).
pub fn remote_branch_exists(workdir: &Path, remote: &str, branch: &str) -> GitResult<bool> {
    ref_exists(workdir, &format!("refs/remotes/{remote}/{branch}"))
}

fn ref_exists(workdir: &Path, refname: &str) -> GitResult<bool> {
    let output = git_command(workdir)
        .args(["show-ref", "--verify", "--quiet", refname])
        .output()?;

    // Exit 0 = exists, exit 1 = missing, other = error
    match output.status.code() {
        Some(0) => Ok(true),
        Some(1) => Ok(false),
        _ => Err(GitError::CommandFailed {
            command: format!("git show-ref --verify --quiet {refname}"),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        }),
    }
}

/// Fetch a ref from a remote.
pub fn fetch(workdir: &Path, remote: &str, refspec: &str) -> GitResult<()> {
    run_git_sync(workdir, &["fetch", remote, "--", refspec])?;
    Ok(())
}

/// Fetch all remotes.
pub fn fetch_all(workdir: &Path) -> GitResult<()> {
    run_git_sync(workdir, &["fetch", "--all"])?;
    Ok(())
}
