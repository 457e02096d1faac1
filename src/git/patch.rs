//! Apply a patch onto the current branch and commit it.
//!
//! Mailbox-formatted patches (`git format-patch` output) go through `git am`,
//! which keeps their author and message. Anything `am` rejects is retried
//! with `git apply --index` and committed explicitly. Either way the result
//! is one new commit on HEAD or no change at all.

use std::io::Write;
use std::path::Path;

use tempfile::NamedTempFile;
use tracing::{debug, warn};

use super::{CommitIdentity, GitError, GitResult, check_output, git_command, git_commit_command};

/// Commit message used when a plain diff is applied without one.
pub const DEFAULT_PATCH_MESSAGE: &str = "Apply patch";

/// How a patch ended up applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchMethod {
    /// `git am` accepted the mailbox.
    Mailbox,
    /// `git apply --index` plus an explicit commit.
    Apply,
}

/// Applies `patch` to HEAD and commits it.
///
/// The patch is staged in a temporary file that is removed on return. If
/// both strategies fail, any in-progress `am` session is aborted and
/// [`GitError::PatchRejected`] carries both error outputs.
pub fn apply_patch(
    workdir: &Path,
    patch: &[u8],
    message: Option<&str>,
    identity: &CommitIdentity,
) -> GitResult<PatchMethod> {
    let mut file = NamedTempFile::new()?;
    file.write_all(patch)?;
    file.flush()?;
    let patch_path = file.path().to_string_lossy().to_string();

    let am = git_commit_command(workdir, identity)
        .args(["am", &patch_path])
        .output()?;
    if am.status.success() {
        return Ok(PatchMethod::Mailbox);
    }
    let am_stderr = String::from_utf8_lossy(&am.stderr).to_string();
    debug!(stderr = %am_stderr.trim(), "git am failed, falling back to git apply");
    abort_am(workdir);

    let apply_args = ["apply", "--index", patch_path.as_str()];
    let applied = git_command(workdir).args(apply_args).output()?;
    if let Err(e) = check_output(&apply_args, applied) {
        abort_am(workdir);
        let apply_stderr = match e {
            GitError::CommandFailed { stderr, .. } => stderr,
            other => other.to_string(),
        };
        return Err(GitError::PatchRejected {
            am_stderr,
            apply_stderr,
        });
    }

    let message = message.unwrap_or(DEFAULT_PATCH_MESSAGE);
    let commit_args = ["commit", "-m", message];
    let committed = git_commit_command(workdir, identity)
        .args(commit_args)
        .output()?;
    if let Err(e) = check_output(&commit_args, committed) {
        // Leave the index as it was before the patch.
        if let Err(reset) = super::run_git_sync(workdir, &["reset", "--hard", "HEAD"]) {
            warn!(error = %reset, "failed to reset after commit failure");
        }
        return Err(e);
    }

    Ok(PatchMethod::Apply)
}

/// Aborts a `git am` session. Fails quietly when none is in progress.
fn abort_am(workdir: &Path) {
    if let Err(e) = super::run_git_sync(workdir, &["am", "--abort"]) {
        debug!(error = %e, "git am --abort had nothing to abort");
    }
}
