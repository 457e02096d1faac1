//! Merge a source ref into the current branch.
//!
//! Merges always use `--no-ff` so the materialized branch carries an explicit
//! merge commit even when the source is a descendant of the base. A conflicted
//! merge is aborted before returning, so callers never see a repository with
//! unmerged paths.

use std::path::Path;

use tracing::warn;

use crate::types::Sha;

use super::{
    CommitIdentity, GitError, GitResult, git_commit_command, rev_parse, run_git_stdout,
    run_git_sync,
};

/// Result of a merge operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeResult {
    /// Merge completed, producing a new commit.
    Success {
        /// The SHA of the merge commit.
        commit_sha: Sha,
    },

    /// The source was already contained in HEAD; nothing changed.
    AlreadyUpToDate,

    /// Merge conflicted and has been aborted.
    Conflict {
        /// Files that had conflicts.
        conflicting_files: Vec<String>,
    },
}

impl MergeResult {
    /// Returns true if the merge completed without conflict.
    pub fn is_ok(&self) -> bool {
        matches!(
            self,
            MergeResult::Success { .. } | MergeResult::AlreadyUpToDate
        )
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, MergeResult::Conflict { .. })
    }
}

/// Merges `source_ref` into HEAD with `--no-ff`.
///
/// With `message` the merge commit uses it; otherwise git's default merge
/// message is used (`--no-edit`).
pub fn merge_no_ff(
    workdir: &Path,
    source_ref: &str,
    message: Option<&str>,
    identity: &CommitIdentity,
) -> GitResult<MergeResult> {
    let mut args = vec!["merge", "--no-ff"];
    match message {
        Some(message) => {
            args.push("-m");
            args.push(message);
        }
        None => args.push("--no-edit"),
    }
    args.push(source_ref);

    let output = git_commit_command(workdir, identity)
        .args(&args)
        .output()?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);

    if output.status.success() {
        if stdout.contains("Already up to date") {
            return Ok(MergeResult::AlreadyUpToDate);
        }
        let commit_sha = rev_parse(workdir, "HEAD")?;
        return Ok(MergeResult::Success { commit_sha });
    }

    // git reports conflicts on stdout
    let combined = format!("{stdout}{stderr}");
    if combined.contains("CONFLICT") || combined.contains("Automatic merge failed") {
        let conflicting_files = get_conflicting_files(workdir)?;
        abort_merge(workdir);
        return Ok(MergeResult::Conflict { conflicting_files });
    }

    // Not a conflict, but the merge may still have started.
    abort_merge(workdir);
    Err(GitError::CommandFailed {
        command: format!("git {}", args.join(" ")),
        stderr: stderr.to_string(),
    })
}

/// Runs `git merge --abort`, logging instead of failing if there is nothing
/// to abort.
fn abort_merge(workdir: &Path) {
    if let Err(e) = run_git_sync(workdir, &["merge", "--abort"]) {
        warn!(error = %e, "merge --abort failed");
    }
}

/// Get the list of files with merge conflicts.
fn get_conflicting_files(workdir: &Path) -> GitResult<Vec<String>> {
    let output = run_git_stdout(workdir, &["diff", "--name-only", "--diff-filter=U"])?;
    Ok(output.lines().map(str::to_string).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{TestRepo, commit_file, test_identity};

    #[test]
    fn merge_creates_merge_commit() {
        let repo = TestRepo::new();
        let feature = repo.push_feature("feature-1", "feature.txt", "data\n");

        let result = merge_no_ff(&repo.work, "feature-1", None, &test_identity()).unwrap();
        let MergeResult::Success { commit_sha } = result else {
            panic!("expected merge commit, got {result:?}");
        };
        assert_ne!(commit_sha, feature);

        // --no-ff keeps two parents even though main could fast-forward
        let parents =
            run_git_stdout(&repo.work, &["rev-list", "--parents", "-n", "1", "HEAD"]).unwrap();
        assert_eq!(parents.split_whitespace().count(), 3);
        assert!(repo.work.join("feature.txt").exists());
    }

    #[test]
    fn merge_uses_explicit_message() {
        let repo = TestRepo::new();
        repo.push_feature("feature-1", "feature.txt", "data\n");

        merge_no_ff(
            &repo.work,
            "feature-1",
            Some("Post-merge state for PR #1: Feature"),
            &test_identity(),
        )
        .unwrap();

        let subject = run_git_stdout(&repo.work, &["log", "-1", "--format=%s"]).unwrap();
        assert_eq!(subject, "Post-merge state for PR #1: Feature");
    }

    #[test]
    fn merging_ancestor_is_up_to_date() {
        let repo = TestRepo::new();
        run_git_sync(&repo.work, &["branch", "old"]).unwrap();
        commit_file(&repo.work, "next.txt", "next\n", "next");

        let result = merge_no_ff(&repo.work, "old", None, &test_identity()).unwrap();
        assert_eq!(result, MergeResult::AlreadyUpToDate);
        assert!(result.is_ok());
    }

    #[test]
    fn conflict_is_aborted_and_reported() {
        let repo = TestRepo::new();
        repo.push_feature("feature-1", "README.md", "feature version\n");
        let before = commit_file(&repo.work, "README.md", "main version\n", "main edit");

        let result = merge_no_ff(&repo.work, "feature-1", None, &test_identity()).unwrap();
        assert!(result.is_conflict());
        assert_eq!(
            result,
            MergeResult::Conflict {
                conflicting_files: vec!["README.md".to_string()]
            }
        );

        assert_eq!(repo.head(), before);
        assert_eq!(repo.status(), "");
        assert!(!repo.work.join(".git/MERGE_HEAD").exists());
    }

    #[test]
    fn unknown_source_is_error() {
        let repo = TestRepo::new();
        let before = repo.head();
        let err = merge_no_ff(&repo.work, "no-such-ref", None, &test_identity()).unwrap_err();
        assert!(matches!(err, GitError::CommandFailed { .. }));
        assert_eq!(repo.head(), before);
    }
}
