//! Post-merge branch materialization.
//!
//! Builds a branch that shows what a base branch looks like with a change
//! applied, then pushes it. The change is either a ref to merge or a patch to
//! apply. The procedure is a small state machine:
//!
//! ```text
//! Start -> RemoteResolved -> BranchCreated -> ChangeApplied -> Pushed
//! ```
//!
//! A merge conflict or an unappliable patch is aborted before the error is
//! returned, so the repository is back at the freshly created branch with a
//! clean worktree. The operation is not transactional: a failure after
//! `BranchCreated` leaves that local branch in place, and the error names it.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::git::{
    self, CommitIdentity, GitError, MergeResult, PatchMethod, PushResult, RemoteAction,
    branch_exists, run_git_sync,
};

/// What to put on top of the base branch.
#[derive(Clone, PartialEq, Eq)]
pub enum ChangeSource {
    /// Merge this ref (branch, remote-tracking ref, or SHA) with `--no-ff`.
    Merge { source_ref: String },
    /// Apply this patch (mailbox or plain diff).
    Patch { bytes: Vec<u8> },
}

impl ChangeSource {
    /// Builds a change source from optional parts.
    ///
    /// Exactly one of `source_ref` and `patch` must be present and non-empty.
    pub fn from_parts(
        source_ref: Option<String>,
        patch: Option<Vec<u8>>,
    ) -> Result<Self, MaterializeError> {
        let source_ref = source_ref.filter(|s| !s.is_empty());
        let patch = patch.filter(|p| !p.is_empty());
        match (source_ref, patch) {
            (Some(source_ref), None) => Ok(ChangeSource::Merge { source_ref }),
            (None, Some(bytes)) => Ok(ChangeSource::Patch { bytes }),
            (None, None) => Err(MaterializeError::InvalidChange {
                reason: "either a source ref or a patch must be provided",
            }),
            (Some(_), Some(_)) => Err(MaterializeError::InvalidChange {
                reason: "a source ref and a patch cannot both be provided",
            }),
        }
    }
}

impl fmt::Debug for ChangeSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChangeSource::Merge { source_ref } => {
                f.debug_struct("Merge").field("source_ref", source_ref).finish()
            }
            ChangeSource::Patch { bytes } => f
                .debug_struct("Patch")
                .field("len", &bytes.len())
                .finish(),
        }
    }
}

/// Inputs for one materialization.
#[derive(Debug, Clone)]
pub struct MaterializeRequest {
    /// Local clone to operate in.
    pub repository_path: PathBuf,
    pub base_branch: String,
    pub new_branch: String,
    pub change: ChangeSource,
    pub remote_name: String,
    /// Used to create the remote, or to re-point it if it has other URLs.
    pub remote_url: Option<String>,
    pub push_force: bool,
    /// Merge or patch commit message. `None` uses git's default for merges
    /// and "Apply patch" for plain diffs.
    pub commit_message: Option<String>,
}

/// Outcome of a successful materialization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BranchPrepResult {
    pub repository_path: PathBuf,
    pub new_branch: String,
    pub remote_name: String,
    /// `{remote_name}/{new_branch}`.
    pub remote_ref: String,
    pub pushed: bool,
}

/// How the change was applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Merged,
    /// The source was already contained in the base.
    AlreadyUpToDate,
    Patched(PatchMethod),
}

/// Progress of a materialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Start,
    RemoteResolved,
    BranchCreated,
    ChangeApplied,
    Pushed,
}

/// Errors from materialization.
#[derive(Debug, Error)]
pub enum MaterializeError {
    /// The request was malformed; nothing in the repository was touched.
    #[error("invalid change source: {reason}")]
    InvalidChange { reason: &'static str },

    #[error("failed to resolve remote '{remote}': {source}")]
    Remote {
        remote: String,
        #[source]
        source: GitError,
    },

    #[error("failed to create branch '{branch}' from '{base}': {source}")]
    CreateBranch {
        branch: String,
        base: String,
        #[source]
        source: GitError,
    },

    /// The merge conflicted and was aborted.
    #[error(
        "merging '{source_ref}' into '{branch}' conflicted in {conflicting_files:?}; merge aborted"
    )]
    MergeConflict {
        branch: String,
        source_ref: String,
        conflicting_files: Vec<String>,
    },

    #[error("merging '{source_ref}' into '{branch}' failed: {source}")]
    Merge {
        branch: String,
        source_ref: String,
        #[source]
        source: GitError,
    },

    #[error("applying patch on '{branch}' failed: {source}")]
    Patch {
        branch: String,
        #[source]
        source: GitError,
    },

    #[error("push of '{branch}' to '{remote}' was rejected: {details}")]
    PushRejected {
        branch: String,
        remote: String,
        details: String,
    },

    #[error("push of '{branch}' to '{remote}' failed: {source}")]
    Push {
        branch: String,
        remote: String,
        #[source]
        source: GitError,
    },
}

impl MaterializeError {
    /// The last stage reached before the failure.
    pub fn stage(&self) -> Stage {
        match self {
            MaterializeError::InvalidChange { .. } | MaterializeError::Remote { .. } => {
                Stage::Start
            }
            MaterializeError::CreateBranch { .. } => Stage::RemoteResolved,
            MaterializeError::MergeConflict { .. }
            | MaterializeError::Merge { .. }
            | MaterializeError::Patch { .. } => Stage::BranchCreated,
            MaterializeError::PushRejected { .. } | MaterializeError::Push { .. } => {
                Stage::ChangeApplied
            }
        }
    }

    /// The local branch left behind by this failure, if any.
    pub fn leftover_branch(&self) -> Option<&str> {
        match self {
            MaterializeError::MergeConflict { branch, .. }
            | MaterializeError::Merge { branch, .. }
            | MaterializeError::Patch { branch, .. }
            | MaterializeError::PushRejected { branch, .. }
            | MaterializeError::Push { branch, .. } => Some(branch),
            _ => None,
        }
    }
}

/// Runs materializations with a fixed commit identity.
#[derive(Debug, Clone, Default)]
pub struct Materializer {
    identity: CommitIdentity,
}

impl Materializer {
    pub fn new(identity: CommitIdentity) -> Self {
        Materializer { identity }
    }

    /// Creates `new_branch` from `base_branch`, applies the change, and pushes.
    ///
    /// Blocking: runs git subprocesses. Callers on an async runtime should
    /// use `spawn_blocking`.
    #[instrument(skip_all, fields(repo = %req.repository_path.display(), branch = %req.new_branch))]
    pub fn run(&self, req: &MaterializeRequest) -> Result<BranchPrepResult, MaterializeError> {
        let workdir = req.repository_path.as_path();
        let mut stage = Stage::Start;

        loop {
            stage = match stage {
                Stage::Start => {
                    self.resolve_remote(workdir, req)?;
                    Stage::RemoteResolved
                }
                Stage::RemoteResolved => {
                    self.create_branch(workdir, req)?;
                    Stage::BranchCreated
                }
                Stage::BranchCreated => {
                    let applied = self.apply_change(workdir, req)?;
                    debug!(?applied, "change applied");
                    Stage::ChangeApplied
                }
                Stage::ChangeApplied => {
                    self.push(workdir, req)?;
                    Stage::Pushed
                }
                Stage::Pushed => break,
            };
            debug!(?stage, "materialization advanced");
        }

        let result = BranchPrepResult {
            repository_path: req.repository_path.clone(),
            new_branch: req.new_branch.clone(),
            remote_name: req.remote_name.clone(),
            remote_ref: format!("{}/{}", req.remote_name, req.new_branch),
            pushed: true,
        };
        info!(remote_ref = %result.remote_ref, "post-merge branch pushed");
        Ok(result)
    }

    fn resolve_remote(
        &self,
        workdir: &Path,
        req: &MaterializeRequest,
    ) -> Result<(), MaterializeError> {
        let action = git::ensure_remote(workdir, &req.remote_name, req.remote_url.as_deref())
            .map_err(|source| MaterializeError::Remote {
                remote: req.remote_name.clone(),
                source,
            })?;
        if action != RemoteAction::Existing {
            info!(remote = %req.remote_name, ?action, "remote configured");
        }

        // The base may be local-only.
        if let Err(e) = git::fetch(workdir, &req.remote_name, &req.base_branch) {
            debug!(error = %e, base = %req.base_branch, "base fetch failed, continuing");
        }
        Ok(())
    }

    fn create_branch(
        &self,
        workdir: &Path,
        req: &MaterializeRequest,
    ) -> Result<(), MaterializeError> {
        let wrap = |source| MaterializeError::CreateBranch {
            branch: req.new_branch.clone(),
            base: req.base_branch.clone(),
            source,
        };

        git::fetch_all(workdir).map_err(wrap)?;

        // Start from the freshly fetched tip; a local-only base is used as is.
        let base = &req.base_branch;
        if git::remote_branch_exists(workdir, &req.remote_name, base).map_err(wrap)? {
            let tracking = format!("{}/{}", req.remote_name, base);
            run_git_sync(workdir, &["checkout", "-B", base, &tracking]).map_err(wrap)?;
        } else {
            debug!(%base, "no remote-tracking base, using local branch");
            run_git_sync(workdir, &["checkout", base]).map_err(wrap)?;
        }
        if branch_exists(workdir, &req.new_branch).map_err(wrap)? {
            debug!("replacing existing local branch");
            run_git_sync(workdir, &["branch", "-D", &req.new_branch]).map_err(wrap)?;
        }
        run_git_sync(workdir, &["checkout", "-b", &req.new_branch]).map_err(wrap)?;
        Ok(())
    }

    fn apply_change(
        &self,
        workdir: &Path,
        req: &MaterializeRequest,
    ) -> Result<Applied, MaterializeError> {
        let message = req.commit_message.as_deref();
        match &req.change {
            ChangeSource::Merge { source_ref } => {
                // The ref may be local or a SHA already present.
                if let Err(e) = git::fetch(workdir, &req.remote_name, source_ref) {
                    debug!(error = %e, %source_ref, "source fetch failed, continuing");
                }

                let merge_err = |source| MaterializeError::Merge {
                    branch: req.new_branch.clone(),
                    source_ref: source_ref.clone(),
                    source,
                };
                let result = git::merge_no_ff(workdir, source_ref, message, &self.identity)
                    .map_err(merge_err)?;
                match result {
                    MergeResult::Success { commit_sha } => {
                        debug!(commit = %commit_sha.short(), "merged");
                        Ok(Applied::Merged)
                    }
                    MergeResult::AlreadyUpToDate => Ok(Applied::AlreadyUpToDate),
                    MergeResult::Conflict { conflicting_files } => {
                        Err(MaterializeError::MergeConflict {
                            branch: req.new_branch.clone(),
                            source_ref: source_ref.clone(),
                            conflicting_files,
                        })
                    }
                }
            }
            ChangeSource::Patch { bytes } => {
                git::apply_patch(workdir, bytes, message, &self.identity)
                    .map(Applied::Patched)
                    .map_err(|source| MaterializeError::Patch {
                        branch: req.new_branch.clone(),
                        source,
                    })
            }
        }
    }

    fn push(&self, workdir: &Path, req: &MaterializeRequest) -> Result<(), MaterializeError> {
        let result = git::push_branch(workdir, &req.remote_name, &req.new_branch, req.push_force)
            .map_err(|source| MaterializeError::Push {
                branch: req.new_branch.clone(),
                remote: req.remote_name.clone(),
                source,
            })?;

        match result {
            PushResult::Success { .. } | PushResult::AlreadyUpToDate => Ok(()),
            PushResult::Rejected { details } => Err(MaterializeError::PushRejected {
                branch: req.new_branch.clone(),
                remote: req.remote_name.clone(),
                details,
            }),
        }
    }
}
