//! Remote resolution.

use std::path::Path;

use super::{GitError, GitResult, run_git_stdout, run_git_sync};

/// What [`ensure_remote`] had to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteAction {
    /// The remote existed and was left as is.
    Existing,
    /// The remote existed and its URL was replaced.
    UrlUpdated,
    /// The remote did not exist and was created.
    Created,
}

/// Returns the configured URLs of a remote, or `None` if it does not exist.
pub fn remote_urls(workdir: &Path, remote: &str) -> GitResult<Option<Vec<String>>> {
    let names = run_git_stdout(workdir, &["remote"])?;
    if !names.lines().any(|name| name == remote) {
        return Ok(None);
    }

    let urls = run_git_stdout(workdir, &["remote", "get-url", "--all", remote])?;
    Ok(Some(urls.lines().map(str::to_string).collect()))
}

/// Makes sure `remote` exists.
///
/// An existing remote is re-pointed to `url` only if `url` is given and is
/// not already one of its URLs. A missing remote is created from `url`; with
/// no URL that is [`GitError::RemoteNotFound`].
pub fn ensure_remote(workdir: &Path, remote: &str, url: Option<&str>) -> GitResult<RemoteAction> {
    match (remote_urls(workdir, remote)?, url) {
        (Some(urls), Some(url)) if !urls.iter().any(|u| u == url) => {
            run_git_sync(workdir, &["remote", "set-url", remote, url])?;
            Ok(RemoteAction::UrlUpdated)
        }
        (Some(_), _) => Ok(RemoteAction::Existing),
        (None, Some(url)) => {
            run_git_sync(workdir, &["remote", "add", remote, url])?;
            Ok(RemoteAction::Created)
        }
        (None, None) => Err(GitError::RemoteNotFound {
            remote: remote.to_string(),
        }),
    }
}
