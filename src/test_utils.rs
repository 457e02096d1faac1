//! Shared test utilities, fixtures, and arbitrary generators for property-based testing.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::{TimeZone, Utc};
use proptest::prelude::*;
use tempfile::TempDir;

use crate::dispatch::{DispatchFailure, DispatchReport, TargetOutcome, WorkflowSink};
use crate::git::{CommitIdentity, git_commit_command, run_git_stdout, run_git_sync};
use crate::types::{
    BranchType, EnrichedEvent, MergeEvent, MergeEventDraft, PrNumber, Provider, RiskLevel, Sha,
};

/// A complete GitHub draft for `test/repo` PR #123 merged into `main`.
pub fn sample_draft() -> MergeEventDraft {
    MergeEventDraft {
        provider: Some(Provider::GitHub),
        repository: Some("test/repo".to_string()),
        branch: Some("main".to_string()),
        pr_number: Some(PrNumber(123)),
        pr_title: "Test PR".to_string(),
        pr_description: Some("Test description".to_string()),
        author: "testuser".to_string(),
        commit_sha: Some(Sha::new("abc123def456")),
        merged_at: Some(Utc.with_ymd_and_hms(2025, 1, 27, 10, 0, 0).unwrap()),
        base_branch: "main".to_string(),
        head_branch: "feature-branch".to_string(),
        files_changed: vec!["src/main.py".to_string(), "tests/test_main.py".to_string()],
        additions: 100,
        deletions: 20,
        changed_files_count: 2,
    }
}

/// [`sample_draft`], validated and enriched as a `main`, low-risk event.
pub fn sample_enriched() -> EnrichedEvent {
    let event = sample_draft().validate().unwrap();
    EnrichedEvent {
        event_type: EnrichedEvent::EVENT_TYPE.to_string(),
        event_id: event.event_id(),
        event,
        processed_at: Utc.with_ymd_and_hms(2025, 1, 27, 10, 5, 0).unwrap(),
        branch_type: BranchType::Main,
        risk_level: RiskLevel::Low,
    }
}

/// A [`WorkflowSink`] that counts deliveries and answers with a fixed result.
#[derive(Default)]
pub struct CountingSink {
    calls: AtomicUsize,
    fail: bool,
    /// Delivery is recorded only after this delay.
    delay: Option<Duration>,
}

impl CountingSink {
    /// A sink whose single target always answers 500.
    pub fn failing() -> Self {
        CountingSink {
            fail: true,
            ..Default::default()
        }
    }

    /// A sink that takes `delay` to deliver each event.
    pub fn slow(delay: Duration) -> Self {
        CountingSink {
            delay: Some(delay),
            ..Default::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl WorkflowSink for CountingSink {
    async fn dispatch(&self, _event: &EnrichedEvent) -> DispatchReport {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.calls.fetch_add(1, Ordering::SeqCst);
        let result = if self.fail {
            Err(DispatchFailure::Status(500))
        } else {
            Ok(200)
        };
        DispatchReport::Dispatched(vec![TargetOutcome {
            url: "mock://workflow".to_string(),
            result,
        }])
    }
}

pub fn arb_provider() -> impl Strategy<Value = Provider> {
    prop_oneof![Just(Provider::GitHub), Just(Provider::GitLab)]
}

pub fn arb_pr_number() -> impl Strategy<Value = PrNumber> {
    (0u64..1_000_000).prop_map(PrNumber)
}

pub fn arb_sha() -> impl Strategy<Value = Sha> {
    "[0-9a-f]{40}".prop_map(Sha::new)
}

pub fn arb_branch_name() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9/-]{0,30}".prop_map(String::from)
}

pub fn arb_repository() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9-]{0,15}(/[a-z][a-z0-9-]{0,15}){1,2}".prop_map(String::from)
}

pub fn arb_merge_event() -> impl Strategy<Value = MergeEvent> {
    (
        arb_provider(),
        arb_repository(),
        arb_branch_name(),
        arb_pr_number(),
        arb_sha(),
        0i64..2_000_000_000,
        (0u64..5000, 0u64..5000, 0u64..200),
    )
        .prop_map(
            |(provider, repository, branch, pr_number, commit_sha, secs, (add, del, files))| {
                MergeEvent {
                    provider,
                    repository,
                    branch: branch.clone(),
                    pr_number,
                    pr_title: format!("Change {}", pr_number.0),
                    pr_description: None,
                    author: "author".to_string(),
                    commit_sha,
                    merged_at: Utc.timestamp_opt(secs, 0).unwrap(),
                    base_branch: branch,
                    head_branch: "feature".to_string(),
                    files_changed: Vec::new(),
                    additions: add,
                    deletions: del,
                    changed_files_count: files,
                }
            },
        )
}

// ============================================================================
// Git fixtures
// ============================================================================

pub fn test_identity() -> CommitIdentity {
    CommitIdentity {
        name: "Test".to_string(),
        email: "test@test.com".to_string(),
    }
}

/// A working clone with `main` pushed to a bare `origin` remote.
pub struct TestRepo {
    // Held so the directories live as long as the fixture.
    _temp_dir: TempDir,
    pub work: PathBuf,
    pub remote: PathBuf,
}

impl TestRepo {
    /// Creates a bare remote and a working repo with one commit on `main`.
    pub fn new() -> Self {
        let temp_dir = TempDir::new().unwrap();
        let remote = temp_dir.path().join("remote.git");
        let work = temp_dir.path().join("work");
        std::fs::create_dir_all(&remote).unwrap();
        std::fs::create_dir_all(&work).unwrap();

        run_git_sync(&remote, &["init", "--bare"]).unwrap();
        run_git_sync(&remote, &["symbolic-ref", "HEAD", "refs/heads/main"]).unwrap();

        run_git_sync(&work, &["init"]).unwrap();
        run_git_sync(&work, &["symbolic-ref", "HEAD", "refs/heads/main"]).unwrap();
        commit_file(&work, "README.md", "hello\n", "init");

        run_git_sync(
            &work,
            &["remote", "add", "origin", remote.to_str().unwrap()],
        )
        .unwrap();
        run_git_sync(&work, &["push", "-u", "origin", "main"]).unwrap();

        TestRepo {
            _temp_dir: temp_dir,
            work,
            remote,
        }
    }

    /// Creates `branch` from `main` with one file commit, pushes it, and
    /// returns to `main`.
    pub fn push_feature(&self, branch: &str, filename: &str, content: &str) -> Sha {
        run_git_sync(&self.work, &["checkout", "-b", branch, "main"]).unwrap();
        let sha = commit_file(&self.work, filename, content, &format!("add {filename}"));
        run_git_sync(&self.work, &["push", "-u", "origin", branch]).unwrap();
        run_git_sync(&self.work, &["checkout", "main"]).unwrap();
        sha
    }

    /// Pushes a commit to the remote's `main` from a separate clone, leaving
    /// the working repo's local `main` behind.
    pub fn advance_remote_main(&self, filename: &str, content: &str) -> Sha {
        let other = self._temp_dir.path().join("other");
        if !other.exists() {
            let parent = self._temp_dir.path();
            run_git_sync(
                parent,
                &["clone", self.remote.to_str().unwrap(), other.to_str().unwrap()],
            )
            .unwrap();
        } else {
            run_git_sync(&other, &["pull", "--ff-only", "origin", "main"]).unwrap();
        }
        let sha = commit_file(&other, filename, content, &format!("upstream {filename}"));
        run_git_sync(&other, &["push", "origin", "main"]).unwrap();
        sha
    }

    pub fn head(&self) -> Sha {
        Sha::new(run_git_stdout(&self.work, &["rev-parse", "HEAD"]).unwrap())
    }

    pub fn current_branch(&self) -> String {
        run_git_stdout(&self.work, &["rev-parse", "--abbrev-ref", "HEAD"]).unwrap()
    }

    /// Returns `git status --porcelain` for the working repo.
    pub fn status(&self) -> String {
        run_git_stdout(&self.work, &["status", "--porcelain"]).unwrap()
    }

    /// Returns the SHA of `branch` in the bare remote, if it exists.
    pub fn remote_branch(&self, branch: &str) -> Option<Sha> {
        run_git_stdout(
            &self.remote,
            &["rev-parse", "--verify", "--quiet", &format!("refs/heads/{branch}")],
        )
        .ok()
        .filter(|s| !s.is_empty())
        .map(Sha::new)
    }
}

/// Writes a file, stages it, and commits it with the test identity.
pub fn commit_file(workdir: &Path, filename: &str, content: &str, message: &str) -> Sha {
    std::fs::write(workdir.join(filename), content).unwrap();
    run_git_sync(workdir, &["add", filename]).unwrap();
    let output = git_commit_command(workdir, &test_identity())
        .args(["commit", "-m", message])
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "commit failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    Sha::new(run_git_stdout(workdir, &["rev-parse", "HEAD"]).unwrap())
}
