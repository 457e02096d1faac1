//! Event processing pipeline.
//!
//! [`EventProcessor`] validates a normalized draft, enriches it, records it
//! in its [`EventLog`], and then runs the two downstream effects:
//!
//! - workflow dispatch through a [`WorkflowSink`]
//! - post-merge branch materialization, when enabled
//!
//! The two effects run concurrently and independently. A failure in one
//! never prevents or fails the other.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{error, info, instrument, warn};

use crate::dispatch::{DispatchReport, WorkflowSink};
use crate::git::CommitIdentity;
use crate::materialize::{
    BranchPrepResult, ChangeSource, MaterializeRequest, Materializer,
};
use crate::types::{
    BranchSets, BranchType, EnrichedEvent, EventId, MergeEvent, MergeEventDraft, Provider,
    RiskLevel, ValidationError,
};

/// Settings for post-merge branch materialization.
#[derive(Debug, Clone)]
pub struct MaterializeSettings {
    pub repository_path: PathBuf,
    pub remote_name: String,
    pub remote_url: Option<String>,
    /// Branches are named `{branch_prefix}/pr-{number}`.
    pub branch_prefix: String,
    pub push_force: bool,
    pub identity: CommitIdentity,
}

impl MaterializeSettings {
    pub fn new(repository_path: impl Into<PathBuf>) -> Self {
        MaterializeSettings {
            repository_path: repository_path.into(),
            remote_name: "origin".to_string(),
            remote_url: None,
            branch_prefix: "post-merge".to_string(),
            push_force: false,
            identity: CommitIdentity::default(),
        }
    }

    /// Builds the materialization request for an event.
    ///
    /// The source is the remote-tracking head branch when there is one,
    /// otherwise the merge commit SHA itself.
    pub fn request_for(&self, event: &MergeEvent) -> MaterializeRequest {
        let source_ref = if event.head_branch.is_empty() {
            event.commit_sha.as_str().to_string()
        } else {
            format!("{}/{}", self.remote_name, event.head_branch)
        };

        MaterializeRequest {
            repository_path: self.repository_path.clone(),
            base_branch: event.branch.clone(),
            new_branch: format!("{}/pr-{}", self.branch_prefix, event.pr_number.0),
            change: ChangeSource::Merge { source_ref },
            remote_name: self.remote_name.clone(),
            remote_url: self.remote_url.clone(),
            push_force: self.push_force,
            commit_message: Some(format!(
                "Post-merge state for PR #{}: {}",
                event.pr_number.0, event.pr_title
            )),
        }
    }
}

/// What happened to post-merge materialization for one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MaterializeStatus {
    /// Materialization is not configured.
    Disabled,
    Pushed(BranchPrepResult),
    /// The rendered error; the local branch may have been left behind.
    Failed(String),
}

/// Result of handling one accepted event.
#[derive(Debug, Clone)]
pub struct ProcessOutcome {
    pub event_id: EventId,
    pub dispatch: DispatchReport,
    pub materialization: MaterializeStatus,
}

impl ProcessOutcome {
    /// True if at least one workflow target accepted the event.
    pub fn is_success(&self) -> bool {
        self.dispatch.any_succeeded()
    }
}

/// Aggregate counts over the event log.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EventStats {
    pub total_events: usize,
    pub provider_counts: BTreeMap<Provider, usize>,
    pub branch_type_counts: BTreeMap<BranchType, usize>,
    pub risk_level_counts: BTreeMap<RiskLevel, usize>,
    /// `processed_at` of the most recently appended event.
    pub last_processed: Option<DateTime<Utc>>,
}

/// Append-only, in-memory record of accepted events.
#[derive(Debug, Default)]
pub struct EventLog {
    events: Vec<EnrichedEvent>,
}

impl EventLog {
    pub fn append(&mut self, event: EnrichedEvent) {
        self.events.push(event);
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// The most recent `limit` events, oldest first.
    pub fn recent(&self, limit: usize) -> &[EnrichedEvent] {
        let start = self.events.len().saturating_sub(limit);
        &self.events[start..]
    }

    pub fn stats(&self) -> EventStats {
        let mut stats = EventStats {
            total_events: self.events.len(),
            last_processed: self.events.last().map(|e| e.processed_at),
            ..Default::default()
        };
        for event in &self.events {
            *stats.provider_counts.entry(event.event.provider).or_default() += 1;
            *stats.branch_type_counts.entry(event.branch_type).or_default() += 1;
            *stats.risk_level_counts.entry(event.risk_level).or_default() += 1;
        }
        stats
    }
}

/// Validates, enriches, records, and fans out merge events.
pub struct EventProcessor<S> {
    sink: S,
    branches: BranchSets,
    materialize: Option<MaterializeSettings>,
    log: Mutex<EventLog>,
    /// One lock per repository path so git operations on a clone never overlap.
    repo_locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl<S: WorkflowSink> EventProcessor<S> {
    pub fn new(sink: S, branches: BranchSets) -> Self {
        EventProcessor {
            sink,
            branches,
            materialize: None,
            log: Mutex::new(EventLog::default()),
            repo_locks: Mutex::new(HashMap::new()),
        }
    }

    /// Enables post-merge branch materialization.
    pub fn with_materialization(mut self, settings: MaterializeSettings) -> Self {
        self.materialize = Some(settings);
        self
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn branches(&self) -> &BranchSets {
        &self.branches
    }

    /// Adds the derived fields to a validated event.
    pub fn enrich(&self, event: MergeEvent, now: DateTime<Utc>) -> EnrichedEvent {
        EnrichedEvent {
            event_type: EnrichedEvent::EVENT_TYPE.to_string(),
            processed_at: now,
            event_id: event.event_id(),
            branch_type: self.branches.branch_type(&event.branch),
            risk_level: RiskLevel::assess(
                event.changed_files_count,
                event.additions,
                event.deletions,
            ),
            event,
        }
    }

    /// Validates and enriches a draft and appends it to the log.
    ///
    /// Nothing is recorded if validation fails.
    pub async fn accept(&self, draft: MergeEventDraft) -> Result<EnrichedEvent, ValidationError> {
        let event = draft.validate().inspect_err(|e| {
            warn!(error = %e, "rejecting invalid merge event");
        })?;
        let enriched = self.enrich(event, Utc::now());

        info!(
            event_id = %enriched.event_id,
            repository = %enriched.event.repository,
            pr = %enriched.event.pr_number,
            branch = %enriched.event.branch,
            branch_type = %enriched.branch_type,
            risk_level = %enriched.risk_level,
            "merge event accepted"
        );
        self.log.lock().await.append(enriched.clone());
        Ok(enriched)
    }

    /// Runs dispatch and materialization for an accepted event.
    #[instrument(skip_all, fields(event_id = %event.event_id))]
    pub async fn handle(&self, event: &EnrichedEvent) -> ProcessOutcome {
        let (dispatch, materialization) =
            tokio::join!(self.sink.dispatch(event), self.materialize(event));

        ProcessOutcome {
            event_id: event.event_id.clone(),
            dispatch,
            materialization,
        }
    }

    /// [`accept`](Self::accept) followed by [`handle`](Self::handle).
    pub async fn process(&self, draft: MergeEventDraft) -> Result<ProcessOutcome, ValidationError> {
        let event = self.accept(draft).await?;
        Ok(self.handle(&event).await)
    }

    /// The most recent `limit` events, oldest first.
    pub async fn recent_events(&self, limit: usize) -> Vec<EnrichedEvent> {
        self.log.lock().await.recent(limit).to_vec()
    }

    pub async fn stats(&self) -> EventStats {
        self.log.lock().await.stats()
    }

    async fn materialize(&self, event: &EnrichedEvent) -> MaterializeStatus {
        let Some(settings) = &self.materialize else {
            return MaterializeStatus::Disabled;
        };
        let request = settings.request_for(&event.event);
        let materializer = Materializer::new(settings.identity.clone());

        let lock = {
            let mut locks = self.repo_locks.lock().await;
            locks
                .entry(settings.repository_path.clone())
                .or_default()
                .clone()
        };
        let guard = lock.lock_owned().await;

        let result = tokio::task::spawn_blocking(move || {
            let _guard = guard;
            materializer.run(&request)
        })
        .await;

        match result {
            Ok(Ok(prep)) => MaterializeStatus::Pushed(prep),
            Ok(Err(e)) => {
                error!(
                    error = %e,
                    leftover_branch = e.leftover_branch().unwrap_or(""),
                    "failed to create post-merge branch"
                );
                MaterializeStatus::Failed(e.to_string())
            }
            Err(join_error) => {
                error!(error = %join_error, "post-merge branch task did not complete");
                MaterializeStatus::Failed(join_error.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    use crate::git::run_git_sync;
    use crate::test_utils::{CountingSink, TestRepo, commit_file, sample_draft, test_identity};
    use crate::types::{PrNumber, Sha};

    fn processor() -> EventProcessor<CountingSink> {
        EventProcessor::new(CountingSink::default(), BranchSets::default())
    }

    fn settings_for(repo: &TestRepo) -> MaterializeSettings {
        MaterializeSettings {
            identity: test_identity(),
            ..MaterializeSettings::new(&repo.work)
        }
    }

    #[test]
    fn enrich_adds_derived_fields() {
        let processor = processor();
        let now = Utc.with_ymd_and_hms(2025, 1, 27, 10, 5, 0).unwrap();
        let enriched = processor.enrich(sample_draft().validate().unwrap(), now);

        assert_eq!(enriched.event_type, "pr_merge");
        assert_eq!(enriched.processed_at, now);
        assert_eq!(enriched.event_id.as_str(), "github_test_repo_123_abc123de");
        assert_eq!(enriched.branch_type, BranchType::Main);
        assert_eq!(enriched.risk_level, RiskLevel::Low);
    }

    #[test]
    fn enrich_uses_configured_branch_sets() {
        let processor = EventProcessor::new(
            CountingSink::default(),
            BranchSets {
                main: vec!["trunk".to_string()],
                staging: vec!["main".to_string()],
            },
        );
        let enriched = processor.enrich(sample_draft().validate().unwrap(), Utc::now());
        assert_eq!(enriched.branch_type, BranchType::Staging);
    }

    #[test]
    fn request_uses_remote_head_branch() {
        let settings = MaterializeSettings::new("/srv/repo");
        let event = sample_draft().validate().unwrap();
        let req = settings.request_for(&event);

        assert_eq!(req.new_branch, "post-merge/pr-123");
        assert_eq!(req.base_branch, "main");
        assert_eq!(
            req.change,
            ChangeSource::Merge {
                source_ref: "origin/feature-branch".to_string()
            }
        );
        assert_eq!(
            req.commit_message.as_deref(),
            Some("Post-merge state for PR #123: Test PR")
        );
        assert!(!req.push_force);
    }

    #[test]
    fn request_falls_back_to_commit_sha() {
        let settings = MaterializeSettings::new("/srv/repo");
        let mut draft = sample_draft();
        draft.head_branch = String::new();
        let req = settings.request_for(&draft.validate().unwrap());

        assert_eq!(
            req.change,
            ChangeSource::Merge {
                source_ref: "abc123def456".to_string()
            }
        );
    }

    #[tokio::test]
    async fn valid_event_is_logged_and_dispatched() {
        let processor = processor();
        let outcome = processor.process(sample_draft()).await.unwrap();

        assert!(outcome.is_success());
        assert_eq!(outcome.event_id.as_str(), "github_test_repo_123_abc123de");
        assert_eq!(outcome.materialization, MaterializeStatus::Disabled);
        assert_eq!(processor.sink().calls(), 1);
        assert_eq!(processor.recent_events(100).await.len(), 1);
    }

    #[tokio::test]
    async fn invalid_event_is_dropped() {
        let processor = processor();
        let mut draft = sample_draft();
        draft.commit_sha = None;

        let err = processor.process(draft).await.unwrap_err();
        assert_eq!(err, ValidationError::MissingField("commit_sha"));
        assert_eq!(processor.sink().calls(), 0);
        assert!(processor.recent_events(100).await.is_empty());
        assert_eq!(processor.stats().await.total_events, 0);
    }

    #[tokio::test]
    async fn failed_dispatch_still_logs_event() {
        let processor = EventProcessor::new(CountingSink::failing(), BranchSets::default());
        let outcome = processor.process(sample_draft()).await.unwrap();

        assert!(!outcome.is_success());
        assert_eq!(processor.stats().await.total_events, 1);
    }

    #[tokio::test]
    async fn recent_events_returns_newest_in_order() {
        let processor = processor();
        for n in 1..=5 {
            let mut draft = sample_draft();
            draft.pr_number = Some(PrNumber(n));
            processor.accept(draft).await.unwrap();
        }

        let recent = processor.recent_events(2).await;
        let numbers: Vec<u64> = recent.iter().map(|e| e.event.pr_number.0).collect();
        assert_eq!(numbers, vec![4, 5]);

        assert_eq!(processor.recent_events(100).await.len(), 5);
        assert!(processor.recent_events(0).await.is_empty());
    }

    #[tokio::test]
    async fn stats_count_by_category() {
        let processor = processor();

        processor.accept(sample_draft()).await.unwrap();

        let mut gitlab = sample_draft();
        gitlab.provider = Some(Provider::GitLab);
        gitlab.branch = Some("develop".to_string());
        gitlab.changed_files_count = 60;
        processor.accept(gitlab).await.unwrap();

        let mut medium = sample_draft();
        medium.additions = 400;
        medium.deletions = 200;
        processor.accept(medium).await.unwrap();

        let stats = processor.stats().await;
        assert_eq!(stats.total_events, 3);
        assert_eq!(stats.provider_counts[&Provider::GitHub], 2);
        assert_eq!(stats.provider_counts[&Provider::GitLab], 1);
        assert_eq!(stats.branch_type_counts[&BranchType::Main], 2);
        assert_eq!(stats.branch_type_counts[&BranchType::Staging], 1);
        assert_eq!(stats.risk_level_counts[&RiskLevel::Low], 1);
        assert_eq!(stats.risk_level_counts[&RiskLevel::Medium], 1);
        assert_eq!(stats.risk_level_counts[&RiskLevel::High], 1);

        let last = processor.recent_events(1).await;
        assert_eq!(stats.last_processed, Some(last[0].processed_at));
    }

    #[tokio::test]
    async fn empty_stats() {
        let stats = processor().stats().await;
        assert_eq!(stats, EventStats::default());

        let json = serde_json::to_value(&stats).unwrap();
        assert_eq!(json["total_events"], 0);
        assert!(json["last_processed"].is_null());
    }

    #[test]
    fn stats_serialize_with_string_keys() {
        let mut log = EventLog::default();
        log.append(crate::test_utils::sample_enriched());
        let json = serde_json::to_value(log.stats()).unwrap();
        assert_eq!(json["provider_counts"]["github"], 1);
        assert_eq!(json["branch_type_counts"]["main"], 1);
        assert_eq!(json["risk_level_counts"]["low"], 1);
    }

    #[tokio::test]
    async fn materializes_post_merge_branch() {
        let repo = TestRepo::new();
        repo.push_feature("feature-branch", "feature.txt", "data\n");

        let processor = processor().with_materialization(settings_for(&repo));
        let outcome = processor.process(sample_draft()).await.unwrap();

        let MaterializeStatus::Pushed(prep) = &outcome.materialization else {
            panic!("expected pushed, got {:?}", outcome.materialization);
        };
        assert!(prep.pushed);
        assert_eq!(prep.remote_ref, "origin/post-merge/pr-123");
        assert!(repo.remote_branch("post-merge/pr-123").is_some());
        assert_eq!(processor.sink().calls(), 1);
    }

    #[tokio::test]
    async fn post_merge_branch_includes_upstream_base_commits() {
        let repo = TestRepo::new();
        repo.push_feature("feature-branch", "feature.txt", "data\n");
        repo.advance_remote_main("upstream.txt", "upstream\n");

        let processor = processor().with_materialization(settings_for(&repo));
        let outcome = processor.process(sample_draft()).await.unwrap();

        assert!(matches!(outcome.materialization, MaterializeStatus::Pushed(_)));
        for file in ["upstream.txt", "feature.txt"] {
            run_git_sync(
                &repo.remote,
                &["cat-file", "-e", &format!("refs/heads/post-merge/pr-123:{file}")],
            )
            .unwrap();
        }
    }

    #[tokio::test]
    async fn dispatch_failure_does_not_block_materialization() {
        let repo = TestRepo::new();
        repo.push_feature("feature-branch", "feature.txt", "data\n");

        let processor = EventProcessor::new(CountingSink::failing(), BranchSets::default())
            .with_materialization(settings_for(&repo));
        let outcome = processor.process(sample_draft()).await.unwrap();

        assert!(!outcome.is_success());
        assert!(matches!(outcome.materialization, MaterializeStatus::Pushed(_)));
    }

    #[tokio::test]
    async fn materialization_failure_does_not_block_dispatch() {
        let repo = TestRepo::new();
        repo.push_feature("feature-branch", "README.md", "feature\n");
        commit_file(&repo.work, "README.md", "main\n", "conflicting edit");
        run_git_sync(&repo.work, &["push", "origin", "main"]).unwrap();

        let processor = processor().with_materialization(settings_for(&repo));
        let outcome = processor.process(sample_draft()).await.unwrap();

        assert!(outcome.is_success());
        assert!(matches!(outcome.materialization, MaterializeStatus::Failed(_)));
        assert_eq!(processor.sink().calls(), 1);
        assert_eq!(repo.status(), "");
    }

    #[tokio::test]
    async fn concurrent_events_share_repository_safely() {
        let repo = TestRepo::new();
        repo.push_feature("feature-a", "a.txt", "a\n");
        repo.push_feature("feature-b", "b.txt", "b\n");

        let processor = processor().with_materialization(settings_for(&repo));

        let mut first = sample_draft();
        first.pr_number = Some(PrNumber(1));
        first.head_branch = "feature-a".to_string();
        first.commit_sha = Some(Sha::new("aaaaaaaaaaaa"));

        let mut second = sample_draft();
        second.pr_number = Some(PrNumber(2));
        second.head_branch = "feature-b".to_string();
        second.commit_sha = Some(Sha::new("bbbbbbbbbbbb"));

        let (a, b) = tokio::join!(processor.process(first), processor.process(second));

        assert!(matches!(a.unwrap().materialization, MaterializeStatus::Pushed(_)));
        assert!(matches!(b.unwrap().materialization, MaterializeStatus::Pushed(_)));
        assert!(repo.remote_branch("post-merge/pr-1").is_some());
        assert!(repo.remote_branch("post-merge/pr-2").is_some());
        assert_eq!(processor.stats().await.total_events, 2);
    }
}
