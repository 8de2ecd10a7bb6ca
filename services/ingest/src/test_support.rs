//! In-memory repositories and a scripted source client for sync tests.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use uuid::Uuid;

use cadence_common::error::{CadenceError, CadenceResult};
use cadence_db::activity::models::{
    ActivityChangeset, Commit, PullRequest, PullRequestDetail, Repository, Review, ReviewComment,
};
use cadence_db::activity::repositories::ActivityRepository;
use cadence_db::sync::models::{SyncCheckpoint, SyncKind, SyncRunStatus};
use cadence_db::sync::repositories::SyncCheckpointRepository;

use crate::connector::{RemoteQuota, SourceClient, SourceError, UnitState};
use crate::github::client::filter_window;
use crate::rate_limit::{RateLimiter, RateLimiterConfig};

pub fn base_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 2, 10, 12, 0, 0).unwrap()
}

pub fn repository(github_id: i64, full_name: &str) -> Repository {
    let now = Utc::now();
    Repository {
        id: Uuid::new_v4(),
        github_id,
        full_name: full_name.to_string(),
        default_branch: Some("main".to_string()),
        is_private: false,
        is_archived: false,
        web_url: format!("https://github.com/{full_name}"),
        created_at: now,
        updated_at: now,
    }
}

/// A list-payload pull request updated `age_days` before [`base_time`].
pub fn pull_request(repo: &Repository, github_id: i64, age_days: i64) -> PullRequest {
    let now = Utc::now();
    PullRequest {
        id: Uuid::new_v4(),
        github_id,
        repository_github_id: repo.github_id,
        repository_full_name: repo.full_name.clone(),
        number: github_id as i32,
        title: format!("PR {github_id}"),
        state: "open".to_string(),
        draft: false,
        author_login: Some("alice".to_string()),
        created_at_gh: Some(base_time() - chrono::Duration::days(30)),
        updated_at_gh: Some(base_time() - chrono::Duration::days(age_days)),
        closed_at: None,
        merged_at: None,
        additions: None,
        deletions: None,
        changed_files: None,
        commits_count: None,
        merged_by: None,
        details_synced_at: None,
        web_url: format!("https://github.com/{}/pull/{github_id}", repo.full_name),
        created_at: now,
        updated_at: now,
    }
}

pub fn transport_error() -> SourceError {
    SourceError::MaxRetriesExceeded {
        attempts: 1,
        last_error: "connection reset by peer".to_string(),
        last_status: None,
    }
}

fn unit_commit(repository_github_id: i64, unit_github_id: i64, link: Option<i64>) -> Commit {
    let now = Utc::now();
    Commit {
        id: Uuid::new_v4(),
        sha: format!("sha-{unit_github_id}"),
        repository_github_id,
        pull_request_github_id: link,
        author_login: Some("alice".to_string()),
        author_email: Some("alice@example.com".to_string()),
        message: format!("work on {unit_github_id}"),
        committed_at: None,
        created_at: now,
        updated_at: now,
    }
}

pub fn fast_limits() -> RateLimiterConfig {
    RateLimiterConfig {
        base_delay: Duration::ZERO,
        ..RateLimiterConfig::default()
    }
}

/// Scripted upstream. Each unit has one review, one comment and one commit
/// (`sha-{unit id}`); scope-level commit listing returns the same SHAs
/// without a unit link.
pub struct FakeSourceClient {
    limiter: RateLimiter,
    scopes: Vec<Repository>,
    units: HashMap<i64, Vec<PullRequest>>,
    failing_scopes: HashSet<i64>,
    failing_details: HashSet<i64>,
    scope_listing_fails: bool,
    configured: bool,
    windows: Mutex<Vec<(i64, Option<DateTime<Utc>>, Option<DateTime<Utc>>)>>,
    states: Mutex<Vec<UnitState>>,
}

impl FakeSourceClient {
    pub fn new(scopes: Vec<Repository>) -> Self {
        Self {
            limiter: RateLimiter::new(fast_limits()),
            scopes,
            units: HashMap::new(),
            failing_scopes: HashSet::new(),
            failing_details: HashSet::new(),
            scope_listing_fails: false,
            configured: true,
            windows: Mutex::new(Vec::new()),
            states: Mutex::new(Vec::new()),
        }
    }

    pub fn with_units(mut self, repository_github_id: i64, units: Vec<PullRequest>) -> Self {
        self.units.insert(repository_github_id, units);
        self
    }

    /// Listing units of this scope fails with a transport error.
    pub fn failing_scope(mut self, repository_github_id: i64) -> Self {
        self.failing_scopes.insert(repository_github_id);
        self
    }

    /// Listing reviews of this unit fails with a transport error.
    pub fn failing_details_for(mut self, unit_github_id: i64) -> Self {
        self.failing_details.insert(unit_github_id);
        self
    }

    pub fn failing_scope_listing(mut self) -> Self {
        self.scope_listing_fails = true;
        self
    }

    pub fn unconfigured(mut self) -> Self {
        self.configured = false;
        self
    }

    pub fn with_call_budget(mut self, max_calls_per_sync: u32) -> Self {
        self.limiter = RateLimiter::new(RateLimiterConfig {
            max_calls_per_sync,
            ..fast_limits()
        });
        self
    }

    /// `(scope, since, until)` of every `list_units` call.
    pub fn listed_windows(&self) -> Vec<(i64, Option<DateTime<Utc>>, Option<DateTime<Utc>>)> {
        self.windows.lock().unwrap().clone()
    }

    /// Unit state requested by every `list_units` call.
    pub fn listed_states(&self) -> Vec<UnitState> {
        self.states.lock().unwrap().clone()
    }
}

#[async_trait]
impl SourceClient for FakeSourceClient {
    fn source_name(&self) -> &str {
        "github"
    }

    fn has_scopes(&self) -> bool {
        self.configured
    }

    fn rate_limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    async fn list_scopes(&self) -> Result<Vec<Repository>, SourceError> {
        self.limiter.acquire().await?;
        if self.scope_listing_fails {
            return Err(transport_error());
        }
        Ok(self.scopes.clone())
    }

    async fn list_units(
        &self,
        scope: &Repository,
        state: UnitState,
        since: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
    ) -> Result<Vec<PullRequest>, SourceError> {
        self.limiter.acquire().await?;
        self.states.lock().unwrap().push(state);
        self.windows
            .lock()
            .unwrap()
            .push((scope.github_id, since, until));
        if self.failing_scopes.contains(&scope.github_id) {
            return Err(transport_error());
        }
        let units = self.units.get(&scope.github_id).cloned().unwrap_or_default();
        Ok(filter_window(units, since, until).0)
    }

    async fn list_scope_commits(
        &self,
        scope: &Repository,
        _since: Option<DateTime<Utc>>,
        _until: Option<DateTime<Utc>>,
    ) -> Result<Vec<Commit>, SourceError> {
        self.limiter.acquire().await?;
        Ok(self
            .units
            .get(&scope.github_id)
            .map(|units| {
                units
                    .iter()
                    .map(|u| unit_commit(scope.github_id, u.github_id, None))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn list_reviews(&self, unit: &PullRequest) -> Result<Vec<Review>, SourceError> {
        self.limiter.acquire().await?;
        if self.failing_details.contains(&unit.github_id) {
            return Err(transport_error());
        }
        let now = Utc::now();
        Ok(vec![Review {
            id: Uuid::new_v4(),
            github_id: unit.github_id * 10,
            pull_request_github_id: unit.github_id,
            reviewer_login: Some("bob".to_string()),
            state: "APPROVED".to_string(),
            body: None,
            submitted_at: unit.updated_at_gh,
            created_at: now,
            updated_at: now,
        }])
    }

    async fn list_review_comments(
        &self,
        unit: &PullRequest,
    ) -> Result<Vec<ReviewComment>, SourceError> {
        self.limiter.acquire().await?;
        let now = Utc::now();
        Ok(vec![ReviewComment {
            id: Uuid::new_v4(),
            github_id: unit.github_id * 10 + 1,
            pull_request_github_id: unit.github_id,
            author_login: Some("bob".to_string()),
            body: "nit".to_string(),
            path: Some("src/lib.rs".to_string()),
            created_at_gh: unit.updated_at_gh,
            updated_at_gh: unit.updated_at_gh,
            created_at: now,
            updated_at: now,
        }])
    }

    async fn list_unit_commits(&self, unit: &PullRequest) -> Result<Vec<Commit>, SourceError> {
        self.limiter.acquire().await?;
        Ok(vec![unit_commit(
            unit.repository_github_id,
            unit.github_id,
            Some(unit.github_id),
        )])
    }

    async fn fetch_unit_detail(
        &self,
        _unit: &PullRequest,
    ) -> Result<Option<PullRequestDetail>, SourceError> {
        self.limiter.acquire().await?;
        Ok(Some(PullRequestDetail {
            additions: Some(10),
            deletions: Some(2),
            changed_files: Some(1),
            commits_count: Some(1),
            merged_by: None,
        }))
    }

    async fn test_connection(&self) -> Result<RemoteQuota, SourceError> {
        Ok(RemoteQuota {
            limit: 5000,
            remaining: 5000,
            reset_at: None,
        })
    }
}

#[derive(Debug, Clone, Default)]
struct Store {
    repositories: BTreeMap<i64, Repository>,
    pull_requests: BTreeMap<i64, PullRequest>,
    reviews: BTreeMap<i64, Review>,
    comments: BTreeMap<i64, ReviewComment>,
    commits: BTreeMap<String, Commit>,
}

impl Store {
    fn apply(&mut self, cs: &ActivityChangeset) -> CadenceResult<()> {
        for pr in &cs.pull_requests {
            if !self.repositories.contains_key(&pr.repository_github_id) {
                return Err(CadenceError::Database(format!(
                    "foreign key violation: repository {}",
                    pr.repository_github_id
                )));
            }
            self.pull_requests
                .entry(pr.github_id)
                .and_modify(|stored| stored.merge_from(pr))
                .or_insert_with(|| pr.clone());
        }
        for review in &cs.reviews {
            self.require_pull_request(review.pull_request_github_id)?;
            self.reviews
                .entry(review.github_id)
                .and_modify(|stored| stored.merge_from(review))
                .or_insert_with(|| review.clone());
        }
        for comment in &cs.comments {
            self.require_pull_request(comment.pull_request_github_id)?;
            self.comments
                .entry(comment.github_id)
                .and_modify(|stored| stored.merge_from(comment))
                .or_insert_with(|| comment.clone());
        }
        for commit in &cs.commits {
            if let Some(pr) = commit.pull_request_github_id {
                self.require_pull_request(pr)?;
            }
            self.commits
                .entry(commit.sha.clone())
                .and_modify(|stored| stored.merge_from(commit))
                .or_insert_with(|| commit.clone());
        }
        Ok(())
    }

    fn require_pull_request(&self, github_id: i64) -> CadenceResult<()> {
        if self.pull_requests.contains_key(&github_id) {
            Ok(())
        } else {
            Err(CadenceError::Database(format!(
                "foreign key violation: pull request {github_id}"
            )))
        }
    }
}

/// Transactional in-memory store: a changeset is applied to a copy and only
/// swapped in when every row succeeds.
#[derive(Clone, Default)]
pub struct InMemoryActivityRepository {
    store: Arc<Mutex<Store>>,
    failing_repository: Arc<Mutex<Option<i64>>>,
}

impl InMemoryActivityRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject every changeset touching this repository.
    pub fn fail_writes_for(&self, repository_github_id: i64) {
        *self.failing_repository.lock().unwrap() = Some(repository_github_id);
    }

    pub fn seed(&self, repositories: Vec<Repository>, pull_requests: Vec<PullRequest>) {
        let mut store = self.store.lock().unwrap();
        for repo in repositories {
            store.repositories.insert(repo.github_id, repo);
        }
        for pr in pull_requests {
            store.pull_requests.insert(pr.github_id, pr);
        }
    }

    /// Row counts: (repositories, pull requests, reviews, comments, commits).
    pub fn counts(&self) -> (usize, usize, usize, usize, usize) {
        let store = self.store.lock().unwrap();
        (
            store.repositories.len(),
            store.pull_requests.len(),
            store.reviews.len(),
            store.comments.len(),
            store.commits.len(),
        )
    }

    pub fn pull_request(&self, github_id: i64) -> Option<PullRequest> {
        self.store.lock().unwrap().pull_requests.get(&github_id).cloned()
    }

    pub fn pull_requests(&self) -> Vec<PullRequest> {
        self.store.lock().unwrap().pull_requests.values().cloned().collect()
    }

    pub fn commit(&self, sha: &str) -> Option<Commit> {
        self.store.lock().unwrap().commits.get(sha).cloned()
    }
}

#[async_trait]
impl ActivityRepository for InMemoryActivityRepository {
    async fn upsert_repositories(&self, repositories: &[Repository]) -> CadenceResult<usize> {
        let mut store = self.store.lock().unwrap();
        for repo in repositories {
            store
                .repositories
                .entry(repo.github_id)
                .and_modify(|stored| stored.merge_from(repo))
                .or_insert_with(|| repo.clone());
        }
        Ok(repositories.len())
    }

    async fn apply_changeset(&self, changeset: &ActivityChangeset) -> CadenceResult<usize> {
        let failing = *self.failing_repository.lock().unwrap();
        if let Some(repo) = failing {
            let touches = changeset
                .pull_requests
                .iter()
                .any(|pr| pr.repository_github_id == repo)
                || changeset.commits.iter().any(|c| c.repository_github_id == repo);
            if touches {
                return Err(CadenceError::Database(
                    "simulated constraint violation".to_string(),
                ));
            }
        }

        let mut store = self.store.lock().unwrap();
        let mut staged = store.clone();
        staged.apply(changeset)?;
        *store = staged;
        Ok(changeset.len())
    }

    async fn list_pending_details(
        &self,
        limit: usize,
        exclude: &[i64],
    ) -> CadenceResult<Vec<PullRequest>> {
        let store = self.store.lock().unwrap();
        let mut pending: Vec<PullRequest> = store
            .pull_requests
            .values()
            .filter(|pr| pr.details_synced_at.is_none() && !exclude.contains(&pr.github_id))
            .cloned()
            .collect();
        pending.sort_by(|a, b| {
            b.updated_at_gh
                .cmp(&a.updated_at_gh)
                .then(b.github_id.cmp(&a.github_id))
        });
        pending.truncate(limit);
        Ok(pending)
    }
}

#[derive(Clone, Default)]
pub struct InMemoryCheckpointRepository {
    rows: Arc<Mutex<HashMap<String, SyncCheckpoint>>>,
}

impl InMemoryCheckpointRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_last_sync(connector_name: &str, at: DateTime<Utc>) -> Self {
        let repo = Self::default();
        let mut cp = SyncCheckpoint::new(connector_name);
        cp.complete(SyncKind::Incremental, at);
        repo.rows.lock().unwrap().insert(connector_name.to_string(), cp);
        repo
    }

    /// Simulate a run that is still in progress.
    pub fn hold_lock(&self, connector_name: &str) {
        let mut rows = self.rows.lock().unwrap();
        rows.entry(connector_name.to_string())
            .or_insert_with(|| SyncCheckpoint::new(connector_name))
            .status = SyncRunStatus::Running;
    }

    pub fn checkpoint(&self, connector_name: &str) -> Option<SyncCheckpoint> {
        self.rows.lock().unwrap().get(connector_name).cloned()
    }

    fn update(
        &self,
        id: Uuid,
        f: impl FnOnce(&mut SyncCheckpoint),
    ) -> CadenceResult<SyncCheckpoint> {
        let mut rows = self.rows.lock().unwrap();
        let cp = rows
            .values_mut()
            .find(|cp| cp.id == id)
            .ok_or_else(|| CadenceError::NotFound(format!("checkpoint {id}")))?;
        f(cp);
        Ok(cp.clone())
    }
}

#[async_trait]
impl SyncCheckpointRepository for InMemoryCheckpointRepository {
    async fn get(&self, connector_name: &str) -> CadenceResult<Option<SyncCheckpoint>> {
        Ok(self.checkpoint(connector_name))
    }

    async fn get_or_create(&self, connector_name: &str) -> CadenceResult<SyncCheckpoint> {
        let mut rows = self.rows.lock().unwrap();
        Ok(rows
            .entry(connector_name.to_string())
            .or_insert_with(|| SyncCheckpoint::new(connector_name))
            .clone())
    }

    async fn acquire_lock(&self, connector_name: &str) -> CadenceResult<Option<SyncCheckpoint>> {
        let mut rows = self.rows.lock().unwrap();
        match rows.get_mut(connector_name) {
            Some(cp) if cp.status != SyncRunStatus::Running => {
                cp.status = SyncRunStatus::Running;
                cp.error_message = None;
                Ok(Some(cp.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn mark_completed(
        &self,
        id: Uuid,
        kind: SyncKind,
        synced_at: DateTime<Utc>,
    ) -> CadenceResult<SyncCheckpoint> {
        self.update(id, |cp| cp.complete(kind, synced_at))
    }

    async fn mark_failed(&self, id: Uuid, error_message: &str) -> CadenceResult<SyncCheckpoint> {
        self.update(id, |cp| {
            cp.status = SyncRunStatus::Failed;
            cp.error_message = Some(error_message.to_string());
        })
    }

    async fn reset(&self, connector_name: &str) -> CadenceResult<()> {
        if let Some(cp) = self.rows.lock().unwrap().get_mut(connector_name) {
            cp.last_sync_at = None;
            cp.last_full_sync_at = None;
            cp.status = SyncRunStatus::Idle;
        }
        Ok(())
    }
}
