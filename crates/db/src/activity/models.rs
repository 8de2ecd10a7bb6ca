use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A synced repository (one sync scope).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Repository {
    pub id: Uuid,
    pub github_id: i64,
    pub full_name: String,
    pub default_branch: Option<String>,
    pub is_private: bool,
    pub is_archived: bool,
    pub web_url: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Repository {
    /// Copy the mutable upstream fields of `incoming` onto an existing row.
    /// Same column rules as `upsert_repository` in `pg_repository.rs`, for
    /// stores that update rows in memory.
    pub fn merge_from(&mut self, incoming: &Repository) {
        self.full_name = incoming.full_name.clone();
        self.default_branch = incoming.default_branch.clone();
        self.is_private = incoming.is_private;
        self.is_archived = incoming.is_archived;
        self.web_url = incoming.web_url.clone();
        self.updated_at = incoming.updated_at;
    }
}

/// A pull request: the unit of work inside a repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PullRequest {
    pub id: Uuid,
    pub github_id: i64,
    pub repository_github_id: i64,
    pub repository_full_name: String,
    pub number: i32,
    pub title: String,
    pub state: String,
    pub draft: bool,
    pub author_login: Option<String>,
    pub created_at_gh: Option<DateTime<Utc>>,
    pub updated_at_gh: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    pub merged_at: Option<DateTime<Utc>>,
    pub additions: Option<i32>,
    pub deletions: Option<i32>,
    pub changed_files: Option<i32>,
    pub commits_count: Option<i32>,
    pub merged_by: Option<String>,
    /// Set once reviews, comments, commits and detail fields have been written.
    pub details_synced_at: Option<DateTime<Utc>>,
    pub web_url: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PullRequest {
    /// Copy the mutable upstream fields of `incoming` onto an existing row.
    ///
    /// Detail fields and `details_synced_at` are absent from list payloads, so a
    /// missing incoming value keeps the stored one. Mirrors the `coalesce`
    /// columns of `upsert_pull_request`.
    pub fn merge_from(&mut self, incoming: &PullRequest) {
        self.repository_github_id = incoming.repository_github_id;
        self.repository_full_name = incoming.repository_full_name.clone();
        self.number = incoming.number;
        self.title = incoming.title.clone();
        self.state = incoming.state.clone();
        self.draft = incoming.draft;
        self.author_login = incoming.author_login.clone();
        self.created_at_gh = incoming.created_at_gh;
        self.updated_at_gh = incoming.updated_at_gh;
        self.closed_at = incoming.closed_at;
        self.merged_at = incoming.merged_at;
        self.additions = incoming.additions.or(self.additions);
        self.deletions = incoming.deletions.or(self.deletions);
        self.changed_files = incoming.changed_files.or(self.changed_files);
        self.commits_count = incoming.commits_count.or(self.commits_count);
        if incoming.merged_by.is_some() {
            self.merged_by = incoming.merged_by.clone();
        }
        self.details_synced_at = incoming.details_synced_at.or(self.details_synced_at);
        self.web_url = incoming.web_url.clone();
        self.updated_at = incoming.updated_at;
    }

    /// Fill in the fields only the single-item endpoint returns.
    pub fn apply_detail(&mut self, detail: &PullRequestDetail) {
        self.additions = detail.additions.or(self.additions);
        self.deletions = detail.deletions.or(self.deletions);
        self.changed_files = detail.changed_files.or(self.changed_files);
        self.commits_count = detail.commits_count.or(self.commits_count);
        if detail.merged_by.is_some() {
            self.merged_by = detail.merged_by.clone();
        }
    }
}

/// Fields of a pull request that the list endpoint does not return.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PullRequestDetail {
    pub additions: Option<i32>,
    pub deletions: Option<i32>,
    pub changed_files: Option<i32>,
    pub commits_count: Option<i32>,
    pub merged_by: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Review {
    pub id: Uuid,
    pub github_id: i64,
    pub pull_request_github_id: i64,
    pub reviewer_login: Option<String>,
    pub state: String,
    pub body: Option<String>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Review {
    /// In-memory counterpart of `upsert_review`.
    pub fn merge_from(&mut self, incoming: &Review) {
        self.pull_request_github_id = incoming.pull_request_github_id;
        self.reviewer_login = incoming.reviewer_login.clone();
        self.state = incoming.state.clone();
        self.body = incoming.body.clone();
        self.submitted_at = incoming.submitted_at;
        self.updated_at = incoming.updated_at;
    }
}

/// An inline review comment on a pull request diff.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewComment {
    pub id: Uuid,
    pub github_id: i64,
    pub pull_request_github_id: i64,
    pub author_login: Option<String>,
    pub body: String,
    pub path: Option<String>,
    pub created_at_gh: Option<DateTime<Utc>>,
    pub updated_at_gh: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ReviewComment {
    /// In-memory counterpart of `upsert_review_comment`.
    pub fn merge_from(&mut self, incoming: &ReviewComment) {
        self.pull_request_github_id = incoming.pull_request_github_id;
        self.author_login = incoming.author_login.clone();
        self.body = incoming.body.clone();
        self.path = incoming.path.clone();
        self.created_at_gh = incoming.created_at_gh;
        self.updated_at_gh = incoming.updated_at_gh;
        self.updated_at = incoming.updated_at;
    }
}

/// A commit, keyed by SHA. The pull-request link is only known when the
/// commit was listed through a pull request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Commit {
    pub id: Uuid,
    pub sha: String,
    pub repository_github_id: i64,
    pub pull_request_github_id: Option<i64>,
    pub author_login: Option<String>,
    pub author_email: Option<String>,
    pub message: String,
    pub committed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Commit {
    /// Copy the mutable upstream fields of `incoming` onto an existing row.
    ///
    /// An already-set pull-request link is never replaced by `None`, as in
    /// the `coalesce` of `upsert_commit`.
    pub fn merge_from(&mut self, incoming: &Commit) {
        self.repository_github_id = incoming.repository_github_id;
        if incoming.pull_request_github_id.is_some() {
            self.pull_request_github_id = incoming.pull_request_github_id;
        }
        self.author_login = incoming.author_login.clone();
        self.author_email = incoming.author_email.clone();
        self.message = incoming.message.clone();
        self.committed_at = incoming.committed_at;
        self.updated_at = incoming.updated_at;
    }
}

/// Rows written together in one transaction: either everything staged for
/// one repository during a sync, or one detail-backfill batch.
///
/// Parents are written before children: pull requests, then reviews,
/// comments and commits.
#[derive(Debug, Clone, Default)]
pub struct ActivityChangeset {
    pub pull_requests: Vec<PullRequest>,
    pub reviews: Vec<Review>,
    pub comments: Vec<ReviewComment>,
    pub commits: Vec<Commit>,
}

impl ActivityChangeset {
    pub fn len(&self) -> usize {
        self.pull_requests.len() + self.reviews.len() + self.comments.len() + self.commits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
