use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use cadence_db::activity::models::{
    Commit, PullRequest, PullRequestDetail, Repository, Review, ReviewComment,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiUser {
    pub login: String,
}

/// `GET /repos/{owner}/{repo}` and `GET /orgs/{org}/repos` entries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiRepository {
    pub id: i64,
    pub full_name: String,
    pub default_branch: Option<String>,
    #[serde(default)]
    pub private: bool,
    #[serde(default)]
    pub archived: bool,
    pub html_url: String,
}

impl ApiRepository {
    pub fn to_record(&self) -> Repository {
        let now = Utc::now();
        Repository {
            id: Uuid::new_v4(),
            github_id: self.id,
            full_name: self.full_name.clone(),
            default_branch: self.default_branch.clone(),
            is_private: self.private,
            is_archived: self.archived,
            web_url: self.html_url.clone(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// A pull request from either the list endpoint or the single-item endpoint.
/// Diff stats and `merged_by` are only present on the latter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiPullRequest {
    pub id: i64,
    pub number: i32,
    pub title: String,
    pub state: String,
    #[serde(default)]
    pub draft: bool,
    pub user: Option<ApiUser>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub closed_at: Option<DateTime<Utc>>,
    pub merged_at: Option<DateTime<Utc>>,
    pub html_url: String,
    pub additions: Option<i32>,
    pub deletions: Option<i32>,
    pub changed_files: Option<i32>,
    pub commits: Option<i32>,
    pub merged_by: Option<ApiUser>,
}

impl ApiPullRequest {
    /// GitHub reports merged pull requests as `closed`; store them as `merged`.
    pub fn normalized_state(&self) -> String {
        if self.merged_at.is_some() {
            "merged".to_string()
        } else {
            self.state.clone()
        }
    }

    pub fn to_record(&self, repo: &Repository) -> PullRequest {
        let now = Utc::now();
        PullRequest {
            id: Uuid::new_v4(),
            github_id: self.id,
            repository_github_id: repo.github_id,
            repository_full_name: repo.full_name.clone(),
            number: self.number,
            title: self.title.clone(),
            state: self.normalized_state(),
            draft: self.draft,
            author_login: self.user.as_ref().map(|u| u.login.clone()),
            created_at_gh: self.created_at,
            updated_at_gh: self.updated_at,
            closed_at: self.closed_at,
            merged_at: self.merged_at,
            additions: self.additions,
            deletions: self.deletions,
            changed_files: self.changed_files,
            commits_count: self.commits,
            merged_by: self.merged_by.as_ref().map(|u| u.login.clone()),
            details_synced_at: None,
            web_url: self.html_url.clone(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn to_detail(&self) -> PullRequestDetail {
        PullRequestDetail {
            additions: self.additions,
            deletions: self.deletions,
            changed_files: self.changed_files,
            commits_count: self.commits,
            merged_by: self.merged_by.as_ref().map(|u| u.login.clone()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiReview {
    pub id: i64,
    pub user: Option<ApiUser>,
    pub state: String,
    pub body: Option<String>,
    pub submitted_at: Option<DateTime<Utc>>,
}

impl ApiReview {
    pub fn to_record(&self, pr: &PullRequest) -> Review {
        let now = Utc::now();
        Review {
            id: Uuid::new_v4(),
            github_id: self.id,
            pull_request_github_id: pr.github_id,
            reviewer_login: self.user.as_ref().map(|u| u.login.clone()),
            state: self.state.clone(),
            body: self.body.clone().filter(|b| !b.is_empty()),
            submitted_at: self.submitted_at,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiReviewComment {
    pub id: i64,
    pub user: Option<ApiUser>,
    #[serde(default)]
    pub body: String,
    pub path: Option<String>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl ApiReviewComment {
    pub fn to_record(&self, pr: &PullRequest) -> ReviewComment {
        let now = Utc::now();
        ReviewComment {
            id: Uuid::new_v4(),
            github_id: self.id,
            pull_request_github_id: pr.github_id,
            author_login: self.user.as_ref().map(|u| u.login.clone()),
            body: self.body.clone(),
            path: self.path.clone(),
            created_at_gh: self.created_at,
            updated_at_gh: self.updated_at,
            created_at: now,
            updated_at: now,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiGitActor {
    pub name: Option<String>,
    pub email: Option<String>,
    pub date: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiGitCommit {
    #[serde(default)]
    pub message: String,
    pub author: Option<ApiGitActor>,
}

/// Entry of `GET /repos/{owner}/{repo}/commits` or `.../pulls/{n}/commits`.
/// `author` is the linked GitHub account and is null for unknown emails.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiCommit {
    pub sha: String,
    pub commit: ApiGitCommit,
    pub author: Option<ApiUser>,
}

impl ApiCommit {
    pub fn to_record(&self, repository_github_id: i64, pull_request_github_id: Option<i64>) -> Commit {
        let now = Utc::now();
        let git_author = self.commit.author.as_ref();
        Commit {
            id: Uuid::new_v4(),
            sha: self.sha.clone(),
            repository_github_id,
            pull_request_github_id,
            author_login: self.author.as_ref().map(|u| u.login.clone()),
            author_email: git_author.and_then(|a| a.email.clone()),
            message: self.commit.message.clone(),
            committed_at: git_author.and_then(|a| a.date),
            created_at: now,
            updated_at: now,
        }
    }
}

/// `GET /rate_limit`.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiRateLimit {
    pub resources: ApiRateLimitResources,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiRateLimitResources {
    pub core: ApiQuota,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiQuota {
    pub limit: u32,
    pub remaining: u32,
    /// Epoch seconds.
    pub reset: i64,
}

impl ApiQuota {
    pub fn reset_at(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(self.reset, 0).single()
    }
}
