use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::Serialize;

use cadence_db::activity::models::{
    Commit, PullRequest, PullRequestDetail, Repository, Review, ReviewComment,
};

use crate::rate_limit::{RateLimitExceeded, RateLimiter};

pub use cadence_config::UnitState;

/// Outcome of a single upstream call that did not produce data.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// A local call ceiling was hit before the request was sent.
    #[error(transparent)]
    RateLimited(#[from] RateLimitExceeded),

    #[error("HTTP {status}: {body}")]
    Http { status: StatusCode, body: String },

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("max retries exceeded after {attempts} attempts: {last_error}")]
    MaxRetriesExceeded {
        attempts: u32,
        last_error: String,
        last_status: Option<StatusCode>,
    },
}

impl SourceError {
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, SourceError::RateLimited(_))
    }

    /// The upstream answered, just not with a 2xx. Listing calls treat this
    /// as "nothing here" rather than a failure.
    pub fn is_no_data(&self) -> bool {
        match self {
            SourceError::Http { .. } => true,
            SourceError::MaxRetriesExceeded { last_status, .. } => last_status.is_some(),
            _ => false,
        }
    }
}

/// Upstream quota as reported by a connectivity probe.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RemoteQuota {
    pub limit: u32,
    pub remaining: u32,
    pub reset_at: Option<DateTime<Utc>>,
}

/// Typed access to one upstream source. Every call except `test_connection`
/// goes through the client's rate limiter first.
///
/// Listing calls treat a non-2xx answer as an empty result; only transport
/// failures and local ceilings come back as `Err`.
#[async_trait]
pub trait SourceClient: Send + Sync {
    fn source_name(&self) -> &str;

    /// `false` when no scopes are configured, making every sync a no-op.
    fn has_scopes(&self) -> bool;

    fn rate_limiter(&self) -> &RateLimiter;

    /// Every configured scope that exists upstream, deduplicated.
    async fn list_scopes(&self) -> Result<Vec<Repository>, SourceError>;

    /// Units in `scope`, newest-updated first. Stops paging once a page ends
    /// before `since`; `until` only filters within each page.
    async fn list_units(
        &self,
        scope: &Repository,
        state: UnitState,
        since: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
    ) -> Result<Vec<PullRequest>, SourceError>;

    /// Commits on the scope's default branch, without a unit link.
    async fn list_scope_commits(
        &self,
        scope: &Repository,
        since: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
    ) -> Result<Vec<Commit>, SourceError>;

    async fn list_reviews(&self, unit: &PullRequest) -> Result<Vec<Review>, SourceError>;

    async fn list_review_comments(
        &self,
        unit: &PullRequest,
    ) -> Result<Vec<ReviewComment>, SourceError>;

    async fn list_unit_commits(&self, unit: &PullRequest) -> Result<Vec<Commit>, SourceError>;

    /// `Ok(None)` when the upstream has no detail for this unit.
    async fn fetch_unit_detail(
        &self,
        unit: &PullRequest,
    ) -> Result<Option<PullRequestDetail>, SourceError>;

    /// Connectivity probe. Does not count against the rate limiter.
    async fn test_connection(&self) -> Result<RemoteQuota, SourceError>;
}
