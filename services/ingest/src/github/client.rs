use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use reqwest::header::{HeaderMap, ACCEPT};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;

use cadence_common::error::{CadenceError, CadenceResult};
use cadence_db::activity::models::{
    Commit, PullRequest, PullRequestDetail, Repository, Review, ReviewComment,
};

use super::models::{
    ApiCommit, ApiPullRequest, ApiRateLimit, ApiRepository, ApiReview, ApiReviewComment,
};
use crate::connector::{RemoteQuota, SourceClient, SourceError, UnitState};
use crate::rate_limit::{RateLimiter, RateLimiterConfig};

pub const SOURCE_NAME: &str = "github";

const DEFAULT_BASE_URL: &str = "https://api.github.com";
const API_VERSION: &str = "2022-11-28";
const USER_AGENT: &str = concat!("cadence-ingest/", env!("CARGO_PKG_VERSION"));
const MAX_RETRY_AFTER_SECS: u64 = 60;
const MAX_RETRIES: u32 = 10;
const MAX_BACKOFF_SECS: u64 = 30;

#[derive(Debug, Clone)]
pub struct GitHubClientConfig {
    pub base_url: String,
    pub token: String,
    /// Explicit `owner/name` scopes.
    pub repositories: Vec<String>,
    /// Every repository of this organization is also a scope.
    pub organization: Option<String>,
    pub per_page: u32,
    pub max_pages: u32,
    pub max_retries: u32,
    pub timeout_secs: u64,
}

impl GitHubClientConfig {
    /// Load GitHub config from environment.
    ///
    /// Returns `Ok(None)` if `GITHUB_TOKEN` is missing. Returns `Err` if a token
    /// is set but neither `GITHUB_REPOSITORIES` nor `GITHUB_ORG` names a scope.
    pub fn from_env() -> CadenceResult<Option<Self>> {
        let token = match non_blank_var("GITHUB_TOKEN") {
            Some(v) => v,
            None => return Ok(None),
        };

        let repositories = match non_blank_var("GITHUB_REPOSITORIES") {
            Some(raw) => parse_csv_repositories(&raw)?,
            None => Vec::new(),
        };
        let organization = non_blank_var("GITHUB_ORG");

        if repositories.is_empty() && organization.is_none() {
            return Err(CadenceError::Config(
                "GITHUB_REPOSITORIES or GITHUB_ORG is required when GITHUB_TOKEN is set"
                    .to_string(),
            ));
        }

        let base_url =
            non_blank_var("GITHUB_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

        Ok(Some(Self {
            base_url,
            token,
            repositories,
            organization,
            per_page: parse_var("GITHUB_PER_PAGE", 100).clamp(1, 100),
            max_pages: parse_var("GITHUB_MAX_PAGES", 50).max(1),
            max_retries: parse_var("GITHUB_MAX_RETRIES", 3).min(MAX_RETRIES),
            timeout_secs: parse_var("GITHUB_TIMEOUT_SECS", 30),
        }))
    }

    pub fn has_scopes(&self) -> bool {
        !self.repositories.is_empty() || self.organization.is_some()
    }
}

fn non_blank_var(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parse_var<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Parse a comma-separated list of `owner/name` repositories, dropping blanks
/// and duplicates.
pub fn parse_csv_repositories(raw: &str) -> CadenceResult<Vec<String>> {
    let mut seen = HashSet::new();
    let mut repos = Vec::new();

    for entry in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let valid = matches!(
            entry.split_once('/'),
            Some((owner, name)) if !owner.is_empty() && !name.is_empty() && !name.contains('/')
        );
        if !valid {
            return Err(CadenceError::Config(format!(
                "invalid repository '{entry}', expected owner/name"
            )));
        }
        if seen.insert(entry.to_ascii_lowercase()) {
            repos.push(entry.to_string());
        }
    }

    Ok(repos)
}

fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Map a non-2xx answer to an empty result; keep real failures.
fn no_data_as_empty<T: Default>(
    result: Result<T, SourceError>,
    what: &str,
) -> Result<T, SourceError> {
    match result {
        Err(e) if e.is_no_data() => {
            tracing::debug!(what, error = %e, "no data from upstream");
            Ok(T::default())
        }
        other => other,
    }
}

/// Keep units whose update time lies inside `[since, until]` and report
/// whether the page ran past `since` (pages are sorted newest-updated first).
pub(crate) fn filter_window(
    units: Vec<PullRequest>,
    since: Option<DateTime<Utc>>,
    until: Option<DateTime<Utc>>,
) -> (Vec<PullRequest>, bool) {
    let past_since = match (since, units.last().and_then(|u| u.updated_at_gh)) {
        (Some(since), Some(last)) => last < since,
        _ => false,
    };

    let kept = units
        .into_iter()
        .filter(|u| match u.updated_at_gh {
            Some(t) => since.map_or(true, |s| t >= s) && until.map_or(true, |u| t <= u),
            None => true,
        })
        .collect();

    (kept, past_since)
}

pub struct GitHubClient {
    client: Client,
    config: GitHubClientConfig,
    limiter: RateLimiter,
}

impl GitHubClient {
    pub fn new(config: GitHubClientConfig, limits: RateLimiterConfig) -> Result<Self, reqwest::Error> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(USER_AGENT)
            .build()?;
        Ok(Self {
            client,
            config,
            limiter: RateLimiter::new(limits),
        })
    }

    /// For testing: create a client pointing at a specific base URL (e.g., wiremock).
    #[cfg(test)]
    pub fn with_base_url(mut self, base_url: &str) -> Self {
        self.config.base_url = base_url.to_string();
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn get(&self, url: &str) -> RequestBuilder {
        self.client
            .get(url)
            .bearer_auth(&self.config.token)
            .header(ACCEPT, "application/vnd.github+json")
            .header("X-GitHub-Api-Version", API_VERSION)
    }

    /// Feed quota headers back into the limiter. Returns the remaining count.
    fn record_rate_limit(&self, headers: &HeaderMap) -> Option<u32> {
        let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());
        let remaining = header("x-ratelimit-remaining").and_then(|v| v.parse::<u32>().ok());
        let limit = header("x-ratelimit-limit").and_then(|v| v.parse::<u32>().ok());
        let reset_at = header("x-ratelimit-reset")
            .and_then(|v| v.parse::<i64>().ok())
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single());

        self.limiter.update_from_response(remaining, reset_at, limit);
        remaining
    }

    /// GET `path`, retrying transient errors. Every attempt is admitted by the
    /// rate limiter first.
    async fn request_with_retry<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, SourceError> {
        let url = self.url(path);
        let mut last_error = String::new();
        let mut last_status = None;

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                let backoff_secs = 1u64
                    .checked_shl(attempt)
                    .map_or(MAX_BACKOFF_SECS, |secs| secs.min(MAX_BACKOFF_SECS));
                tracing::warn!(attempt, backoff_secs, path, "retrying after backoff");
                tokio::time::sleep(Duration::from_secs(backoff_secs)).await;
            }

            self.limiter.acquire().await?;

            let response = match self.get(&url).query(query).send().await {
                Ok(resp) => resp,
                Err(e) => {
                    last_error = e.to_string();
                    last_status = None;
                    if e.is_timeout() || e.is_connect() {
                        continue;
                    }
                    return Err(SourceError::Request(e));
                }
            };

            let remaining = self.record_rate_limit(response.headers());
            let status = response.status();

            if status.is_success() {
                return response.json::<T>().await.map_err(SourceError::Request);
            }

            // 429, or 403 once the primary quota is spent. The limiter pauses
            // on the next acquire; honor Retry-After for secondary limits.
            if status == StatusCode::TOO_MANY_REQUESTS
                || (status == StatusCode::FORBIDDEN && remaining == Some(0))
            {
                if let Some(retry_after) = response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|v| v.parse::<u64>().ok())
                {
                    let wait = std::cmp::min(retry_after, MAX_RETRY_AFTER_SECS);
                    tracing::warn!(wait, "rate-limited upstream, waiting Retry-After");
                    tokio::time::sleep(Duration::from_secs(wait)).await;
                }
                last_error = format!("{status}: rate limited");
                last_status = Some(status);
                continue;
            }

            if status.is_server_error() {
                let body = response.text().await.unwrap_or_default();
                last_error = format!("{status}: {body}");
                last_status = Some(status);
                continue;
            }

            let body = response.text().await.unwrap_or_default();
            return Err(SourceError::Http { status, body });
        }

        Err(SourceError::MaxRetriesExceeded {
            attempts: self.config.max_retries + 1,
            last_error,
            last_status,
        })
    }

    fn page_query(&self, page: u32) -> Vec<(&'static str, String)> {
        vec![
            ("per_page", self.config.per_page.to_string()),
            ("page", page.to_string()),
        ]
    }

    /// Lazily page through a repository's pull requests.
    pub fn pull_request_pages<'a>(
        &'a self,
        repo: &'a Repository,
        state: UnitState,
        since: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
    ) -> PullRequestPages<'a> {
        PullRequestPages {
            client: self,
            repo,
            state,
            since,
            until,
            next_page: 1,
            done: false,
        }
    }

    async fn fetch_repository(&self, full_name: &str) -> Result<Option<Repository>, SourceError> {
        let repo: Option<ApiRepository> = no_data_as_empty(
            self.request_with_retry(&format!("/repos/{full_name}"), &[])
                .await
                .map(Some),
            "repository",
        )?;
        Ok(repo.map(|r| r.to_record()))
    }

    async fn list_org_repositories(&self, org: &str) -> Result<Vec<Repository>, SourceError> {
        let mut repos = Vec::new();
        for page in 1..=self.config.max_pages {
            let mut query = self.page_query(page);
            query.push(("type", "all".to_string()));

            let batch: Vec<ApiRepository> = no_data_as_empty(
                self.request_with_retry(&format!("/orgs/{org}/repos"), &query)
                    .await,
                "organization repositories",
            )?;
            if batch.is_empty() {
                break;
            }
            repos.extend(batch.iter().map(ApiRepository::to_record));
        }
        Ok(repos)
    }

    fn pull_path(unit: &PullRequest, suffix: &str) -> String {
        format!(
            "/repos/{}/pulls/{}{}",
            unit.repository_full_name, unit.number, suffix
        )
    }

    fn single_page_query(&self) -> Vec<(&'static str, String)> {
        vec![("per_page", self.config.per_page.to_string())]
    }
}

/// Finite, lazily fetched sequence of pull request pages for one repository.
///
/// Ends on an empty page, after `max_pages`, or once a page's last item was
/// updated before `since`. `until` filters items but never ends paging.
pub struct PullRequestPages<'a> {
    client: &'a GitHubClient,
    repo: &'a Repository,
    state: UnitState,
    since: Option<DateTime<Utc>>,
    until: Option<DateTime<Utc>>,
    next_page: u32,
    done: bool,
}

impl PullRequestPages<'_> {
    pub async fn next_page(&mut self) -> Result<Option<Vec<PullRequest>>, SourceError> {
        if self.done {
            return Ok(None);
        }
        if self.next_page > self.client.config.max_pages {
            tracing::warn!(
                repository = %self.repo.full_name,
                max_pages = self.client.config.max_pages,
                "page limit reached, stopping"
            );
            self.done = true;
            return Ok(None);
        }

        let mut query = self.client.page_query(self.next_page);
        query.push(("state", self.state.as_str().to_string()));
        query.push(("sort", "updated".to_string()));
        query.push(("direction", "desc".to_string()));

        let page: Vec<ApiPullRequest> = no_data_as_empty(
            self.client
                .request_with_retry(&format!("/repos/{}/pulls", self.repo.full_name), &query)
                .await,
            "pull requests",
        )?;
        self.next_page += 1;

        if page.is_empty() {
            self.done = true;
            return Ok(None);
        }

        let records = page.iter().map(|pr| pr.to_record(self.repo)).collect();
        let (kept, past_since) = filter_window(records, self.since, self.until);
        if past_since {
            self.done = true;
        }
        Ok(Some(kept))
    }
}

#[async_trait]
impl SourceClient for GitHubClient {
    fn source_name(&self) -> &str {
        SOURCE_NAME
    }

    fn has_scopes(&self) -> bool {
        self.config.has_scopes()
    }

    fn rate_limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    async fn list_scopes(&self) -> Result<Vec<Repository>, SourceError> {
        let mut seen = HashSet::new();
        let mut scopes = Vec::new();

        for full_name in &self.config.repositories {
            match self.fetch_repository(full_name).await? {
                Some(repo) => {
                    if seen.insert(repo.github_id) {
                        scopes.push(repo);
                    }
                }
                None => {
                    tracing::warn!(repository = %full_name, "repository not accessible, skipping");
                }
            }
        }

        if let Some(org) = &self.config.organization {
            for repo in self.list_org_repositories(org).await? {
                if seen.insert(repo.github_id) {
                    scopes.push(repo);
                }
            }
        }

        tracing::info!(count = scopes.len(), "resolved github repositories");
        Ok(scopes)
    }

    async fn list_units(
        &self,
        scope: &Repository,
        state: UnitState,
        since: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
    ) -> Result<Vec<PullRequest>, SourceError> {
        let mut pages = self.pull_request_pages(scope, state, since, until);
        let mut units = Vec::new();
        while let Some(page) = pages.next_page().await? {
            units.extend(page);
        }
        Ok(units)
    }

    async fn list_scope_commits(
        &self,
        scope: &Repository,
        since: Option<DateTime<Utc>>,
        until: Option<DateTime<Utc>>,
    ) -> Result<Vec<Commit>, SourceError> {
        let path = format!("/repos/{}/commits", scope.full_name);
        let mut commits = Vec::new();

        for page in 1..=self.config.max_pages {
            let mut query = self.page_query(page);
            if let Some(since) = since {
                query.push(("since", format_timestamp(since)));
            }
            if let Some(until) = until {
                query.push(("until", format_timestamp(until)));
            }

            let batch: Vec<ApiCommit> =
                no_data_as_empty(self.request_with_retry(&path, &query).await, "commits")?;
            if batch.is_empty() {
                break;
            }
            commits.extend(batch.iter().map(|c| c.to_record(scope.github_id, None)));
        }
        Ok(commits)
    }

    async fn list_reviews(&self, unit: &PullRequest) -> Result<Vec<Review>, SourceError> {
        let reviews: Vec<ApiReview> = no_data_as_empty(
            self.request_with_retry(&Self::pull_path(unit, "/reviews"), &self.single_page_query())
                .await,
            "reviews",
        )?;
        Ok(reviews.iter().map(|r| r.to_record(unit)).collect())
    }

    async fn list_review_comments(
        &self,
        unit: &PullRequest,
    ) -> Result<Vec<ReviewComment>, SourceError> {
        let comments: Vec<ApiReviewComment> = no_data_as_empty(
            self.request_with_retry(&Self::pull_path(unit, "/comments"), &self.single_page_query())
                .await,
            "review comments",
        )?;
        Ok(comments.iter().map(|c| c.to_record(unit)).collect())
    }

    async fn list_unit_commits(&self, unit: &PullRequest) -> Result<Vec<Commit>, SourceError> {
        let commits: Vec<ApiCommit> = no_data_as_empty(
            self.request_with_retry(&Self::pull_path(unit, "/commits"), &self.single_page_query())
                .await,
            "pull request commits",
        )?;
        Ok(commits
            .iter()
            .map(|c| c.to_record(unit.repository_github_id, Some(unit.github_id)))
            .collect())
    }

    async fn fetch_unit_detail(
        &self,
        unit: &PullRequest,
    ) -> Result<Option<PullRequestDetail>, SourceError> {
        let detail: Option<ApiPullRequest> = no_data_as_empty(
            self.request_with_retry(&Self::pull_path(unit, ""), &[])
                .await
                .map(Some),
            "pull request detail",
        )?;
        Ok(detail.map(|d| d.to_detail()))
    }

    async fn test_connection(&self) -> Result<RemoteQuota, SourceError> {
        let response = self.get(&self.url("/rate_limit")).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SourceError::Http { status, body });
        }

        let body = response.json::<ApiRateLimit>().await?;
        let core = body.resources.core;
        Ok(RemoteQuota {
            limit: core.limit,
            remaining: core.remaining,
            reset_at: core.reset_at(),
        })
    }
}
