use async_trait::async_trait;
use sqlx::{postgres::PgRow, PgPool, Postgres, Row, Transaction};

use crate::activity::models::{
    ActivityChangeset, Commit, PullRequest, Repository, Review, ReviewComment,
};
use crate::activity::repositories::ActivityRepository;
use cadence_common::error::{CadenceError, CadenceResult};

#[derive(Clone)]
pub struct PgActivityRepository {
    pool: PgPool,
}

impl PgActivityRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn begin(&self) -> CadenceResult<Transaction<'_, Postgres>> {
        self.pool
            .begin()
            .await
            .map_err(|e| CadenceError::Database(e.to_string()))
    }
}

// ── Upsert helpers ──────────────────────────────────────────────────

pub async fn upsert_repository(
    tx: &mut Transaction<'_, Postgres>,
    r: &Repository,
) -> CadenceResult<()> {
    sqlx::query(
        "insert into github_repositories
         (id, github_id, full_name, default_branch, is_private, is_archived, web_url)
         values ($1, $2, $3, $4, $5, $6, $7)
         on conflict (github_id) do update set
           full_name = excluded.full_name,
           default_branch = excluded.default_branch,
           is_private = excluded.is_private,
           is_archived = excluded.is_archived,
           web_url = excluded.web_url,
           updated_at = now()",
    )
    .bind(r.id)
    .bind(r.github_id)
    .bind(&r.full_name)
    .bind(&r.default_branch)
    .bind(r.is_private)
    .bind(r.is_archived)
    .bind(&r.web_url)
    .execute(&mut **tx)
    .await
    .map_err(|e| CadenceError::Database(e.to_string()))?;
    Ok(())
}

/// Detail columns and `details_synced_at` are coalesced so a list payload
/// never erases what a detail fetch wrote.
pub async fn upsert_pull_request(
    tx: &mut Transaction<'_, Postgres>,
    pr: &PullRequest,
) -> CadenceResult<()> {
    sqlx::query(
        "insert into github_pull_requests
         (id, github_id, repository_github_id, repository_full_name, number, title, state,
          draft, author_login, created_at_gh, updated_at_gh, closed_at, merged_at,
          additions, deletions, changed_files, commits_count, merged_by, details_synced_at,
          web_url)
         values ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17,
                 $18, $19, $20)
         on conflict (github_id) do update set
           repository_github_id = excluded.repository_github_id,
           repository_full_name = excluded.repository_full_name,
           number = excluded.number,
           title = excluded.title,
           state = excluded.state,
           draft = excluded.draft,
           author_login = excluded.author_login,
           created_at_gh = excluded.created_at_gh,
           updated_at_gh = excluded.updated_at_gh,
           closed_at = excluded.closed_at,
           merged_at = excluded.merged_at,
           additions = coalesce(excluded.additions, github_pull_requests.additions),
           deletions = coalesce(excluded.deletions, github_pull_requests.deletions),
           changed_files = coalesce(excluded.changed_files, github_pull_requests.changed_files),
           commits_count = coalesce(excluded.commits_count, github_pull_requests.commits_count),
           merged_by = coalesce(excluded.merged_by, github_pull_requests.merged_by),
           details_synced_at = coalesce(excluded.details_synced_at, github_pull_requests.details_synced_at),
           web_url = excluded.web_url,
           updated_at = now()",
    )
    .bind(pr.id)
    .bind(pr.github_id)
    .bind(pr.repository_github_id)
    .bind(&pr.repository_full_name)
    .bind(pr.number)
    .bind(&pr.title)
    .bind(&pr.state)
    .bind(pr.draft)
    .bind(&pr.author_login)
    .bind(pr.created_at_gh)
    .bind(pr.updated_at_gh)
    .bind(pr.closed_at)
    .bind(pr.merged_at)
    .bind(pr.additions)
    .bind(pr.deletions)
    .bind(pr.changed_files)
    .bind(pr.commits_count)
    .bind(&pr.merged_by)
    .bind(pr.details_synced_at)
    .bind(&pr.web_url)
    .execute(&mut **tx)
    .await
    .map_err(|e| CadenceError::Database(e.to_string()))?;
    Ok(())
}

pub async fn upsert_review(tx: &mut Transaction<'_, Postgres>, r: &Review) -> CadenceResult<()> {
    sqlx::query(
        "insert into github_reviews
         (id, github_id, pull_request_github_id, reviewer_login, state, body, submitted_at)
         values ($1, $2, $3, $4, $5, $6, $7)
         on conflict (github_id) do update set
           pull_request_github_id = excluded.pull_request_github_id,
           reviewer_login = excluded.reviewer_login,
           state = excluded.state,
           body = excluded.body,
           submitted_at = excluded.submitted_at,
           updated_at = now()",
    )
    .bind(r.id)
    .bind(r.github_id)
    .bind(r.pull_request_github_id)
    .bind(&r.reviewer_login)
    .bind(&r.state)
    .bind(&r.body)
    .bind(r.submitted_at)
    .execute(&mut **tx)
    .await
    .map_err(|e| CadenceError::Database(e.to_string()))?;
    Ok(())
}

pub async fn upsert_review_comment(
    tx: &mut Transaction<'_, Postgres>,
    c: &ReviewComment,
) -> CadenceResult<()> {
    sqlx::query(
        "insert into github_review_comments
         (id, github_id, pull_request_github_id, author_login, body, path,
          created_at_gh, updated_at_gh)
         values ($1, $2, $3, $4, $5, $6, $7, $8)
         on conflict (github_id) do update set
           pull_request_github_id = excluded.pull_request_github_id,
           author_login = excluded.author_login,
           body = excluded.body,
           path = excluded.path,
           created_at_gh = excluded.created_at_gh,
           updated_at_gh = excluded.updated_at_gh,
           updated_at = now()",
    )
    .bind(c.id)
    .bind(c.github_id)
    .bind(c.pull_request_github_id)
    .bind(&c.author_login)
    .bind(&c.body)
    .bind(&c.path)
    .bind(c.created_at_gh)
    .bind(c.updated_at_gh)
    .execute(&mut **tx)
    .await
    .map_err(|e| CadenceError::Database(e.to_string()))?;
    Ok(())
}

/// An existing pull-request link survives an incoming row without one.
pub async fn upsert_commit(tx: &mut Transaction<'_, Postgres>, c: &Commit) -> CadenceResult<()> {
    sqlx::query(
        "insert into github_commits
         (id, sha, repository_github_id, pull_request_github_id, author_login, author_email,
          message, committed_at)
         values ($1, $2, $3, $4, $5, $6, $7, $8)
         on conflict (sha) do update set
           repository_github_id = excluded.repository_github_id,
           pull_request_github_id = coalesce(excluded.pull_request_github_id, github_commits.pull_request_github_id),
           author_login = excluded.author_login,
           author_email = excluded.author_email,
           message = excluded.message,
           committed_at = excluded.committed_at,
           updated_at = now()",
    )
    .bind(c.id)
    .bind(&c.sha)
    .bind(c.repository_github_id)
    .bind(c.pull_request_github_id)
    .bind(&c.author_login)
    .bind(&c.author_email)
    .bind(&c.message)
    .bind(c.committed_at)
    .execute(&mut **tx)
    .await
    .map_err(|e| CadenceError::Database(e.to_string()))?;
    Ok(())
}

#[async_trait]
impl ActivityRepository for PgActivityRepository {
    async fn upsert_repositories(&self, repositories: &[Repository]) -> CadenceResult<usize> {
        let mut tx = self.begin().await?;
        for r in repositories {
            upsert_repository(&mut tx, r).await?;
        }
        tx.commit()
            .await
            .map_err(|e| CadenceError::Database(e.to_string()))?;
        Ok(repositories.len())
    }

    async fn apply_changeset(&self, changeset: &ActivityChangeset) -> CadenceResult<usize> {
        let mut tx = self.begin().await?;

        for pr in &changeset.pull_requests {
            upsert_pull_request(&mut tx, pr).await?;
        }
        for r in &changeset.reviews {
            upsert_review(&mut tx, r).await?;
        }
        for c in &changeset.comments {
            upsert_review_comment(&mut tx, c).await?;
        }
        for c in &changeset.commits {
            upsert_commit(&mut tx, c).await?;
        }

        tx.commit()
            .await
            .map_err(|e| CadenceError::Database(e.to_string()))?;
        Ok(changeset.len())
    }

    async fn list_pending_details(
        &self,
        limit: usize,
        exclude: &[i64],
    ) -> CadenceResult<Vec<PullRequest>> {
        let rows = sqlx::query(
            "select id, github_id, repository_github_id, repository_full_name, number, title,
                    state, draft, author_login, created_at_gh, updated_at_gh, closed_at,
                    merged_at, additions, deletions, changed_files, commits_count, merged_by,
                    details_synced_at, web_url, created_at, updated_at
             from github_pull_requests
             where details_synced_at is null
               and github_id <> all($2)
             order by updated_at_gh desc nulls last, github_id desc
             limit $1",
        )
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .bind(exclude)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| CadenceError::Database(e.to_string()))?;

        Ok(rows.iter().map(map_pull_request_row).collect())
    }
}

fn map_pull_request_row(row: &PgRow) -> PullRequest {
    PullRequest {
        id: row.get("id"),
        github_id: row.get("github_id"),
        repository_github_id: row.get("repository_github_id"),
        repository_full_name: row.get("repository_full_name"),
        number: row.get("number"),
        title: row.get("title"),
        state: row.get("state"),
        draft: row.get("draft"),
        author_login: row.get("author_login"),
        created_at_gh: row.get("created_at_gh"),
        updated_at_gh: row.get("updated_at_gh"),
        closed_at: row.get("closed_at"),
        merged_at: row.get("merged_at"),
        additions: row.get("additions"),
        deletions: row.get("deletions"),
        changed_files: row.get("changed_files"),
        commits_count: row.get("commits_count"),
        merged_by: row.get("merged_by"),
        details_synced_at: row.get("details_synced_at"),
        web_url: row.get("web_url"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}
