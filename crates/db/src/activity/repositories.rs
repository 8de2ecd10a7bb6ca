use async_trait::async_trait;

use crate::activity::models::{ActivityChangeset, PullRequest, Repository};
use cadence_common::error::CadenceResult;

#[async_trait]
pub trait ActivityRepository: Send + Sync {
    /// Insert or update repositories keyed by `github_id`, in one transaction.
    /// Returns the number of rows written.
    async fn upsert_repositories(&self, repositories: &[Repository]) -> CadenceResult<usize>;

    /// Write every row of `changeset` in one transaction, parents first.
    /// Nothing is persisted if any row fails.
    async fn apply_changeset(&self, changeset: &ActivityChangeset) -> CadenceResult<usize>;

    /// Pull requests whose `details_synced_at` is still null, most recently
    /// updated upstream first. Rows whose `github_id` is in `exclude` are
    /// skipped.
    async fn list_pending_details(
        &self,
        limit: usize,
        exclude: &[i64],
    ) -> CadenceResult<Vec<PullRequest>>;
}
