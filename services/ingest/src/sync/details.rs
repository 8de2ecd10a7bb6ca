use chrono::{DateTime, Utc};

use cadence_db::activity::models::{
    ActivityChangeset, Commit, PullRequest, PullRequestDetail, Review, ReviewComment,
};

use crate::connector::{SourceClient, SourceError};

/// Everything fetched for one unit beyond its list payload.
#[derive(Debug, Default)]
pub struct UnitDetails {
    pub reviews: Vec<Review>,
    pub comments: Vec<ReviewComment>,
    pub commits: Vec<Commit>,
    pub detail: Option<PullRequestDetail>,
}

impl UnitDetails {
    /// Stage `unit` with its details and mark it as detailed at `synced_at`.
    pub fn stage(self, mut unit: PullRequest, synced_at: DateTime<Utc>, changeset: &mut ActivityChangeset) {
        if let Some(detail) = &self.detail {
            unit.apply_detail(detail);
        }
        unit.details_synced_at = Some(synced_at);

        changeset.pull_requests.push(unit);
        changeset.reviews.extend(self.reviews);
        changeset.comments.extend(self.comments);
        changeset.commits.extend(self.commits);
    }
}

/// Fetch sub-records and detail for one unit. Any `Err` means the unit must
/// not be marked as detailed.
pub async fn fetch_unit_details<C>(client: &C, unit: &PullRequest) -> Result<UnitDetails, SourceError>
where
    C: SourceClient + ?Sized,
{
    let reviews = client.list_reviews(unit).await?;
    let comments = client.list_review_comments(unit).await?;
    let commits = client.list_unit_commits(unit).await?;
    let detail = client.fetch_unit_detail(unit).await?;

    Ok(UnitDetails {
        reviews,
        comments,
        commits,
        detail,
    })
}
