use std::collections::BTreeSet;

use chrono::Utc;

use cadence_db::activity::models::ActivityChangeset;
use cadence_db::activity::repositories::ActivityRepository;

use super::details::fetch_unit_details;
use super::report::{BackfillReport, SyncIssue};
use crate::connector::{SourceClient, SourceError};

/// Fills in details for units stored without them, in bounded batches.
///
/// `details_synced_at` is the only cursor: every batch re-selects the most
/// recently updated units that still lack it. Units that failed earlier in
/// the same run are left out of later selections so they cannot hold the
/// head of the backlog.
pub struct DetailBackfill<F, A> {
    make_client: F,
    activity: A,
}

impl<F, C, A> DetailBackfill<F, A>
where
    F: Fn() -> Result<C, SourceError> + Send + Sync,
    C: SourceClient,
    A: ActivityRepository,
{
    /// `make_client` is called once per batch so every batch starts with a
    /// fresh call budget.
    pub fn new(make_client: F, activity: A) -> Self {
        Self {
            make_client,
            activity,
        }
    }

    pub async fn run_batches(&self, batch_size: usize, max_batches: usize) -> BackfillReport {
        let mut report = BackfillReport::default();
        let mut failed: BTreeSet<i64> = BTreeSet::new();

        for batch in 1..=max_batches {
            let client = match (self.make_client)() {
                Ok(client) => client,
                Err(e) => {
                    tracing::error!(error = %e, "failed to build source client");
                    report.errors.push(SyncIssue::run(e));
                    break;
                }
            };

            let exclude: Vec<i64> = failed.iter().copied().collect();
            let pending = match self.activity.list_pending_details(batch_size, &exclude).await {
                Ok(pending) => pending,
                Err(e) => {
                    tracing::error!(error = %e, "failed to select pending units");
                    report.errors.push(SyncIssue::run(e));
                    break;
                }
            };
            if pending.is_empty() {
                tracing::info!(batch, "no units left without details");
                break;
            }

            let selected = pending.len();
            let detailed_at = Utc::now();
            let mut changeset = ActivityChangeset::default();
            let mut detailed = 0;
            let mut rate_limited = false;

            for unit in pending {
                match fetch_unit_details(&client, &unit).await {
                    Ok(details) => {
                        details.stage(unit, detailed_at, &mut changeset);
                        detailed += 1;
                    }
                    Err(e) if e.is_rate_limited() => {
                        tracing::warn!(batch, error = %e, "rate limit reached, ending batch early");
                        report
                            .errors
                            .push(SyncIssue::scope(&unit.repository_full_name, e));
                        rate_limited = true;
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(
                            repository = %unit.repository_full_name,
                            unit = unit.number,
                            error = %e,
                            "failed to fetch unit details, skipping"
                        );
                        report.errors.push(SyncIssue::scope(
                            &unit.repository_full_name,
                            format!("#{}: {e}", unit.number),
                        ));
                        failed.insert(unit.github_id);
                    }
                }
            }

            match self.activity.apply_changeset(&changeset).await {
                Ok(written) => {
                    report.batches += 1;
                    report.units_detailed += detailed;
                    report.items_synced += written;
                }
                Err(e) => {
                    tracing::error!(batch, error = %e, "backfill batch rolled back");
                    report.errors.push(SyncIssue::run(e));
                    break;
                }
            }

            tracing::info!(
                batch,
                selected,
                detailed,
                rate_limit = ?client.rate_limiter().stats(),
                "backfill batch committed"
            );

            // A fresh budget that cannot finish a single unit never will.
            if rate_limited && detailed == 0 {
                tracing::warn!(batch, "call budget too small to detail a unit, stopping");
                break;
            }
        }

        report
    }
}
