mod connector;
mod github;
mod rate_limit;
mod sync;
#[cfg(test)]
mod test_support;

use anyhow::Context;
use cadence_common::ServiceInfo;
use cadence_config::{init_tracing, AppConfig, SyncMode, SyncSettings};
use cadence_db::activity::pg_repository::PgActivityRepository;
use cadence_db::sync::pg_repository::PgSyncCheckpointRepository;

use crate::connector::{SourceClient, SourceError};
use crate::github::client::{GitHubClient, GitHubClientConfig};
use crate::rate_limit::RateLimiterConfig;
use crate::sync::backfill::DetailBackfill;
use crate::sync::orchestrator::SyncOrchestrator;
use crate::sync::report::SyncReport;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let config = AppConfig::from_env().context("failed to load config")?;
    init_tracing(&config.log_level);

    let service = ServiceInfo::new("cadence-ingest", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        service = %service.name,
        version = %service.version,
        instance = %service.instance_id,
        "starting"
    );

    let settings = SyncSettings::from_env().context("invalid sync settings")?;

    // Fails fast if a token is present but no repositories or org are named
    let github = match GitHubClientConfig::from_env().context("github configuration error")? {
        Some(github) => github,
        None => {
            tracing::info!("no github credentials found, skipping sync");
            return Ok(());
        }
    };
    tracing::info!(
        repositories = ?github.repositories,
        organization = ?github.organization,
        mode = %settings.mode,
        "github connector configured"
    );

    let pool = cadence_db::create_pool(&config.database_url)
        .await
        .context("failed to connect to database")?;
    cadence_db::run_migrations(&pool)
        .await
        .context("failed to run migrations")?;

    let limits = RateLimiterConfig::from_env();
    let activity = PgActivityRepository::new(pool.clone());

    match settings.mode {
        SyncMode::Backfill => {
            let backfill = DetailBackfill::new(
                move || GitHubClient::new(github.clone(), limits.clone()).map_err(SourceError::Request),
                activity,
            );
            let report = backfill
                .run_batches(settings.backfill_batch_size, settings.backfill_max_batches)
                .await;
            tracing::info!(
                batches = report.batches,
                units_detailed = report.units_detailed,
                items = report.items_synced,
                errors = report.errors.len(),
                "detail backfill finished"
            );
            for issue in &report.errors {
                tracing::warn!(%issue, "backfill error");
            }
        }
        mode => {
            let client =
                GitHubClient::new(github, limits).context("failed to create github client")?;
            match client.test_connection().await {
                Ok(quota) => tracing::info!(
                    limit = quota.limit,
                    remaining = quota.remaining,
                    reset_at = ?quota.reset_at,
                    "github connection ok"
                ),
                Err(e) => tracing::warn!(error = %e, "github connection probe failed"),
            }

            let checkpoints = PgSyncCheckpointRepository::new(pool.clone());
            let orchestrator = SyncOrchestrator::new(client, activity, checkpoints)
                .with_unit_state(settings.unit_state);
            let report = run_sync(&orchestrator, mode, &settings).await?;
            log_report(&report);
        }
    }

    tracing::info!("ingest service finished");
    Ok(())
}

async fn run_sync(
    orchestrator: &SyncOrchestrator<GitHubClient, PgActivityRepository, PgSyncCheckpointRepository>,
    mode: SyncMode,
    settings: &SyncSettings,
) -> anyhow::Result<SyncReport> {
    let report = match mode {
        SyncMode::Full => orchestrator.sync_all(settings.fetch_details).await,
        SyncMode::Recent => {
            orchestrator
                .sync_recent(settings.since, settings.fetch_details)
                .await
        }
        SyncMode::Range => {
            let (Some(since), Some(until)) = (settings.since, settings.until) else {
                anyhow::bail!("range sync requires SYNC_SINCE and SYNC_UNTIL");
            };
            orchestrator
                .sync_date_range(since, until, settings.fetch_details)
                .await
        }
        SyncMode::Backfill => anyhow::bail!("backfill does not run through the orchestrator"),
    };
    Ok(report)
}

fn log_report(report: &SyncReport) {
    if report.skipped {
        tracing::info!(source = %report.source, "sync skipped, another run holds the lock");
        return;
    }
    tracing::info!(
        source = %report.source,
        mode = %report.mode,
        scopes = report.scopes,
        items = report.items_synced,
        errors = report.errors.len(),
        "sync finished"
    );
    if !report.is_clean() {
        for issue in &report.errors {
            tracing::warn!(%issue, "sync error");
        }
    }
}
