use chrono::{DateTime, Utc};

use cadence_config::SyncMode;
use cadence_db::activity::models::{ActivityChangeset, Repository};
use cadence_db::activity::repositories::ActivityRepository;
use cadence_db::sync::models::SyncKind;
use cadence_db::sync::repositories::SyncCheckpointRepository;

use super::details::fetch_unit_details;
use super::report::{SyncIssue, SyncReport};
use crate::connector::{SourceClient, UnitState};

#[derive(Debug, Clone, Copy, Default)]
struct Window {
    since: Option<DateTime<Utc>>,
    until: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct ScopeOutcome {
    written: usize,
    issues: Vec<SyncIssue>,
}

/// Drives one source end to end. Each scope is staged into one changeset and
/// committed in its own transaction, so a failing scope never affects the
/// others.
pub struct SyncOrchestrator<C, A, K> {
    client: C,
    activity: A,
    checkpoints: K,
    unit_state: UnitState,
}

impl<C, A, K> SyncOrchestrator<C, A, K>
where
    C: SourceClient,
    A: ActivityRepository,
    K: SyncCheckpointRepository,
{
    pub fn new(client: C, activity: A, checkpoints: K) -> Self {
        Self {
            client,
            activity,
            checkpoints,
            unit_state: UnitState::All,
        }
    }

    /// Restrict unit listing to one state; the default lists every unit.
    pub fn with_unit_state(mut self, unit_state: UnitState) -> Self {
        self.unit_state = unit_state;
        self
    }

    #[cfg(test)]
    pub fn client(&self) -> &C {
        &self.client
    }

    /// Sync every unit of every scope.
    pub async fn sync_all(&self, fetch_details: bool) -> SyncReport {
        self.run(SyncMode::Full, SyncKind::Full, Window::default(), fetch_details)
            .await
    }

    /// Sync units updated since `since`, or since the last checkpoint when
    /// omitted. Without any checkpoint this is a `sync_all(false)`.
    pub async fn sync_recent(
        &self,
        since: Option<DateTime<Utc>>,
        fetch_details: bool,
    ) -> SyncReport {
        let since = match since {
            Some(since) => since,
            None => match self.checkpoints.get(self.client.source_name()).await {
                Ok(checkpoint) => match checkpoint.and_then(|cp| cp.last_sync_at) {
                    Some(last_sync_at) => last_sync_at,
                    None => {
                        tracing::info!(
                            source = self.client.source_name(),
                            "no checkpoint yet, running a full sync instead"
                        );
                        return self.sync_all(false).await;
                    }
                },
                Err(e) => {
                    tracing::error!(error = %e, "failed to read sync checkpoint");
                    let mut report = SyncReport::new(self.client.source_name(), SyncMode::Recent);
                    report.errors.push(SyncIssue::run(e));
                    return report;
                }
            },
        };

        let window = Window {
            since: Some(since),
            until: None,
        };
        self.run(SyncMode::Recent, SyncKind::Incremental, window, fetch_details)
            .await
    }

    /// Re-sync units updated inside `[since, until]`.
    pub async fn sync_date_range(
        &self,
        since: DateTime<Utc>,
        until: DateTime<Utc>,
        fetch_details: bool,
    ) -> SyncReport {
        if since >= until {
            let mut report = SyncReport::new(self.client.source_name(), SyncMode::Range);
            report
                .errors
                .push(SyncIssue::run(format!("empty range: {since} >= {until}")));
            return report;
        }

        let window = Window {
            since: Some(since),
            until: Some(until),
        };
        self.run(SyncMode::Range, SyncKind::Full, window, fetch_details)
            .await
    }

    async fn run(
        &self,
        mode: SyncMode,
        kind: SyncKind,
        window: Window,
        fetch_details: bool,
    ) -> SyncReport {
        let source = self.client.source_name();
        let mut report = SyncReport::new(source, mode);

        if !self.client.has_scopes() {
            tracing::warn!(source, "no scopes configured, nothing to sync");
            report
                .errors
                .push(SyncIssue::run("no scopes configured"));
            return report;
        }

        if let Err(e) = self.checkpoints.get_or_create(source).await {
            tracing::error!(source, error = %e, "failed to load sync checkpoint");
            report.errors.push(SyncIssue::run(e));
            return report;
        }

        let checkpoint = match self.checkpoints.acquire_lock(source).await {
            Ok(Some(cp)) => cp,
            Ok(None) => {
                tracing::info!(source, "sync already running, skipping");
                report.skipped = true;
                return report;
            }
            Err(e) => {
                tracing::error!(source, error = %e, "failed to acquire sync lock");
                report.errors.push(SyncIssue::run(e));
                return report;
            }
        };

        let started_at = Utc::now();
        self.client.rate_limiter().reset(false);
        tracing::info!(
            source,
            %mode,
            since = ?window.since,
            until = ?window.until,
            fetch_details,
            "sync started"
        );

        let scopes = match self.client.list_scopes().await {
            Ok(scopes) => scopes,
            Err(e) => {
                tracing::error!(source, error = %e, "scope listing failed");
                self.fail(checkpoint.id, &e.to_string()).await;
                report.errors.push(SyncIssue::run(e));
                return report;
            }
        };

        if let Err(e) = self.activity.upsert_repositories(&scopes).await {
            tracing::error!(source, error = %e, "failed to upsert scopes");
            self.fail(checkpoint.id, &e.to_string()).await;
            report.errors.push(SyncIssue::run(e));
            return report;
        }
        report.scopes = scopes.len();

        for scope in &scopes {
            let outcome = self.sync_scope(scope, window, fetch_details).await;
            tracing::info!(
                scope = %scope.full_name,
                upserted = outcome.written,
                errors = outcome.issues.len(),
                "scope synced"
            );
            report.items_synced += outcome.written;
            report.errors.extend(outcome.issues);
        }

        if let Err(e) = self
            .checkpoints
            .mark_completed(checkpoint.id, kind, started_at)
            .await
        {
            tracing::error!(source, error = %e, "failed to write sync checkpoint");
            report.errors.push(SyncIssue::run(e));
        }

        let stats = self.client.rate_limiter().stats();
        tracing::info!(
            source,
            %mode,
            scopes = report.scopes,
            items = report.items_synced,
            errors = report.errors.len(),
            rate_limit = ?stats,
            "sync completed"
        );
        report
    }

    async fn fail(&self, checkpoint_id: uuid::Uuid, message: &str) {
        if let Err(e) = self.checkpoints.mark_failed(checkpoint_id, message).await {
            tracing::error!(error = %e, "failed to mark sync as failed");
        }
    }

    /// List, stage and commit one scope. A local rate limit stops further
    /// fetching but what was already staged is still committed.
    async fn sync_scope(
        &self,
        scope: &Repository,
        window: Window,
        fetch_details: bool,
    ) -> ScopeOutcome {
        let name = scope.full_name.as_str();
        let mut outcome = ScopeOutcome::default();

        let units = match self
            .client
            .list_units(scope, self.unit_state, window.since, window.until)
            .await
        {
            Ok(units) => units,
            Err(e) => {
                tracing::error!(scope = %name, error = %e, "failed to list units");
                outcome.issues.push(SyncIssue::scope(name, e));
                return outcome;
            }
        };

        let mut changeset = ActivityChangeset::default();
        let mut rate_limited = false;
        let mut pending = units.into_iter();

        if fetch_details {
            let detailed_at = Utc::now();
            for unit in pending.by_ref() {
                match fetch_unit_details(&self.client, &unit).await {
                    Ok(details) => details.stage(unit, detailed_at, &mut changeset),
                    Err(e) if e.is_rate_limited() => {
                        tracing::warn!(scope = %name, error = %e, "rate limit reached, stopping scope");
                        outcome.issues.push(SyncIssue::scope(name, e));
                        changeset.pull_requests.push(unit);
                        rate_limited = true;
                        break;
                    }
                    Err(e) => {
                        tracing::warn!(
                            scope = %name,
                            unit = unit.number,
                            error = %e,
                            "failed to fetch unit details, skipping"
                        );
                        changeset.pull_requests.push(unit);
                    }
                }
            }
        }
        changeset.pull_requests.extend(pending);

        if !rate_limited {
            match self
                .client
                .list_scope_commits(scope, window.since, window.until)
                .await
            {
                Ok(commits) => changeset.commits.extend(commits),
                Err(e) if e.is_rate_limited() => {
                    tracing::warn!(scope = %name, error = %e, "rate limit reached, stopping scope");
                    outcome.issues.push(SyncIssue::scope(name, e));
                }
                Err(e) => {
                    tracing::warn!(scope = %name, error = %e, "failed to list commits, skipping");
                }
            }
        }

        match self.activity.apply_changeset(&changeset).await {
            Ok(written) => outcome.written = written,
            Err(e) => {
                tracing::error!(scope = %name, error = %e, "scope transaction rolled back");
                outcome.issues.push(SyncIssue::scope(name, e));
            }
        }
        outcome
    }
}
