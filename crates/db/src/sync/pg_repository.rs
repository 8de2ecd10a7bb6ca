use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgRow, PgPool, Row};
use uuid::Uuid;

use crate::sync::models::{SyncCheckpoint, SyncKind, SyncRunStatus};
use crate::sync::repositories::SyncCheckpointRepository;
use cadence_common::error::{CadenceError, CadenceResult};

const RETURNING: &str = "returning id, connector_name, last_sync_at, last_full_sync_at, status, error_message, created_at, updated_at";

#[derive(Clone)]
pub struct PgSyncCheckpointRepository {
    pool: PgPool,
}

impl PgSyncCheckpointRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    fn map_row(row: PgRow) -> CadenceResult<SyncCheckpoint> {
        let status_raw: String = row.get("status");
        let status = status_raw
            .parse::<SyncRunStatus>()
            .map_err(CadenceError::Internal)?;

        Ok(SyncCheckpoint {
            id: row.get("id"),
            connector_name: row.get("connector_name"),
            last_sync_at: row.get("last_sync_at"),
            last_full_sync_at: row.get("last_full_sync_at"),
            status,
            error_message: row.get("error_message"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        })
    }
}

#[async_trait]
impl SyncCheckpointRepository for PgSyncCheckpointRepository {
    async fn get(&self, connector_name: &str) -> CadenceResult<Option<SyncCheckpoint>> {
        let row = sqlx::query(
            "select id, connector_name, last_sync_at, last_full_sync_at, status, error_message, created_at, updated_at
             from sync_checkpoints where connector_name = $1",
        )
        .bind(connector_name)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| CadenceError::Database(e.to_string()))?;

        row.map(Self::map_row).transpose()
    }

    async fn get_or_create(&self, connector_name: &str) -> CadenceResult<SyncCheckpoint> {
        let row = sqlx::query(&format!(
            "insert into sync_checkpoints (id, connector_name)
             values ($1, $2)
             on conflict (connector_name) do update set updated_at = now()
             {RETURNING}"
        ))
        .bind(Uuid::new_v4())
        .bind(connector_name)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| CadenceError::Database(e.to_string()))?;

        Self::map_row(row)
    }

    async fn acquire_lock(&self, connector_name: &str) -> CadenceResult<Option<SyncCheckpoint>> {
        let row = sqlx::query(&format!(
            "update sync_checkpoints
             set status = 'running', error_message = null, updated_at = $1
             where connector_name = $2 and status != 'running'
             {RETURNING}"
        ))
        .bind(Utc::now())
        .bind(connector_name)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| CadenceError::Database(e.to_string()))?;

        row.map(Self::map_row).transpose()
    }

    async fn mark_completed(
        &self,
        id: Uuid,
        kind: SyncKind,
        synced_at: DateTime<Utc>,
    ) -> CadenceResult<SyncCheckpoint> {
        let full = kind == SyncKind::Full;
        let row = sqlx::query(&format!(
            "update sync_checkpoints
             set status = 'idle',
                 last_sync_at = $1,
                 last_full_sync_at = case when $2 then $1 else last_full_sync_at end,
                 error_message = null,
                 updated_at = now()
             where id = $3
             {RETURNING}"
        ))
        .bind(synced_at)
        .bind(full)
        .bind(id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| CadenceError::Database(e.to_string()))?;

        Self::map_row(row)
    }

    async fn mark_failed(&self, id: Uuid, error_message: &str) -> CadenceResult<SyncCheckpoint> {
        let row = sqlx::query(&format!(
            "update sync_checkpoints
             set status = 'failed', error_message = $1, updated_at = $2
             where id = $3
             {RETURNING}"
        ))
        .bind(error_message)
        .bind(Utc::now())
        .bind(id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| CadenceError::Database(e.to_string()))?;

        Self::map_row(row)
    }

    async fn reset(&self, connector_name: &str) -> CadenceResult<()> {
        sqlx::query(
            "update sync_checkpoints
             set last_sync_at = null, last_full_sync_at = null, status = 'idle',
                 error_message = null, updated_at = now()
             where connector_name = $1",
        )
        .bind(connector_name)
        .execute(&self.pool)
        .await
        .map_err(|e| CadenceError::Database(e.to_string()))?;
        Ok(())
    }
}
