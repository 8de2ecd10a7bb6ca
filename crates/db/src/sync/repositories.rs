use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::sync::models::{SyncCheckpoint, SyncKind};
use cadence_common::error::CadenceResult;

#[async_trait]
pub trait SyncCheckpointRepository: Send + Sync {
    /// Read the checkpoint for a connector without creating it.
    async fn get(&self, connector_name: &str) -> CadenceResult<Option<SyncCheckpoint>>;

    /// Get or create the checkpoint row for a connector.
    async fn get_or_create(&self, connector_name: &str) -> CadenceResult<SyncCheckpoint>;

    /// Atomically set status to 'running' only if currently 'idle' or 'failed'.
    /// Returns `None` if already running (lock not acquired).
    async fn acquire_lock(&self, connector_name: &str) -> CadenceResult<Option<SyncCheckpoint>>;

    /// Mark a run as completed, advancing the timestamps `kind` covers.
    async fn mark_completed(
        &self,
        id: Uuid,
        kind: SyncKind,
        synced_at: DateTime<Utc>,
    ) -> CadenceResult<SyncCheckpoint>;

    /// Mark a run as failed with an error message. Timestamps are untouched.
    async fn mark_failed(&self, id: Uuid, error_message: &str) -> CadenceResult<SyncCheckpoint>;

    /// Clear both timestamps so the next incremental run degrades to a full one.
    async fn reset(&self, connector_name: &str) -> CadenceResult<()>;
}
