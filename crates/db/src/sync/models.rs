use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Run state of a connector, doubling as its "sync in progress" flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncRunStatus {
    Idle,
    Running,
    Failed,
}

impl SyncRunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncRunStatus::Idle => "idle",
            SyncRunStatus::Running => "running",
            SyncRunStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for SyncRunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncRunStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(SyncRunStatus::Idle),
            "running" => Ok(SyncRunStatus::Running),
            "failed" => Ok(SyncRunStatus::Failed),
            other => Err(format!("unknown sync status: {other}")),
        }
    }
}

/// Which checkpoint timestamps a completed run advances.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncKind {
    /// Full and date-range syncs: advances both timestamps.
    Full,
    /// Incremental syncs: advances `last_sync_at` only.
    Incremental,
}

/// One row per connector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncCheckpoint {
    pub id: Uuid,
    pub connector_name: String,
    /// Last successful sync of any kind; the `since` of the next incremental run.
    pub last_sync_at: Option<DateTime<Utc>>,
    pub last_full_sync_at: Option<DateTime<Utc>>,
    pub status: SyncRunStatus,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SyncCheckpoint {
    pub fn new(connector_name: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            connector_name: connector_name.to_string(),
            last_sync_at: None,
            last_full_sync_at: None,
            status: SyncRunStatus::Idle,
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Record a successful run that started at `synced_at`. Applies the same
    /// transition as `mark_completed` in `pg_repository.rs`.
    pub fn complete(&mut self, kind: SyncKind, synced_at: DateTime<Utc>) {
        self.last_sync_at = Some(synced_at);
        if kind == SyncKind::Full {
            self.last_full_sync_at = Some(synced_at);
        }
        self.status = SyncRunStatus::Idle;
        self.error_message = None;
        self.updated_at = Utc::now();
    }
}
