use std::fmt;
use std::str::FromStr;

use cadence_common::error::{CadenceError, CadenceResult};
use chrono::{DateTime, Utc};

use crate::env::{get_var_opt, get_var_or};

/// Which sync entry point a single ingest invocation runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    Full,
    Recent,
    Range,
    Backfill,
}

impl SyncMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncMode::Full => "full",
            SyncMode::Recent => "recent",
            SyncMode::Range => "range",
            SyncMode::Backfill => "backfill",
        }
    }
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "full" => Ok(SyncMode::Full),
            "recent" | "incremental" => Ok(SyncMode::Recent),
            "range" => Ok(SyncMode::Range),
            "backfill" => Ok(SyncMode::Backfill),
            other => Err(format!("unknown sync mode: {other}")),
        }
    }
}

/// Which units to list within a scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitState {
    Open,
    Closed,
    All,
}

impl UnitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnitState::Open => "open",
            UnitState::Closed => "closed",
            UnitState::All => "all",
        }
    }
}

impl FromStr for UnitState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "open" => Ok(UnitState::Open),
            "closed" => Ok(UnitState::Closed),
            "all" => Ok(UnitState::All),
            other => Err(format!("unknown unit state: {other}")),
        }
    }
}

/// Caller-supplied parameters for one sync invocation.
#[derive(Debug, Clone)]
pub struct SyncSettings {
    pub mode: SyncMode,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub fetch_details: bool,
    pub unit_state: UnitState,
    pub backfill_batch_size: usize,
    pub backfill_max_batches: usize,
}

impl SyncSettings {
    /// Load sync settings from `SYNC_*` / `BACKFILL_*` environment variables.
    ///
    /// Fails fast on an unknown mode or unit state, an unparsable timestamp, a `range` run
    /// without both bounds, or a zero batch size.
    pub fn from_env() -> CadenceResult<Self> {
        let mode: SyncMode = get_var_or("SYNC_MODE", "recent")
            .parse()
            .map_err(CadenceError::Config)?;

        let since = parse_timestamp_var("SYNC_SINCE")?;
        let until = parse_timestamp_var("SYNC_UNTIL")?;

        if mode == SyncMode::Range {
            match (since, until) {
                (Some(s), Some(u)) if s >= u => {
                    return Err(CadenceError::Config(
                        "SYNC_SINCE must be earlier than SYNC_UNTIL".to_string(),
                    ));
                }
                (Some(_), Some(_)) => {}
                _ => {
                    return Err(CadenceError::Config(
                        "range sync requires both SYNC_SINCE and SYNC_UNTIL".to_string(),
                    ));
                }
            }
        }

        let fetch_details = match get_var_opt("SYNC_FETCH_DETAILS") {
            Some(raw) => parse_bool(&raw).ok_or_else(|| {
                CadenceError::Config(format!("invalid SYNC_FETCH_DETAILS: {raw}"))
            })?,
            None => mode == SyncMode::Recent,
        };

        let unit_state: UnitState = get_var_or("SYNC_UNIT_STATE", "all")
            .parse()
            .map_err(CadenceError::Config)?;

        let backfill_batch_size = parse_positive("BACKFILL_BATCH_SIZE", 50)?;
        let backfill_max_batches = parse_positive("BACKFILL_MAX_BATCHES", 10)?;

        Ok(Self {
            mode,
            since,
            until,
            fetch_details,
            unit_state,
            backfill_batch_size,
            backfill_max_batches,
        })
    }
}

fn parse_timestamp_var(key: &str) -> CadenceResult<Option<DateTime<Utc>>> {
    get_var_opt(key)
        .map(|raw| {
            DateTime::parse_from_rfc3339(&raw)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| CadenceError::Config(format!("invalid {key}: {e}")))
        })
        .transpose()
}

fn parse_positive(key: &str, default: usize) -> CadenceResult<usize> {
    let value = match get_var_opt(key) {
        Some(raw) => raw
            .parse::<usize>()
            .map_err(|e| CadenceError::Config(format!("invalid {key}: {e}")))?,
        None => default,
    };
    if value == 0 {
        return Err(CadenceError::Config(format!("{key} must be greater than 0")));
    }
    Ok(value)
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
