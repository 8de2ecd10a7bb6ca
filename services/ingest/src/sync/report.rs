use std::fmt;

use cadence_config::SyncMode;

/// One recorded failure. `scope` is `None` for failures outside any scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncIssue {
    pub scope: Option<String>,
    pub message: String,
}

impl SyncIssue {
    pub fn run(message: impl fmt::Display) -> Self {
        Self {
            scope: None,
            message: message.to_string(),
        }
    }

    pub fn scope(scope: &str, message: impl fmt::Display) -> Self {
        Self {
            scope: Some(scope.to_string()),
            message: message.to_string(),
        }
    }
}

impl fmt::Display for SyncIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.scope {
            Some(scope) => write!(f, "{scope}: {}", self.message),
            None => f.write_str(&self.message),
        }
    }
}

/// Outcome of one sync invocation. Partial success is normal: failed scopes
/// show up in `errors` while the rest are still counted.
#[derive(Debug, Clone)]
pub struct SyncReport {
    pub source: String,
    pub mode: SyncMode,
    /// Scopes resolved and upserted.
    pub scopes: usize,
    /// Unit and sub-record rows written.
    pub items_synced: usize,
    pub errors: Vec<SyncIssue>,
    /// Another run held the checkpoint lock.
    pub skipped: bool,
}

impl SyncReport {
    pub fn new(source: &str, mode: SyncMode) -> Self {
        Self {
            source: source.to_string(),
            mode,
            scopes: 0,
            items_synced: 0,
            errors: Vec::new(),
            skipped: false,
        }
    }

    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct BackfillReport {
    pub batches: usize,
    pub units_detailed: usize,
    pub items_synced: usize,
    pub errors: Vec<SyncIssue>,
}
