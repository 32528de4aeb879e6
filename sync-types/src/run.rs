//! Sync run bookkeeping: modes, statuses, counters and results.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

use crate::TypesError;

/// How the "modified since" cutoff of a run was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    /// No prior successful run: fetch everything.
    Full,
    /// Cutoff derived from the last completed run.
    Incremental,
    /// Cutoff supplied explicitly by the caller.
    Manual,
}

impl SyncMode {
    /// Stored label.
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncMode::Full => "full",
            SyncMode::Incremental => "incremental",
            SyncMode::Manual => "manual",
        }
    }
}

impl fmt::Display for SyncMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncMode {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "full" => Ok(SyncMode::Full),
            "incremental" => Ok(SyncMode::Incremental),
            "manual" => Ok(SyncMode::Manual),
            other => Err(TypesError::InvalidMode(other.to_string())),
        }
    }
}

/// Lifecycle state of an audit row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    /// Created at run start, not yet finalized.
    Running,
    /// Finalized after a successful merge.
    Completed,
    /// Finalized after a fatal error.
    Failed,
}

impl SyncStatus {
    /// Stored label.
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Running => "running",
            SyncStatus::Completed => "completed",
            SyncStatus::Failed => "failed",
        }
    }

    /// Whether the row has been finalized.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, SyncStatus::Running)
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncStatus {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(SyncStatus::Running),
            "completed" => Ok(SyncStatus::Completed),
            "failed" => Ok(SyncStatus::Failed),
            other => Err(TypesError::InvalidStatus(other.to_string())),
        }
    }
}

/// Per-run record counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncCounts {
    /// Records received from the remote source.
    pub processed: u64,
    /// Rows newly inserted into the store.
    pub inserted: u64,
    /// Stored rows replaced by a newer version.
    pub updated: u64,
    /// Incoming rows discarded by conflict resolution.
    pub skipped: u64,
    /// Field-level parsing diagnostics.
    pub parsing_errors: u64,
}

/// One persisted audit row.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncRun {
    /// Monotonic run identifier.
    pub sync_id: i64,
    /// How the watermark was chosen.
    pub mode: SyncMode,
    /// Current lifecycle state.
    pub status: SyncStatus,
    /// When the run began (local clock).
    pub started_at: DateTime<Utc>,
    /// When the run was finalized; `None` while running.
    pub completed_at: Option<DateTime<Utc>>,
    /// Effective "modified since" cutoff, if any.
    pub watermark: Option<DateTime<Utc>>,
    /// Counters recorded at finalization.
    pub counts: SyncCounts,
    /// Failure note for failed runs.
    pub error_message: Option<String>,
}

/// Outcome of one `sync()` invocation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SyncResult {
    /// Whether the run completed and committed.
    pub success: bool,
    /// Audit row id, when one was created.
    pub sync_id: Option<i64>,
    /// Resolved mode, when resolution got that far.
    pub mode: Option<SyncMode>,
    /// Counters (partial on failure).
    #[serde(flatten)]
    pub counts: SyncCounts,
    /// Filing rows in the store after a successful run.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_records: Option<u64>,
    /// Failure message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Non-fatal note, e.g. parsing error totals.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

impl SyncResult {
    /// Result of a committed run.
    pub fn completed(sync_id: i64, mode: SyncMode, counts: SyncCounts, total_records: u64) -> Self {
        let warning = (counts.parsing_errors > 0)
            .then(|| format!("{} parsing errors", counts.parsing_errors));
        Self {
            success: true,
            sync_id: Some(sync_id),
            mode: Some(mode),
            counts,
            total_records: Some(total_records),
            error: None,
            warning,
        }
    }

    /// Result of a failed run, carrying whatever was gathered.
    pub fn failed(
        sync_id: Option<i64>,
        mode: Option<SyncMode>,
        counts: SyncCounts,
        error: impl Into<String>,
    ) -> Self {
        Self {
            success: false,
            sync_id,
            mode,
            counts,
            total_records: None,
            error: Some(error.into()),
            warning: None,
        }
    }
}
