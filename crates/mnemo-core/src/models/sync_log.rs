//! Sync run log model

use serde::{Deserialize, Serialize};

/// One failed item within a sync run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemError {
    /// Local card id, when the failure is attributable to one card
    pub local_id: Option<String>,
    /// What went wrong
    pub message: String,
}

/// Append-only record of one sync run, for user-facing diagnostics only
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncLogEntry {
    /// Run start time (Unix ms)
    pub started_at: i64,
    /// Wall-clock duration of the run
    pub duration_ms: i64,
    /// Records transferred successfully
    pub succeeded: usize,
    /// Records that failed to convert or transmit
    pub failed: usize,
    /// Records skipped as unchanged by the incremental gate
    pub skipped: usize,
    /// Per-item failures, in processing order
    pub errors: Vec<ItemError>,
    /// Non-fatal conversion warnings accumulated across the run
    pub warnings: Vec<String>,
}

impl SyncLogEntry {
    /// Start a new log entry stamped with the current time
    #[must_use]
    pub fn begin() -> Self {
        Self {
            started_at: chrono::Utc::now().timestamp_millis(),
            ..Self::default()
        }
    }

    /// Record a per-item failure and keep going
    pub fn record_failure(&mut self, local_id: Option<String>, message: impl Into<String>) {
        self.failed += 1;
        self.errors.push(ItemError {
            local_id,
            message: message.into(),
        });
    }

    /// Stamp the duration relative to `started_at`
    pub fn finish(&mut self) {
        self.duration_ms = chrono::Utc::now().timestamp_millis() - self.started_at;
    }

    /// Fold a per-deck log into an aggregate run log
    pub fn absorb(&mut self, other: Self) {
        self.succeeded += other.succeeded;
        self.failed += other.failed;
        self.skipped += other.skipped;
        self.errors.extend(other.errors);
        self.warnings.extend(other.warnings);
    }

    /// One-line human summary: success / failure / skip counts
    #[must_use]
    pub fn summary(&self) -> String {
        format!(
            "{} synced, {} failed, {} skipped in {}ms",
            self.succeeded, self.failed, self.skipped, self.duration_ms
        )
    }
}
