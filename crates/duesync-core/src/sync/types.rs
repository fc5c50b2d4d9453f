//! Core types for the reconciliation engine.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::model::WorkItem;

/// Upstream source of work items; owned by the fetch/cache layer.
#[async_trait]
pub trait WorkItemSource: Send + Sync {
    async fn list_work_items(&self, student_id: i64) -> Result<Vec<WorkItem>>;
}

/// Per-item, per-role reconciliation decision. Matched exhaustively;
/// there is no "unknown status" fallthrough.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncAction {
    /// Push a new event and insert its mapping.
    Create,
    /// Patch the existing event from current item state.
    Update,
    /// Mark the existing event visually done, keeping it.
    Complete,
    /// Remove the event and its mapping.
    Delete,
    /// Nothing to do (filtered out, or already up to date).
    Skip,
}

/// Overall outcome classification of a sync run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncRunStatus {
    Success,
    Error,
    Disabled,
    NoCalendarsConnected,
    /// The run completed but every candidate was filtered or already
    /// current; no calendar operation was issued.
    Filtered,
}

/// Aggregated outcome of a sync run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncResult {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub filtered: usize,
    pub errored: usize,
    pub errors: Vec<String>,
    pub status: SyncRunStatus,
}

impl Default for SyncResult {
    fn default() -> Self {
        Self {
            created: 0,
            updated: 0,
            deleted: 0,
            filtered: 0,
            errored: 0,
            errors: Vec::new(),
            status: SyncRunStatus::Success,
        }
    }
}

impl SyncResult {
    pub fn with_status(status: SyncRunStatus) -> Self {
        Self {
            status,
            ..Self::default()
        }
    }

    /// Record a per-item failure without aborting the batch.
    pub fn record_error(&mut self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(error = %message, "sync operation failed; continuing batch");
        self.errored += 1;
        self.errors.push(message);
    }

    /// Fold another result in: counters add, error lists concatenate, and
    /// the status downgrades to Error if either side carried one.
    pub fn merge(&mut self, other: SyncResult) {
        self.created += other.created;
        self.updated += other.updated;
        self.deleted += other.deleted;
        self.filtered += other.filtered;
        self.errored += other.errored;
        self.errors.extend(other.errors);
        self.status = match (self.status, other.status) {
            (SyncRunStatus::Error, _) | (_, SyncRunStatus::Error) => SyncRunStatus::Error,
            (SyncRunStatus::Success, s) | (s, SyncRunStatus::Success) => s,
            (s, _) => s,
        };
    }

    /// Derive the final status from the recorded counters.
    pub fn finalize(&mut self) {
        self.status = if self.errored > 0 {
            SyncRunStatus::Error
        } else if self.created + self.updated + self.deleted == 0 && self.filtered > 0 {
            SyncRunStatus::Filtered
        } else {
            SyncRunStatus::Success
        };
    }

    pub fn is_success(&self) -> bool {
        matches!(self.status, SyncRunStatus::Success | SyncRunStatus::Filtered)
    }
}
