//! Sync subcommands: full, single-item, and incremental runs over a JSON
//! work item file.

use std::error::Error;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use clap::Subcommand;
use duesync_core::{SyncResult, SyncRunStatus};

use crate::common::{AppContext, Pair};

#[derive(Subcommand)]
pub enum SyncAction {
    /// Reconcile every work item in the file
    Full {
        /// JSON file holding an array of work items
        #[arg(long)]
        items: PathBuf,
    },
    /// Reconcile one work item by its plannable id
    Item {
        #[arg(long)]
        items: PathBuf,
        /// Plannable id of the item to sync
        id: i64,
    },
    /// Reconcile items changed since a cutoff and drop vanished ones
    Incremental {
        #[arg(long)]
        items: PathBuf,
        /// RFC 3339 cutoff, e.g. 2026-08-01T00:00:00Z
        since: DateTime<Utc>,
    },
}

pub async fn run(pair: Pair, action: SyncAction) -> Result<(), Box<dyn Error>> {
    let ctx = AppContext::init()?;
    let result = match action {
        SyncAction::Full { items } => {
            ctx.orchestrator(&items)
                .sync_full(pair.owner_id, pair.student_id)
                .await?
        }
        SyncAction::Item { items, id } => {
            let orch = ctx.orchestrator(&items);
            let raw = std::fs::read_to_string(&items)?;
            let all: Vec<duesync_core::WorkItem> = serde_json::from_str(&raw)?;
            let item = all
                .iter()
                .find(|i| i.plannable_id == id && i.student_id == pair.student_id)
                .ok_or_else(|| format!("no work item with plannable id {id}"))?;
            orch.sync_one(pair.owner_id, pair.student_id, item).await?
        }
        SyncAction::Incremental { items, since } => {
            ctx.orchestrator(&items)
                .sync_incremental(pair.owner_id, pair.student_id, since)
                .await?
        }
    };
    report(&result);
    Ok(())
}

fn report(result: &SyncResult) {
    match result.status {
        SyncRunStatus::Disabled => println!("sync is disabled for this pair"),
        SyncRunStatus::NoCalendarsConnected => {
            println!("no calendars connected; run `duesync auth connect` first")
        }
        _ => {
            println!(
                "created {} / updated {} / deleted {} / skipped {}",
                result.created, result.updated, result.deleted, result.filtered
            );
            for error in &result.errors {
                eprintln!("sync error: {error}");
            }
        }
    }
}
