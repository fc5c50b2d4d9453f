//! One-shot overview of connections and settings for a pair.

use std::error::Error;
use std::sync::Arc;

use duesync_core::{EventMappingStore, SettingsStore};

use crate::common::{AppContext, Pair};

pub async fn run(pair: Pair) -> Result<(), Box<dyn Error>> {
    let ctx = AppContext::init()?;
    let status = ctx.vault.connection_status(pair.owner_id, pair.student_id)?;
    let settings =
        SettingsStore::new(Arc::clone(&ctx.db)).resolve(pair.owner_id, pair.student_id)?;
    let mapped = EventMappingStore::new(Arc::clone(&ctx.db))
        .for_student(pair.student_id)?
        .len();

    println!("owner {} / student {}", pair.owner_id, pair.student_id);
    println!(
        "guardian calendar: {}",
        if status.guardian_connected {
            "connected"
        } else {
            "not connected"
        }
    );
    println!(
        "student calendar:  {}",
        if status.student_connected {
            "connected"
        } else {
            "not connected"
        }
    );
    println!(
        "sync: {}{}",
        if settings.sync_enabled { "enabled" } else { "disabled" },
        if settings.auto_sync { " (auto)" } else { "" }
    );
    println!("synced events tracked: {mapped}");
    Ok(())
}
