//! Sync settings inspection and editing.

use std::error::Error;

use clap::Subcommand;
use duesync_core::{AssignmentType, SettingsStore, SyncSettings};

use crate::common::{AppContext, Pair};

#[derive(Subcommand)]
pub enum SettingsAction {
    /// Print the effective settings for the pair
    Show,
    /// Update settings fields; unspecified fields keep their value
    Set {
        #[arg(long)]
        enabled: Option<bool>,
        #[arg(long)]
        guardian: Option<bool>,
        #[arg(long)]
        student: Option<bool>,
        /// Keep submitted items on the calendar, marked done
        #[arg(long)]
        keep_completed: Option<bool>,
        #[arg(long)]
        auto: Option<bool>,
        /// Guardian reminder offsets in minutes, comma separated
        #[arg(long, value_delimiter = ',')]
        guardian_reminders: Option<Vec<u32>>,
        /// Student reminder offsets in minutes, comma separated
        #[arg(long, value_delimiter = ',')]
        student_reminders: Option<Vec<u32>>,
        /// Course allow-list, comma separated; empty string clears it
        #[arg(long, value_delimiter = ',')]
        courses: Option<Vec<String>>,
        /// Assignment types to exclude, comma separated
        #[arg(long, value_delimiter = ',')]
        exclude_types: Option<Vec<String>>,
    },
    /// Restore defaults for the pair
    Reset,
}

pub async fn run(pair: Pair, action: SettingsAction) -> Result<(), Box<dyn Error>> {
    let ctx = AppContext::init()?;
    let store = SettingsStore::new(std::sync::Arc::clone(&ctx.db));
    match action {
        SettingsAction::Show => {
            let settings = store.resolve(pair.owner_id, pair.student_id)?;
            println!("{}", serde_json::to_string_pretty(&settings)?);
        }
        SettingsAction::Set {
            enabled,
            guardian,
            student,
            keep_completed,
            auto,
            guardian_reminders,
            student_reminders,
            courses,
            exclude_types,
        } => {
            let mut settings = store.resolve(pair.owner_id, pair.student_id)?;
            apply(&mut settings, enabled, |s, v| s.sync_enabled = v);
            apply(&mut settings, guardian, |s, v| s.sync_to_guardian = v);
            apply(&mut settings, student, |s, v| s.sync_to_student = v);
            apply(&mut settings, keep_completed, |s, v| s.sync_completed = v);
            apply(&mut settings, auto, |s, v| s.auto_sync = v);
            if let Some(reminders) = guardian_reminders {
                settings.guardian_reminders = reminders;
            }
            if let Some(reminders) = student_reminders {
                settings.student_reminders = reminders;
            }
            if let Some(courses) = courses {
                settings.course_filter = if courses.iter().all(|c| c.is_empty()) {
                    None
                } else {
                    Some(courses)
                };
            }
            if let Some(types) = exclude_types {
                settings.excluded_types = Some(parse_types(&types)?);
            }
            store.update(pair.owner_id, pair.student_id, &settings)?;
            println!("settings updated");
        }
        SettingsAction::Reset => {
            store.delete(pair.owner_id, pair.student_id)?;
            println!("settings reset to defaults");
        }
    }
    Ok(())
}

fn apply<T>(settings: &mut SyncSettings, value: Option<T>, set: impl FnOnce(&mut SyncSettings, T)) {
    if let Some(value) = value {
        set(settings, value);
    }
}

fn parse_types(raw: &[String]) -> Result<Vec<AssignmentType>, Box<dyn Error>> {
    raw.iter()
        .map(|t| {
            serde_json::from_value(serde_json::Value::String(t.to_lowercase()))
                .map_err(|_| format!("unknown assignment type '{t}'").into())
        })
        .collect()
}
