//! Per-(owner, student) sync preferences with create-on-first-read defaults.

use std::sync::Arc;

use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::error::{Result, ValidationError};
use crate::model::{AccountRole, AssignmentType, WorkItem};
use crate::storage::Database;

/// Google caps reminder offsets at 4 weeks.
const MAX_REMINDER_MINUTES: i64 = 40320;
/// Google allows at most 5 reminder overrides per event.
const MAX_REMINDERS: usize = 5;

/// Sync preferences for one (owner, student) pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncSettings {
    pub sync_enabled: bool,
    pub sync_to_guardian: bool,
    pub sync_to_student: bool,
    /// Whether submitted items stay on the calendar (marked done) or get
    /// removed.
    pub sync_completed: bool,
    pub auto_sync: bool,
    /// Reminder offsets in minutes before the due time, guardian calendar.
    pub guardian_reminders: Vec<u32>,
    /// Reminder offsets in minutes before the due time, student calendar.
    pub student_reminders: Vec<u32>,
    /// Course allow-list; `None` or empty allows all courses.
    pub course_filter: Option<Vec<String>>,
    /// Assignment types excluded from sync.
    pub excluded_types: Option<Vec<AssignmentType>>,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            sync_enabled: true,
            sync_to_guardian: true,
            sync_to_student: true,
            sync_completed: false,
            auto_sync: true,
            guardian_reminders: vec![1440, 120],
            student_reminders: vec![120, 30],
            course_filter: None,
            excluded_types: None,
        }
    }
}

impl SyncSettings {
    pub fn role_enabled(&self, role: AccountRole) -> bool {
        match role {
            AccountRole::Guardian => self.sync_to_guardian,
            AccountRole::Student => self.sync_to_student,
        }
    }

    pub fn reminders_for(&self, role: AccountRole) -> &[u32] {
        match role {
            AccountRole::Guardian => &self.guardian_reminders,
            AccountRole::Student => &self.student_reminders,
        }
    }

    /// Whether an item should be on calendars under these settings.
    ///
    /// Gates apply in order: sync enabled, completed policy, course
    /// allow-list, assignment-type exclude-list, and finally the hard
    /// requirement that the item has a due timestamp.
    pub fn should_sync(&self, item: &WorkItem) -> bool {
        if !self.sync_enabled {
            return false;
        }
        if item.submitted && !self.sync_completed {
            return false;
        }
        if let Some(courses) = &self.course_filter {
            if !courses.is_empty() && !courses.iter().any(|c| c == &item.course_name) {
                return false;
            }
        }
        if let Some(excluded) = &self.excluded_types {
            if excluded.contains(&item.assignment_type()) {
                return false;
            }
        }
        item.due_at.is_some()
    }

    /// True when a change between `self` and `other` affects which items or
    /// calendars are synced, meaning a full re-sync is needed.
    pub fn filters_differ(&self, other: &SyncSettings) -> bool {
        self.sync_enabled != other.sync_enabled
            || self.sync_to_guardian != other.sync_to_guardian
            || self.sync_to_student != other.sync_to_student
            || self.sync_completed != other.sync_completed
            || self.course_filter != other.course_filter
            || self.excluded_types != other.excluded_types
    }

    fn validate(&self) -> Result<(), ValidationError> {
        for reminders in [&self.guardian_reminders, &self.student_reminders] {
            if reminders.len() > MAX_REMINDERS {
                return Err(ValidationError::TooManyReminders {
                    count: reminders.len(),
                    max: MAX_REMINDERS,
                });
            }
            for &minutes in reminders {
                if i64::from(minutes) > MAX_REMINDER_MINUTES {
                    return Err(ValidationError::InvalidReminderOffset {
                        minutes: i64::from(minutes),
                        max: MAX_REMINDER_MINUTES,
                    });
                }
            }
        }
        Ok(())
    }
}

/// Persisted settings, lazily created with defaults on first read.
#[derive(Clone)]
pub struct SettingsStore {
    db: Arc<Database>,
}

impl SettingsStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Load settings for the pair, inserting defaults if absent.
    pub fn resolve(&self, owner_id: i64, student_id: i64) -> Result<SyncSettings> {
        if let Some(settings) = self.get(owner_id, student_id)? {
            return Ok(settings);
        }
        let defaults = SyncSettings::default();
        self.persist(owner_id, student_id, &defaults)?;
        Ok(defaults)
    }

    /// Load settings without creating defaults.
    pub fn get(&self, owner_id: i64, student_id: i64) -> Result<Option<SyncSettings>> {
        let conn = self.db.conn();
        let mut stmt = conn.prepare(
            "SELECT sync_enabled, sync_to_guardian, sync_to_student, sync_completed,
                    auto_sync, guardian_reminders, student_reminders,
                    course_filter, excluded_types
             FROM sync_settings
             WHERE owner_id = ?1 AND student_id = ?2",
        )?;
        let row = stmt
            .query_row(params![owner_id, student_id], |row| {
                Ok((
                    row.get::<_, bool>(0)?,
                    row.get::<_, bool>(1)?,
                    row.get::<_, bool>(2)?,
                    row.get::<_, bool>(3)?,
                    row.get::<_, bool>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, String>(6)?,
                    row.get::<_, Option<String>>(7)?,
                    row.get::<_, Option<String>>(8)?,
                ))
            })
            .optional()?;

        let Some((
            sync_enabled,
            sync_to_guardian,
            sync_to_student,
            sync_completed,
            auto_sync,
            guardian_raw,
            student_raw,
            course_raw,
            types_raw,
        )) = row
        else {
            return Ok(None);
        };

        Ok(Some(SyncSettings {
            sync_enabled,
            sync_to_guardian,
            sync_to_student,
            sync_completed,
            auto_sync,
            guardian_reminders: serde_json::from_str(&guardian_raw)?,
            student_reminders: serde_json::from_str(&student_raw)?,
            course_filter: course_raw.map(|raw| serde_json::from_str(&raw)).transpose()?,
            excluded_types: types_raw.map(|raw| serde_json::from_str(&raw)).transpose()?,
        }))
    }

    /// Validate and persist new settings.
    pub fn update(&self, owner_id: i64, student_id: i64, settings: &SyncSettings) -> Result<()> {
        settings.validate()?;
        self.persist(owner_id, student_id, settings)
    }

    /// Remove settings for a pair (explicit subject removal only).
    pub fn delete(&self, owner_id: i64, student_id: i64) -> Result<()> {
        self.db.conn().execute(
            "DELETE FROM sync_settings WHERE owner_id = ?1 AND student_id = ?2",
            params![owner_id, student_id],
        )?;
        Ok(())
    }

    fn persist(&self, owner_id: i64, student_id: i64, settings: &SyncSettings) -> Result<()> {
        let course_filter = settings
            .course_filter
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        let excluded_types = settings
            .excluded_types
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;
        self.db.conn().execute(
            "INSERT INTO sync_settings
                 (owner_id, student_id, sync_enabled, sync_to_guardian, sync_to_student,
                  sync_completed, auto_sync, guardian_reminders, student_reminders,
                  course_filter, excluded_types)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
             ON CONFLICT(owner_id, student_id) DO UPDATE SET
                 sync_enabled = excluded.sync_enabled,
                 sync_to_guardian = excluded.sync_to_guardian,
                 sync_to_student = excluded.sync_to_student,
                 sync_completed = excluded.sync_completed,
                 auto_sync = excluded.auto_sync,
                 guardian_reminders = excluded.guardian_reminders,
                 student_reminders = excluded.student_reminders,
                 course_filter = excluded.course_filter,
                 excluded_types = excluded.excluded_types",
            params![
                owner_id,
                student_id,
                settings.sync_enabled,
                settings.sync_to_guardian,
                settings.sync_to_student,
                settings.sync_completed,
                settings.auto_sync,
                serde_json::to_string(&settings.guardian_reminders)?,
                serde_json::to_string(&settings.student_reminders)?,
                course_filter,
                excluded_types,
            ],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn item(title: &str, course: &str, due: bool, submitted: bool) -> WorkItem {
        WorkItem {
            student_id: 2,
            plannable_id: 10,
            title: title.to_string(),
            course_name: course.to_string(),
            due_at: due.then(Utc::now),
            points_possible: Some(10.0),
            grade: None,
            submitted,
            missing: false,
            late: false,
            graded: false,
            updated_at: Utc::now(),
        }
    }

    fn store() -> SettingsStore {
        SettingsStore::new(Arc::new(Database::open_memory().unwrap()))
    }

    #[test]
    fn resolve_creates_defaults_once() {
        let store = store();
        assert!(store.get(1, 2).unwrap().is_none());
        let settings = store.resolve(1, 2).unwrap();
        assert_eq!(settings, SyncSettings::default());
        assert_eq!(settings.guardian_reminders, vec![1440, 120]);
        assert_eq!(settings.student_reminders, vec![120, 30]);
        assert!(!settings.sync_completed);
        // Second resolve reads the persisted row.
        assert!(store.get(1, 2).unwrap().is_some());
        assert_eq!(store.resolve(1, 2).unwrap(), settings);
    }

    #[test]
    fn update_round_trips_filters() {
        let store = store();
        let mut settings = SyncSettings::default();
        settings.course_filter = Some(vec!["Math".into(), "Science".into()]);
        settings.excluded_types = Some(vec![AssignmentType::Discussion]);
        settings.sync_to_student = false;
        store.update(1, 2, &settings).unwrap();
        assert_eq!(store.resolve(1, 2).unwrap(), settings);
    }

    #[test]
    fn update_rejects_excessive_offsets() {
        let store = store();
        let mut settings = SyncSettings::default();
        settings.guardian_reminders = vec![50_000];
        assert!(store.update(1, 2, &settings).is_err());

        settings.guardian_reminders = vec![1; 6];
        assert!(store.update(1, 2, &settings).is_err());
        // Nothing was persisted by the rejected updates.
        assert!(store.get(1, 2).unwrap().is_none());
    }

    #[test]
    fn should_sync_requires_due_date() {
        let settings = SyncSettings::default();
        assert!(settings.should_sync(&item("Essay", "English", true, false)));
        assert!(!settings.should_sync(&item("Essay", "English", false, false)));
    }

    #[test]
    fn should_sync_gates_in_order() {
        let mut settings = SyncSettings::default();

        settings.sync_enabled = false;
        assert!(!settings.should_sync(&item("Essay", "English", true, false)));
        settings.sync_enabled = true;

        // Submitted item dropped unless completed sync is on.
        assert!(!settings.should_sync(&item("Essay", "English", true, true)));
        settings.sync_completed = true;
        assert!(settings.should_sync(&item("Essay", "English", true, true)));

        settings.course_filter = Some(vec!["Math".into()]);
        assert!(!settings.should_sync(&item("Essay", "English", true, false)));
        assert!(settings.should_sync(&item("Worksheet", "Math", true, false)));

        // Empty allow-list allows everything.
        settings.course_filter = Some(vec![]);
        assert!(settings.should_sync(&item("Essay", "English", true, false)));

        settings.excluded_types = Some(vec![AssignmentType::Quiz]);
        assert!(!settings.should_sync(&item("Pop Quiz", "Math", true, false)));
        assert!(settings.should_sync(&item("Worksheet", "Math", true, false)));
    }

    #[test]
    fn filters_differ_ignores_reminders_and_auto_sync() {
        let base = SyncSettings::default();

        let mut changed = base.clone();
        changed.guardian_reminders = vec![60];
        changed.auto_sync = false;
        assert!(!base.filters_differ(&changed));

        let mut changed = base.clone();
        changed.sync_to_student = false;
        assert!(base.filters_differ(&changed));

        let mut changed = base.clone();
        changed.course_filter = Some(vec!["Math".into()]);
        assert!(base.filters_differ(&changed));

        let mut changed = base;
        changed.sync_completed = true;
        assert!(changed.filters_differ(&SyncSettings::default()));
    }
}
