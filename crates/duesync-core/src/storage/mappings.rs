//! Persisted links between work items and the calendar events created for
//! them, one row per (item, student, role).

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use crate::error::Result;
use crate::model::AccountRole;
use crate::storage::Database;

/// Link between a work item and its external calendar event.
#[derive(Debug, Clone, PartialEq)]
pub struct EventMapping {
    pub plannable_id: i64,
    pub student_id: i64,
    pub role: AccountRole,
    pub calendar_id: String,
    pub event_id: String,
    pub synced_at: DateTime<Utc>,
}

/// Store for event mappings.
#[derive(Clone)]
pub struct EventMappingStore {
    db: Arc<Database>,
}

impl EventMappingStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    pub fn get(
        &self,
        plannable_id: i64,
        student_id: i64,
        role: AccountRole,
    ) -> Result<Option<EventMapping>> {
        let conn = self.db.conn();
        let mut stmt = conn.prepare(
            "SELECT calendar_id, event_id, synced_at
             FROM event_mappings
             WHERE plannable_id = ?1 AND student_id = ?2 AND role = ?3",
        )?;
        let row = stmt
            .query_row(params![plannable_id, student_id, role.as_str()], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })
            .optional()?;

        Ok(row.map(|(calendar_id, event_id, synced_raw)| EventMapping {
            plannable_id,
            student_id,
            role,
            calendar_id,
            event_id,
            synced_at: DateTime::parse_from_rfc3339(&synced_raw)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
        }))
    }

    /// Insert or replace the mapping for its (item, student, role) key.
    pub fn upsert(&self, mapping: &EventMapping) -> Result<()> {
        self.db.conn().execute(
            "INSERT INTO event_mappings
                 (plannable_id, student_id, role, calendar_id, event_id, synced_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(plannable_id, student_id, role) DO UPDATE SET
                 calendar_id = excluded.calendar_id,
                 event_id = excluded.event_id,
                 synced_at = excluded.synced_at",
            params![
                mapping.plannable_id,
                mapping.student_id,
                mapping.role.as_str(),
                mapping.calendar_id,
                mapping.event_id,
                mapping.synced_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Refresh the last-synced timestamp after an update/complete call.
    pub fn touch(
        &self,
        plannable_id: i64,
        student_id: i64,
        role: AccountRole,
        at: DateTime<Utc>,
    ) -> Result<()> {
        self.db.conn().execute(
            "UPDATE event_mappings SET synced_at = ?4
             WHERE plannable_id = ?1 AND student_id = ?2 AND role = ?3",
            params![plannable_id, student_id, role.as_str(), at.to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn delete(&self, plannable_id: i64, student_id: i64, role: AccountRole) -> Result<()> {
        self.db.conn().execute(
            "DELETE FROM event_mappings
             WHERE plannable_id = ?1 AND student_id = ?2 AND role = ?3",
            params![plannable_id, student_id, role.as_str()],
        )?;
        Ok(())
    }

    /// All mappings for one student, across items and roles. Used by the
    /// orphan scan in incremental sync.
    pub fn for_student(&self, student_id: i64) -> Result<Vec<EventMapping>> {
        let conn = self.db.conn();
        let mut stmt = conn.prepare(
            "SELECT plannable_id, role, calendar_id, event_id, synced_at
             FROM event_mappings
             WHERE student_id = ?1
             ORDER BY plannable_id",
        )?;
        let rows = stmt.query_map(params![student_id], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
            ))
        })?;

        let mut mappings = Vec::new();
        for row in rows {
            let (plannable_id, role_raw, calendar_id, event_id, synced_raw) = row?;
            let Some(role) = AccountRole::from_str(&role_raw) else {
                continue;
            };
            mappings.push(EventMapping {
                plannable_id,
                student_id,
                role,
                calendar_id,
                event_id,
                synced_at: DateTime::parse_from_rfc3339(&synced_raw)
                    .map(|dt| dt.with_timezone(&Utc))
                    .unwrap_or_else(|_| Utc::now()),
            });
        }
        Ok(mappings)
    }

    /// Remove every mapping for a student (subject removal).
    pub fn delete_for_student(&self, student_id: i64) -> Result<usize> {
        let deleted = self.db.conn().execute(
            "DELETE FROM event_mappings WHERE student_id = ?1",
            params![student_id],
        )?;
        Ok(deleted)
    }
}
