//! SQLite persistence for credentials, sync settings, and event mappings.
//!
//! A single `Database` owns the connection behind a mutex so the stores can
//! be cloned into background sync tasks. Schema migration runs on open.

use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};

use rusqlite::Connection;

use crate::error::{DatabaseError, Result};

use super::data_dir;

/// SQLite database holding the engine's three tables.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open the database at `~/.config/duesync/duesync.db`.
    ///
    /// Creates the database file and schema if they don't exist.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or migrated.
    pub fn open() -> Result<Self> {
        let path = data_dir()?.join("duesync.db");
        Self::open_at(&path)
    }

    /// Open the database at an explicit path.
    pub fn open_at(path: &Path) -> Result<Self> {
        let conn = Connection::open(path).map_err(|source| DatabaseError::OpenFailed {
            path: PathBuf::from(path),
            source,
        })?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.migrate()?;
        Ok(db)
    }

    /// Open an in-memory database (for tests).
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| DatabaseError::QueryFailed(e.to_string()))?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.migrate()?;
        Ok(db)
    }

    /// Lock and return the underlying connection.
    pub(crate) fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap()
    }

    fn migrate(&self) -> Result<()> {
        self.conn()
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS calendar_credentials (
                    id            INTEGER PRIMARY KEY AUTOINCREMENT,
                    owner_id      INTEGER NOT NULL,
                    student_id    INTEGER NOT NULL,
                    role          TEXT NOT NULL,
                    access_token  TEXT NOT NULL,
                    refresh_token TEXT NOT NULL,
                    expires_at    TEXT NOT NULL,
                    google_email  TEXT NOT NULL,
                    calendar_id   TEXT,
                    updated_at    TEXT NOT NULL,
                    UNIQUE(owner_id, student_id, role)
                );

                CREATE TABLE IF NOT EXISTS sync_settings (
                    id                 INTEGER PRIMARY KEY AUTOINCREMENT,
                    owner_id           INTEGER NOT NULL,
                    student_id         INTEGER NOT NULL,
                    sync_enabled       INTEGER NOT NULL DEFAULT 1,
                    sync_to_guardian   INTEGER NOT NULL DEFAULT 1,
                    sync_to_student    INTEGER NOT NULL DEFAULT 1,
                    sync_completed     INTEGER NOT NULL DEFAULT 0,
                    auto_sync          INTEGER NOT NULL DEFAULT 1,
                    guardian_reminders TEXT NOT NULL,
                    student_reminders  TEXT NOT NULL,
                    course_filter      TEXT,
                    excluded_types     TEXT,
                    UNIQUE(owner_id, student_id)
                );

                CREATE TABLE IF NOT EXISTS event_mappings (
                    id           INTEGER PRIMARY KEY AUTOINCREMENT,
                    plannable_id INTEGER NOT NULL,
                    student_id   INTEGER NOT NULL,
                    role         TEXT NOT NULL,
                    calendar_id  TEXT NOT NULL,
                    event_id     TEXT NOT NULL,
                    synced_at    TEXT NOT NULL,
                    UNIQUE(plannable_id, student_id, role)
                );

                CREATE INDEX IF NOT EXISTS idx_credentials_expiry
                    ON calendar_credentials(expires_at);
                CREATE INDEX IF NOT EXISTS idx_mappings_student
                    ON event_mappings(student_id);",
            )
            .map_err(|e| DatabaseError::MigrationFailed(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_memory_migrates() {
        let db = Database::open_memory().unwrap();
        // All three tables exist and are queryable.
        for table in ["calendar_credentials", "sync_settings", "event_mappings"] {
            let count: i64 = db
                .conn()
                .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| {
                    row.get(0)
                })
                .unwrap();
            assert_eq!(count, 0);
        }
    }

    #[test]
    fn migrate_is_idempotent() {
        let db = Database::open_memory().unwrap();
        db.migrate().unwrap();
        db.migrate().unwrap();
    }

    #[test]
    fn file_backed_database_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("duesync.db");
        {
            let db = Database::open_at(&path).unwrap();
            db.conn()
                .execute(
                    "INSERT INTO event_mappings
                         (plannable_id, student_id, role, calendar_id, event_id, synced_at)
                     VALUES (1, 2, 'guardian', 'cal', 'ev', '2026-08-01T00:00:00Z')",
                    [],
                )
                .unwrap();
        }
        let db = Database::open_at(&path).unwrap();
        let count: i64 = db
            .conn()
            .query_row("SELECT COUNT(*) FROM event_mappings", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);
    }
}
