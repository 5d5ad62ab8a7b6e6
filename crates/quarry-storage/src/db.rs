//! Quarry's own SQLite database: chat records and the schema cache.
//!
//! One connection behind a mutex. File databases run in WAL mode so the
//! chat list can be read while a turn checkpoints.

use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use rusqlite::Connection;
use tracing::info;

use quarry_core::error::QuarryError;

use crate::migrations;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

fn storage_err(context: &str) -> impl Fn(rusqlite::Error) -> QuarryError + '_ {
    move |e| QuarryError::Storage(format!("{}: {}", context, e))
}

pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open or create the database file, creating parent directories, and
    /// bring the schema up to date.
    pub fn new(path: &Path) -> Result<Self, QuarryError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path).map_err(storage_err("Failed to open database"))?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(storage_err("Failed to enable WAL"))?;
        conn.pragma_update(None, "synchronous", "NORMAL")
            .map_err(storage_err("Failed to set synchronous"))?;

        let db = Self::init(conn)?;
        info!(path = %path.display(), "Chat database ready");
        Ok(db)
    }

    /// A private database that disappears with the process.
    pub fn in_memory() -> Result<Self, QuarryError> {
        let conn = Connection::open_in_memory().map_err(storage_err("Failed to open in-memory database"))?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self, QuarryError> {
        conn.busy_timeout(BUSY_TIMEOUT)
            .map_err(storage_err("Failed to set busy timeout"))?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.with_conn(migrations::run_migrations)?;
        Ok(db)
    }

    /// Run `f` with exclusive access to the connection.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, QuarryError>
    where
        F: FnOnce(&Connection) -> Result<T, QuarryError>,
    {
        let conn = self
            .conn
            .lock()
            .map_err(|e| QuarryError::Storage(format!("Database lock poisoned: {}", e)))?;
        f(&conn)
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_memory_database() {
        let db = Database::in_memory().unwrap();
        db.with_conn(|conn| {
            let count: i64 = conn
                .query_row("SELECT COUNT(*) FROM chats", [], |row| row.get(0))
                .map_err(|e| QuarryError::Storage(e.to_string()))?;
            assert_eq!(count, 0);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("quarry.db");
        let db = Database::new(&path).unwrap();

        db.with_conn(|conn| {
            let count: i64 = conn
                .query_row("SELECT COUNT(*) FROM schema_cache", [], |row| row.get(0))
                .map_err(|e| QuarryError::Storage(e.to_string()))?;
            assert_eq!(count, 0);
            Ok(())
        })
        .unwrap();

        assert!(path.exists());
    }

    #[test]
    fn test_wal_mode_enabled() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(&dir.path().join("wal.db")).unwrap();
        db.with_conn(|conn| {
            let mode: String = conn
                .query_row("PRAGMA journal_mode", [], |row| row.get(0))
                .map_err(|e| QuarryError::Storage(e.to_string()))?;
            assert_eq!(mode, "wal");
            Ok(())
        })
        .unwrap();
    }
}
