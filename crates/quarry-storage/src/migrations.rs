//! Database schema migrations.
//!
//! Applies the initial schema: the chats table, the schema-summary cache,
//! and the schema_migrations bookkeeping table.

use rusqlite::Connection;
use tracing::info;

use quarry_core::error::QuarryError;

/// Run all pending database migrations.
pub fn run_migrations(conn: &Connection) -> Result<(), QuarryError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY NOT NULL,
            name        TEXT NOT NULL,
            applied_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );",
    )
    .map_err(|e| QuarryError::Storage(format!("Failed to create migrations table: {}", e)))?;

    let current_version: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
            [],
            |row| row.get(0),
        )
        .map_err(|e| QuarryError::Storage(format!("Failed to query migration version: {}", e)))?;

    if current_version < 1 {
        apply_v1(conn)?;
        info!("Applied migration v1: initial_schema");
    }

    Ok(())
}

/// Version 1: chats and schema cache.
fn apply_v1(conn: &Connection) -> Result<(), QuarryError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS chats (
            id                  TEXT PRIMARY KEY NOT NULL,
            user_id             TEXT NOT NULL,
            title               TEXT NOT NULL DEFAULT '',
            path                TEXT NOT NULL,
            created_at          TEXT NOT NULL,
            data_source_url     TEXT NOT NULL DEFAULT '',
            data_source_token   TEXT NOT NULL DEFAULT '',
            messages            TEXT NOT NULL DEFAULT '[]',
            updated_at          INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );

        CREATE INDEX IF NOT EXISTS idx_chats_user ON chats(user_id, created_at DESC);

        CREATE TABLE IF NOT EXISTS schema_cache (
            key         TEXT PRIMARY KEY NOT NULL,
            filtered    TEXT NOT NULL,
            created_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );

        INSERT INTO schema_migrations (version, name) VALUES (1, 'initial_schema');
        ",
    )
    .map_err(|e| QuarryError::Storage(format!("Migration v1 failed: {}", e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();

        let versions: i64 = conn
            .query_row("SELECT COUNT(*) FROM schema_migrations", [], |row| row.get(0))
            .unwrap();
        assert_eq!(versions, 1);
    }

    #[test]
    fn test_tables_created() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        let mut stmt = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap();
        let names: Vec<String> = stmt
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<_, _>>()
            .unwrap();
        assert!(names.contains(&"chats".to_string()));
        assert!(names.contains(&"schema_cache".to_string()));
    }
}
