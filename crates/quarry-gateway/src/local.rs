//! Local SQLite files, opened read-only through rusqlite.
//!
//! Files are reachable only under the configured roots, and never inside a
//! denied directory (the service's own data directory).

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use rusqlite::limits::Limit;
use rusqlite::{Connection, OpenFlags};
use tracing::{debug, warn};

use crate::error::DataSourceError;
use crate::source::{DataSource, RawResult, SqlValue};

/// Which local files a chat may open.
#[derive(Debug, Clone, Default)]
pub struct LocalAccess {
    roots: Vec<PathBuf>,
    denied: Vec<PathBuf>,
}

impl LocalAccess {
    pub fn new(roots: Vec<PathBuf>, denied: Vec<PathBuf>) -> Self {
        Self { roots, denied }
    }

    pub fn is_enabled(&self) -> bool {
        !self.roots.is_empty()
    }

    /// Resolve a plain path or `file:` URL to a canonical file the chat is
    /// allowed to read.
    pub fn resolve(&self, location: &str) -> Result<PathBuf, DataSourceError> {
        if !self.is_enabled() {
            return Err(DataSourceError::LocalDenied(
                "local database files are not enabled; use a libsql:// or https:// URL".to_string(),
            ));
        }

        let path = file_path(location)?;
        let canonical = std::fs::canonicalize(&path)
            .map_err(|e| DataSourceError::Connection(format!("{}: {}", path.display(), e)))?;

        let within = |dirs: &[PathBuf]| {
            dirs.iter()
                .filter_map(|dir| std::fs::canonicalize(dir).ok())
                .any(|dir| canonical.starts_with(dir))
        };
        if within(&self.denied) || !within(&self.roots) {
            warn!(path = %canonical.display(), "Refused local database outside permitted roots");
            return Err(DataSourceError::LocalDenied(format!(
                "{} is not in a permitted directory",
                path.display()
            )));
        }
        Ok(canonical)
    }
}

/// Strip a `file:` scheme. URI parameters are refused so the open mode
/// cannot be changed from the URL.
fn file_path(location: &str) -> Result<PathBuf, DataSourceError> {
    let location = location.trim();
    let path = location
        .strip_prefix("file://")
        .or_else(|| location.strip_prefix("file:"))
        .unwrap_or(location);
    if path.contains('?') {
        return Err(DataSourceError::Connection(
            "file URLs with parameters are not supported".to_string(),
        ));
    }
    Ok(PathBuf::from(path))
}

/// A read-only connection to an existing SQLite file.
pub struct LocalSqlite {
    conn: Arc<Mutex<Connection>>,
}

impl LocalSqlite {
    pub async fn open(location: &str, access: &LocalAccess) -> Result<Self, DataSourceError> {
        let location = location.to_string();
        let access = access.clone();
        let conn = tokio::task::spawn_blocking(move || {
            let path = access.resolve(&location)?;
            open_read_only(&path)
        })
        .await
        .map_err(|e| DataSourceError::Connection(format!("open task failed: {}", e)))??;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

fn open_read_only(path: &Path) -> Result<Connection, DataSourceError> {
    let flags = OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX;
    let conn = Connection::open_with_flags(path, flags)
        .map_err(|e| DataSourceError::Connection(e.to_string()))?;
    // No ATTACH: a permitted file must not become a route to any other.
    conn.set_limit(Limit::SQLITE_LIMIT_ATTACHED, 0);
    conn.pragma_update(None, "query_only", true)?;
    Ok(conn)
}

#[async_trait]
impl DataSource for LocalSqlite {
    async fn execute(&self, sql: &str, max_rows: usize) -> Result<RawResult, DataSourceError> {
        let conn = Arc::clone(&self.conn);
        let sql = sql.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = conn
                .lock()
                .map_err(|e| DataSourceError::Connection(format!("connection lock poisoned: {}", e)))?;
            run_query(&conn, &sql, max_rows)
        })
        .await
        .map_err(|e| DataSourceError::Connection(format!("query task failed: {}", e)))?
    }
}

fn run_query(conn: &Connection, sql: &str, max_rows: usize) -> Result<RawResult, DataSourceError> {
    let mut stmt = conn.prepare(sql)?;
    let columns: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
    let width = columns.len();

    let mut rows = Vec::new();
    let mut cursor = stmt.query([])?;
    while rows.len() < max_rows {
        let Some(row) = cursor.next()? else {
            break;
        };
        let mut cells = Vec::with_capacity(width);
        for i in 0..width {
            cells.push(SqlValue::from(row.get_ref(i)?));
        }
        rows.push(cells);
    }

    debug!(columns = width, rows = rows.len(), "Local query executed");
    Ok(RawResult { columns, rows })
}
