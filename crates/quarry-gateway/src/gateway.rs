//! The data gateway: a capped query surface over any `Connector`.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info};

use quarry_core::config::DataSourceConfig;

use crate::error::DataSourceError;
use crate::local::{LocalAccess, LocalSqlite};
use crate::remote::RemoteLibsql;
use crate::source::{Connector, DataSource, RawResult, SqlValue};

/// Hard limit on rows returned from any query.
pub const MAX_ROWS: usize = 200;

/// Warning attached when a result was truncated to `MAX_ROWS`.
pub const ROW_CAP_WARNING: &str =
    "Warning: The number of rows is more than 200. Only the first 200 rows are shown.";

const SCHEMA_QUERY: &str = "SELECT sql FROM sqlite_master WHERE type='table'";

/// Chooses a driver from the URL: remote schemes go over HTTP, anything
/// else is a local SQLite file subject to `LocalAccess`.
pub struct SqlConnector {
    timeout: Duration,
    local: LocalAccess,
}

impl SqlConnector {
    /// A connector for remote endpoints only.
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            local: LocalAccess::default(),
        }
    }

    /// Timeout and local roots taken from config. Roots are used as given;
    /// callers expand `~` first.
    pub fn from_config(config: &DataSourceConfig) -> Self {
        Self::new(Duration::from_secs(config.connect_timeout_secs))
            .with_local_access(config.local_roots.iter().map(PathBuf::from).collect(), Vec::new())
    }

    /// Allow local files under `roots`, except anything inside `denied`.
    pub fn with_local_access(mut self, roots: Vec<PathBuf>, denied: Vec<PathBuf>) -> Self {
        self.local = LocalAccess::new(roots, denied);
        self
    }
}

fn is_remote(url: &str) -> bool {
    let lower = url.trim().to_ascii_lowercase();
    ["libsql://", "https://", "http://", "wss://", "ws://"]
        .iter()
        .any(|scheme| lower.starts_with(scheme))
}

#[async_trait]
impl Connector for SqlConnector {
    async fn connect(&self, url: &str, token: &str) -> Result<Box<dyn DataSource>, DataSourceError> {
        if is_remote(url) {
            Ok(Box::new(RemoteLibsql::new(url, token, self.timeout)?))
        } else {
            Ok(Box::new(LocalSqlite::open(url, &self.local).await?))
        }
    }
}

/// A query result truncated to `MAX_ROWS`, plus the truncation warning
/// (empty when nothing was dropped).
#[derive(Debug, Clone, PartialEq)]
pub struct CappedResult {
    pub result: RawResult,
    pub warning: String,
}

/// JSON rows ready to be placed in a tool result.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryOutput {
    pub rows: Vec<Value>,
    pub warning: String,
}

/// Executes SQL against user-supplied databases, one fresh connection per call.
pub struct DataGateway {
    connector: Arc<dyn Connector>,
}

impl DataGateway {
    pub fn new(connector: Arc<dyn Connector>) -> Self {
        Self { connector }
    }

    async fn open(&self, url: &str, token: &str) -> Result<Box<dyn DataSource>, DataSourceError> {
        if url.is_empty() {
            return Err(DataSourceError::NoCredentials);
        }
        self.connector.connect(url, token).await
    }

    /// Run a query and cap the result at `MAX_ROWS`. One extra row is read
    /// to tell whether anything was cut.
    pub async fn fetch(&self, url: &str, token: &str, sql: &str) -> Result<CappedResult, DataSourceError> {
        let source = self.open(url, token).await?;
        let mut result = source.execute(sql, MAX_ROWS + 1).await?;

        let warning = if result.rows.len() > MAX_ROWS {
            result.rows.truncate(MAX_ROWS);
            info!(kept = MAX_ROWS, "Query result truncated");
            ROW_CAP_WARNING.to_string()
        } else {
            String::new()
        };

        Ok(CappedResult { result, warning })
    }

    /// Run a query and render the capped rows as JSON objects.
    pub async fn execute(&self, url: &str, token: &str, sql: &str) -> Result<QueryOutput, DataSourceError> {
        let capped = self.fetch(url, token, sql).await?;
        Ok(QueryOutput {
            rows: capped.result.row_objects(),
            warning: capped.warning,
        })
    }

    /// List the raw `CREATE TABLE` statements of the database.
    pub async fn introspect_schema(&self, url: &str, token: &str) -> Result<Vec<String>, DataSourceError> {
        let source = self.open(url, token).await?;
        let result = source.execute(SCHEMA_QUERY, usize::MAX).await?;

        let definitions: Vec<String> = result
            .rows
            .into_iter()
            .filter_map(|row| match row.into_iter().next() {
                Some(SqlValue::Text(sql)) => Some(sql),
                _ => None,
            })
            .collect();

        debug!(tables = definitions.len(), "Schema introspected");
        Ok(definitions)
    }
}
