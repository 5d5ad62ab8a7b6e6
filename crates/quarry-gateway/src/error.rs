//! Error types for the data gateway.

/// Errors raised while talking to a user-supplied database.
///
/// The `Display` text is what ends up in a failed tool result, so it is
/// kept to the underlying driver message where one exists.
#[derive(Debug, thiserror::Error)]
pub enum DataSourceError {
    #[error("No database connected")]
    NoCredentials,
    #[error("{0}")]
    Connection(String),
    #[error("{0}")]
    LocalDenied(String),
    #[error("{0}")]
    Sql(String),
    #[error("unexpected response from database: {0}")]
    Protocol(String),
    #[error("database request timed out")]
    Timeout,
}

impl From<rusqlite::Error> for DataSourceError {
    fn from(err: rusqlite::Error) -> Self {
        DataSourceError::Sql(err.to_string())
    }
}

impl From<reqwest::Error> for DataSourceError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            DataSourceError::Timeout
        } else if err.is_decode() {
            DataSourceError::Protocol(err.to_string())
        } else {
            DataSourceError::Connection(err.to_string())
        }
    }
}
