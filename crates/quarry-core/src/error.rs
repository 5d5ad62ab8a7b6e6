use thiserror::Error;

/// Top-level error type shared by the quarry crates.
///
/// Subsystem crates define their own error types and implement
/// `From<QuarryError>` so that `?` works across crate boundaries.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum QuarryError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<toml::de::Error> for QuarryError {
    fn from(err: toml::de::Error) -> Self {
        QuarryError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for QuarryError {
    fn from(err: toml::ser::Error) -> Self {
        QuarryError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for QuarryError {
    fn from(err: serde_json::Error) -> Self {
        QuarryError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for quarry operations.
pub type Result<T> = std::result::Result<T, QuarryError>;
