//! Data gateway: SQL execution against user-supplied SQLite and libSQL
//! databases, with a fixed row cap and schema introspection.

pub mod error;
pub mod gateway;
pub mod local;
pub mod remote;
pub mod source;

pub use error::DataSourceError;
pub use gateway::{CappedResult, DataGateway, QueryOutput, SqlConnector, MAX_ROWS, ROW_CAP_WARNING};
pub use local::LocalAccess;
pub use source::{Connector, DataSource, RawResult, SqlValue};
