//! Quarry storage crate - SQLite persistence for chats and schema summaries.
//!
//! Provides a WAL-mode SQLite database with migrations, the chat record
//! repository, and the durable schema-summary cache table.

pub mod db;
pub mod migrations;
pub mod repository;

pub use db::Database;
pub use repository::{ChatRepository, SchemaCacheRepository};
