//! Quarry API crate - axum HTTP server for chats, credentials, and
//! streamed turns.
//!
//! Turns are streamed to the client as server-sent UI patches.

pub mod auth;
pub mod error;
pub mod handlers;
pub mod routes;
pub mod state;

pub use error::ApiError;
pub use routes::{create_router, start_server};
pub use state::AppState;
