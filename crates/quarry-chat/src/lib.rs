//! Conversation engine for quarry.
//!
//! Runs chat turns against a streaming text-generation service, dispatches
//! the model's tool calls to the user's database, and projects the
//! canonical message log into UI items.

pub mod correlation;
pub mod engine;
pub mod error;
pub mod llm;
pub mod orchestrator;
pub mod projection;
pub mod prompt;
pub mod schema;
pub mod session;
pub mod state_machine;
pub mod store;
pub mod suggestions;
pub mod tools;

#[cfg(test)]
mod testing;

pub use engine::{ChatDetail, ChatEngine, PreparedTurn};
pub use error::{ChatError, ToolError};
pub use llm::{
    Completion, EventStream, GenerationRequest, LlmClient, OpenAiClient, StreamEvent, ToolChoice,
};
pub use orchestrator::{TurnConfig, TurnOrchestrator, TurnSummary};
pub use projection::{project, Chart, Display, UiItem, UiPatch, UiState};
pub use schema::{schema_cache_key, SchemaSummarizer};
pub use session::{ChatSession, TurnGuard};
pub use state_machine::TurnState;
pub use store::{ChatStore, MemorySchemaCache, SchemaCache};
pub use suggestions::{ExampleMessage, ExampleMessages, Suggestions};
pub use tools::{ToolDispatcher, ToolInvocation, ToolOutcome};
