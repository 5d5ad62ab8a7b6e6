//! Error types for the conversation engine.

use quarry_core::error::QuarryError;
use quarry_core::types::CredentialsLocked;
use quarry_gateway::DataSourceError;

use crate::state_machine::TurnState;

/// Errors surfaced to callers of the chat engine.
///
/// Tool failures never appear here: they are folded into tool results
/// and the turn continues.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("message cannot be empty")]
    EmptyMessage,
    #[error("message exceeds maximum length of {0} characters")]
    MessageTooLong(usize),
    #[error("session not found: {0}")]
    SessionNotFound(String),
    #[error("a turn is already in progress for this chat")]
    TurnInProgress,
    #[error("Database URL and auth token already set.")]
    CredentialConflict,
    #[error("{0}")]
    SchemaIntrospection(String),
    #[error("stream error: {0}")]
    Stream(String),
    #[error("no stream event received for {0} seconds")]
    StreamTimeout(u64),
    #[error("unknown tool requested: {0}")]
    UnknownTool(String),
    #[error("tool calls requested after tools were disabled for this turn")]
    ToolLimitExceeded,
    #[error("LLM error: {0}")]
    Llm(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("invalid turn transition: {0} -> {1}")]
    InvalidTransition(TurnState, TurnState),
}

impl From<QuarryError> for ChatError {
    fn from(err: QuarryError) -> Self {
        ChatError::Storage(err.to_string())
    }
}

impl From<CredentialsLocked> for ChatError {
    fn from(_: CredentialsLocked) -> Self {
        ChatError::CredentialConflict
    }
}

/// Failures inside a single tool invocation. These become the payload of a
/// `{success: false}` tool result.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("unknown tool: {0}")]
    UnknownTool(String),
    #[error("invalid arguments for {tool}: {reason}")]
    InvalidArguments { tool: String, reason: String },
    #[error(transparent)]
    DataSource(#[from] DataSourceError),
    #[error("column {column} contains non-numeric value {value}")]
    NonNumeric { column: String, value: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chat_error_display() {
        assert_eq!(ChatError::EmptyMessage.to_string(), "message cannot be empty");
        assert_eq!(
            ChatError::MessageTooLong(4000).to_string(),
            "message exceeds maximum length of 4000 characters"
        );
        assert_eq!(
            ChatError::CredentialConflict.to_string(),
            "Database URL and auth token already set."
        );
        assert_eq!(
            ChatError::StreamTimeout(60).to_string(),
            "no stream event received for 60 seconds"
        );
    }

    #[test]
    fn test_chat_error_from_quarry_error() {
        let err: ChatError = QuarryError::Storage("disk full".to_string()).into();
        assert!(matches!(err, ChatError::Storage(_)));
        assert!(err.to_string().contains("disk full"));
    }

    #[test]
    fn test_chat_error_from_credentials_locked() {
        let err: ChatError = CredentialsLocked.into();
        assert!(matches!(err, ChatError::CredentialConflict));
    }

    #[test]
    fn test_tool_error_data_source_is_transparent() {
        let err: ToolError = DataSourceError::Sql("no such column: tmp".to_string()).into();
        assert_eq!(err.to_string(), "no such column: tmp");
    }
}
