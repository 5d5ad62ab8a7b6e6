//! Turn state machine with validated transitions.
//!
//! AwaitingInput -> StreamingResponse -> (ToolDispatch -> StreamingResponse)* -> TurnComplete
//! TurnComplete -> AwaitingInput starts the next turn; a failed turn drops
//! straight back to AwaitingInput.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ChatError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnState {
    AwaitingInput,
    StreamingResponse,
    ToolDispatch,
    TurnComplete,
}

impl fmt::Display for TurnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TurnState::AwaitingInput => write!(f, "awaiting_input"),
            TurnState::StreamingResponse => write!(f, "streaming_response"),
            TurnState::ToolDispatch => write!(f, "tool_dispatch"),
            TurnState::TurnComplete => write!(f, "turn_complete"),
        }
    }
}

/// Validate that a turn-state transition is allowed.
pub fn validate_transition(from: TurnState, to: TurnState) -> Result<(), ChatError> {
    let valid = matches!(
        (from, to),
        (TurnState::AwaitingInput, TurnState::StreamingResponse)
            | (TurnState::StreamingResponse, TurnState::ToolDispatch)
            | (TurnState::ToolDispatch, TurnState::StreamingResponse)
            | (TurnState::StreamingResponse, TurnState::TurnComplete)
            | (TurnState::TurnComplete, TurnState::AwaitingInput)
            | (TurnState::StreamingResponse, TurnState::AwaitingInput)
            | (TurnState::ToolDispatch, TurnState::AwaitingInput)
    );

    if valid {
        Ok(())
    } else {
        Err(ChatError::InvalidTransition(from, to))
    }
}
