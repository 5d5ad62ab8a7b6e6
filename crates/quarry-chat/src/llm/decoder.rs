//! Incremental decoding of chat-completions stream chunks.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;

use quarry_core::types::ToolCall;

use super::StreamEvent;
use crate::error::ChatError;

#[derive(Debug, Deserialize)]
struct Chunk {
    #[serde(default)]
    choices: Vec<ChunkChoice>,
    error: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct ChunkChoice {
    #[serde(default)]
    delta: Delta,
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Delta {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<DeltaToolCall>,
}

#[derive(Debug, Deserialize)]
struct DeltaToolCall {
    #[serde(default)]
    index: u32,
    id: Option<String>,
    function: Option<DeltaFunction>,
}

#[derive(Debug, Deserialize)]
struct DeltaFunction {
    name: Option<String>,
    arguments: Option<String>,
}

#[derive(Debug, Default)]
struct PartialCall {
    id: String,
    name: String,
    arguments: String,
}

/// Turns raw SSE `data:` payloads into `StreamEvent`s.
///
/// Tool-call fragments are accumulated by index and released as one batch
/// when the choice finishes. Exactly one terminal event (`ToolCallBatch`
/// or `Completion`) is produced per stream.
#[derive(Debug, Default)]
pub struct StreamDecoder {
    pending: BTreeMap<u32, PartialCall>,
    finished: bool,
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the terminal event has been produced.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Decode one `data:` payload.
    pub fn feed(&mut self, data: &str) -> Result<Vec<StreamEvent>, ChatError> {
        if self.finished {
            return Ok(Vec::new());
        }

        let data = data.trim();
        if data == "[DONE]" {
            return Ok(vec![self.finish()]);
        }

        let chunk: Chunk = serde_json::from_str(data)
            .map_err(|e| ChatError::Stream(format!("malformed stream chunk: {}", e)))?;
        if let Some(error) = chunk.error {
            let message = error
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string());
            return Err(ChatError::Stream(message));
        }

        let mut events = Vec::new();
        let Some(choice) = chunk.choices.into_iter().next() else {
            return Ok(events);
        };

        if let Some(text) = choice.delta.content.filter(|t| !t.is_empty()) {
            events.push(StreamEvent::Token(text));
        }

        for fragment in choice.delta.tool_calls {
            let entry = self.pending.entry(fragment.index).or_default();
            if let Some(id) = fragment.id {
                entry.id = id;
            }
            if let Some(function) = fragment.function {
                if let Some(name) = function.name {
                    entry.name.push_str(&name);
                }
                if let Some(args) = function.arguments {
                    entry.arguments.push_str(&args);
                }
            }
        }

        if choice.finish_reason.is_some() {
            events.push(self.finish());
        }
        Ok(events)
    }

    fn finish(&mut self) -> StreamEvent {
        self.finished = true;
        if self.pending.is_empty() {
            return StreamEvent::Completion;
        }

        let calls = std::mem::take(&mut self.pending)
            .into_values()
            .map(|partial| ToolCall {
                id: partial.id,
                name: partial.name,
                arguments: parse_arguments(&partial.arguments),
            })
            .collect();
        StreamEvent::ToolCallBatch(calls)
    }
}

/// Parse a JSON-encoded argument string. Unparseable text is kept verbatim
/// as a JSON string so argument validation can report it.
pub(crate) fn parse_arguments(raw: &str) -> Value {
    if raw.trim().is_empty() {
        return Value::Object(Default::default());
    }
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}
