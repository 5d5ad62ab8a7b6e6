//! Turn orchestrator: drives one user turn from message to completion.
//!
//! The orchestrator is the only writer of a session's log during a turn.
//! It streams the model's response, splices tool results back into the
//! context, and mirrors every change to the UI as patches.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

use quarry_core::config::QuarryConfig;
use quarry_core::types::{Message, ToolCall};

use crate::error::{ChatError, ToolError};
use crate::llm::{GenerationRequest, LlmClient, StreamEvent, ToolChoice};
use crate::projection::{display_for, item_id, project, visible_len, Display, UiItem, UiPatch};
use crate::prompt::{system_prompt, tool_specs};
use crate::session::ChatSession;
use crate::state_machine::TurnState;
use crate::store::ChatStore;
use crate::tools::{ensure_known, ToolDispatcher, ToolInvocation};

/// Limits and model settings for conversational turns.
#[derive(Debug, Clone)]
pub struct TurnConfig {
    pub model: String,
    pub temperature: f32,
    pub max_tool_rounds: usize,
    pub max_consecutive_tool_errors: usize,
    pub stream_idle_timeout: Duration,
}

impl TurnConfig {
    pub fn from_config(config: &QuarryConfig) -> Self {
        Self {
            model: config.llm.model.clone(),
            temperature: config.llm.temperature,
            max_tool_rounds: config.chat.max_tool_rounds,
            max_consecutive_tool_errors: config.chat.max_consecutive_tool_errors,
            stream_idle_timeout: Duration::from_secs(config.chat.stream_idle_timeout_secs),
        }
    }
}

impl Default for TurnConfig {
    fn default() -> Self {
        Self::from_config(&QuarryConfig::default())
    }
}

/// What a completed turn did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TurnSummary {
    pub messages_appended: usize,
    pub tool_rounds: usize,
}

/// How one streamed response ended.
enum Segment {
    Done,
    Tools(Vec<ToolCall>),
}

/// Patch sink for one turn. Sends are best effort: a departed client does
/// not stop the turn.
struct PatchSink<'a> {
    tx: Option<&'a UnboundedSender<UiPatch>>,
}

impl PatchSink<'_> {
    fn send(&self, patch: UiPatch) {
        if let Some(tx) = self.tx {
            let _ = tx.send(patch);
        }
    }

    fn append(&self, item: UiItem) {
        self.send(UiPatch::Append { item });
    }

    fn replace(&self, item: UiItem) {
        self.send(UiPatch::Replace { item });
    }
}

pub struct TurnOrchestrator {
    llm: Arc<dyn LlmClient>,
    dispatcher: ToolDispatcher,
    store: Option<Arc<dyn ChatStore>>,
    config: TurnConfig,
}

impl TurnOrchestrator {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        dispatcher: ToolDispatcher,
        store: Option<Arc<dyn ChatStore>>,
        config: TurnConfig,
    ) -> Self {
        Self {
            llm,
            dispatcher,
            store,
            config,
        }
    }

    /// Run a full turn for `text`. The caller must hold the session's turn
    /// gate.
    ///
    /// On failure the turn is abandoned: messages already appended stay in
    /// the log, the session returns to `AwaitingInput` and the UI is reset
    /// to the projection of the log.
    pub async fn run_turn(
        &self,
        session: &ChatSession,
        text: &str,
        patches: Option<&UnboundedSender<UiPatch>>,
    ) -> Result<TurnSummary, ChatError> {
        if session.state() == TurnState::TurnComplete {
            session.transition(TurnState::AwaitingInput)?;
        }
        let before = session.snapshot()?.len();
        let sink = PatchSink { tx: patches };

        match self.drive(session, text, &sink).await {
            Ok(tool_rounds) => {
                let summary = TurnSummary {
                    messages_appended: session.snapshot()?.len() - before,
                    tool_rounds,
                };
                info!(
                    chat_id = %session.chat_id(),
                    appended = summary.messages_appended,
                    tool_rounds,
                    "Turn complete"
                );
                Ok(summary)
            }
            Err(e) => {
                warn!(chat_id = %session.chat_id(), error = %e, "Turn abandoned");
                if session.state() != TurnState::AwaitingInput {
                    session.transition(TurnState::AwaitingInput)?;
                }
                // Pending items (streamed text, queries without output) never
                // settle; hand the client the projection of what was kept.
                if let Ok(conversation) = session.snapshot() {
                    sink.send(UiPatch::Reset {
                        items: project(&conversation),
                    });
                }
                Err(e)
            }
        }
    }

    async fn drive(&self, session: &ChatSession, text: &str, sink: &PatchSink<'_>) -> Result<usize, ChatError> {
        let user = Message::user(text);
        let user_item = self.next_item(session, &user)?;
        session.append(user)?;
        sink.append(user_item);
        session.transition(TurnState::StreamingResponse)?;

        let mut rounds = 0;
        let mut consecutive_errors = 0;

        loop {
            let tools_enabled = rounds < self.config.max_tool_rounds
                && consecutive_errors < self.config.max_consecutive_tool_errors;
            if !tools_enabled {
                debug!(chat_id = %session.chat_id(), rounds, consecutive_errors, "Tools withheld for the rest of the turn");
            }

            let request = self.build_request(session, tools_enabled)?;
            let (segment, text) = self.stream_segment(session, request, sink).await?;

            let calls = match segment {
                Segment::Tools(calls) if !calls.is_empty() => calls,
                _ => {
                    // Always close the turn with an assistant message, even if empty.
                    self.finish_text(session, text, sink)?;
                    session.transition(TurnState::TurnComplete)?;
                    self.checkpoint(session);
                    sink.send(UiPatch::TurnComplete);
                    return Ok(rounds);
                }
            };

            if !tools_enabled {
                return Err(ChatError::ToolLimitExceeded);
            }
            ensure_known(&calls).map_err(|e| match e {
                ToolError::UnknownTool(name) => ChatError::UnknownTool(name),
                other => ChatError::Llm(other.to_string()),
            })?;

            session.transition(TurnState::ToolDispatch)?;
            self.finish_tool_calls(session, text, &calls, sink)?;

            self.dispatch_batch(session, &calls, &mut consecutive_errors, sink).await?;
            rounds += 1;

            self.checkpoint(session);
            session.transition(TurnState::StreamingResponse)?;
        }
    }

    fn build_request(&self, session: &ChatSession, tools_enabled: bool) -> Result<GenerationRequest, ChatError> {
        let conversation = session.snapshot()?;
        let mut messages = Vec::with_capacity(conversation.len() + 1);
        messages.push(Message::system(system_prompt(Utc::now().date_naive())));
        messages.extend(conversation.messages().iter().cloned());

        let choice = if tools_enabled { ToolChoice::Auto } else { ToolChoice::None };
        Ok(GenerationRequest::new(self.config.model.clone(), self.config.temperature, messages)
            .with_tools(tool_specs(), choice))
    }

    /// Consume one streamed response up to its terminal event.
    ///
    /// Returns how it ended plus the text accumulated along the way; the
    /// streamed text is already visible in the UI as a pending item.
    async fn stream_segment(
        &self,
        session: &ChatSession,
        request: GenerationRequest,
        sink: &PatchSink<'_>,
    ) -> Result<(Segment, PendingText), ChatError> {
        let mut stream = self.llm.stream_chat(request).await?;
        let mut pending = PendingText::default();
        let idle = self.config.stream_idle_timeout;

        loop {
            let next = tokio::time::timeout(idle, stream.next())
                .await
                .map_err(|_| ChatError::StreamTimeout(idle.as_secs()))?;

            match next {
                None | Some(Ok(StreamEvent::Completion)) => return Ok((Segment::Done, pending)),
                Some(Ok(StreamEvent::ToolCallBatch(calls))) => return Ok((Segment::Tools(calls), pending)),
                Some(Ok(StreamEvent::Token(delta))) => {
                    let id = match &pending.item_id {
                        Some(id) => id.clone(),
                        None => {
                            let id = item_id(session.chat_id(), visible_len(&session.snapshot()?));
                            sink.append(UiItem {
                                id: id.clone(),
                                display: Display::Assistant {
                                    text: String::new(),
                                    charts: Vec::new(),
                                },
                            });
                            pending.item_id = Some(id.clone());
                            id
                        }
                    };
                    pending.text.push_str(&delta);
                    sink.send(UiPatch::TextDelta { id, delta });
                }
                Some(Err(e)) => return Err(e),
            }
        }
    }

    /// Append the terminal assistant message.
    fn finish_text(&self, session: &ChatSession, pending: PendingText, sink: &PatchSink<'_>) -> Result<(), ChatError> {
        let message = Message::assistant(pending.text);
        self.append_settled(session, message, pending.item_id.is_some(), sink)
    }

    /// Append the assistant message that carries a tool-call batch.
    fn finish_tool_calls(
        &self,
        session: &ChatSession,
        pending: PendingText,
        calls: &[ToolCall],
        sink: &PatchSink<'_>,
    ) -> Result<(), ChatError> {
        info!(
            chat_id = %session.chat_id(),
            tools = ?calls.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
            "Tool call batch received"
        );
        let message = Message::assistant_tool_calls(pending.text, calls.to_vec());
        self.append_settled(session, message, pending.item_id.is_some(), sink)
    }

    /// Run each call in batch order, appending its result before the next
    /// call starts. `consecutive_errors` carries across batches and resets on
    /// any successful result.
    async fn dispatch_batch(
        &self,
        session: &ChatSession,
        calls: &[ToolCall],
        consecutive_errors: &mut usize,
        sink: &PatchSink<'_>,
    ) -> Result<(), ChatError> {
        let credentials = session.credentials()?;

        for call in calls {
            let id = item_id(session.chat_id(), visible_len(&session.snapshot()?));
            let pending_query = match ToolInvocation::parse(&call.name, &call.arguments) {
                Ok(ToolInvocation::QueryDatabase { query }) | Ok(ToolInvocation::Correlation { query }) => {
                    sink.append(UiItem {
                        id: id.clone(),
                        display: Display::SqlOutput {
                            query,
                            output: serde_json::Value::Null,
                        },
                    });
                    true
                }
                _ => false,
            };

            let outcome = self.dispatcher.dispatch(call, credentials.as_ref()).await;
            if outcome.success {
                *consecutive_errors = 0;
            } else {
                *consecutive_errors += 1;
            }

            let message = Message::tool_result(
                call.id.clone(),
                call.name.clone(),
                call.arguments.clone(),
                outcome.to_content(),
            );
            self.append_settled(session, message, pending_query, sink)?;
        }
        Ok(())
    }

    /// Append a message and settle its UI item: replace the pending item if
    /// one was shown, otherwise append a new one.
    fn append_settled(
        &self,
        session: &ChatSession,
        message: Message,
        has_pending: bool,
        sink: &PatchSink<'_>,
    ) -> Result<(), ChatError> {
        let item = self.next_item(session, &message)?;
        session.append(message)?;
        if has_pending {
            sink.replace(item);
        } else {
            sink.append(item);
        }
        Ok(())
    }

    fn next_item(&self, session: &ChatSession, message: &Message) -> Result<UiItem, ChatError> {
        Ok(UiItem {
            id: item_id(session.chat_id(), visible_len(&session.snapshot()?)),
            display: display_for(message),
        })
    }

    fn checkpoint(&self, session: &ChatSession) {
        let Some(store) = &self.store else {
            return;
        };
        if let Err(e) = session.persist(store.as_ref()) {
            warn!(chat_id = %session.chat_id(), error = %e, "Failed to persist chat");
        }
    }
}

#[derive(Debug, Default)]
struct PendingText {
    text: String,
    item_id: Option<String>,
}
