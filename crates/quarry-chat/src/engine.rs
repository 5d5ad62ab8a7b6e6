//! Chat engine: the session registry and the entry points used by the API.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

use quarry_core::config::QuarryConfig;
use quarry_core::types::{chat_title, new_id, ChatSummary, Message};
use quarry_gateway::DataGateway;

use crate::error::ChatError;
use crate::llm::LlmClient;
use crate::orchestrator::{TurnConfig, TurnOrchestrator, TurnSummary};
use crate::projection::{project, UiItem, UiPatch};
use crate::prompt::schema_message;
use crate::schema::SchemaSummarizer;
use crate::session::{ChatSession, TurnGuard};
use crate::store::ChatStore;
use crate::suggestions::{ExampleMessages, Suggestions};
use crate::tools::ToolDispatcher;

/// A chat as shown to its owner. Credentials are reduced to a flag.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatDetail {
    pub id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub path: String,
    pub messages: Vec<Message>,
    pub data_source_connected: bool,
}

/// A validated user message holding the session's turn gate.
///
/// Splitting validation from execution lets callers report rejection
/// synchronously and then run the turn elsewhere.
pub struct PreparedTurn {
    session: Arc<ChatSession>,
    text: String,
    _guard: TurnGuard,
}

impl PreparedTurn {
    pub fn chat_id(&self) -> &str {
        self.session.chat_id()
    }
}

pub struct ChatEngine {
    sessions: RwLock<HashMap<String, Arc<ChatSession>>>,
    orchestrator: TurnOrchestrator,
    gateway: Arc<DataGateway>,
    summarizer: SchemaSummarizer,
    suggestions: Suggestions,
    store: Option<Arc<dyn ChatStore>>,
    max_message_length: usize,
}

impl ChatEngine {
    pub fn new(
        config: &QuarryConfig,
        llm: Arc<dyn LlmClient>,
        gateway: Arc<DataGateway>,
        summarizer: SchemaSummarizer,
        store: Option<Arc<dyn ChatStore>>,
    ) -> Self {
        let orchestrator = TurnOrchestrator::new(
            Arc::clone(&llm),
            ToolDispatcher::new(Arc::clone(&gateway)),
            store.clone(),
            TurnConfig::from_config(config),
        );
        Self {
            sessions: RwLock::new(HashMap::new()),
            orchestrator,
            gateway,
            summarizer,
            suggestions: Suggestions::new(llm, config.llm.model.clone(), config.llm.temperature),
            store,
            max_message_length: config.chat.max_message_length,
        }
    }

    // ---- Registry ----

    /// Start a new, empty chat for `user_id`.
    pub fn create_chat(&self, user_id: &str) -> Result<Arc<ChatSession>, ChatError> {
        let session = Arc::new(ChatSession::new(new_id(), user_id));
        self.sessions
            .write()
            .map_err(|e| ChatError::Storage(format!("session lock poisoned: {}", e)))?
            .insert(session.chat_id().to_string(), Arc::clone(&session));
        info!(chat_id = %session.chat_id(), user_id, "Chat created");
        Ok(session)
    }

    /// Look up a live session, loading it from the store if needed.
    pub fn session(&self, chat_id: &str) -> Result<Arc<ChatSession>, ChatError> {
        {
            let sessions = self
                .sessions
                .read()
                .map_err(|e| ChatError::Storage(format!("session lock poisoned: {}", e)))?;
            if let Some(session) = sessions.get(chat_id) {
                session.touch();
                return Ok(Arc::clone(session));
            }
        }

        let record = match &self.store {
            Some(store) => store.load(chat_id)?,
            None => None,
        };
        let record = record.ok_or_else(|| ChatError::SessionNotFound(chat_id.to_string()))?;

        let mut sessions = self
            .sessions
            .write()
            .map_err(|e| ChatError::Storage(format!("session lock poisoned: {}", e)))?;
        let session = sessions
            .entry(chat_id.to_string())
            .or_insert_with(|| Arc::new(ChatSession::from_record(&record)));
        session.touch();
        Ok(Arc::clone(session))
    }

    /// Drop sessions idle for at least `max_idle` that nothing else holds
    /// and whose log is empty or fully saved. Returns how many were dropped.
    ///
    /// Saved chats come back from the store on their next lookup. Without a
    /// store only empty chats are dropped, since memory is their only copy.
    pub fn evict_idle_sessions(&self, max_idle: Duration) -> Result<usize, ChatError> {
        let mut sessions = self
            .sessions
            .write()
            .map_err(|e| ChatError::Storage(format!("session lock poisoned: {}", e)))?;
        let before = sessions.len();
        let has_store = self.store.is_some();

        // Holding the write lock, a strong count of one means no turn,
        // credential set or handler has the session.
        sessions.retain(|_, session| {
            let evictable = Arc::strong_count(session) == 1
                && session.idle_for() >= max_idle
                && (session.is_empty().unwrap_or(false)
                    || (has_store && session.is_saved().unwrap_or(false)));
            !evictable
        });

        let evicted = before - sessions.len();
        if evicted > 0 {
            debug!(evicted, remaining = sessions.len(), "Evicted idle chat sessions");
        }
        Ok(evicted)
    }

    /// A session owned by `user_id`. Chats of other users are reported as
    /// missing.
    pub fn owned_session(&self, chat_id: &str, user_id: &str) -> Result<Arc<ChatSession>, ChatError> {
        let session = self.session(chat_id)?;
        if session.user_id() != user_id {
            return Err(ChatError::SessionNotFound(chat_id.to_string()));
        }
        Ok(session)
    }

    /// Chats of `user_id`, newest first.
    pub fn list_chats(&self, user_id: &str) -> Result<Vec<ChatSummary>, ChatError> {
        if let Some(store) = &self.store {
            return store.list(user_id);
        }

        let sessions = self
            .sessions
            .read()
            .map_err(|e| ChatError::Storage(format!("session lock poisoned: {}", e)))?;
        let mut summaries = Vec::new();
        for session in sessions.values().filter(|s| s.user_id() == user_id) {
            if let Some(record) = session.record()? {
                summaries.push(ChatSummary::from(&record));
            }
        }
        summaries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(summaries)
    }

    pub fn chat_detail(&self, chat_id: &str, user_id: &str) -> Result<ChatDetail, ChatError> {
        let session = self.owned_session(chat_id, user_id)?;
        let conversation = session.snapshot()?;
        let title = chat_title(conversation.messages()).unwrap_or_default();
        Ok(ChatDetail {
            id: session.chat_id().to_string(),
            title,
            created_at: session.created_at(),
            path: format!("/chat/{}", session.chat_id()),
            data_source_connected: conversation.credentials_locked(),
            messages: conversation.messages().to_vec(),
        })
    }

    /// Current UI items for a chat, derived from its log.
    pub fn ui_state(&self, chat_id: &str, user_id: &str) -> Result<Vec<UiItem>, ChatError> {
        let session = self.owned_session(chat_id, user_id)?;
        Ok(project(&session.snapshot()?))
    }

    // ---- Turns ----

    /// Validate a user message and claim the chat's turn gate.
    pub fn begin_turn(&self, chat_id: &str, user_id: &str, text: &str) -> Result<PreparedTurn, ChatError> {
        if text.trim().is_empty() {
            return Err(ChatError::EmptyMessage);
        }
        if text.chars().count() > self.max_message_length {
            return Err(ChatError::MessageTooLong(self.max_message_length));
        }

        let session = self.owned_session(chat_id, user_id)?;
        let guard = session.try_begin_turn()?;
        Ok(PreparedTurn {
            session,
            text: text.to_string(),
            _guard: guard,
        })
    }

    /// Run a prepared turn to completion. The gate is released on return.
    pub async fn run_turn(
        &self,
        turn: PreparedTurn,
        patches: Option<&UnboundedSender<UiPatch>>,
    ) -> Result<TurnSummary, ChatError> {
        self.orchestrator.run_turn(&turn.session, &turn.text, patches).await
    }

    /// Validate and run a turn in one call.
    pub async fn submit_user_message(
        &self,
        chat_id: &str,
        user_id: &str,
        text: &str,
        patches: Option<&UnboundedSender<UiPatch>>,
    ) -> Result<TurnSummary, ChatError> {
        let turn = self.begin_turn(chat_id, user_id, text)?;
        self.run_turn(turn, patches).await
    }

    // ---- Credentials ----

    /// Connect a chat to its database.
    ///
    /// Credentials are write-once. Nothing changes unless introspection and
    /// summarization both succeed; on success the schema summary is appended
    /// as a system message and the credentials are locked in.
    pub async fn set_database_creds(
        &self,
        chat_id: &str,
        user_id: &str,
        url: &str,
        token: &str,
    ) -> Result<(), ChatError> {
        let session = self.owned_session(chat_id, user_id)?;
        let _guard = session.try_begin_turn()?;
        if session.credentials_locked()? {
            return Err(ChatError::CredentialConflict);
        }

        let definitions = self
            .gateway
            .introspect_schema(url, token)
            .await
            .map_err(|e| ChatError::SchemaIntrospection(e.to_string()))?;
        let summary = self
            .summarizer
            .summarize(&definitions)
            .await
            .map_err(|e| ChatError::SchemaIntrospection(e.to_string()))?;

        session.connect_data_source(url, token, schema_message(&summary))?;
        info!(chat_id, tables = definitions.len(), "Database connected");

        if let Some(store) = &self.store {
            if let Err(e) = session.persist(store.as_ref()) {
                warn!(chat_id, error = %e, "Failed to persist chat");
            }
        }
        Ok(())
    }

    // ---- Suggestions ----

    pub async fn example_messages(&self, schema: &str) -> Result<ExampleMessages, ChatError> {
        self.suggestions.example_messages(schema).await
    }

    pub async fn follow_up_questions(&self, chat_id: &str, user_id: &str) -> Result<Vec<String>, ChatError> {
        let session = self.owned_session(chat_id, user_id)?;
        let conversation = session.snapshot()?;
        self.suggestions.follow_up_questions(&conversation).await
    }
}
