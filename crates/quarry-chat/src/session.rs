//! A single chat: its canonical log, owner, turn state, and turn gate.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::OwnedMutexGuard;
use tracing::debug;

use quarry_core::types::{ChatRecord, Conversation, Credentials, Message};

use crate::error::ChatError;
use crate::state_machine::{validate_transition, TurnState};
use crate::store::ChatStore;

/// Held for the duration of a turn or a credential set.
pub type TurnGuard = OwnedMutexGuard<()>;

/// One conversation and the bookkeeping needed to run turns against it.
///
/// The log only grows. Turns are serialized by the gate: a second turn (or
/// a credential set) attempted while one is running is rejected.
pub struct ChatSession {
    chat_id: String,
    user_id: String,
    created_at: DateTime<Utc>,
    conversation: RwLock<Conversation>,
    state: Mutex<TurnState>,
    gate: Arc<tokio::sync::Mutex<()>>,
    last_active: Mutex<Instant>,
    /// Log length at the last successful save.
    saved_len: AtomicUsize,
}

impl ChatSession {
    pub fn new(chat_id: impl Into<String>, user_id: impl Into<String>) -> Self {
        let chat_id = chat_id.into();
        Self {
            conversation: RwLock::new(Conversation::new(chat_id.clone())),
            chat_id,
            user_id: user_id.into(),
            created_at: Utc::now(),
            state: Mutex::new(TurnState::AwaitingInput),
            gate: Arc::new(tokio::sync::Mutex::new(())),
            last_active: Mutex::new(Instant::now()),
            saved_len: AtomicUsize::new(0),
        }
    }

    /// Rebuild a session from a persisted record.
    pub fn from_record(record: &ChatRecord) -> Self {
        Self {
            chat_id: record.id.clone(),
            user_id: record.user_id.clone(),
            created_at: record.created_at,
            conversation: RwLock::new(Conversation::from_record(record)),
            state: Mutex::new(TurnState::AwaitingInput),
            gate: Arc::new(tokio::sync::Mutex::new(())),
            last_active: Mutex::new(Instant::now()),
            saved_len: AtomicUsize::new(record.messages.len()),
        }
    }

    pub fn chat_id(&self) -> &str {
        &self.chat_id
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Record that the chat was just used.
    pub fn touch(&self) {
        if let Ok(mut last) = self.last_active.lock() {
            *last = Instant::now();
        }
    }

    pub fn idle_for(&self) -> Duration {
        self.last_active
            .lock()
            .map(|last| last.elapsed())
            .unwrap_or_default()
    }

    /// Take the turn gate, or fail if a turn is already running.
    pub fn try_begin_turn(&self) -> Result<TurnGuard, ChatError> {
        Arc::clone(&self.gate)
            .try_lock_owned()
            .map_err(|_| ChatError::TurnInProgress)
    }

    // ---- Conversation access ----

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Conversation>, ChatError> {
        self.conversation
            .read()
            .map_err(|e| ChatError::Storage(format!("conversation lock poisoned: {}", e)))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, Conversation>, ChatError> {
        self.conversation
            .write()
            .map_err(|e| ChatError::Storage(format!("conversation lock poisoned: {}", e)))
    }

    /// A copy of the current log.
    pub fn snapshot(&self) -> Result<Conversation, ChatError> {
        Ok(self.read()?.clone())
    }

    pub fn append(&self, message: Message) -> Result<(), ChatError> {
        let mut conv = self.write()?;
        debug!(chat_id = %self.chat_id, role = %message.role, index = conv.len(), "Appending message");
        conv.push(message);
        Ok(())
    }

    pub fn credentials(&self) -> Result<Option<Credentials>, ChatError> {
        Ok(self.read()?.credentials())
    }

    pub fn credentials_locked(&self) -> Result<bool, ChatError> {
        Ok(self.read()?.credentials_locked())
    }

    /// Append the schema message and lock in the credentials in one step.
    pub fn connect_data_source(&self, url: &str, token: &str, schema_message: String) -> Result<(), ChatError> {
        let mut conv = self.write()?;
        if conv.credentials_locked() {
            return Err(ChatError::CredentialConflict);
        }
        conv.push(Message::system(schema_message));
        conv.set_credentials(url, token)?;
        Ok(())
    }

    /// The record to persist, or `None` while the log is empty.
    pub fn record(&self) -> Result<Option<ChatRecord>, ChatError> {
        Ok(ChatRecord::from_conversation(&*self.read()?, &self.user_id, self.created_at))
    }

    /// Save the current log to `store`. An empty log is not saved.
    pub fn persist(&self, store: &dyn ChatStore) -> Result<(), ChatError> {
        if let Some(record) = self.record()? {
            store.save(&record)?;
            self.saved_len.store(record.messages.len(), Ordering::Release);
        }
        Ok(())
    }

    pub fn is_empty(&self) -> Result<bool, ChatError> {
        Ok(self.read()?.is_empty())
    }

    /// Whether everything in the log has reached the store.
    pub fn is_saved(&self) -> Result<bool, ChatError> {
        Ok(self.saved_len.load(Ordering::Acquire) == self.read()?.len())
    }

    // ---- Turn state ----

    pub fn state(&self) -> TurnState {
        self.state.lock().map(|s| *s).unwrap_or(TurnState::AwaitingInput)
    }

    pub fn transition(&self, to: TurnState) -> Result<(), ChatError> {
        let mut state = self
            .state
            .lock()
            .map_err(|e| ChatError::Storage(format!("turn state lock poisoned: {}", e)))?;
        validate_transition(*state, to)?;
        debug!(chat_id = %self.chat_id, from = %*state, to = %to, "Turn state transition");
        *state = to;
        Ok(())
    }
}

impl std::fmt::Debug for ChatSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatSession")
            .field("chat_id", &self.chat_id)
            .field("user_id", &self.user_id)
            .field("state", &self.state())
            .finish()
    }
}
