//! Persistence seams: the chat-record store and the schema-summary cache.

use std::collections::HashMap;
use std::sync::RwLock;

use quarry_core::types::{ChatRecord, ChatSummary};
use quarry_storage::{ChatRepository, SchemaCacheRepository};

use crate::error::ChatError;

/// Where finished conversations are kept.
pub trait ChatStore: Send + Sync {
    fn save(&self, record: &ChatRecord) -> Result<(), ChatError>;
    fn load(&self, chat_id: &str) -> Result<Option<ChatRecord>, ChatError>;
    fn list(&self, user_id: &str) -> Result<Vec<ChatSummary>, ChatError>;
}

impl ChatStore for ChatRepository {
    fn save(&self, record: &ChatRecord) -> Result<(), ChatError> {
        Ok(ChatRepository::save(self, record)?)
    }

    fn load(&self, chat_id: &str) -> Result<Option<ChatRecord>, ChatError> {
        Ok(self.find_by_id(chat_id)?)
    }

    fn list(&self, user_id: &str) -> Result<Vec<ChatSummary>, ChatError> {
        Ok(self.list_by_user(user_id)?)
    }
}

/// Schema summaries keyed by content hash. Entries are never evicted and
/// writing the same key twice is harmless.
pub trait SchemaCache: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, ChatError>;
    fn put(&self, key: &str, summary: &str) -> Result<(), ChatError>;
}

impl SchemaCache for SchemaCacheRepository {
    fn get(&self, key: &str) -> Result<Option<String>, ChatError> {
        Ok(SchemaCacheRepository::get(self, key)?)
    }

    fn put(&self, key: &str, summary: &str) -> Result<(), ChatError> {
        Ok(SchemaCacheRepository::put(self, key, summary)?)
    }
}

/// Process-local schema cache.
#[derive(Debug, Default)]
pub struct MemorySchemaCache {
    entries: RwLock<HashMap<String, String>>,
}

impl MemorySchemaCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SchemaCache for MemorySchemaCache {
    fn get(&self, key: &str) -> Result<Option<String>, ChatError> {
        let entries = self
            .entries
            .read()
            .map_err(|e| ChatError::Storage(format!("schema cache lock poisoned: {}", e)))?;
        Ok(entries.get(key).cloned())
    }

    fn put(&self, key: &str, summary: &str) -> Result<(), ChatError> {
        let mut entries = self
            .entries
            .write()
            .map_err(|e| ChatError::Storage(format!("schema cache lock poisoned: {}", e)))?;
        entries.insert(key.to_string(), summary.to_string());
        Ok(())
    }
}
