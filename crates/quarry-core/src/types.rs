//! Conversation data model shared by the engine, storage, and API crates.
//!
//! The canonical log is a `Conversation`: an append-only sequence of
//! `Message`s plus the write-once data-source credentials.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum length of a persisted chat title, in characters.
pub const TITLE_MAX_CHARS: usize = 100;

/// Generate a fresh, never-reused identifier.
pub fn new_id() -> String {
    Uuid::new_v4().simple().to_string()
}

// =============================================================================
// Messages
// =============================================================================

/// Author of a message in the canonical log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
    Tool,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
            Role::System => write!(f, "system"),
            Role::Tool => write!(f, "tool"),
        }
    }
}

/// A structured tool request emitted by the generation service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

/// One entry in the canonical conversation log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: String,
    pub role: Role,
    /// Text payload; empty for assistant messages that only carry tool calls.
    #[serde(default)]
    pub content: String,
    /// Tool name, set only on tool-role messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Correlates a tool-role message with the call that triggered it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
    /// Ordered tool calls attached to an assistant message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_calls: Option<Vec<ToolCall>>,
    /// Arguments the tool ran with, kept on tool-role messages for display.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<serde_json::Value>,
}

impl Message {
    fn with_role(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: new_id(),
            role,
            content: content.into(),
            name: None,
            tool_call_id: None,
            tool_calls: None,
            arguments: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::with_role(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::with_role(Role::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::with_role(Role::System, content)
    }

    /// Assistant message carrying a tool-call batch, plus any text streamed
    /// before the batch arrived.
    pub fn assistant_tool_calls(content: impl Into<String>, calls: Vec<ToolCall>) -> Self {
        let mut msg = Self::with_role(Role::Assistant, content);
        msg.tool_calls = Some(calls);
        msg
    }

    /// Tool-role message holding the JSON-encoded result of one call.
    pub fn tool_result(
        tool_call_id: impl Into<String>,
        name: impl Into<String>,
        arguments: serde_json::Value,
        content: impl Into<String>,
    ) -> Self {
        let mut msg = Self::with_role(Role::Tool, content);
        msg.name = Some(name.into());
        msg.tool_call_id = Some(tool_call_id.into());
        msg.arguments = Some(arguments);
        msg
    }

    /// Whether this is an assistant message with a non-empty tool-call batch.
    pub fn has_tool_calls(&self) -> bool {
        self.role == Role::Assistant && self.tool_calls.as_ref().is_some_and(|c| !c.is_empty())
    }
}

// =============================================================================
// Conversation
// =============================================================================

/// Connection details for the user-supplied database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub url: String,
    pub token: String,
}

/// Returned when credentials are written a second time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("Database URL and auth token already set.")]
pub struct CredentialsLocked;

/// The canonical, append-only log plus connection credentials for one chat.
///
/// There is no API to edit or remove a message; credentials can be written
/// exactly once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    chat_id: String,
    #[serde(default)]
    data_source_url: String,
    #[serde(default)]
    data_source_token: String,
    #[serde(default)]
    messages: Vec<Message>,
}

impl Conversation {
    /// An empty conversation with blank credentials.
    pub fn new(chat_id: impl Into<String>) -> Self {
        Self {
            chat_id: chat_id.into(),
            data_source_url: String::new(),
            data_source_token: String::new(),
            messages: Vec::new(),
        }
    }

    /// Rebuild a conversation from a persisted record.
    pub fn from_record(record: &ChatRecord) -> Self {
        Self {
            chat_id: record.id.clone(),
            data_source_url: record.data_source_url.clone(),
            data_source_token: record.data_source_token.clone(),
            messages: record.messages.clone(),
        }
    }

    pub fn chat_id(&self) -> &str {
        &self.chat_id
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Append a message to the end of the log.
    pub fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    pub fn data_source_url(&self) -> &str {
        &self.data_source_url
    }

    pub fn data_source_token(&self) -> &str {
        &self.data_source_token
    }

    /// Credentials are locked once a URL has been stored.
    pub fn credentials_locked(&self) -> bool {
        !self.data_source_url.is_empty()
    }

    /// Current credentials, or `None` if none have been set.
    pub fn credentials(&self) -> Option<Credentials> {
        if self.data_source_url.is_empty() {
            return None;
        }
        Some(Credentials {
            url: self.data_source_url.clone(),
            token: self.data_source_token.clone(),
        })
    }

    /// Store credentials. Fails without mutating anything if already set.
    pub fn set_credentials(&mut self, url: &str, token: &str) -> Result<(), CredentialsLocked> {
        if self.credentials_locked() {
            return Err(CredentialsLocked);
        }
        self.data_source_url = url.to_string();
        self.data_source_token = token.to_string();
        Ok(())
    }
}

// =============================================================================
// Persisted record
// =============================================================================

/// Storage shape of a chat, written only when it has at least one message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRecord {
    pub id: String,
    pub title: String,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub messages: Vec<Message>,
    pub path: String,
    pub data_source_url: String,
    pub data_source_token: String,
}

impl ChatRecord {
    /// Build the persisted record for a conversation.
    ///
    /// Returns `None` for an empty conversation.
    pub fn from_conversation(
        conversation: &Conversation,
        user_id: &str,
        created_at: DateTime<Utc>,
    ) -> Option<Self> {
        let title = chat_title(conversation.messages())?;
        Some(Self {
            id: conversation.chat_id.clone(),
            title,
            user_id: user_id.to_string(),
            created_at,
            messages: conversation.messages.clone(),
            path: format!("/chat/{}", conversation.chat_id),
            data_source_url: conversation.data_source_url.clone(),
            data_source_token: conversation.data_source_token.clone(),
        })
    }
}

/// Title for a chat: the second message's content, else the first's,
/// truncated to `TITLE_MAX_CHARS` characters.
pub fn chat_title(messages: &[Message]) -> Option<String> {
    let first = messages.first()?;
    let source = messages
        .get(1)
        .filter(|m| !m.content.is_empty())
        .unwrap_or(first);
    Some(source.content.chars().take(TITLE_MAX_CHARS).collect())
}

/// Chat list entry returned to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSummary {
    pub id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub path: String,
}

impl From<&ChatRecord> for ChatSummary {
    fn from(record: &ChatRecord) -> Self {
        Self {
            id: record.id.clone(),
            title: record.title.clone(),
            created_at: record.created_at,
            path: record.path.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // ---- Messages ----

    #[test]
    fn test_message_ids_are_unique() {
        let a = Message::user("hi");
        let b = Message::user("hi");
        assert_ne!(a.id, b.id);
        assert_eq!(a.id.len(), 32);
    }

    #[test]
    fn test_tool_result_message_fields() {
        let msg = Message::tool_result("call_1", "query_database", json!({"query": "SELECT 1"}), "{}");
        assert_eq!(msg.role, Role::Tool);
        assert_eq!(msg.name.as_deref(), Some("query_database"));
        assert_eq!(msg.tool_call_id.as_deref(), Some("call_1"));
        assert!(msg.tool_calls.is_none());
    }

    #[test]
    fn test_has_tool_calls() {
        let call = ToolCall {
            id: "c".into(),
            name: "query_database".into(),
            arguments: json!({}),
        };
        assert!(Message::assistant_tool_calls("", vec![call]).has_tool_calls());
        assert!(!Message::assistant_tool_calls("", vec![]).has_tool_calls());
        assert!(!Message::assistant("text").has_tool_calls());
    }

    #[test]
    fn test_message_serializes_camel_case_and_skips_absent_fields() {
        let msg = Message::tool_result("call_9", "correlation", json!({"query": "q"}), "{}");
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["role"], "tool");
        assert_eq!(value["toolCallId"], "call_9");
        assert!(value.get("toolCalls").is_none());

        let user = serde_json::to_value(Message::user("x")).unwrap();
        assert!(user.get("name").is_none());
        assert!(user.get("arguments").is_none());
    }

    // ---- Credentials ----

    #[test]
    fn test_new_conversation_is_empty_and_unlocked() {
        let conv = Conversation::new("chat-1");
        assert!(conv.is_empty());
        assert!(conv.credentials().is_none());
        assert!(!conv.credentials_locked());
    }

    #[test]
    fn test_credentials_are_write_once() {
        let mut conv = Conversation::new("chat-1");
        conv.set_credentials("libsql://db.example", "tok").unwrap();
        assert!(conv.credentials_locked());

        let second = conv.set_credentials("libsql://other", "tok2");
        assert_eq!(second, Err(CredentialsLocked));
        assert_eq!(conv.data_source_url(), "libsql://db.example");
        assert_eq!(conv.data_source_token(), "tok");
    }

    #[test]
    fn test_tokenless_url_still_locks() {
        let mut conv = Conversation::new("chat-1");
        conv.set_credentials("/tmp/local.db", "").unwrap();
        assert!(conv.set_credentials("/tmp/other.db", "").is_err());
        assert_eq!(conv.credentials().unwrap().url, "/tmp/local.db");
    }

    // ---- Titles and records ----

    #[test]
    fn test_title_prefers_second_message() {
        let msgs = vec![Message::system("[Database schema]"), Message::user("Top sales")];
        assert_eq!(chat_title(&msgs).unwrap(), "Top sales");
    }

    #[test]
    fn test_title_falls_back_to_first_message() {
        let msgs = vec![Message::user("Only one")];
        assert_eq!(chat_title(&msgs).unwrap(), "Only one");

        let msgs = vec![Message::user("First"), Message::assistant("")];
        assert_eq!(chat_title(&msgs).unwrap(), "First");
    }

    #[test]
    fn test_title_truncated_to_100_chars() {
        let long = "é".repeat(150);
        let msgs = vec![Message::user(long)];
        let title = chat_title(&msgs).unwrap();
        assert_eq!(title.chars().count(), 100);
    }

    #[test]
    fn test_record_not_built_for_empty_conversation() {
        let conv = Conversation::new("chat-1");
        assert!(ChatRecord::from_conversation(&conv, "user-1", Utc::now()).is_none());
    }

    #[test]
    fn test_record_shape() {
        let mut conv = Conversation::new("abc");
        conv.set_credentials("libsql://x", "t").unwrap();
        conv.push(Message::user("hello"));
        let record = ChatRecord::from_conversation(&conv, "user-1", Utc::now()).unwrap();
        assert_eq!(record.path, "/chat/abc");
        assert_eq!(record.title, "hello");
        assert_eq!(record.data_source_url, "libsql://x");

        let value = serde_json::to_value(&record).unwrap();
        for key in ["id", "title", "userId", "createdAt", "messages", "path", "dataSourceUrl", "dataSourceToken"] {
            assert!(value.get(key).is_some(), "missing {}", key);
        }

        let restored = Conversation::from_record(&record);
        assert_eq!(restored, conv);
    }
}
