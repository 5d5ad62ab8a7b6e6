//! UI projection of the conversation log.
//!
//! `project` is the reference derivation. During a turn the orchestrator
//! emits `UiPatch`es instead; applying them to the pre-turn projection
//! yields the same items as projecting the finished log.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use quarry_core::types::{Conversation, Message, Role};

use crate::prompt::{CORRELATION, QUERY_DATABASE};
use crate::tools::{BarLineChart, PieChart, ToolInvocation};

/// A chart requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "chart", rename_all = "snake_case")]
pub enum Chart {
    BarLine(BarLineChart),
    Pie(PieChart),
}

/// What a single item renders as.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Display {
    User { text: String },
    Assistant { text: String, charts: Vec<Chart> },
    SqlOutput { query: String, output: Value },
    Empty,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UiItem {
    pub id: String,
    pub display: Display,
}

/// Incremental change to a `UiState`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum UiPatch {
    Append { item: UiItem },
    TextDelta { id: String, delta: String },
    Replace { item: UiItem },
    /// Replace every item. Sent when a turn is abandoned so that
    /// half-streamed items are dropped.
    Reset { items: Vec<UiItem> },
    TurnComplete,
}

/// Id of the item at `index` in the system-filtered log.
pub fn item_id(chat_id: &str, index: usize) -> String {
    format!("{}-{}", chat_id, index)
}

/// Number of messages that produce a UI item.
pub fn visible_len(conversation: &Conversation) -> usize {
    conversation
        .messages()
        .iter()
        .filter(|m| m.role != Role::System)
        .count()
}

/// Full recompute of the UI from the canonical log.
pub fn project(conversation: &Conversation) -> Vec<UiItem> {
    conversation
        .messages()
        .iter()
        .filter(|m| m.role != Role::System)
        .enumerate()
        .map(|(index, message)| UiItem {
            id: item_id(conversation.chat_id(), index),
            display: display_for(message),
        })
        .collect()
}

pub fn display_for(message: &Message) -> Display {
    match message.role {
        Role::User => Display::User {
            text: message.content.clone(),
        },
        Role::Assistant => Display::Assistant {
            text: message.content.clone(),
            charts: charts_for(message),
        },
        Role::Tool => sql_output_for(message).unwrap_or(Display::Empty),
        Role::System => Display::Empty,
    }
}

fn charts_for(message: &Message) -> Vec<Chart> {
    let Some(calls) = &message.tool_calls else {
        return Vec::new();
    };
    calls
        .iter()
        .filter_map(|call| match ToolInvocation::parse(&call.name, &call.arguments) {
            Ok(ToolInvocation::BarLineChart(chart)) => Some(Chart::BarLine(chart)),
            Ok(ToolInvocation::PieChart(chart)) => Some(Chart::Pie(chart)),
            _ => None,
        })
        .collect()
}

fn sql_output_for(message: &Message) -> Option<Display> {
    let name = message.name.as_deref()?;
    if name != QUERY_DATABASE && name != CORRELATION {
        return None;
    }
    let query = message.arguments.as_ref()?.get("query")?.as_str()?.to_string();
    let output = serde_json::from_str::<Value>(&message.content)
        .ok()
        .and_then(|v| v.get("output").cloned())
        .unwrap_or(Value::Null);
    Some(Display::SqlOutput { query, output })
}

/// A client-side view built from a projection plus patches.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UiState {
    pub items: Vec<UiItem>,
}

impl UiState {
    pub fn new(items: Vec<UiItem>) -> Self {
        Self { items }
    }

    pub fn apply(&mut self, patch: &UiPatch) {
        match patch {
            UiPatch::Append { item } => self.items.push(item.clone()),
            UiPatch::Replace { item } => {
                if let Some(existing) = self.items.iter_mut().find(|i| i.id == item.id) {
                    *existing = item.clone();
                }
            }
            UiPatch::TextDelta { id, delta } => {
                if let Some(UiItem {
                    display: Display::Assistant { text, .. },
                    ..
                }) = self.items.iter_mut().find(|i| &i.id == id)
                {
                    text.push_str(delta);
                }
            }
            UiPatch::Reset { items } => self.items = items.clone(),
            UiPatch::TurnComplete => {}
        }
    }
}
