//! Example prompts and follow-up questions generated from the schema.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use quarry_core::types::{Conversation, Message, Role, ToolCall};

use crate::error::ChatError;
use crate::llm::{GenerationRequest, LlmClient, ToolChoice};
use crate::prompt::{example_queries_prompt, example_queries_spec, followup_message_spec, followup_prompt};

const FOLLOW_UP_MAX_TOKENS: u32 = 100;

/// A suggested opening message shown on an empty chat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExampleMessage {
    pub heading: String,
    pub subheading: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExampleMessages {
    pub success: bool,
    pub example_messages: Vec<ExampleMessage>,
}

#[derive(Deserialize)]
struct FollowUpArgs {
    message: String,
}

pub struct Suggestions {
    llm: Arc<dyn LlmClient>,
    model: String,
    temperature: f32,
}

impl Suggestions {
    pub fn new(llm: Arc<dyn LlmClient>, model: impl Into<String>, temperature: f32) -> Self {
        Self {
            llm,
            model: model.into(),
            temperature,
        }
    }

    /// Ask the model for 2-4 example questions about `schema`.
    pub async fn example_messages(&self, schema: &str) -> Result<ExampleMessages, ChatError> {
        if schema.is_empty() {
            return Ok(ExampleMessages {
                success: false,
                example_messages: Vec::new(),
            });
        }

        let request = GenerationRequest::new(
            self.model.clone(),
            self.temperature,
            vec![Message::user(example_queries_prompt(schema))],
        )
        .with_tools(vec![example_queries_spec()], ToolChoice::Auto);

        let completion = self.llm.complete(request).await?;
        let example_messages: Vec<ExampleMessage> = collect_args(&completion.tool_calls, "example_queries");
        debug!(count = example_messages.len(), "Generated example messages");

        Ok(ExampleMessages {
            success: true,
            example_messages,
        })
    }

    /// Suggest questions the user could ask next.
    ///
    /// Empty when the chat has no user message or no assistant message with
    /// content yet.
    pub async fn follow_up_questions(&self, conversation: &Conversation) -> Result<Vec<String>, ChatError> {
        let messages = conversation.messages();
        let Some(schema) = messages.first() else {
            return Ok(Vec::new());
        };
        let last_user = messages.iter().rev().find(|m| m.role == Role::User);
        let last_assistant = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::Assistant && !m.content.is_empty());
        let (Some(user), Some(assistant)) = (last_user, last_assistant) else {
            return Ok(Vec::new());
        };

        let request = GenerationRequest::new(
            self.model.clone(),
            self.temperature,
            vec![Message::user(followup_prompt(&schema.content, &user.content, &assistant.content))],
        )
        .with_tools(vec![followup_message_spec()], ToolChoice::Auto)
        .with_max_tokens(FOLLOW_UP_MAX_TOKENS);

        let completion = self.llm.complete(request).await?;
        let questions = collect_args::<FollowUpArgs>(&completion.tool_calls, "followup_message")
            .into_iter()
            .map(|a| a.message)
            .collect();
        Ok(questions)
    }
}

/// Decode the arguments of every call to `tool`, skipping malformed ones.
fn collect_args<T: serde::de::DeserializeOwned>(calls: &[ToolCall], tool: &str) -> Vec<T> {
    calls
        .iter()
        .filter(|c| c.name == tool)
        .filter_map(|c| T::deserialize(&c.arguments).ok())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::Completion;
    use crate::testing::ScriptedLlm;
    use serde_json::json;

    fn call(name: &str, arguments: serde_json::Value) -> ToolCall {
        ToolCall {
            id: "c".into(),
            name: name.into(),
            arguments,
        }
    }

    #[tokio::test]
    async fn test_example_messages_empty_schema() {
        let llm = Arc::new(ScriptedLlm::new());
        let s = Suggestions::new(llm.clone(), "m", 0.5);
        let out = s.example_messages("").await.unwrap();
        assert!(!out.success);
        assert!(out.example_messages.is_empty());
        assert_eq!(llm.request_count(), 0);
    }

    #[tokio::test]
    async fn test_example_messages_collects_calls() {
        let llm = Arc::new(ScriptedLlm::new());
        llm.push_completion(Completion {
            text: String::new(),
            tool_calls: vec![
                call("example_queries", json!({"heading": "Top", "subheading": "Show me", "message": "Show me top"})),
                call("example_queries", json!({"heading": "broken"})),
                call("example_queries", json!({"heading": "Trend", "subheading": "Plot", "message": "Plot trend"})),
            ],
        });
        let s = Suggestions::new(llm.clone(), "m", 0.5);
        let out = s.example_messages("CREATE TABLE sales(id, amount)").await.unwrap();

        assert!(out.success);
        assert_eq!(out.example_messages.len(), 2);
        assert_eq!(out.example_messages[1].message, "Plot trend");

        let request = llm.last_request();
        assert_eq!(request.tools.len(), 1);
        assert!(request.messages[0].content.ends_with("CREATE TABLE sales(id, amount)"));
    }

    #[tokio::test]
    async fn test_follow_ups_need_both_messages() {
        let llm = Arc::new(ScriptedLlm::new());
        let s = Suggestions::new(llm.clone(), "m", 0.5);

        let mut conv = Conversation::new("c");
        conv.push(Message::system("[Database schema]\nt(a)"));
        conv.push(Message::user("hi"));
        conv.push(Message::assistant(""));
        assert!(s.follow_up_questions(&conv).await.unwrap().is_empty());
        assert_eq!(llm.request_count(), 0);
    }

    #[tokio::test]
    async fn test_follow_ups_request_shape() {
        let llm = Arc::new(ScriptedLlm::new());
        llm.push_completion(Completion {
            text: String::new(),
            tool_calls: vec![
                call("followup_message", json!({"message": "What about March?"})),
                call("followup_message", json!({"message": "Compare to last year"})),
            ],
        });
        let s = Suggestions::new(llm.clone(), "m", 0.5);

        let mut conv = Conversation::new("c");
        conv.push(Message::system("[Database schema]\nsales(month, total)"));
        conv.push(Message::user("Show February sales"));
        conv.push(Message::assistant("February total was 42."));
        conv.push(Message::assistant(""));

        let questions = s.follow_up_questions(&conv).await.unwrap();
        assert_eq!(questions, vec!["What about March?", "Compare to last year"]);

        let request = llm.last_request();
        assert_eq!(request.max_tokens, Some(100));
        let prompt = &request.messages[0].content;
        assert!(prompt.contains("[Database schema]\nsales(month, total)"));
        assert!(prompt.contains("[User message]\nShow February sales"));
        assert!(prompt.contains("[Assistant response]\nFebruary total was 42."));
    }
}
