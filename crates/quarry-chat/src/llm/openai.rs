//! OpenAI-compatible chat-completions client.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest_eventsource::{Event, EventSource};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

use quarry_core::config::LlmConfig;
use quarry_core::types::{Message, Role, ToolCall};

use super::decoder::{parse_arguments, StreamDecoder};
use super::{Completion, EventStream, GenerationRequest, LlmClient};
use crate::error::ChatError;

/// Client for `{base_url}/chat/completions`.
pub struct OpenAiClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
    request_timeout: Duration,
}

impl OpenAiClient {
    pub fn new(config: &LlmConfig) -> Result<Self, ChatError> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| ChatError::Llm(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            request_timeout: Duration::from_secs(config.request_timeout_secs),
        })
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    fn post(&self) -> reqwest::RequestBuilder {
        let builder = self.http.post(self.endpoint());
        if self.api_key.is_empty() {
            builder
        } else {
            builder.bearer_auth(&self.api_key)
        }
    }
}

/// Build the JSON request body.
pub(crate) fn request_body(request: &GenerationRequest, stream: bool) -> Value {
    let mut body = json!({
        "model": request.model,
        "temperature": request.temperature,
        "messages": request.messages.iter().map(wire_message).collect::<Vec<_>>(),
        "stream": stream,
    });
    if !request.tools.is_empty() {
        body["tools"] = Value::Array(request.tools.clone());
        body["tool_choice"] = Value::String(request.tool_choice.as_str().to_string());
    }
    if let Some(max_tokens) = request.max_tokens {
        body["max_tokens"] = json!(max_tokens);
    }
    body
}

fn wire_message(message: &Message) -> Value {
    let mut wire = json!({ "role": message.role.to_string() });

    match message.role {
        Role::Tool => {
            wire["content"] = Value::String(message.content.clone());
            if let Some(id) = &message.tool_call_id {
                wire["tool_call_id"] = Value::String(id.clone());
            }
        }
        Role::Assistant if message.has_tool_calls() => {
            wire["content"] = if message.content.is_empty() {
                Value::Null
            } else {
                Value::String(message.content.clone())
            };
            let calls = message.tool_calls.as_deref().unwrap_or_default();
            wire["tool_calls"] = Value::Array(calls.iter().map(wire_tool_call).collect());
        }
        _ => {
            wire["content"] = Value::String(message.content.clone());
        }
    }
    wire
}

fn wire_tool_call(call: &ToolCall) -> Value {
    // Arguments that failed to parse are stored as the raw string.
    let arguments = match &call.arguments {
        Value::String(raw) => raw.clone(),
        other => other.to_string(),
    };
    json!({
        "id": call.id,
        "type": "function",
        "function": { "name": call.name, "arguments": arguments }
    })
}

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: CompletionMessage,
}

#[derive(Debug, Deserialize)]
struct CompletionMessage {
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<WireToolCall>,
}

#[derive(Debug, Deserialize)]
struct WireToolCall {
    id: String,
    function: WireFunction,
}

#[derive(Debug, Deserialize)]
struct WireFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

pub(crate) fn parse_completion(body: &str) -> Result<Completion, ChatError> {
    let response: CompletionResponse = serde_json::from_str(body)
        .map_err(|e| ChatError::Llm(format!("malformed completion response: {}", e)))?;
    let message = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| ChatError::Llm("completion response has no choices".to_string()))?
        .message;

    Ok(Completion {
        text: message.content.unwrap_or_default(),
        tool_calls: message
            .tool_calls
            .into_iter()
            .map(|call| ToolCall {
                id: call.id,
                name: call.function.name,
                arguments: parse_arguments(&call.function.arguments),
            })
            .collect(),
    })
}

#[async_trait]
impl LlmClient for OpenAiClient {
    async fn stream_chat(&self, request: GenerationRequest) -> Result<EventStream, ChatError> {
        let body = request_body(&request, true);
        debug!(
            model = %request.model,
            messages = request.messages.len(),
            tool_choice = request.tool_choice.as_str(),
            "Starting streaming completion"
        );

        let mut source = EventSource::new(self.post().json(&body))
            .map_err(|e| ChatError::Stream(format!("failed to open event stream: {}", e)))?;
        source.set_retry_policy(Box::new(reqwest_eventsource::retry::Never));

        let (tx, rx) = mpsc::channel::<Result<super::StreamEvent, ChatError>>(64);

        tokio::spawn(async move {
            let mut decoder = StreamDecoder::new();

            while let Some(event) = source.next().await {
                match event {
                    Ok(Event::Open) => {}
                    Ok(Event::Message(message)) => match decoder.feed(&message.data) {
                        Ok(events) => {
                            for event in events {
                                if tx.send(Ok(event)).await.is_err() {
                                    source.close();
                                    return;
                                }
                            }
                            if decoder.is_finished() {
                                break;
                            }
                        }
                        Err(e) => {
                            let _ = tx.send(Err(e)).await;
                            break;
                        }
                    },
                    Err(reqwest_eventsource::Error::StreamEnded) => break,
                    Err(e) => {
                        warn!(error = %e, "Completion stream failed");
                        let _ = tx.send(Err(ChatError::Stream(e.to_string()))).await;
                        break;
                    }
                }
            }
            source.close();
        });

        Ok(ReceiverStream::new(rx).boxed())
    }

    async fn complete(&self, request: GenerationRequest) -> Result<Completion, ChatError> {
        let body = request_body(&request, false);
        debug!(model = %request.model, messages = request.messages.len(), "Requesting completion");

        let response = self
            .post()
            .timeout(self.request_timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| ChatError::Llm(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ChatError::Llm(e.to_string()))?;
        if !status.is_success() {
            return Err(ChatError::Llm(format!("HTTP {}: {}", status.as_u16(), text.trim())));
        }

        parse_completion(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ToolChoice;

    #[test]
    fn test_request_body_includes_tools_and_choice() {
        let request = GenerationRequest::new("gpt-test", 0.5, vec![Message::user("hi")])
            .with_tools(vec![json!({"type": "function", "function": {"name": "f"}})], ToolChoice::None)
            .with_max_tokens(100);
        let body = request_body(&request, true);

        assert_eq!(body["model"], "gpt-test");
        assert_eq!(body["stream"], true);
        assert_eq!(body["tool_choice"], "none");
        assert_eq!(body["max_tokens"], 100);
        assert_eq!(body["messages"][0], json!({"role": "user", "content": "hi"}));
    }

    #[test]
    fn test_request_body_without_tools_omits_choice() {
        let request = GenerationRequest::new("m", 0.0, vec![Message::system("s")]);
        let body = request_body(&request, false);
        assert!(body.get("tools").is_none());
        assert!(body.get("tool_choice").is_none());
        assert!(body.get("max_tokens").is_none());
    }

    #[test]
    fn test_wire_messages_for_tool_exchange() {
        let call = ToolCall {
            id: "call_1".into(),
            name: "query_database".into(),
            arguments: json!({"query": "SELECT 1"}),
        };
        let assistant = wire_message(&Message::assistant_tool_calls("", vec![call]));
        assert_eq!(assistant["content"], Value::Null);
        assert_eq!(assistant["tool_calls"][0]["type"], "function");
        assert_eq!(
            assistant["tool_calls"][0]["function"]["arguments"],
            "{\"query\":\"SELECT 1\"}"
        );

        let tool = wire_message(&Message::tool_result(
            "call_1",
            "query_database",
            json!({"query": "SELECT 1"}),
            "{\"success\":true}",
        ));
        assert_eq!(tool["role"], "tool");
        assert_eq!(tool["tool_call_id"], "call_1");
        assert!(tool.get("name").is_none());
    }

    #[test]
    fn test_raw_string_arguments_sent_verbatim() {
        let call = ToolCall {
            id: "c".into(),
            name: "query_database".into(),
            arguments: Value::String("{broken".into()),
        };
        assert_eq!(wire_tool_call(&call)["function"]["arguments"], "{broken");
    }

    #[test]
    fn test_parse_completion_with_tool_calls() {
        let body = json!({
            "choices": [{"message": {"role": "assistant", "content": null, "tool_calls": [
                {"id": "t1", "type": "function", "function": {"name": "followup_message", "arguments": "{\"message\":\"And by month?\"}"}}
            ]}, "finish_reason": "tool_calls"}]
        })
        .to_string();
        let completion = parse_completion(&body).unwrap();
        assert!(completion.text.is_empty());
        assert_eq!(completion.tool_calls.len(), 1);
        assert_eq!(completion.tool_calls[0].arguments["message"], "And by month?");
    }

    #[test]
    fn test_parse_completion_text() {
        let body = json!({"choices": [{"message": {"role": "assistant", "content": "CREATE TABLE t (a)"}}]})
            .to_string();
        assert_eq!(parse_completion(&body).unwrap().text, "CREATE TABLE t (a)");
        assert!(parse_completion("{\"choices\": []}").is_err());
    }
}
