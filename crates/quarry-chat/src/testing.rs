//! Test doubles shared by the engine's unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use futures::StreamExt;

use quarry_core::types::ChatRecord;
use quarry_gateway::{Connector, DataSource, DataSourceError, RawResult};

use crate::error::ChatError;
use crate::llm::{Completion, EventStream, GenerationRequest, LlmClient, StreamEvent};
use crate::store::ChatStore;

/// An `LlmClient` that replays scripted responses and records requests.
#[derive(Default)]
pub struct ScriptedLlm {
    streams: Mutex<VecDeque<Vec<Result<StreamEvent, ChatError>>>>,
    completions: Mutex<VecDeque<Result<Completion, ChatError>>>,
    pub requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedLlm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_stream(&self, events: Vec<StreamEvent>) {
        self.streams
            .lock()
            .unwrap()
            .push_back(events.into_iter().map(Ok).collect());
    }

    pub fn push_stream_results(&self, events: Vec<Result<StreamEvent, ChatError>>) {
        self.streams.lock().unwrap().push_back(events);
    }

    pub fn push_completion(&self, completion: Completion) {
        self.completions.lock().unwrap().push_back(Ok(completion));
    }

    pub fn push_completion_error(&self, err: ChatError) {
        self.completions.lock().unwrap().push_back(Err(err));
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn last_request(&self) -> GenerationRequest {
        self.requests.lock().unwrap().last().cloned().unwrap()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlm {
    async fn stream_chat(&self, request: GenerationRequest) -> Result<EventStream, ChatError> {
        self.requests.lock().unwrap().push(request);
        let events = self
            .streams
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| ChatError::Llm("no scripted stream left".to_string()))?;
        Ok(futures::stream::iter(events).boxed())
    }

    async fn complete(&self, request: GenerationRequest) -> Result<Completion, ChatError> {
        self.requests.lock().unwrap().push(request);
        self.completions
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(ChatError::Llm("no scripted completion left".to_string())))
    }
}

/// A connector serving canned results keyed by SQL text.
#[derive(Default)]
pub struct FakeConnector {
    results: HashMap<String, RawResult>,
    pub refuse: bool,
}

impl FakeConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_result(mut self, sql: &str, result: RawResult) -> Self {
        self.results.insert(sql.to_string(), result);
        self
    }

    pub fn refusing() -> Self {
        Self {
            results: HashMap::new(),
            refuse: true,
        }
    }
}

struct FakeSource {
    results: HashMap<String, RawResult>,
}

#[async_trait]
impl DataSource for FakeSource {
    async fn execute(&self, sql: &str, max_rows: usize) -> Result<RawResult, DataSourceError> {
        let mut result = self
            .results
            .get(sql)
            .cloned()
            .ok_or_else(|| DataSourceError::Sql(format!("no such table in: {}", sql)))?;
        result.rows.truncate(max_rows);
        Ok(result)
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(&self, _url: &str, _token: &str) -> Result<Box<dyn DataSource>, DataSourceError> {
        if self.refuse {
            return Err(DataSourceError::Connection("connection refused".to_string()));
        }
        Ok(Box::new(FakeSource {
            results: self.results.clone(),
        }))
    }
}

/// In-memory chat store.
#[derive(Default)]
pub struct MemoryChatStore {
    pub records: Mutex<HashMap<String, ChatRecord>>,
    pub saves: Mutex<usize>,
}

impl ChatStore for MemoryChatStore {
    fn save(&self, record: &ChatRecord) -> Result<(), ChatError> {
        *self.saves.lock().unwrap() += 1;
        self.records
            .lock()
            .unwrap()
            .insert(record.id.clone(), record.clone());
        Ok(())
    }

    fn load(&self, chat_id: &str) -> Result<Option<ChatRecord>, ChatError> {
        Ok(self.records.lock().unwrap().get(chat_id).cloned())
    }

    fn list(&self, user_id: &str) -> Result<Vec<quarry_core::types::ChatSummary>, ChatError> {
        let mut out: Vec<_> = self
            .records
            .lock()
            .unwrap()
            .values()
            .filter(|r| r.user_id == user_id)
            .map(quarry_core::types::ChatSummary::from)
            .collect();
        out.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(out)
    }
}
