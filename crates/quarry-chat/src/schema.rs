//! Schema summarization, memoized by content hash.

use std::sync::Arc;

use sha2::{Digest, Sha256};
use tracing::{debug, info};

use quarry_core::types::Message;

use crate::error::ChatError;
use crate::llm::{GenerationRequest, LlmClient};
use crate::prompt::SCHEMA_FILTER_INSTRUCTION;
use crate::store::SchemaCache;

/// Cache key for a raw schema string: `schema:` + hex SHA-256.
pub fn schema_cache_key(raw_schema: &str) -> String {
    let digest = Sha256::digest(raw_schema.as_bytes());
    format!("schema:{}", hex::encode(digest))
}

/// Reduces raw table definitions to a compact description using an
/// auxiliary model call. Identical schemas are only summarized once.
pub struct SchemaSummarizer {
    llm: Arc<dyn LlmClient>,
    cache: Arc<dyn SchemaCache>,
    model: String,
    temperature: f32,
}

impl SchemaSummarizer {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        cache: Arc<dyn SchemaCache>,
        model: impl Into<String>,
        temperature: f32,
    ) -> Self {
        Self {
            llm,
            cache,
            model: model.into(),
            temperature,
        }
    }

    /// Summarize the given `CREATE TABLE` statements.
    pub async fn summarize(&self, definitions: &[String]) -> Result<String, ChatError> {
        let raw = definitions.join("\n");
        let key = schema_cache_key(&raw);

        if let Some(cached) = self.cache.get(&key)? {
            debug!(key = %key, "Schema summary cache hit");
            return Ok(cached);
        }

        let request = GenerationRequest::new(
            self.model.clone(),
            self.temperature,
            vec![Message::system(SCHEMA_FILTER_INSTRUCTION), Message::system(raw)],
        );
        let summary = self.llm.complete(request).await?.text;

        self.cache.put(&key, &summary)?;
        info!(key = %key, tables = definitions.len(), "Schema summarized");
        Ok(summary)
    }
}
