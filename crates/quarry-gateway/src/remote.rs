//! Remote libSQL databases over the HTTP pipeline protocol.
//!
//! Each `execute` sends a single pipeline of `execute` + `close`, so no
//! server-side stream outlives the call.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::error::DataSourceError;
use crate::source::{DataSource, RawResult, SqlValue};

/// A libSQL endpoint reached over HTTP(S).
pub struct RemoteLibsql {
    client: reqwest::Client,
    pipeline_url: String,
    token: String,
}

impl RemoteLibsql {
    pub fn new(url: &str, token: &str, timeout: Duration) -> Result<Self, DataSourceError> {
        let base = http_base_url(url)?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DataSourceError::Connection(e.to_string()))?;

        Ok(Self {
            client,
            pipeline_url: format!("{}/v2/pipeline", base),
            token: token.to_string(),
        })
    }
}

#[async_trait]
impl DataSource for RemoteLibsql {
    async fn execute(&self, sql: &str, max_rows: usize) -> Result<RawResult, DataSourceError> {
        let body = json!({
            "requests": [
                { "type": "execute", "stmt": { "sql": sql } },
                { "type": "close" }
            ]
        });

        let mut request = self.client.post(&self.pipeline_url).json(&body);
        if !self.token.is_empty() {
            request = request.bearer_auth(&self.token);
        }

        let response = request.send().await?;
        let status = response.status();
        let text = response.text().await?;

        if !status.is_success() {
            return Err(DataSourceError::Connection(format!(
                "HTTP {}: {}",
                status.as_u16(),
                text.trim()
            )));
        }

        // The pipeline has no row limit of its own; extra rows are dropped here.
        let mut result = parse_pipeline_response(&text)?;
        result.rows.truncate(max_rows);
        debug!(columns = result.columns.len(), rows = result.rows.len(), "Remote query executed");
        Ok(result)
    }
}

/// Map a libSQL URL onto the HTTP base the pipeline endpoint lives under.
pub fn http_base_url(url: &str) -> Result<String, DataSourceError> {
    let url = url.trim().trim_end_matches('/');
    let (scheme, rest) = url
        .split_once("://")
        .ok_or_else(|| DataSourceError::Connection(format!("unsupported database URL: {}", url)))?;

    let http_scheme = match scheme.to_ascii_lowercase().as_str() {
        "libsql" | "https" | "wss" => "https",
        "http" | "ws" => "http",
        other => {
            return Err(DataSourceError::Connection(format!(
                "unsupported URL scheme: {}",
                other
            )))
        }
    };

    if rest.is_empty() {
        return Err(DataSourceError::Connection(format!("missing host in URL: {}", url)));
    }
    Ok(format!("{}://{}", http_scheme, rest))
}

// =============================================================================
// Wire format
// =============================================================================

#[derive(Debug, Deserialize)]
struct PipelineResponse {
    results: Vec<PipelineResult>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum PipelineResult {
    Ok { response: StreamResponse },
    Error { error: WireError },
}

#[derive(Debug, Deserialize)]
struct StreamResponse {
    #[serde(rename = "type")]
    kind: String,
    result: Option<StmtResult>,
}

#[derive(Debug, Deserialize)]
struct WireError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct StmtResult {
    cols: Vec<WireColumn>,
    rows: Vec<Vec<WireValue>>,
}

#[derive(Debug, Deserialize)]
struct WireColumn {
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
enum WireValue {
    Null,
    Integer { value: String },
    Float { value: f64 },
    Text { value: String },
    Blob { base64: String },
}

impl TryFrom<WireValue> for SqlValue {
    type Error = DataSourceError;

    fn try_from(value: WireValue) -> Result<Self, Self::Error> {
        Ok(match value {
            WireValue::Null => SqlValue::Null,
            WireValue::Integer { value } => SqlValue::Integer(value.parse().map_err(|_| {
                DataSourceError::Protocol(format!("invalid integer cell: {}", value))
            })?),
            WireValue::Float { value } => SqlValue::Real(value),
            WireValue::Text { value } => SqlValue::Text(value),
            WireValue::Blob { base64 } => SqlValue::Blob(decode_base64(&base64)?),
        })
    }
}

fn decode_base64(data: &str) -> Result<Vec<u8>, DataSourceError> {
    use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD};
    STANDARD
        .decode(data)
        .or_else(|_| STANDARD_NO_PAD.decode(data))
        .map_err(|e| DataSourceError::Protocol(format!("invalid blob cell: {}", e)))
}

/// Decode the body of a `/v2/pipeline` response into the first statement's result.
pub(crate) fn parse_pipeline_response(body: &str) -> Result<RawResult, DataSourceError> {
    let parsed: PipelineResponse =
        serde_json::from_str(body).map_err(|e| DataSourceError::Protocol(e.to_string()))?;

    let first = parsed
        .results
        .into_iter()
        .next()
        .ok_or_else(|| DataSourceError::Protocol("empty pipeline response".to_string()))?;

    let stmt = match first {
        PipelineResult::Error { error } => return Err(DataSourceError::Sql(error.message)),
        PipelineResult::Ok { response } => match (response.kind.as_str(), response.result) {
            ("execute", Some(result)) => result,
            (kind, _) => {
                return Err(DataSourceError::Protocol(format!(
                    "unexpected response type: {}",
                    kind
                )))
            }
        },
    };

    let columns = stmt
        .cols
        .into_iter()
        .enumerate()
        .map(|(i, c)| c.name.unwrap_or_else(|| format!("column{}", i)))
        .collect();
    let rows = stmt
        .rows
        .into_iter()
        .map(|row| row.into_iter().map(SqlValue::try_from).collect())
        .collect::<Result<Vec<_>, _>>()?;

    Ok(RawResult { columns, rows })
}
