//! Tool dispatcher: typed invocations for the closed tool set.
//!
//! Every dispatch returns a `ToolOutcome`; failures are reported inside the
//! outcome and never propagate out of `ToolDispatcher::dispatch`.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use quarry_core::types::{Credentials, ToolCall};
use quarry_gateway::DataGateway;

use crate::correlation;
use crate::error::ToolError;
use crate::prompt::{CORRELATION, QUERY_DATABASE, SHOW_BAR_LINE_CHART, SHOW_PIE_CHART};

// =============================================================================
// Typed arguments
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BarLineKind {
    Bar,
    Line,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PieKind {
    Pie,
    Doughnut,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Axis<T> {
    pub label: String,
    pub data: Vec<T>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BarLineChart {
    pub title: String,
    #[serde(rename = "type")]
    pub kind: BarLineKind,
    pub x: Axis<String>,
    pub y1: Axis<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y2: Option<Axis<f64>>,
}

fn default_tooltip() -> String {
    "Value".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PieChart {
    pub title: String,
    #[serde(rename = "type")]
    pub kind: PieKind,
    pub labels: Vec<String>,
    pub dataset: Vec<f64>,
    #[serde(default = "default_tooltip")]
    pub tooltip: String,
}

#[derive(Debug, Deserialize)]
struct QueryArgs {
    query: String,
}

/// A validated tool request.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolInvocation {
    QueryDatabase { query: String },
    BarLineChart(BarLineChart),
    PieChart(PieChart),
    Correlation { query: String },
}

impl ToolInvocation {
    pub fn is_known(name: &str) -> bool {
        matches!(name, QUERY_DATABASE | SHOW_BAR_LINE_CHART | SHOW_PIE_CHART | CORRELATION)
    }

    /// Validate raw arguments against the tool's schema.
    pub fn parse(name: &str, arguments: &Value) -> Result<Self, ToolError> {
        fn typed<T: serde::de::DeserializeOwned>(name: &str, arguments: &Value) -> Result<T, ToolError> {
            T::deserialize(arguments).map_err(|e| ToolError::InvalidArguments {
                tool: name.to_string(),
                reason: e.to_string(),
            })
        }

        match name {
            QUERY_DATABASE => Ok(ToolInvocation::QueryDatabase {
                query: typed::<QueryArgs>(name, arguments)?.query,
            }),
            SHOW_BAR_LINE_CHART => Ok(ToolInvocation::BarLineChart(typed(name, arguments)?)),
            SHOW_PIE_CHART => Ok(ToolInvocation::PieChart(typed(name, arguments)?)),
            CORRELATION => Ok(ToolInvocation::Correlation {
                query: typed::<QueryArgs>(name, arguments)?.query,
            }),
            other => Err(ToolError::UnknownTool(other.to_string())),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ToolInvocation::QueryDatabase { .. } => QUERY_DATABASE,
            ToolInvocation::BarLineChart(_) => SHOW_BAR_LINE_CHART,
            ToolInvocation::PieChart(_) => SHOW_PIE_CHART,
            ToolInvocation::Correlation { .. } => CORRELATION,
        }
    }
}

/// Reject a batch that names any tool outside the fixed set.
pub fn ensure_known(calls: &[ToolCall]) -> Result<(), ToolError> {
    match calls.iter().find(|c| !ToolInvocation::is_known(&c.name)) {
        Some(call) => Err(ToolError::UnknownTool(call.name.clone())),
        None => Ok(()),
    }
}

// =============================================================================
// Outcome
// =============================================================================

/// The JSON envelope stored as a tool message's content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutcome {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning: Option<String>,
}

impl ToolOutcome {
    fn displayed() -> Self {
        Self {
            success: true,
            output: None,
            warning: None,
        }
    }

    fn data(output: Value, warning: String) -> Self {
        Self {
            success: true,
            output: Some(output),
            warning: Some(warning),
        }
    }

    fn failure(message: String, warning: Option<String>) -> Self {
        Self {
            success: false,
            output: Some(Value::String(message)),
            warning,
        }
    }

    /// JSON text stored in the tool-role message.
    pub fn to_content(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| r#"{"success":false}"#.to_string())
    }
}

// =============================================================================
// Dispatcher
// =============================================================================

/// Runs tool calls against the data gateway.
pub struct ToolDispatcher {
    gateway: Arc<DataGateway>,
}

impl ToolDispatcher {
    pub fn new(gateway: Arc<DataGateway>) -> Self {
        Self { gateway }
    }

    /// Run one call. Always returns an outcome.
    pub async fn dispatch(&self, call: &ToolCall, credentials: Option<&Credentials>) -> ToolOutcome {
        let invocation = match ToolInvocation::parse(&call.name, &call.arguments) {
            Ok(inv) => inv,
            Err(e) => {
                warn!(tool = %call.name, call_id = %call.id, error = %e, "Rejected tool arguments");
                return ToolOutcome::failure(e.to_string(), None);
            }
        };

        let queries_data = matches!(
            invocation,
            ToolInvocation::QueryDatabase { .. } | ToolInvocation::Correlation { .. }
        );
        let (url, token) = credentials
            .map(|c| (c.url.as_str(), c.token.as_str()))
            .unwrap_or(("", ""));

        debug!(tool = invocation.name(), call_id = %call.id, "Dispatching tool call");
        let result = match &invocation {
            ToolInvocation::QueryDatabase { query } => self.query_database(url, token, query).await,
            ToolInvocation::Correlation { query } => self.correlation(url, token, query).await,
            ToolInvocation::BarLineChart(_) | ToolInvocation::PieChart(_) => Ok(ToolOutcome::displayed()),
        };

        result.unwrap_or_else(|e| {
            warn!(tool = invocation.name(), call_id = %call.id, error = %e, "Tool call failed");
            ToolOutcome::failure(e.to_string(), queries_data.then(String::new))
        })
    }

    async fn query_database(&self, url: &str, token: &str, query: &str) -> Result<ToolOutcome, ToolError> {
        let out = self.gateway.execute(url, token, query).await?;
        Ok(ToolOutcome::data(Value::Array(out.rows), out.warning))
    }

    async fn correlation(&self, url: &str, token: &str, query: &str) -> Result<ToolOutcome, ToolError> {
        let capped = self.gateway.fetch(url, token, query).await?;
        let corr = correlation::correlate(&capped.result)?;

        let warning = [capped.warning, corr.warning]
            .into_iter()
            .filter(|w| !w.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        let matrix = corr.matrix.into_iter().map(Value::Array).collect();
        Ok(ToolOutcome::data(Value::Array(matrix), warning))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::correlation::NULL_ROWS_WARNING;
    use crate::testing::FakeConnector;
    use quarry_gateway::{RawResult, SqlValue, ROW_CAP_WARNING};
    use serde_json::json;

    fn call(name: &str, arguments: Value) -> ToolCall {
        ToolCall {
            id: "call_1".to_string(),
            name: name.to_string(),
            arguments,
        }
    }

    fn creds() -> Credentials {
        Credentials {
            url: "libsql://fake".to_string(),
            token: "t".to_string(),
        }
    }

    fn weather(n: usize) -> RawResult {
        RawResult {
            columns: vec!["date".into(), "temp".into()],
            rows: (0..n)
                .map(|i| vec![SqlValue::Text(format!("d{}", i)), SqlValue::Real(i as f64)])
                .collect(),
        }
    }

    fn dispatcher(connector: FakeConnector) -> ToolDispatcher {
        ToolDispatcher::new(Arc::new(DataGateway::new(Arc::new(connector))))
    }

    // ---- Parsing ----

    #[test]
    fn test_parse_bar_chart() {
        let args = json!({
            "title": "Temps",
            "type": "line",
            "x": {"label": "day", "data": ["mon", "tue"]},
            "y1": {"label": "temp", "data": [1.5, 2]}
        });
        let ToolInvocation::BarLineChart(chart) = ToolInvocation::parse(SHOW_BAR_LINE_CHART, &args).unwrap() else {
            panic!("expected bar/line chart");
        };
        assert_eq!(chart.kind, BarLineKind::Line);
        assert_eq!(chart.y1.data, vec![1.5, 2.0]);
        assert!(chart.y2.is_none());
    }

    #[test]
    fn test_parse_pie_chart_default_tooltip() {
        let args = json!({"title": "Share", "type": "doughnut", "labels": ["a"], "dataset": [1]});
        let ToolInvocation::PieChart(chart) = ToolInvocation::parse(SHOW_PIE_CHART, &args).unwrap() else {
            panic!("expected pie chart");
        };
        assert_eq!(chart.tooltip, "Value");
        assert_eq!(chart.kind, PieKind::Doughnut);
    }

    #[test]
    fn test_parse_rejects_bad_arguments() {
        let err = ToolInvocation::parse(SHOW_BAR_LINE_CHART, &json!({"title": "x", "type": "scatter"})).unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments { .. }));

        let err = ToolInvocation::parse(QUERY_DATABASE, &json!("{broken")).unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments { .. }));
    }

    #[test]
    fn test_ensure_known() {
        assert!(ensure_known(&[call(QUERY_DATABASE, json!({}))]).is_ok());
        let err = ensure_known(&[call(QUERY_DATABASE, json!({})), call("drop_tables", json!({}))]).unwrap_err();
        assert!(matches!(err, ToolError::UnknownTool(ref n) if n == "drop_tables"));
    }

    // ---- Dispatch ----

    #[tokio::test]
    async fn test_query_database_success_has_empty_warning() {
        let sql = "SELECT date, temp FROM weather";
        let d = dispatcher(FakeConnector::new().with_result(sql, weather(28)));

        let outcome = d.dispatch(&call(QUERY_DATABASE, json!({"query": sql})), Some(&creds())).await;
        assert!(outcome.success);
        assert_eq!(outcome.output.as_ref().unwrap().as_array().unwrap().len(), 28);
        assert_eq!(outcome.warning.as_deref(), Some(""));
    }

    #[tokio::test]
    async fn test_query_database_truncates() {
        let sql = "SELECT * FROM weather";
        let d = dispatcher(FakeConnector::new().with_result(sql, weather(250)));

        let outcome = d.dispatch(&call(QUERY_DATABASE, json!({"query": sql})), Some(&creds())).await;
        assert_eq!(outcome.output.unwrap().as_array().unwrap().len(), 200);
        assert_eq!(outcome.warning.as_deref(), Some(ROW_CAP_WARNING));
    }

    #[tokio::test]
    async fn test_query_database_sql_error_is_failure() {
        let d = dispatcher(FakeConnector::new());
        let outcome = d
            .dispatch(&call(QUERY_DATABASE, json!({"query": "SELECT * FROM missing"})), Some(&creds()))
            .await;
        assert!(!outcome.success);
        assert!(outcome.output.unwrap().as_str().unwrap().contains("missing"));
    }

    #[tokio::test]
    async fn test_query_without_credentials_is_failure() {
        let d = dispatcher(FakeConnector::new());
        let outcome = d.dispatch(&call(QUERY_DATABASE, json!({"query": "SELECT 1"})), None).await;
        assert!(!outcome.success);
        assert_eq!(outcome.output, Some(json!("No database connected")));
    }

    #[tokio::test]
    async fn test_chart_is_pass_through() {
        let d = dispatcher(FakeConnector::refusing());
        let args = json!({"title": "t", "type": "pie", "labels": ["a", "b"], "dataset": [1, 2]});
        let outcome = d.dispatch(&call(SHOW_PIE_CHART, args), None).await;
        assert_eq!(outcome.to_content(), r#"{"success":true}"#);
    }

    #[tokio::test]
    async fn test_correlation_joins_warnings() {
        let sql = "SELECT a, b FROM t";
        let mut rows: Vec<Vec<SqlValue>> = (0..205)
            .map(|i| vec![SqlValue::Integer(i), SqlValue::Integer(i * 2)])
            .collect();
        rows[3] = vec![SqlValue::Null, SqlValue::Integer(1)];
        let raw = RawResult {
            columns: vec!["a".into(), "b".into()],
            rows,
        };
        let d = dispatcher(FakeConnector::new().with_result(sql, raw));

        let outcome = d.dispatch(&call(CORRELATION, json!({"query": sql})), Some(&creds())).await;
        assert!(outcome.success);
        assert_eq!(
            outcome.warning.as_deref(),
            Some(format!("{} {}", ROW_CAP_WARNING, NULL_ROWS_WARNING).as_str())
        );
        let matrix = outcome.output.unwrap();
        assert_eq!(matrix[0], json!(["", "a", "b"]));
        assert!((matrix[1][2].as_f64().unwrap() - 1.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_correlation_non_numeric_is_failure() {
        let sql = "SELECT region, sales FROM t";
        let raw = RawResult {
            columns: vec!["region".into(), "sales".into()],
            rows: vec![vec![SqlValue::Text("north".into()), SqlValue::Integer(1)]],
        };
        let d = dispatcher(FakeConnector::new().with_result(sql, raw));
        let outcome = d.dispatch(&call(CORRELATION, json!({"query": sql})), Some(&creds())).await;
        assert!(!outcome.success);
        assert_eq!(outcome.warning.as_deref(), Some(""));
    }
}
