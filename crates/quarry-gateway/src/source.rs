//! Connection traits and the driver-neutral result shape.

use async_trait::async_trait;
use serde_json::{Map, Number, Value};

use crate::error::DataSourceError;

/// A single cell returned by a database driver.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Null,
    Integer(i64),
    Real(f64),
    Text(String),
    Blob(Vec<u8>),
}

impl SqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    /// Numeric view of the cell. Text is parsed leniently; blobs and
    /// null have no numeric value.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SqlValue::Integer(i) => Some(*i as f64),
            SqlValue::Real(f) => Some(*f),
            SqlValue::Text(s) => s.trim().parse::<f64>().ok(),
            SqlValue::Null | SqlValue::Blob(_) => None,
        }
    }

    /// JSON rendering used in tool results. Blobs become hex strings and
    /// non-finite reals become null.
    pub fn to_json(&self) -> Value {
        match self {
            SqlValue::Null => Value::Null,
            SqlValue::Integer(i) => Value::from(*i),
            SqlValue::Real(f) => Number::from_f64(*f).map(Value::Number).unwrap_or(Value::Null),
            SqlValue::Text(s) => Value::String(s.clone()),
            SqlValue::Blob(b) => Value::String(hex::encode(b)),
        }
    }
}

impl From<rusqlite::types::ValueRef<'_>> for SqlValue {
    fn from(value: rusqlite::types::ValueRef<'_>) -> Self {
        use rusqlite::types::ValueRef;
        match value {
            ValueRef::Null => SqlValue::Null,
            ValueRef::Integer(i) => SqlValue::Integer(i),
            ValueRef::Real(f) => SqlValue::Real(f),
            ValueRef::Text(t) => SqlValue::Text(String::from_utf8_lossy(t).into_owned()),
            ValueRef::Blob(b) => SqlValue::Blob(b.to_vec()),
        }
    }
}

/// Column names plus row-major cells, in the order the driver returned them.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<SqlValue>>,
}

impl RawResult {
    /// Render rows as JSON objects keyed by column name, keeping column order.
    pub fn row_objects(&self) -> Vec<Value> {
        self.rows
            .iter()
            .map(|row| {
                let mut obj = Map::with_capacity(self.columns.len());
                for (col, cell) in self.columns.iter().zip(row.iter()) {
                    obj.insert(col.clone(), cell.to_json());
                }
                Value::Object(obj)
            })
            .collect()
    }
}

/// An open connection to a user-supplied database.
#[async_trait]
pub trait DataSource: Send + Sync {
    /// Run `sql`, returning at most `max_rows` rows.
    async fn execute(&self, sql: &str, max_rows: usize) -> Result<RawResult, DataSourceError>;
}

/// Opens connections from a URL and auth token. Each call yields a fresh
/// connection; nothing is pooled.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &str, token: &str) -> Result<Box<dyn DataSource>, DataSourceError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_as_f64() {
        assert_eq!(SqlValue::Integer(3).as_f64(), Some(3.0));
        assert_eq!(SqlValue::Real(2.5).as_f64(), Some(2.5));
        assert_eq!(SqlValue::Text(" 4.25 ".into()).as_f64(), Some(4.25));
        assert_eq!(SqlValue::Text("north".into()).as_f64(), None);
        assert_eq!(SqlValue::Null.as_f64(), None);
    }

    #[test]
    fn test_to_json() {
        assert_eq!(SqlValue::Blob(vec![0xde, 0xad]).to_json(), json!("dead"));
        assert_eq!(SqlValue::Real(f64::NAN).to_json(), Value::Null);
        assert_eq!(SqlValue::Integer(-7).to_json(), json!(-7));
    }

    #[test]
    fn test_row_objects_preserve_column_order() {
        let result = RawResult {
            columns: vec!["zeta".into(), "alpha".into()],
            rows: vec![vec![SqlValue::Integer(1), SqlValue::Text("a".into())]],
        };
        let rows = result.row_objects();
        let keys: Vec<&String> = rows[0].as_object().unwrap().keys().collect();
        assert_eq!(keys, vec!["zeta", "alpha"]);
        assert_eq!(rows[0]["alpha"], "a");
    }
}
