//! Pearson correlation over column-oriented query results.

use serde_json::Value;

use quarry_gateway::RawResult;

use crate::error::ToolError;

/// Warning attached when rows were dropped because of null cells.
pub const NULL_ROWS_WARNING: &str = "NULL values found in rows. Skipping them";

/// A labeled correlation matrix ready for a tool result.
#[derive(Debug, Clone, PartialEq)]
pub struct CorrelationOutput {
    /// `(n+1)×(n+1)`: labels across the first row and down the first column,
    /// blank top-left cell.
    pub matrix: Vec<Vec<Value>>,
    pub warning: String,
}

/// Correlate every pair of columns in a query result.
pub fn correlate(result: &RawResult) -> Result<CorrelationOutput, ToolError> {
    let (columns, skipped) = numeric_columns(result)?;
    let matrix = correlation_matrix(&columns);
    Ok(CorrelationOutput {
        matrix: labeled_matrix(&result.columns, &matrix),
        warning: if skipped {
            NULL_ROWS_WARNING.to_string()
        } else {
            String::new()
        },
    })
}

/// Split rows into numeric columns. A row with any null is dropped from
/// every column; the flag reports whether that happened.
pub fn numeric_columns(result: &RawResult) -> Result<(Vec<Vec<f64>>, bool), ToolError> {
    let width = result.columns.len();
    let mut columns: Vec<Vec<f64>> = vec![Vec::with_capacity(result.rows.len()); width];
    let mut skipped = false;

    for row in &result.rows {
        if row.iter().any(|cell| cell.is_null()) {
            skipped = true;
            continue;
        }
        for (index, cell) in row.iter().take(width).enumerate() {
            let value = cell.as_f64().ok_or_else(|| ToolError::NonNumeric {
                column: result.columns[index].clone(),
                value: cell.to_json().to_string(),
            })?;
            columns[index].push(value);
        }
    }

    Ok((columns, skipped))
}

fn mean(data: &[f64]) -> f64 {
    data.iter().sum::<f64>() / data.len() as f64
}

/// Population standard deviation.
fn std_dev(data: &[f64], mu: f64) -> f64 {
    (data.iter().map(|v| (v - mu).powi(2)).sum::<f64>() / data.len() as f64).sqrt()
}

/// Pearson coefficient using population statistics. Constant or empty
/// series yield NaN.
pub fn pearson(a: &[f64], b: &[f64]) -> f64 {
    let n = a.len().min(b.len());
    let (a, b) = (&a[..n], &b[..n]);
    let (mean_a, mean_b) = (mean(a), mean(b));
    let covariance = a
        .iter()
        .zip(b)
        .map(|(x, y)| (x - mean_a) * (y - mean_b))
        .sum::<f64>()
        / n as f64;
    covariance / (std_dev(a, mean_a) * std_dev(b, mean_b))
}

/// `n×n` matrix with ones on the diagonal.
pub fn correlation_matrix(columns: &[Vec<f64>]) -> Vec<Vec<f64>> {
    let n = columns.len();
    (0..n)
        .map(|i| {
            (0..n)
                .map(|j| if i == j { 1.0 } else { pearson(&columns[i], &columns[j]) })
                .collect()
        })
        .collect()
}

/// Wrap a matrix with a header row and column. Undefined coefficients
/// render as null.
pub fn labeled_matrix(labels: &[String], matrix: &[Vec<f64>]) -> Vec<Vec<Value>> {
    let mut out = Vec::with_capacity(matrix.len() + 1);

    let mut header = Vec::with_capacity(labels.len() + 1);
    header.push(Value::String(String::new()));
    header.extend(labels.iter().cloned().map(Value::String));
    out.push(header);

    for (label, row) in labels.iter().zip(matrix) {
        let mut line = Vec::with_capacity(row.len() + 1);
        line.push(Value::String(label.clone()));
        line.extend(row.iter().map(|v| Value::from(*v)));
        out.push(line);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_gateway::SqlValue;
    use serde_json::json;

    fn result(columns: &[&str], rows: Vec<Vec<SqlValue>>) -> RawResult {
        RawResult {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows,
        }
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_perfect_correlation_example() {
        let raw = result(
            &["a", "b"],
            vec![
                vec![SqlValue::Integer(1), SqlValue::Integer(2)],
                vec![SqlValue::Integer(2), SqlValue::Integer(4)],
                vec![SqlValue::Integer(3), SqlValue::Integer(6)],
            ],
        );
        let out = correlate(&raw).unwrap();
        assert!(out.warning.is_empty());
        assert_eq!(out.matrix.len(), 3);
        assert_eq!(out.matrix[0], vec![json!(""), json!("a"), json!("b")]);
        assert_eq!(out.matrix[1][0], json!("a"));
        for i in 1..3 {
            for j in 1..3 {
                assert!(approx(out.matrix[i][j].as_f64().unwrap(), 1.0));
            }
        }
    }

    #[test]
    fn test_negative_correlation() {
        assert!(approx(pearson(&[1.0, 2.0, 3.0], &[3.0, 2.0, 1.0]), -1.0));
    }

    #[test]
    fn test_matrix_shape_symmetry_and_diagonal() {
        let columns = vec![
            vec![1.0, 2.0, 3.0, 4.0, 5.0],
            vec![2.0, 1.0, 4.0, 3.0, 7.0],
            vec![9.0, 3.0, 5.0, 1.0, 0.5],
        ];
        let m = correlation_matrix(&columns);
        assert_eq!(m.len(), 3);
        for i in 0..3 {
            assert_eq!(m[i][i], 1.0);
            for j in 0..3 {
                assert!(approx(m[i][j], m[j][i]));
            }
        }

        let labels: Vec<String> = vec!["x".into(), "y".into(), "z".into()];
        let labeled = labeled_matrix(&labels, &m);
        assert_eq!(labeled.len(), 4);
        assert!(labeled.iter().all(|row| row.len() == 4));
    }

    #[test]
    fn test_null_rows_dropped_in_lockstep() {
        let raw = result(
            &["a", "b"],
            vec![
                vec![SqlValue::Integer(1), SqlValue::Integer(10)],
                vec![SqlValue::Null, SqlValue::Integer(99)],
                vec![SqlValue::Integer(2), SqlValue::Integer(20)],
                vec![SqlValue::Integer(3), SqlValue::Null],
                vec![SqlValue::Integer(3), SqlValue::Integer(30)],
            ],
        );
        let (columns, skipped) = numeric_columns(&raw).unwrap();
        assert!(skipped);
        assert_eq!(columns[0], vec![1.0, 2.0, 3.0]);
        assert_eq!(columns[1], vec![10.0, 20.0, 30.0]);

        let out = correlate(&raw).unwrap();
        assert_eq!(out.warning, NULL_ROWS_WARNING);
    }

    #[test]
    fn test_numeric_text_is_accepted() {
        let raw = result(
            &["a", "b"],
            vec![
                vec![SqlValue::Text("1".into()), SqlValue::Real(1.5)],
                vec![SqlValue::Text("2".into()), SqlValue::Real(3.0)],
            ],
        );
        assert!(correlate(&raw).is_ok());
    }

    #[test]
    fn test_non_numeric_value_is_error() {
        let raw = result(
            &["region", "sales"],
            vec![vec![SqlValue::Text("north".into()), SqlValue::Integer(5)]],
        );
        let err = correlate(&raw).unwrap_err();
        assert!(matches!(err, ToolError::NonNumeric { ref column, .. } if column == "region"));
    }

    #[test]
    fn test_constant_column_renders_null() {
        let raw = result(
            &["a", "b"],
            vec![
                vec![SqlValue::Integer(1), SqlValue::Integer(5)],
                vec![SqlValue::Integer(2), SqlValue::Integer(5)],
            ],
        );
        let out = correlate(&raw).unwrap();
        assert_eq!(out.matrix[1][2], Value::Null);
        assert_eq!(out.matrix[2][2], json!(1.0));
    }
}
