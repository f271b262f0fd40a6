//! Windowed execution of validated queries.

use ::duckdb::types::Value as DuckValue;
use ::duckdb::{params, Connection};
use serde_json::Value;

use crate::engine::quote_ident;
use crate::schema::{inferred_type_for_arrow, InferredType};
use crate::value::read_row;

/// Column injected into the wrapped query to carry the total row count.
pub const TOTAL_COUNT_COLUMN: &str = "__tabula_total_row_count";

/// A contiguous slice of a result set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub offset: u64,
    pub rows: u64,
}

/// Rows of one window plus the size of the whole result.
#[derive(Debug, Clone, PartialEq)]
pub struct WindowedRows {
    pub columns: Vec<String>,
    pub column_types: Vec<InferredType>,
    pub rows: Vec<Vec<Value>>,
    pub total_row_count: u64,
}

/// Run `query` and return the rows inside `window`.
///
/// The total comes from a `COUNT(*) OVER()` column riding along with the
/// window, so it is only known when the window is non-empty. An empty window
/// past the first row triggers a separate count.
pub fn execute_window(
    connection: &Connection,
    query: &str,
    window: Window,
) -> Result<WindowedRows, ::duckdb::Error> {
    let sql = format!(
        "SELECT q.*, COUNT(*) OVER() AS {} FROM (\n{query}\n) AS q LIMIT ? OFFSET ?",
        quote_ident(TOTAL_COUNT_COLUMN)
    );
    let mut statement = connection.prepare(&sql)?;
    let mut cursor = statement.query(params![to_param(window.rows), to_param(window.offset)])?;

    let (columns, column_types) = match cursor.as_ref() {
        Some(statement) => {
            let data_columns = statement.column_count().saturating_sub(1);
            let names = statement.column_names();
            (
                names.into_iter().take(data_columns).collect::<Vec<_>>(),
                (0..data_columns)
                    .map(|index| inferred_type_for_arrow(&statement.column_type(index)))
                    .collect::<Vec<_>>(),
            )
        }
        None => (Vec::new(), Vec::new()),
    };

    let mut rows = Vec::new();
    let mut total_row_count = 0_u64;
    while let Some(row) = cursor.next()? {
        rows.push(read_row(row, columns.len())?);
        total_row_count = count_from(row.get::<_, DuckValue>(columns.len())?);
    }

    if rows.is_empty() && window.offset > 0 {
        total_row_count = count_rows(connection, query)?;
    }

    Ok(WindowedRows {
        columns,
        column_types,
        rows,
        total_row_count,
    })
}

/// Count the rows `query` produces.
pub fn count_rows(connection: &Connection, query: &str) -> Result<u64, ::duckdb::Error> {
    let sql = format!("SELECT COUNT(*) AS total_row_count FROM (\n{query}\n) AS q");
    let total: i64 = connection.query_row(&sql, [], |row| row.get(0))?;
    Ok(total.max(0) as u64)
}

fn to_param(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn count_from(value: DuckValue) -> u64 {
    match value {
        DuckValue::BigInt(count) => count.max(0) as u64,
        DuckValue::UBigInt(count) => count,
        DuckValue::HugeInt(count) => u64::try_from(count.max(0)).unwrap_or(u64::MAX),
        DuckValue::Int(count) => count.max(0) as u64,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn connection_with_rows(count: u64) -> Connection {
        let connection = Connection::open_in_memory().expect("in-memory");
        connection
            .execute_batch(&format!(
                "CREATE TABLE data AS SELECT range AS id, 'row ' || range AS label FROM range({count})"
            ))
            .expect("seed");
        connection
    }

    #[test]
    fn window_strips_count_column() {
        let connection = connection_with_rows(5);
        let result = execute_window(
            &connection,
            "SELECT id, label FROM data ORDER BY id",
            Window { offset: 1, rows: 2 },
        )
        .expect("window");

        assert_eq!(result.columns, vec!["id", "label"]);
        assert_eq!(
            result.column_types,
            vec![InferredType::Integer, InferredType::String]
        );
        assert_eq!(result.rows, vec![vec![json!(1), json!("row 1")], vec![json!(2), json!("row 2")]]);
        assert_eq!(result.total_row_count, 5);
    }

    #[test]
    fn window_past_end_recounts() {
        let connection = connection_with_rows(5);
        let result = execute_window(
            &connection,
            "SELECT * FROM data",
            Window { offset: 50, rows: 10 },
        )
        .expect("window");

        assert!(result.rows.is_empty());
        assert_eq!(result.total_row_count, 5);
    }

    #[test]
    fn trailing_line_comment_does_not_swallow_wrapper() {
        let connection = connection_with_rows(3);
        let result = execute_window(
            &connection,
            "SELECT * FROM data -- everything",
            Window { offset: 0, rows: 10 },
        )
        .expect("window");
        assert_eq!(result.total_row_count, 3);
    }

    #[test]
    fn empty_result_at_offset_zero_has_zero_total() {
        let connection = connection_with_rows(3);
        let result = execute_window(
            &connection,
            "SELECT * FROM data WHERE id > 100",
            Window { offset: 0, rows: 10 },
        )
        .expect("window");
        assert_eq!(result.total_row_count, 0);
        assert_eq!(result.columns, vec!["id", "label"]);
    }

    #[test]
    fn aggregate_columns_keep_integer_types() {
        let connection = connection_with_rows(4);
        let result = execute_window(
            &connection,
            "SELECT SUM(id) AS total, COUNT(*) AS n, AVG(id) AS mean FROM data",
            Window { offset: 0, rows: 10 },
        )
        .expect("window");

        assert_eq!(
            result.column_types,
            vec![InferredType::Integer, InferredType::Integer, InferredType::Float]
        );
        assert_eq!(result.rows, vec![vec![json!(6), json!(4), json!(1.5)]]);
    }
}
