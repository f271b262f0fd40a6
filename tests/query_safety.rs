//! Behavior-driven tests for query safety
//!
//! These tests verify which queries reach the engine, that accepted queries
//! cannot modify anything, and that runaway queries are cut off at the
//! configured deadline.

use std::fs;
use std::path::Path;
use std::time::{Duration, Instant};

use tabula_warehouse::validate::validate_query;
use tabula_warehouse::{ErrorCode, QueryRequest, SourceRequest, Tabular, TabularConfig};
use tempfile::tempdir;

fn write_source(root: &Path, name: &str, body: &str) {
    let dir = root.join("ws1").join("draft");
    fs::create_dir_all(&dir).expect("create draft dir");
    fs::write(dir.join(name), body).expect("write source");
}

fn run_query(tabular: &Tabular, sql: &str) -> Result<u64, tabula_warehouse::TabularError> {
    tabular
        .query(&QueryRequest {
            source: SourceRequest::new("ws1", "data.csv"),
            query: Some(sql.to_string()),
            window_offset: None,
            window_rows: None,
        })
        .map(|response| response.total_row_count)
}

// =============================================================================
// Validator: Acceptance Table
// =============================================================================

#[test]
fn when_validating_queries_the_acceptance_table_holds() {
    // Given: The literal acceptance cases
    let cases: &[(&str, bool)] = &[
        ("SELECT 1", true),
        ("SELECT * FROM data; DROP TABLE data", false),
        ("DROP TABLE data", false),
        ("SELECT Comment FROM data", true),
        ("SELECT * FROM read_csv('x.csv')", false),
        ("SELECT 1;", true),
    ];

    for (sql, accepted) in cases {
        // When: Each query is validated
        let result = validate_query(Some(*sql));

        // Then: Acceptance matches the table
        assert_eq!(result.is_ok(), *accepted, "{sql}");
        if let Err(error) = result {
            assert_eq!(error.code(), ErrorCode::ValidationFailed, "{sql}");
        }
    }
}

#[test]
fn when_query_has_trailing_semicolon_it_is_stripped() {
    let validated = validate_query(Some("  SELECT 1;  ")).expect("accepted");
    assert_eq!(validated, "SELECT 1");
}

#[test]
fn when_keywords_hide_in_literals_or_comments_they_are_ignored() {
    for sql in [
        "SELECT 'drop table data' AS note",
        "SELECT 1 -- delete everything",
        "SELECT /* insert */ 2",
        "WITH recent AS (SELECT * FROM data) SELECT * FROM recent",
    ] {
        assert!(validate_query(Some(sql)).is_ok(), "{sql}");
    }
}

#[test]
fn when_queries_touch_files_or_state_they_are_rejected() {
    for sql in [
        "SELECT * FROM read_parquet('x.parquet')",
        "SELECT * FROM parquet_scan('x.parquet')",
        "SELECT * FROM glob('*')",
        "WITH x AS (SELECT 1) SELECT * FROM x; COPY data TO 'out.csv'",
        "ATTACH 'other.duckdb'",
        "PRAGMA database_list",
        "",
    ] {
        let error = validate_query(Some(sql)).expect_err(sql);
        assert_eq!(error.code(), ErrorCode::ValidationFailed, "{sql}");
    }
    assert!(validate_query(None).is_err());
}

// =============================================================================
// Executor: Read-only Execution
// =============================================================================

#[test]
fn when_query_runs_against_cache_the_source_table_is_unchanged() {
    // Given: A cached source
    let temp = tempdir().expect("tempdir");
    write_source(temp.path(), "data.csv", "id,name\n1,a\n2,b\n3,c\n");
    let tabular = Tabular::new(TabularConfig::new(temp.path()));

    // When: A read query with a trailing line comment runs
    let total = run_query(&tabular, "SELECT * FROM data WHERE id > 1 -- tail").expect("query");

    // Then: The wrapper still applies and the table still has every row
    assert_eq!(total, 2);
    assert_eq!(run_query(&tabular, "SELECT * FROM data").expect("query"), 3);
}

#[test]
fn when_query_fails_in_the_engine_it_is_a_read_failure() {
    let temp = tempdir().expect("tempdir");
    write_source(temp.path(), "data.csv", "id\n1\n");
    let tabular = Tabular::new(TabularConfig::new(temp.path()));

    let error = run_query(&tabular, "SELECT missing_column FROM data").expect_err("binder error");

    assert_eq!(error.code(), ErrorCode::FileReadFailed);
    assert!(error.message().starts_with("query failed: "), "{}", error.message());
}

// =============================================================================
// Supervisor: Timeouts
// =============================================================================

#[test]
fn when_query_outlives_the_timeout_it_fails_naming_the_budget() {
    // Given: A 200ms timeout and a warm cache
    let temp = tempdir().expect("tempdir");
    write_source(temp.path(), "data.csv", "id\n1\n");
    let mut config = TabularConfig::new(temp.path());
    config.query_timeout_ms = 200;
    let tabular = Tabular::new(config);
    tabular
        .ensure_cache(&SourceRequest::new("ws1", "data.csv"))
        .expect("warm cache");

    // When: A query that would run for minutes is submitted
    let started = Instant::now();
    let error = run_query(
        &tabular,
        "SELECT SUM(a.range * b.range) AS total FROM range(100000) a, range(100000) b",
    )
    .expect_err("timeout");
    let elapsed = started.elapsed();

    // Then: It fails soon after the deadline as a read failure naming T
    assert_eq!(error.code(), ErrorCode::FileReadFailed);
    assert_eq!(error.message(), "query timed out after 200ms");
    assert!(
        elapsed < Duration::from_secs(10),
        "took {elapsed:?} to time out"
    );
}
