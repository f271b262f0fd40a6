//! Behavior-driven tests for the CSV cache and read operations
//!
//! These tests verify what a caller observes through the `Tabular` facade:
//! cache reuse and invalidation, type inference, pagination, and the
//! inspection operations.

use std::fs;
use std::path::{Path, PathBuf};

use serde_json::json;
use tabula_warehouse::{
    ErrorCode, InferredType, QueryRequest, ReadRowsRequest, SourceRequest, StatsRequest, Tabular,
    TabularConfig,
};
use tempfile::tempdir;

fn tabular(root: &Path) -> Tabular {
    Tabular::new(TabularConfig::new(root))
}

fn write_source(root: &Path, name: &str, body: &[u8]) -> PathBuf {
    let dir = root.join("ws1").join("draft");
    fs::create_dir_all(&dir).expect("create draft dir");
    let path = dir.join(name);
    fs::write(&path, body).expect("write source");
    path
}

fn numbered_rows(count: usize) -> String {
    let mut body = String::from("id,label\n");
    for index in 0..count {
        body.push_str(&format!("{index},row {index}\n"));
    }
    body
}

fn query(path: &str, sql: &str, offset: i64, rows: i64) -> QueryRequest {
    QueryRequest {
        source: SourceRequest::new("ws1", path),
        query: Some(sql.to_string()),
        window_offset: Some(offset),
        window_rows: Some(rows),
    }
}

// =============================================================================
// Cache: Reuse and Invalidation
// =============================================================================

#[test]
fn when_source_is_unchanged_second_ensure_reuses_the_cache() {
    // Given: A cached CSV source
    let temp = tempdir().expect("tempdir");
    write_source(temp.path(), "sales.csv", b"region,amount\nnorth,10\nsouth,20\n");
    let tabular = tabular(temp.path());
    let source = SourceRequest::new("ws1", "sales.csv");
    let first = tabular.ensure_cache(&source).expect("first ensure");
    let metadata_before = fs::read(&first.paths.metadata_path).expect("metadata");

    // When: The cache is ensured again without touching the file
    let second = tabular.ensure_cache(&source).expect("second ensure");

    // Then: Nothing is re-ingested and the metadata bytes are identical
    assert!(first.rebuilt, "first call should ingest");
    assert!(!second.rebuilt, "second call should be a cache hit");
    assert_eq!(
        fs::read(&second.paths.metadata_path).expect("metadata"),
        metadata_before
    );
}

#[test]
fn when_source_bytes_change_at_same_size_the_next_query_sees_new_data() {
    // Given: A cached source answering a query
    let temp = tempdir().expect("tempdir");
    write_source(temp.path(), "names.csv", b"id,name\n1,aaa\n");
    let tabular = tabular(temp.path());
    let before = tabular
        .query(&query("names.csv", "SELECT name FROM data", 0, 10))
        .expect("query before");
    assert_eq!(before.rows, vec![vec![json!("aaa")]]);

    // When: The file is rewritten with different bytes of the same length
    write_source(temp.path(), "names.csv", b"id,name\n1,bbb\n");

    // Then: The cache is rebuilt before the query answers
    let ensured = tabular
        .ensure_cache(&SourceRequest::new("ws1", "names.csv"))
        .expect("ensure");
    let after = tabular
        .query(&query("names.csv", "SELECT name FROM data", 0, 10))
        .expect("query after");
    assert!(ensured.rebuilt);
    assert_eq!(after.rows, vec![vec![json!("bbb")]]);
}

#[test]
fn when_cache_is_invalidated_the_next_read_rebuilds() {
    // Given: A cached source
    let temp = tempdir().expect("tempdir");
    write_source(temp.path(), "a.csv", b"x\n1\n");
    let tabular = tabular(temp.path());
    let source = SourceRequest::new("ws1", "a.csv");
    tabular.ensure_cache(&source).expect("ensure");

    // When: The cache is dropped explicitly
    tabular.invalidate("ws1", "A.CSV");

    // Then: The key is case-insensitive and the next ensure rebuilds
    assert!(tabular.ensure_cache(&source).expect("ensure").rebuilt);
}

// =============================================================================
// Ingestion: Type Inference and Encodings
// =============================================================================

#[test]
fn when_csv_is_ingested_column_types_are_inferred() {
    // Given: A CSV with one column per inferred type
    let temp = tempdir().expect("tempdir");
    write_source(
        temp.path(),
        "types.csv",
        b"i,f,b,d,s\n1,1.5,true,2024-01-01,abc\n2,2,false,2024-01-02,1\n3,2.5,true,2024-01-03,x\n",
    );
    let tabular = tabular(temp.path());

    // When: The source is mapped
    let map = tabular
        .get_map(&SourceRequest::new("ws1", "types.csv"))
        .expect("map");

    // Then: Each column gets the expected coarse type
    let types: Vec<InferredType> = map.columns.iter().map(|column| column.inferred_type).collect();
    assert_eq!(
        types,
        vec![
            InferredType::Integer,
            InferredType::Float,
            InferredType::Boolean,
            InferredType::Date,
            InferredType::String,
        ]
    );
    assert_eq!(map.format, "csv");
    assert_eq!(map.delimiter, ",");
    assert!(map.has_header);
    assert_eq!(map.encoding_detected, "utf-8");
    assert_eq!(map.encoding_confidence, 1.0);
}

#[test]
fn when_csv_has_byte_order_mark_it_reports_utf8_sig() {
    // Given: A UTF-8 file with a byte-order mark
    let temp = tempdir().expect("tempdir");
    write_source(temp.path(), "bom.csv", b"\xEF\xBB\xBFcity,pop\nOslo,700\n");

    // When: The source is mapped
    let map = tabular(temp.path())
        .get_map(&SourceRequest::new("ws1", "bom.csv"))
        .expect("map");

    // Then: The encoding is labelled and the header is clean
    assert_eq!(map.encoding_detected, "utf-8-sig");
    assert_eq!(map.columns[0].name, "city");
}

#[test]
fn when_csv_uses_legacy_encoding_it_is_transcoded_before_load() {
    // Given: A windows-1252 file
    let temp = tempdir().expect("tempdir");
    write_source(
        temp.path(),
        "legacy.csv",
        b"name,note,qty\ncaf\xE9,cr\xE8me br\xFBl\xE9e,1\nna\xEFve,d\xE9j\xE0 vu,2\n",
    );
    let tabular = tabular(temp.path());

    // When: Rows are read back
    let rows = tabular
        .read_rows(&ReadRowsRequest {
            source: SourceRequest::new("ws1", "legacy.csv"),
            ..ReadRowsRequest::default()
        })
        .expect("read rows");
    let map = tabular
        .get_map(&SourceRequest::new("ws1", "legacy.csv"))
        .expect("map");

    // Then: The detector picked a non-UTF-8 encoding and text decoded cleanly
    assert_ne!(map.encoding_detected, "utf-8");
    assert!((0.0..=1.0).contains(&map.encoding_confidence));
    assert_eq!(rows.total_rows, 2);
    let first = rows.rows[0][0].as_str().expect("text");
    assert!(first.starts_with("caf"));
    assert_eq!(first.chars().count(), 4);
}

// =============================================================================
// Query: Pagination
// =============================================================================

#[test]
fn when_paging_a_result_every_window_reports_the_exact_total() {
    // Given: A table of N rows
    let n: i64 = 250;
    let temp = tempdir().expect("tempdir");
    write_source(temp.path(), "big.csv", numbered_rows(n as usize).as_bytes());
    let tabular = tabular(temp.path());

    for offset in [0, n / 2, n - 1, n, n + 50] {
        // When: A 100-row window is requested at offset k
        let response = tabular
            .query(&query(
                "big.csv",
                "SELECT * FROM data ORDER BY id",
                offset,
                100,
            ))
            .expect("query");

        // Then: min(100, max(0, N-k)) rows come back with total N
        let expected = 100.min((n - offset).max(0)) as usize;
        assert_eq!(response.row_count, expected, "offset {offset}");
        assert_eq!(response.rows.len(), expected, "offset {offset}");
        assert_eq!(response.total_row_count, n as u64, "offset {offset}");
        assert_eq!(response.has_more, offset + (expected as i64) < n);
        assert_eq!(response.window_offset, offset as u64);
        assert_eq!(response.window_rows, 100);
    }
}

#[test]
fn when_query_has_invalid_window_it_is_rejected() {
    // Given: A cached source
    let temp = tempdir().expect("tempdir");
    write_source(temp.path(), "a.csv", b"x\n1\n");
    let tabular = tabular(temp.path());

    // When: The window is malformed
    let error = tabular
        .query(&query("a.csv", "SELECT * FROM data", -1, 10))
        .expect_err("negative offset");

    // Then: It is a validation failure
    assert_eq!(error.code(), ErrorCode::ValidationFailed);
    assert_eq!(error.message(), "invalid window_offset");
}

// =============================================================================
// Inspection: describe, stats, read_rows
// =============================================================================

#[test]
fn when_describing_a_source_nullability_follows_non_null_counts() {
    // Given: A source with a sparse column
    let temp = tempdir().expect("tempdir");
    write_source(temp.path(), "people.csv", b"name,age\nann,31\nbob,\ncy,40\n");

    // When: It is described
    let described = tabular(temp.path())
        .describe(&SourceRequest::new("ws1", "people.csv"))
        .expect("describe");

    // Then: Counts and nullability are reported per column
    assert_eq!(described.row_count, 3);
    assert_eq!(described.column_count, 2);
    assert_eq!(described.columns[0].non_null_count, 3);
    assert!(!described.columns[0].nullable);
    assert_eq!(described.columns[1].non_null_count, 2);
    assert!(described.columns[1].nullable);
}

#[test]
fn when_requesting_stats_for_selected_columns_only_those_are_profiled() {
    // Given: A source with numeric and text columns
    let temp = tempdir().expect("tempdir");
    write_source(
        temp.path(),
        "sales.csv",
        b"region,amount\nnorth,10\nsouth,20\nnorth,30\n",
    );
    let tabular = tabular(temp.path());

    // When: Stats are requested for a de-duplicated subset
    let stats = tabular
        .get_stats(&StatsRequest {
            source: SourceRequest::new("ws1", "sales.csv"),
            columns: Some(vec![
                String::from("amount"),
                String::from("region"),
                String::from("amount"),
            ]),
        })
        .expect("stats");

    // Then: Each column carries its family's fields
    assert_eq!(stats.columns.len(), 2);
    let amount = &stats.columns[0];
    assert_eq!(amount.name, "amount");
    assert_eq!(amount.min, Some(json!(10)));
    assert_eq!(amount.max, Some(json!(30)));
    assert_eq!(amount.mean, Some(json!(20.0)));
    let region = &stats.columns[1];
    let common = region.most_common.as_ref().expect("most common");
    assert_eq!(common[0].value, json!("north"));
    assert_eq!(common[0].count, 2);
}

#[test]
fn when_stats_name_an_unknown_column_it_is_a_validation_error() {
    let temp = tempdir().expect("tempdir");
    write_source(temp.path(), "a.csv", b"x\n1\n");

    let error = tabular(temp.path())
        .get_stats(&StatsRequest {
            source: SourceRequest::new("ws1", "a.csv"),
            columns: Some(vec![String::from("nope")]),
        })
        .expect_err("unknown column");

    assert_eq!(error.code(), ErrorCode::ValidationFailed);
    assert_eq!(error.message(), "unknown column: nope");
}

#[test]
fn when_reading_rows_they_come_back_in_file_order() {
    // Given: A source of 5 rows
    let temp = tempdir().expect("tempdir");
    write_source(temp.path(), "five.csv", numbered_rows(5).as_bytes());

    // When: Rows 2-3 are read for one column
    let response = tabular(temp.path())
        .read_rows(&ReadRowsRequest {
            source: SourceRequest::new("ws1", "five.csv"),
            row_start: Some(2),
            row_count: Some(2),
            columns: Some(vec![String::from("label")]),
        })
        .expect("read rows");

    // Then: The literal window is returned with the exact total
    assert_eq!(response.columns, vec!["label"]);
    assert_eq!(response.column_types, vec![InferredType::String]);
    assert_eq!(response.rows, vec![vec![json!("row 1")], vec![json!("row 2")]]);
    assert_eq!(response.row_start, 2);
    assert_eq!(response.total_rows, 5);
    assert!(response.has_more);
}

#[test]
fn when_map_is_requested_chunks_cover_every_row() {
    let temp = tempdir().expect("tempdir");
    write_source(temp.path(), "big.csv", numbered_rows(250).as_bytes());

    let map = tabular(temp.path())
        .get_map(&SourceRequest::new("ws1", "big.csv"))
        .expect("map");

    let ranges: Vec<&str> = map.chunks.iter().map(|chunk| chunk.rows.as_str()).collect();
    assert_eq!(ranges, vec!["1-100", "101-200", "201-250"]);
    assert_eq!(map.row_count, 250);
}

// =============================================================================
// Errors: Sources and Sandbox
// =============================================================================

#[test]
fn when_source_is_missing_or_not_csv_the_error_is_classified() {
    let temp = tempdir().expect("tempdir");
    fs::create_dir_all(temp.path().join("ws1").join("draft")).expect("mkdir");
    let tabular = tabular(temp.path());

    let missing = tabular
        .get_map(&SourceRequest::new("ws1", "absent.csv"))
        .expect_err("missing");
    assert_eq!(missing.code(), ErrorCode::FileReadFailed);
    assert_eq!(missing.message(), "file not found: absent.csv");

    let wrong_type = tabular
        .get_map(&SourceRequest::new("ws1", "notes.txt"))
        .expect_err("not csv");
    assert_eq!(wrong_type.code(), ErrorCode::ValidationFailed);

    let escape = tabular
        .get_map(&SourceRequest::new("ws1", "../secrets.csv"))
        .expect_err("escape");
    assert_eq!(escape.code(), ErrorCode::ValidationFailed);
}

#[test]
fn when_csv_is_malformed_ingestion_fails_as_read_error() {
    // Given: A file with an unterminated quote
    let temp = tempdir().expect("tempdir");
    write_source(temp.path(), "bad.csv", b"a,b\n1,2\n\"unterminated\n");

    // When: It is ingested
    let error = tabular(temp.path())
        .ensure_cache(&SourceRequest::new("ws1", "bad.csv"))
        .expect_err("strict load");

    // Then: The failure is a read failure
    assert_eq!(error.code(), ErrorCode::FileReadFailed);
    assert!(error.message().starts_with("failed to load csv"));
}

#[test]
fn when_a_late_row_is_wider_than_the_header_ingestion_fails() {
    // Given: A well-formed file except for one wide row at the end
    let temp = tempdir().expect("tempdir");
    write_source(temp.path(), "wide.csv", b"a,b\n1,2\n3,4\n5,6,7,8\n");

    // When: It is ingested
    let tabular = tabular(temp.path());
    let error = tabular
        .ensure_cache(&SourceRequest::new("ws1", "wide.csv"))
        .expect_err("wide row");

    // Then: Nothing is cached and the failure is a read failure
    assert_eq!(error.code(), ErrorCode::FileReadFailed);
    assert!(error.message().starts_with("failed to load csv"));
    let again = tabular
        .ensure_cache(&SourceRequest::new("ws1", "wide.csv"))
        .expect_err("still failing");
    assert_eq!(again.code(), ErrorCode::FileReadFailed);
}
