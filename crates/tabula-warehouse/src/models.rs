//! Request and response payloads of the tabular operations.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::TabularError;
use crate::schema::InferredType;

/// Identifies a CSV source inside a workspace.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceRequest {
    pub workspace_id: String,
    #[serde(default)]
    pub root: Option<String>,
    pub path: String,
}

impl SourceRequest {
    pub fn new(workspace_id: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            workspace_id: workspace_id.into(),
            root: None,
            path: path.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsRequest {
    #[serde(flatten)]
    pub source: SourceRequest,
    #[serde(default)]
    pub columns: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadRowsRequest {
    #[serde(flatten)]
    pub source: SourceRequest,
    /// 1-based first row.
    #[serde(default)]
    pub row_start: Option<i64>,
    #[serde(default)]
    pub row_count: Option<i64>,
    #[serde(default)]
    pub columns: Option<Vec<String>>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryRequest {
    #[serde(flatten)]
    pub source: SourceRequest,
    #[serde(default)]
    pub query: Option<String>,
    #[serde(default)]
    pub window_offset: Option<i64>,
    #[serde(default)]
    pub window_rows: Option<i64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportRequest {
    #[serde(flatten)]
    pub source: SourceRequest,
    /// Query to export; the whole table in insertion order when absent.
    #[serde(default)]
    pub query: Option<String>,
    pub target_path: String,
    #[serde(default)]
    pub target_root: Option<String>,
    /// `csv` or `xlsx`; inferred from the target extension when absent.
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub sheet: Option<String>,
}

/// How exported rows are placed into an existing sheet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlacementMode {
    ReplaceSheet,
    AppendRows,
    WriteRange,
}

impl PlacementMode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ReplaceSheet => "replace_sheet",
            Self::AppendRows => "append_rows",
            Self::WriteRange => "write_range",
        }
    }

    pub fn parse(raw: &str) -> Result<Self, TabularError> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "replace_sheet" => Ok(Self::ReplaceSheet),
            "append_rows" => Ok(Self::AppendRows),
            "write_range" => Ok(Self::WriteRange),
            _ => Err(TabularError::validation("invalid mode")),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateFromExportRequest {
    #[serde(flatten)]
    pub source: SourceRequest,
    #[serde(default)]
    pub query: Option<String>,
    pub target_path: String,
    #[serde(default)]
    pub target_root: Option<String>,
    #[serde(default)]
    pub sheet: Option<String>,
    /// One of `replace_sheet`, `append_rows`, `write_range`.
    #[serde(default)]
    pub mode: Option<String>,
    #[serde(default)]
    pub start_cell: Option<String>,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub include_header: Option<bool>,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub create_workbook_if_missing: Option<bool>,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub create_sheet_if_missing: Option<bool>,
    #[serde(default, deserialize_with = "lenient_bool")]
    pub clear_target_range: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MapColumn {
    pub name: String,
    pub index: usize,
    pub inferred_type: InferredType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Chunk {
    pub index: usize,
    /// 1-based inclusive range, `start-end`.
    pub rows: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MapResponse {
    pub format: String,
    pub delimiter: String,
    pub quote_char: String,
    pub encoding_detected: String,
    pub encoding_confidence: f64,
    pub has_header: bool,
    pub row_count: u64,
    pub column_count: usize,
    pub columns: Vec<MapColumn>,
    pub chunks: Vec<Chunk>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DescribeColumn {
    pub name: String,
    pub index: usize,
    pub inferred_type: InferredType,
    pub nullable: bool,
    pub non_null_count: u64,
    pub distinct_estimate: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DescribeResponse {
    pub row_count: u64,
    pub column_count: usize,
    pub columns: Vec<DescribeColumn>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommonValue {
    pub value: Value,
    pub count: u64,
}

/// Per-column statistics; only the fields of the column's type family are set.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnStats {
    pub name: String,
    #[serde(rename = "type")]
    pub inferred_type: InferredType,
    pub non_null_count: u64,
    pub distinct_estimate: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mean: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sum: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stddev: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub true_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub false_count: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min_length: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_length: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub most_common: Option<Vec<CommonValue>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsResponse {
    pub row_count: u64,
    pub columns: Vec<ColumnStats>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReadRowsResponse {
    pub columns: Vec<String>,
    pub column_types: Vec<InferredType>,
    pub rows: Vec<Vec<Value>>,
    pub row_start: u64,
    pub row_count: usize,
    pub total_rows: u64,
    pub has_more: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResponse {
    pub columns: Vec<String>,
    pub column_types: Vec<InferredType>,
    pub rows: Vec<Vec<Value>>,
    pub row_count: usize,
    pub total_row_count: u64,
    pub window_rows: u64,
    pub window_offset: u64,
    pub has_more: bool,
    pub query_elapsed_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExportResponse {
    pub target_path: String,
    pub format: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sheet: Option<String>,
    pub row_count: u64,
    pub column_count: usize,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpdateFromExportResponse {
    pub target_path: String,
    pub sheet: String,
    pub mode: PlacementMode,
    pub row_count: u64,
    pub column_count: usize,
    /// Spreadsheet range written, e.g. `B2:D10`; empty when nothing was written.
    pub written_range: String,
    pub warnings: Vec<String>,
}

/// Parse a boolean flag written as true/t/yes/y/1/on or false/f/no/n/0/off.
pub fn parse_bool_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "t" | "yes" | "y" | "1" | "on" => Some(true),
        "false" | "f" | "no" | "n" | "0" | "off" => Some(false),
        _ => None,
    }
}

fn lenient_bool<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(flag)) => Ok(Some(flag)),
        Some(Value::Number(number)) => match number.as_f64() {
            Some(n) if n == 0.0 => Ok(Some(false)),
            Some(n) if n == 1.0 => Ok(Some(true)),
            _ => Err(serde::de::Error::custom(format!("invalid boolean: {number}"))),
        },
        Some(Value::String(text)) => parse_bool_flag(&text)
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid boolean: {text}"))),
        Some(other) => Err(serde::de::Error::custom(format!("invalid boolean: {other}"))),
    }
}

/// A positive integer parameter, or `default` when absent.
pub fn positive_int(value: Option<i64>, name: &str, default: u64) -> Result<u64, TabularError> {
    match value {
        None => Ok(default),
        Some(value) if value > 0 => Ok(value as u64),
        Some(_) => Err(TabularError::validation(format!("invalid {name}"))),
    }
}

/// A non-negative integer parameter, or `default` when absent.
pub fn non_negative_int(value: Option<i64>, name: &str, default: u64) -> Result<u64, TabularError> {
    match value {
        None => Ok(default),
        Some(value) if value >= 0 => Ok(value as u64),
        Some(_) => Err(TabularError::validation(format!("invalid {name}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn bool_flags_accept_common_spellings() {
        for raw in ["true", "T", "yes", "y", "1", "ON"] {
            assert_eq!(parse_bool_flag(raw), Some(true), "{raw}");
        }
        for raw in ["false", "f", "No", "n", "0", "off"] {
            assert_eq!(parse_bool_flag(raw), Some(false), "{raw}");
        }
        assert_eq!(parse_bool_flag("maybe"), None);
    }

    #[test]
    fn update_request_deserializes_lenient_flags() {
        let request: UpdateFromExportRequest = serde_json::from_value(json!({
            "workspace_id": "ws",
            "path": "a.csv",
            "target_path": "out.xlsx",
            "include_header": "no",
            "create_sheet_if_missing": 0,
            "clear_target_range": true
        }))
        .expect("deserialize");

        assert_eq!(request.include_header, Some(false));
        assert_eq!(request.create_sheet_if_missing, Some(false));
        assert_eq!(request.clear_target_range, Some(true));
        assert_eq!(request.create_workbook_if_missing, None);
        assert_eq!(request.source.root, None);
    }

    #[test]
    fn invalid_flag_is_rejected() {
        let result = serde_json::from_value::<UpdateFromExportRequest>(json!({
            "workspace_id": "ws",
            "path": "a.csv",
            "target_path": "out.xlsx",
            "include_header": "sometimes"
        }));
        assert!(result.is_err());
    }

    #[test]
    fn integer_parameters_are_range_checked() {
        assert_eq!(positive_int(None, "row_count", 100).expect("default"), 100);
        assert_eq!(positive_int(Some(5), "row_count", 100).expect("value"), 5);
        assert_eq!(
            positive_int(Some(0), "row_count", 100)
                .expect_err("zero")
                .message(),
            "invalid row_count"
        );
        assert_eq!(non_negative_int(Some(0), "window_offset", 0).expect("zero"), 0);
        assert!(non_negative_int(Some(-1), "window_offset", 0).is_err());
    }

    #[test]
    fn stats_skip_fields_outside_the_family() {
        let stats = ColumnStats {
            name: String::from("flag"),
            inferred_type: InferredType::Boolean,
            non_null_count: 2,
            distinct_estimate: 2,
            min: None,
            max: None,
            mean: None,
            sum: None,
            stddev: None,
            true_count: Some(1),
            false_count: Some(1),
            min_length: None,
            max_length: None,
            most_common: None,
        };
        let value = serde_json::to_value(&stats).expect("serialize");
        assert_eq!(
            value,
            json!({
                "name": "flag",
                "type": "boolean",
                "non_null_count": 2,
                "distinct_estimate": 2,
                "true_count": 1,
                "false_count": 1
            })
        );
    }
}
