//! Column schema and the coarse type classification shown to callers.

use ::duckdb::arrow::datatypes::DataType;
use serde::{Deserialize, Serialize};

/// Coarse semantic type of a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InferredType {
    Integer,
    Float,
    Boolean,
    Date,
    String,
}

impl InferredType {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Integer => "integer",
            Self::Float => "float",
            Self::Boolean => "boolean",
            Self::Date => "date",
            Self::String => "string",
        }
    }

    /// Statistics family used by `get_stats`.
    pub const fn family(self) -> TypeFamily {
        match self {
            Self::Integer | Self::Float => TypeFamily::Numeric,
            Self::Boolean => TypeFamily::Boolean,
            Self::Date => TypeFamily::Date,
            Self::String => TypeFamily::Text,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeFamily {
    Numeric,
    Boolean,
    Date,
    Text,
}

/// One column of an ingested table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub name: String,
    pub index: usize,
    pub physical_type: String,
    pub inferred_type: InferredType,
}

const INTEGER_TYPES: &[&str] = &[
    "TINYINT", "SMALLINT", "INTEGER", "INT", "BIGINT", "HUGEINT", "UTINYINT", "USMALLINT",
    "UINTEGER", "UBIGINT", "UHUGEINT",
];

/// Map an engine type name (as reported by `PRAGMA table_info`) to its inferred type.
pub fn inferred_type_for(physical_type: &str) -> InferredType {
    let upper = physical_type.trim().to_ascii_uppercase();
    if INTEGER_TYPES.contains(&upper.as_str()) {
        InferredType::Integer
    } else if ["DECIMAL", "NUMERIC", "DOUBLE", "FLOAT", "REAL"]
        .iter()
        .any(|family| upper.contains(family))
    {
        InferredType::Float
    } else if upper == "BOOLEAN" || upper == "BOOL" {
        InferredType::Boolean
    } else if upper.contains("DATE") || upper.contains("TIME") {
        InferredType::Date
    } else {
        InferredType::String
    }
}

/// Map the Arrow type of a result column to its inferred type.
pub fn inferred_type_for_arrow(data_type: &DataType) -> InferredType {
    match data_type {
        DataType::Int8
        | DataType::Int16
        | DataType::Int32
        | DataType::Int64
        | DataType::UInt8
        | DataType::UInt16
        | DataType::UInt32
        | DataType::UInt64 => InferredType::Integer,
        // HUGEINT results, such as SUM over BIGINT, arrive as scale-0 decimals.
        DataType::Decimal128(_, 0) | DataType::Decimal256(_, 0) => InferredType::Integer,
        DataType::Float16
        | DataType::Float32
        | DataType::Float64
        | DataType::Decimal128(_, _)
        | DataType::Decimal256(_, _) => InferredType::Float,
        DataType::Boolean => InferredType::Boolean,
        DataType::Date32
        | DataType::Date64
        | DataType::Time32(_)
        | DataType::Time64(_)
        | DataType::Timestamp(_, _) => InferredType::Date,
        _ => InferredType::String,
    }
}

/// Split `total_rows` into 1-based inclusive ranges of `chunk_rows` rows.
pub fn chunk_ranges(total_rows: u64, chunk_rows: u64) -> Vec<(u64, u64)> {
    let chunk_rows = chunk_rows.max(1);
    let mut chunks = Vec::new();
    let mut start = 1;
    while start <= total_rows {
        let end = (start + chunk_rows - 1).min(total_rows);
        chunks.push((start, end));
        start = end + 1;
    }
    chunks
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_engine_type_names() {
        assert_eq!(inferred_type_for("BIGINT"), InferredType::Integer);
        assert_eq!(inferred_type_for("ubigint"), InferredType::Integer);
        assert_eq!(inferred_type_for("DECIMAL(18,3)"), InferredType::Float);
        assert_eq!(inferred_type_for("DOUBLE"), InferredType::Float);
        assert_eq!(inferred_type_for("BOOLEAN"), InferredType::Boolean);
        assert_eq!(inferred_type_for("DATE"), InferredType::Date);
        assert_eq!(inferred_type_for("TIMESTAMP WITH TIME ZONE"), InferredType::Date);
        assert_eq!(inferred_type_for("VARCHAR"), InferredType::String);
        assert_eq!(inferred_type_for("UUID"), InferredType::String);
        assert_eq!(inferred_type_for(""), InferredType::String);
    }

    #[test]
    fn maps_arrow_types() {
        assert_eq!(inferred_type_for_arrow(&DataType::Int64), InferredType::Integer);
        assert_eq!(inferred_type_for_arrow(&DataType::Float64), InferredType::Float);
        assert_eq!(inferred_type_for_arrow(&DataType::Decimal128(38, 0)), InferredType::Integer);
        assert_eq!(inferred_type_for_arrow(&DataType::Decimal128(18, 3)), InferredType::Float);
        assert_eq!(inferred_type_for_arrow(&DataType::Date32), InferredType::Date);
        assert_eq!(inferred_type_for_arrow(&DataType::Utf8), InferredType::String);
    }

    #[test]
    fn chunk_ranges_cover_every_row_once() {
        assert!(chunk_ranges(0, 100).is_empty());
        assert_eq!(chunk_ranges(100, 100), vec![(1, 100)]);
        assert_eq!(chunk_ranges(250, 100), vec![(1, 100), (101, 200), (201, 250)]);
    }

    #[test]
    fn inferred_type_serializes_lowercase() {
        let json = serde_json::to_string(&InferredType::Boolean).expect("serialize");
        assert_eq!(json, "\"boolean\"");
        assert_eq!(InferredType::Date.family(), TypeFamily::Date);
    }
}
