//! Schema, profile, and row-window reads over a cache table.

use std::collections::HashSet;

use ::duckdb::types::Value as DuckValue;
use ::duckdb::{params, Connection};

use crate::engine::{quote_ident, TABLE_NAME};
use crate::error::TabularError;
use crate::ingest::normalize_confidence;
use crate::models::{
    Chunk, ColumnStats, CommonValue, DescribeColumn, DescribeResponse, MapColumn, MapResponse,
    StatsResponse,
};
use crate::schema::{chunk_ranges, ColumnSchema, TypeFamily};
use crate::store::CacheEntry;
use crate::value::{read_row, to_json_value};

const MOST_COMMON_LIMIT: usize = 5;

/// Layout summary of a cached source, derived from metadata alone.
pub fn map_of(entry: &CacheEntry, chunk_rows: u64) -> MapResponse {
    let columns: Vec<MapColumn> = entry
        .columns
        .iter()
        .map(|column| MapColumn {
            name: column.name.clone(),
            index: column.index,
            inferred_type: column.inferred_type,
        })
        .collect();
    let chunks = chunk_ranges(entry.row_count, chunk_rows)
        .into_iter()
        .enumerate()
        .map(|(index, (start, end))| Chunk {
            index,
            rows: format!("{start}-{end}"),
        })
        .collect();

    MapResponse {
        format: entry.format.clone(),
        delimiter: entry.delimiter.clone(),
        quote_char: entry.quote_char.clone(),
        encoding_detected: entry.encoding_detected.clone(),
        encoding_confidence: normalize_confidence(entry.encoding_confidence),
        has_header: entry.has_header,
        row_count: entry.row_count,
        column_count: columns.len(),
        columns,
        chunks,
    }
}

/// Non-null counts and distinct estimates, one pair per column.
fn null_and_distinct_counts(
    connection: &Connection,
    columns: &[&ColumnSchema],
) -> Result<Vec<(u64, u64)>, ::duckdb::Error> {
    if columns.is_empty() {
        return Ok(Vec::new());
    }
    let select_items: Vec<String> = columns
        .iter()
        .flat_map(|column| {
            let ident = quote_ident(&column.name);
            [
                format!("COUNT({ident})"),
                format!("CAST(COALESCE(approx_count_distinct({ident}), 0) AS BIGINT)"),
            ]
        })
        .collect();
    let values = select_single_row(connection, &select_items)?;

    Ok(values
        .chunks(2)
        .map(|pair| (as_count(&pair[0]), pair.get(1).map_or(0, as_count)))
        .collect())
}

pub fn describe(
    connection: &Connection,
    entry: &CacheEntry,
) -> Result<DescribeResponse, ::duckdb::Error> {
    let columns: Vec<&ColumnSchema> = entry.columns.iter().collect();
    let counts = null_and_distinct_counts(connection, &columns)?;

    let described = columns
        .iter()
        .zip(counts)
        .map(|(column, (non_null_count, distinct_estimate))| DescribeColumn {
            name: column.name.clone(),
            index: column.index,
            inferred_type: column.inferred_type,
            nullable: non_null_count < entry.row_count,
            non_null_count,
            distinct_estimate,
        })
        .collect();

    Ok(DescribeResponse {
        row_count: entry.row_count,
        column_count: entry.columns.len(),
        columns: described,
    })
}

/// Resolve a caller's column selection against the schema.
///
/// `None` selects every column. Names are trimmed and de-duplicated; an
/// empty list, a blank name, or an unknown name is rejected.
pub fn select_columns<'a>(
    entry: &'a CacheEntry,
    requested: Option<&[String]>,
) -> Result<Vec<&'a ColumnSchema>, TabularError> {
    let Some(requested) = requested else {
        return Ok(entry.columns.iter().collect());
    };
    if requested.is_empty() {
        return Err(TabularError::validation("columns must be a non-empty list"));
    }

    let mut seen = HashSet::new();
    let mut selected = Vec::new();
    for raw in requested {
        let name = raw.trim();
        if name.is_empty() {
            return Err(TabularError::validation("invalid column name"));
        }
        if !seen.insert(name) {
            continue;
        }
        let column = entry
            .column(name)
            .ok_or_else(|| TabularError::validation(format!("unknown column: {name}")))?;
        selected.push(column);
    }
    Ok(selected)
}

pub fn stats(
    connection: &Connection,
    entry: &CacheEntry,
    selected: &[&ColumnSchema],
) -> Result<StatsResponse, ::duckdb::Error> {
    let counts = null_and_distinct_counts(connection, selected)?;
    let mut columns: Vec<ColumnStats> = selected
        .iter()
        .zip(counts)
        .map(|(column, (non_null_count, distinct_estimate))| ColumnStats {
            name: column.name.clone(),
            inferred_type: column.inferred_type,
            non_null_count,
            distinct_estimate,
            min: None,
            max: None,
            mean: None,
            sum: None,
            stddev: None,
            true_count: None,
            false_count: None,
            min_length: None,
            max_length: None,
            most_common: None,
        })
        .collect();

    let positions = |family: TypeFamily| -> Vec<usize> {
        selected
            .iter()
            .enumerate()
            .filter(|(_, column)| column.inferred_type.family() == family)
            .map(|(position, _)| position)
            .collect()
    };

    let numeric = positions(TypeFamily::Numeric);
    if !numeric.is_empty() {
        let items: Vec<String> = numeric
            .iter()
            .flat_map(|&position| {
                let ident = quote_ident(&selected[position].name);
                [
                    format!("MIN({ident})"),
                    format!("MAX({ident})"),
                    format!("AVG({ident})"),
                    format!("SUM({ident})"),
                    format!("STDDEV_SAMP({ident})"),
                ]
            })
            .collect();
        let values = select_single_row(connection, &items)?;
        for (&position, chunk) in numeric.iter().zip(values.chunks(5)) {
            let item = &mut columns[position];
            item.min = chunk.first().cloned().map(to_json_value);
            item.max = chunk.get(1).cloned().map(to_json_value);
            item.mean = chunk.get(2).cloned().map(to_json_value);
            item.sum = chunk.get(3).cloned().map(to_json_value);
            item.stddev = chunk.get(4).cloned().map(to_json_value);
        }
    }

    let dates = positions(TypeFamily::Date);
    if !dates.is_empty() {
        let items: Vec<String> = dates
            .iter()
            .flat_map(|&position| {
                let ident = quote_ident(&selected[position].name);
                [format!("MIN({ident})"), format!("MAX({ident})")]
            })
            .collect();
        let values = select_single_row(connection, &items)?;
        for (&position, chunk) in dates.iter().zip(values.chunks(2)) {
            let item = &mut columns[position];
            item.min = chunk.first().cloned().map(to_json_value);
            item.max = chunk.get(1).cloned().map(to_json_value);
        }
    }

    let booleans = positions(TypeFamily::Boolean);
    if !booleans.is_empty() {
        let items: Vec<String> = booleans
            .iter()
            .flat_map(|&position| {
                let ident = quote_ident(&selected[position].name);
                [
                    format!("CAST(SUM(CASE WHEN {ident} IS TRUE THEN 1 ELSE 0 END) AS BIGINT)"),
                    format!("CAST(SUM(CASE WHEN {ident} IS FALSE THEN 1 ELSE 0 END) AS BIGINT)"),
                ]
            })
            .collect();
        let values = select_single_row(connection, &items)?;
        for (&position, chunk) in booleans.iter().zip(values.chunks(2)) {
            let item = &mut columns[position];
            item.true_count = Some(chunk.first().map_or(0, as_count));
            item.false_count = Some(chunk.get(1).map_or(0, as_count));
        }
    }

    let texts = positions(TypeFamily::Text);
    if !texts.is_empty() {
        let items: Vec<String> = texts
            .iter()
            .flat_map(|&position| {
                let ident = quote_ident(&selected[position].name);
                [
                    format!("MIN(LENGTH(CAST({ident} AS VARCHAR)))"),
                    format!("MAX(LENGTH(CAST({ident} AS VARCHAR)))"),
                ]
            })
            .collect();
        let values = select_single_row(connection, &items)?;
        for (&position, chunk) in texts.iter().zip(values.chunks(2)) {
            let item = &mut columns[position];
            item.min_length = chunk.first().cloned().map(to_json_value);
            item.max_length = chunk.get(1).cloned().map(to_json_value);
            item.most_common = Some(Vec::new());
        }

        for (slot, value, count) in most_common_values(connection, selected, &texts)? {
            if let Some(common) = columns[slot].most_common.as_mut() {
                common.push(CommonValue {
                    value: serde_json::Value::String(value),
                    count,
                });
            }
        }
        for &position in &texts {
            if let Some(common) = columns[position].most_common.as_mut() {
                common.sort_by(|left, right| {
                    right
                        .count
                        .cmp(&left.count)
                        .then_with(|| left.value.as_str().cmp(&right.value.as_str()))
                });
                common.truncate(MOST_COMMON_LIMIT);
            }
        }
    }

    Ok(StatsResponse {
        row_count: entry.row_count,
        columns,
    })
}

/// Top values per text column as `(position, value, count)` triples.
fn most_common_values(
    connection: &Connection,
    selected: &[&ColumnSchema],
    positions: &[usize],
) -> Result<Vec<(usize, String, u64)>, ::duckdb::Error> {
    let union = positions
        .iter()
        .map(|&position| {
            let ident = quote_ident(&selected[position].name);
            format!(
                "SELECT {position} AS slot, value, value_count FROM (\
                 SELECT CAST({ident} AS VARCHAR) AS value, COUNT(*) AS value_count \
                 FROM {TABLE_NAME} WHERE {ident} IS NOT NULL \
                 GROUP BY 1 ORDER BY 2 DESC, 1 ASC LIMIT {MOST_COMMON_LIMIT})"
            )
        })
        .collect::<Vec<_>>()
        .join(" UNION ALL ");

    let mut statement = connection.prepare(&union)?;
    let rows = statement.query_map([], |row| {
        Ok((
            row.get::<_, i32>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, i64>(2)?,
        ))
    })?;

    let mut output = Vec::new();
    for row in rows {
        let (slot, value, count) = row?;
        output.push((slot.max(0) as usize, value, count.max(0) as u64));
    }
    Ok(output)
}

/// Read rows in insertion order.
pub fn read_rows(
    connection: &Connection,
    selected: &[&ColumnSchema],
    offset: u64,
    limit: u64,
) -> Result<Vec<Vec<serde_json::Value>>, ::duckdb::Error> {
    let select_list = selected
        .iter()
        .map(|column| quote_ident(&column.name))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!("SELECT {select_list} FROM {TABLE_NAME} ORDER BY rowid LIMIT ? OFFSET ?");
    let mut statement = connection.prepare(&sql)?;
    let mut cursor = statement.query(params![
        i64::try_from(limit).unwrap_or(i64::MAX),
        i64::try_from(offset).unwrap_or(i64::MAX)
    ])?;

    let mut rows = Vec::new();
    while let Some(row) = cursor.next()? {
        rows.push(read_row(row, selected.len())?);
    }
    Ok(rows)
}

fn select_single_row(
    connection: &Connection,
    items: &[String],
) -> Result<Vec<DuckValue>, ::duckdb::Error> {
    let sql = format!("SELECT {} FROM {TABLE_NAME}", items.join(", "));
    connection.query_row(&sql, [], |row| {
        (0..items.len())
            .map(|index| row.get::<_, DuckValue>(index))
            .collect()
    })
}

fn as_count(value: &DuckValue) -> u64 {
    match value {
        DuckValue::BigInt(count) => (*count).max(0) as u64,
        DuckValue::Int(count) => (*count).max(0) as u64,
        DuckValue::UBigInt(count) => *count,
        DuckValue::HugeInt(count) => u64::try_from((*count).max(0)).unwrap_or(u64::MAX),
        _ => 0,
    }
}
