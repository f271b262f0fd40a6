//! Streaming export of query results and in-place spreadsheet updates.
//!
//! Every target is staged in a temporary file next to it and renamed into
//! place once complete, so readers only ever observe the previous file or the
//! finished one.

use std::fs;
use std::io::{self, Write};
use std::path::Path;

use ::duckdb::Connection;
use rust_xlsxwriter::Workbook;
use serde_json::Value;
use tempfile::NamedTempFile;
use thiserror::Error;

use crate::engine::TABLE_NAME;
use crate::error::TabularError;
use crate::models::PlacementMode;
use crate::validate::{has_order_by, validate_query};
use crate::value::{csv_cell, read_row};
use crate::workbook::{
    check_extent, parse_cell_ref, sanitize_text, write_cell, written_range, CellValue, Sheet,
    WorkbookModel,
};

/// Rows fetched from the engine per write.
pub const EXPORT_BATCH_ROWS: usize = 1000;
pub const NO_ORDER_BY_WARNING: &str = "query_has_no_order_by; output order may vary";
pub const HEADER_SKIPPED_WARNING: &str = "header_skipped_on_append; sheet already has data";

/// Output file format of an export.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Csv,
    Xlsx,
}

impl ExportFormat {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Xlsx => "xlsx",
        }
    }

    /// Resolve the requested format against the target path.
    ///
    /// An explicit format must agree with the target's extension; without one,
    /// the extension decides.
    pub fn resolve(requested: Option<&str>, target_path: &str) -> Result<Self, TabularError> {
        let requested = requested.map(str::trim).filter(|format| !format.is_empty());
        let from_extension = Self::from_extension(target_path);
        match requested {
            Some(raw) => {
                let format = match raw.to_ascii_lowercase().as_str() {
                    "csv" => Self::Csv,
                    "xlsx" => Self::Xlsx,
                    _ => return Err(TabularError::validation("unsupported format")),
                };
                if from_extension != Some(format) {
                    return Err(TabularError::validation(
                        "target_path extension must match format",
                    ));
                }
                Ok(format)
            }
            None => from_extension.ok_or_else(|| TabularError::validation("unsupported format")),
        }
    }

    fn from_extension(target_path: &str) -> Option<Self> {
        let lowered = target_path.trim().to_ascii_lowercase();
        if lowered.ends_with(".csv") {
            Some(Self::Csv)
        } else if lowered.ends_with(".xlsx") {
            Some(Self::Xlsx)
        } else {
            None
        }
    }
}

/// The statement an export runs, plus any warnings about it.
///
/// A missing or blank query exports the whole table in insertion order.
pub fn export_query(query: Option<&str>) -> Result<(String, Vec<String>), TabularError> {
    let Some(raw) = query.filter(|query| !query.trim().is_empty()) else {
        return Ok((format!("SELECT * FROM {TABLE_NAME} ORDER BY rowid"), Vec::new()));
    };
    let validated = validate_query(Some(raw))?;
    let mut warnings = Vec::new();
    if !has_order_by(raw) {
        warnings.push(NO_ORDER_BY_WARNING.to_string());
    }
    Ok((validated, warnings))
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error(transparent)]
    Engine(#[from] ::duckdb::Error),
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Xlsx(#[from] rust_xlsxwriter::XlsxError),
    #[error("{0}")]
    Bounds(TabularError),
}

impl ExportError {
    /// Map into the taxonomy, keeping errors that already carry a code.
    pub fn into_tabular(self, context: &str) -> TabularError {
        match self {
            Self::Bounds(error) => error,
            other => TabularError::write(format!("{context}: {other}")),
        }
    }
}

/// Receives the streamed result of an export query.
trait RowSink {
    fn begin(&mut self, columns: &[String]) -> Result<(), ExportError>;
    fn write_batch(&mut self, rows: &[Vec<Value>]) -> Result<(), ExportError>;
}

/// Shape of a completed export.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExportSummary {
    pub row_count: u64,
    pub column_count: usize,
}

/// Run `sql` and stream its rows into `sink` in fixed-size batches.
fn stream_query(
    connection: &Connection,
    sql: &str,
    sink: &mut dyn RowSink,
) -> Result<ExportSummary, ExportError> {
    let mut statement = connection.prepare(sql)?;
    let mut cursor = statement.query([])?;
    let columns = cursor
        .as_ref()
        .map(|statement| statement.column_names())
        .unwrap_or_default();
    sink.begin(&columns)?;

    let mut row_count = 0_u64;
    let mut batch = Vec::with_capacity(EXPORT_BATCH_ROWS);
    while let Some(row) = cursor.next()? {
        batch.push(read_row(row, columns.len())?);
        if batch.len() == EXPORT_BATCH_ROWS {
            sink.write_batch(&batch)?;
            row_count += batch.len() as u64;
            batch.clear();
        }
    }
    if !batch.is_empty() {
        sink.write_batch(&batch)?;
        row_count += batch.len() as u64;
    }

    Ok(ExportSummary {
        row_count,
        column_count: columns.len(),
    })
}

struct CsvSink {
    writer: csv::Writer<NamedTempFile>,
}

impl RowSink for CsvSink {
    fn begin(&mut self, columns: &[String]) -> Result<(), ExportError> {
        self.writer.write_record(columns)?;
        Ok(())
    }

    fn write_batch(&mut self, rows: &[Vec<Value>]) -> Result<(), ExportError> {
        for row in rows {
            self.writer.write_record(row.iter().map(csv_cell))?;
        }
        Ok(())
    }
}

/// Writes straight into a constant-memory worksheet; rows are flushed to disk as they arrive.
struct XlsxSink {
    workbook: Workbook,
    next_row: u32,
}

impl XlsxSink {
    fn new(sheet_name: &str) -> Result<Self, ExportError> {
        let mut workbook = Workbook::new();
        workbook
            .add_worksheet_with_constant_memory()
            .set_name(sheet_name)?;
        Ok(Self {
            workbook,
            next_row: 0,
        })
    }

    fn write_row(
        &mut self,
        cells: impl Iterator<Item = Option<CellValue>>,
    ) -> Result<(), ExportError> {
        check_extent(self.next_row, 0, 1, 0).map_err(ExportError::Bounds)?;
        let row = self.next_row;
        let worksheet = self.workbook.worksheet_from_index(0)?;
        for (col, cell) in cells.enumerate() {
            let col = u16::try_from(col).map_err(|_| {
                ExportError::Bounds(TabularError::write(
                    "failed to write xlsx: data exceeds sheet bounds",
                ))
            })?;
            if let Some(cell) = cell {
                write_cell(worksheet, row, col, &cell)?;
            }
        }
        self.next_row += 1;
        Ok(())
    }
}

impl RowSink for XlsxSink {
    fn begin(&mut self, columns: &[String]) -> Result<(), ExportError> {
        self.write_row(
            columns
                .iter()
                .map(|name| Some(CellValue::String(sanitize_text(name)))),
        )
    }

    fn write_batch(&mut self, rows: &[Vec<Value>]) -> Result<(), ExportError> {
        for values in rows {
            self.write_row(values.iter().map(CellValue::from_json))?;
        }
        Ok(())
    }
}

/// Export the result of `sql` to `target` as delimited text.
pub fn export_csv(
    connection: &Connection,
    sql: &str,
    target: &Path,
) -> Result<ExportSummary, ExportError> {
    let staged = staging_file(target)?;
    let mut sink = CsvSink {
        writer: csv::Writer::from_writer(staged),
    };
    let summary = stream_query(connection, sql, &mut sink)?;
    let staged = sink
        .writer
        .into_inner()
        .map_err(|error| ExportError::Io(error.into_error()))?;
    commit(staged, target)?;
    Ok(summary)
}

/// Export the result of `sql` to `target` as a single-sheet workbook.
pub fn export_xlsx(
    connection: &Connection,
    sql: &str,
    target: &Path,
    sheet_name: &str,
) -> Result<ExportSummary, ExportError> {
    let mut sink = XlsxSink::new(sheet_name)?;
    let summary = stream_query(connection, sql, &mut sink)?;

    let mut staged = staging_file(target)?;
    sink.workbook.save_to_writer(&mut staged)?;
    commit(staged, target)?;
    Ok(summary)
}

/// Fully materialized query result for spreadsheet placement.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CollectedRows {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

struct CollectSink {
    collected: CollectedRows,
}

impl RowSink for CollectSink {
    fn begin(&mut self, columns: &[String]) -> Result<(), ExportError> {
        self.collected.columns = columns.to_vec();
        Ok(())
    }

    fn write_batch(&mut self, rows: &[Vec<Value>]) -> Result<(), ExportError> {
        self.collected.rows.extend_from_slice(rows);
        Ok(())
    }
}

/// Run `sql` and keep every row in memory.
pub fn collect_rows(connection: &Connection, sql: &str) -> Result<CollectedRows, ExportError> {
    let mut sink = CollectSink {
        collected: CollectedRows::default(),
    };
    stream_query(connection, sql, &mut sink)?;
    Ok(sink.collected)
}

/// Where and how rows land in a sheet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placement<'a> {
    pub mode: PlacementMode,
    pub start_cell: &'a str,
    pub include_header: bool,
    pub clear_target_range: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlacementOutcome {
    pub written_range: String,
    pub warnings: Vec<String>,
}

/// Write `data` into `sheet` according to `placement`.
pub fn place_rows(
    sheet: &mut Sheet,
    placement: Placement<'_>,
    data: &CollectedRows,
) -> Result<PlacementOutcome, TabularError> {
    let mut warnings = Vec::new();
    let mut include_header = placement.include_header;
    let (start_row, start_col) = match placement.mode {
        PlacementMode::ReplaceSheet => {
            sheet.clear();
            (0, 0)
        }
        PlacementMode::AppendRows => {
            let start_row = match sheet.last_used_row() {
                Some(last) => {
                    if include_header {
                        include_header = false;
                        warnings.push(HEADER_SKIPPED_WARNING.to_string());
                    }
                    last + 1
                }
                None => 0,
            };
            (start_row, 0)
        }
        PlacementMode::WriteRange => {
            let (row, col) = parse_cell_ref(placement.start_cell)?;
            if placement.clear_target_range {
                let rows = u32::try_from(data.rows.len() + usize::from(include_header))
                    .unwrap_or(u32::MAX);
                let cols = u16::try_from(data.columns.len()).unwrap_or(u16::MAX);
                sheet.clear_rect(row, col, rows, cols);
            }
            (row, col)
        }
    };

    let written = sheet.write_block(start_row, start_col, &data.columns, &data.rows, include_header)?;
    Ok(PlacementOutcome {
        written_range: written_range(start_row, start_col, written, data.columns.len()),
        warnings,
    })
}

/// Serialize `workbook` and atomically replace `target` with it.
pub fn write_workbook(workbook: &WorkbookModel, target: &Path) -> Result<(), ExportError> {
    let bytes = workbook.to_bytes()?;
    let mut staged = staging_file(target)?;
    staged.write_all(&bytes)?;
    commit(staged, target)
}

fn staging_file(target: &Path) -> Result<NamedTempFile, io::Error> {
    let dir = target.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)?;
    tempfile::Builder::new()
        .prefix(".tabula-export-")
        .suffix(".tmp")
        .tempfile_in(dir)
}

/// Flush and rename a staged file over `target`; the temp file is removed on failure.
fn commit(mut staged: NamedTempFile, target: &Path) -> Result<(), ExportError> {
    staged.flush()?;
    staged.as_file().sync_all()?;
    staged
        .persist(target)
        .map_err(|error| ExportError::Io(error.error))?;
    Ok(())
}
