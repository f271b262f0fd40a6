//! # Tabula Warehouse
//!
//! DuckDB-backed cache and query layer for CSV files living in sandboxed
//! workspaces.
//!
//! ## Overview
//!
//! Each CSV source is ingested once into a private single-table cache file
//! and re-ingested only when the file's signature (size, mtime, content hash)
//! changes. Every read operation runs against that cache through a read-only
//! connection carrying memory, thread, and time guardrails.
//!
//! ### Features
//!
//! - **Signature-checked cache**: byte-level changes always force a rebuild
//! - **Guarded SQL**: single read-only statements, path-reading functions refused
//! - **Windowed results**: exact totals with stable pagination
//! - **Interruptible queries**: a watchdog cancels statements past the deadline
//! - **Export**: CSV and `.xlsx` output, plus in-place sheet updates
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use tabula_warehouse::{QueryRequest, SourceRequest, Tabular, TabularConfig};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let tabular = Tabular::new(TabularConfig::new("/srv/workspaces"));
//!
//!     let response = tabular.query(&QueryRequest {
//!         source: SourceRequest::new("ws-1", "sales.csv"),
//!         query: Some(String::from("SELECT region, SUM(amount) FROM data GROUP BY 1 ORDER BY 1")),
//!         window_offset: None,
//!         window_rows: Some(50),
//!     })?;
//!
//!     println!("{} of {} rows", response.row_count, response.total_row_count);
//!     Ok(())
//! }
//! ```
//!
//! ## Errors
//!
//! Every operation fails with a [`TabularError`] whose [`TabularError::code`]
//! is one of `VALIDATION_FAILED`, `FILE_READ_FAILED`, or `FILE_WRITE_FAILED`.

pub mod config;
pub mod engine;
pub mod error;
pub mod export;
pub mod ingest;
pub mod inspect;
pub mod models;
pub mod query;
pub mod sandbox;
pub mod schema;
pub mod signature;
pub mod store;
pub mod supervisor;
pub mod validate;
pub mod value;
pub mod workbook;

use std::time::Instant;

use ::duckdb::Connection;

pub use config::TabularConfig;
pub use engine::{AccessMode, Guardrails};
pub use error::{ErrorCode, TabularError};
pub use export::ExportFormat;
pub use models::*;
pub use sandbox::{ResolvedPath, Sandbox, DEFAULT_ROOT};
pub use schema::{ColumnSchema, InferredType};
pub use store::{CacheEntry, CacheStore, EnsuredCache};
pub use supervisor::{Supervised, Supervisor};

use engine::open_connection;
use export::{
    collect_rows, export_csv, export_query, export_xlsx, place_rows, write_workbook, ExportError,
    Placement,
};
use query::{execute_window, Window};
use validate::validate_query;
use workbook::{parse_cell_ref, sanitize_sheet_name, WorkbookModel};

/// Entry point of the tabular subsystem.
///
/// Holds the worker-wide configuration; every operation resolves its source,
/// makes sure the cache is fresh, and runs against a fresh read-only
/// connection.
#[derive(Debug, Clone)]
pub struct Tabular {
    config: TabularConfig,
    store: CacheStore,
    guardrails: Guardrails,
    supervisor: Supervisor,
}

impl Tabular {
    pub fn new(config: TabularConfig) -> Self {
        let config = config.clamped();
        let guardrails = Guardrails::from(&config);
        let store = CacheStore::new(Sandbox::new(config.workspaces_dir.clone()), guardrails);
        let supervisor = Supervisor::new(config.query_timeout());
        Self {
            config,
            store,
            guardrails,
            supervisor,
        }
    }

    /// Build from `TABULA_*` environment variables.
    pub fn from_env() -> Self {
        Self::new(TabularConfig::from_env())
    }

    pub fn config(&self) -> &TabularConfig {
        &self.config
    }

    /// Make sure the cache for `source` reflects the current file contents.
    pub fn ensure_cache(&self, source: &SourceRequest) -> Result<EnsuredCache, TabularError> {
        self.store
            .ensure(&source.workspace_id, source.root.as_deref(), &source.path)
    }

    /// Drop cached artifacts for a workspace-relative path.
    pub fn invalidate(&self, workspace_id: &str, rel_path: &str) {
        self.store.invalidate(workspace_id, rel_path);
    }

    pub fn get_map(&self, source: &SourceRequest) -> Result<MapResponse, TabularError> {
        let cache = self.ensure_cache(source)?;
        Ok(inspect::map_of(&cache.entry, self.config.chunk_rows))
    }

    pub fn describe(&self, source: &SourceRequest) -> Result<DescribeResponse, TabularError> {
        let cache = self.ensure_cache(source)?;
        let connection = self.open_cache(&cache)?;
        self.supervise_read(&connection, || inspect::describe(&connection, &cache.entry))
    }

    pub fn get_stats(&self, request: &StatsRequest) -> Result<StatsResponse, TabularError> {
        let cache = self.ensure_cache(&request.source)?;
        let selected = inspect::select_columns(&cache.entry, request.columns.as_deref())?;
        let connection = self.open_cache(&cache)?;
        self.supervise_read(&connection, || {
            inspect::stats(&connection, &cache.entry, &selected)
        })
    }

    /// Read a literal row window in insertion order.
    pub fn read_rows(&self, request: &ReadRowsRequest) -> Result<ReadRowsResponse, TabularError> {
        let row_start = positive_int(request.row_start, "row_start", 1)?;
        let row_count = positive_int(request.row_count, "row_count", self.config.chunk_rows)?;
        let cache = self.ensure_cache(&request.source)?;
        let selected = inspect::select_columns(&cache.entry, request.columns.as_deref())?;

        let offset = row_start - 1;
        let connection = self.open_cache(&cache)?;
        let rows = self.supervise_read(&connection, || {
            inspect::read_rows(&connection, &selected, offset, row_count)
        })?;

        let total_rows = cache.entry.row_count;
        Ok(ReadRowsResponse {
            columns: selected.iter().map(|column| column.name.clone()).collect(),
            column_types: selected.iter().map(|column| column.inferred_type).collect(),
            row_count: rows.len(),
            has_more: offset + (rows.len() as u64) < total_rows,
            rows,
            row_start,
            total_rows,
        })
    }

    /// Run a validated read-only query and return one window of its result.
    pub fn query(&self, request: &QueryRequest) -> Result<QueryResponse, TabularError> {
        let window_rows = positive_int(request.window_rows, "window_rows", self.config.chunk_rows)?;
        let window_offset = non_negative_int(request.window_offset, "window_offset", 0)?;
        let query = validate_query(request.query.as_deref())?;
        let cache = self.ensure_cache(&request.source)?;

        let connection = self.open_cache(&cache)?;
        let started = Instant::now();
        let window = Window {
            offset: window_offset,
            rows: window_rows,
        };
        let result = self.supervise_read(&connection, || {
            execute_window(&connection, &query, window)
        })?;
        let query_elapsed_ms = started.elapsed().as_millis() as u64;

        tracing::debug!(
            workspace = %cache.source.workspace,
            path = %cache.source.rel_path,
            rows = result.rows.len(),
            total = result.total_row_count,
            elapsed_ms = query_elapsed_ms,
            "tabular.query_completed"
        );

        Ok(QueryResponse {
            row_count: result.rows.len(),
            has_more: window_offset + (result.rows.len() as u64) < result.total_row_count,
            columns: result.columns,
            column_types: result.column_types,
            rows: result.rows,
            total_row_count: result.total_row_count,
            window_rows,
            window_offset,
            query_elapsed_ms,
        })
    }

    /// Write a query result (the whole table by default) to a draft file.
    pub fn export(&self, request: &ExportRequest) -> Result<ExportResponse, TabularError> {
        let sandbox = self.store.sandbox();
        let target = sandbox.resolve_for_write(
            &request.source.workspace_id,
            request.target_root.as_deref(),
            &request.target_path,
        )?;
        let format = ExportFormat::resolve(request.format.as_deref(), &target.rel_path)?;
        let (sql, warnings) = export_query(request.query.as_deref())?;
        let sheet = sanitize_sheet_name(request.sheet.as_deref());
        let cache = self.ensure_cache(&request.source)?;

        let connection = self.open_cache(&cache)?;
        let summary = self
            .supervisor
            .run(&*connection.interrupt_handle(), || match format {
                ExportFormat::Csv => export_csv(&connection, &sql, &target.path),
                ExportFormat::Xlsx => export_xlsx(&connection, &sql, &target.path, &sheet),
            })
            .map_err(|failure| {
                failure.into_error(TabularError::WriteFailed, |error: ExportError| {
                    error.into_tabular("export failed")
                })
            })?;
        drop(connection);

        if format == ExportFormat::Csv && target.root == DEFAULT_ROOT {
            self.store.invalidate(&target.workspace, &target.rel_path);
        }

        tracing::info!(
            workspace = %target.workspace,
            target = %target.rel_path,
            format = format.as_str(),
            rows = summary.row_count,
            "tabular.export_completed"
        );

        Ok(ExportResponse {
            target_path: target.rel_path,
            format: format.as_str().to_string(),
            sheet: (format == ExportFormat::Xlsx).then_some(sheet),
            row_count: summary.row_count,
            column_count: summary.column_count,
            warnings,
        })
    }

    /// Place a query result into a sheet of an existing (or new) workbook.
    pub fn update_from_export(
        &self,
        request: &UpdateFromExportRequest,
    ) -> Result<UpdateFromExportResponse, TabularError> {
        let target = self.store.sandbox().resolve_for_write(
            &request.source.workspace_id,
            request.target_root.as_deref(),
            &request.target_path,
        )?;
        if !target.rel_path.to_ascii_lowercase().ends_with(".xlsx") {
            return Err(TabularError::validation(
                "target_path extension must be .xlsx",
            ));
        }
        let raw_sheet = request
            .sheet
            .as_deref()
            .map(str::trim)
            .filter(|sheet| !sheet.is_empty())
            .ok_or_else(|| TabularError::validation("missing sheet"))?;
        let sheet_name = sanitize_sheet_name(Some(raw_sheet));
        let mode = PlacementMode::parse(request.mode.as_deref().unwrap_or_default())?;
        let start_cell = request
            .start_cell
            .as_deref()
            .map(str::trim)
            .filter(|cell| !cell.is_empty())
            .unwrap_or("A1");
        let include_header = request.include_header.unwrap_or(true);
        let create_workbook = request.create_workbook_if_missing.unwrap_or(true);
        let create_sheet = request.create_sheet_if_missing.unwrap_or(true);
        let clear_target_range = request.clear_target_range.unwrap_or(false);
        if clear_target_range && mode != PlacementMode::WriteRange {
            return Err(TabularError::validation(
                "clear_target_range is only supported for write_range mode",
            ));
        }
        if mode == PlacementMode::WriteRange {
            parse_cell_ref(start_cell)?;
        }
        let (sql, mut warnings) = export_query(request.query.as_deref())?;
        let cache = self.ensure_cache(&request.source)?;

        let connection = self.open_cache(&cache)?;
        let data = self
            .supervisor
            .run(&*connection.interrupt_handle(), || collect_rows(&connection, &sql))
            .map_err(|failure| {
                failure.into_error(TabularError::ReadFailed, |error: ExportError| {
                    TabularError::read(format!("query failed: {error}"))
                })
            })?;
        drop(connection);

        let mut workbook = if target.path.is_file() {
            WorkbookModel::read(&target.path)
                .map_err(|error| TabularError::read(format!("failed to read xlsx: {error}")))?
        } else if create_workbook {
            WorkbookModel::new()
        } else {
            return Err(TabularError::validation("target workbook not found"));
        };

        if workbook.sheet(&sheet_name).is_none() {
            if !create_sheet {
                return Err(TabularError::validation(format!(
                    "sheet not found: {sheet_name}"
                )));
            }
            workbook.add_or_adopt_sheet(&sheet_name);
        }
        let sheet = workbook
            .sheet_mut(&sheet_name)
            .ok_or_else(|| TabularError::write(format!("failed to write xlsx: missing sheet {sheet_name}")))?;
        let sheet_name = sheet.name.clone();

        let outcome = place_rows(
            sheet,
            Placement {
                mode,
                start_cell,
                include_header,
                clear_target_range,
            },
            &data,
        )?;
        warnings.extend(outcome.warnings);
        write_workbook(&workbook, &target.path)
            .map_err(|error| error.into_tabular("failed to write xlsx"))?;

        tracing::info!(
            workspace = %target.workspace,
            target = %target.rel_path,
            sheet = %sheet_name,
            mode = mode.as_str(),
            range = %outcome.written_range,
            "tabular.workbook_updated"
        );

        Ok(UpdateFromExportResponse {
            target_path: target.rel_path,
            sheet: sheet_name,
            mode,
            row_count: data.rows.len() as u64,
            column_count: data.columns.len(),
            written_range: outcome.written_range,
            warnings,
        })
    }

    fn open_cache(&self, cache: &EnsuredCache) -> Result<Connection, TabularError> {
        open_connection(&cache.paths.db_path, AccessMode::ReadOnly, self.guardrails)
            .map_err(|error| TabularError::read(format!("failed to open cache: {error}")))
    }

    /// Run an engine read under the deadline; failures become read errors.
    fn supervise_read<T>(
        &self,
        connection: &Connection,
        operation: impl FnOnce() -> Result<T, ::duckdb::Error>,
    ) -> Result<T, TabularError> {
        self.supervisor
            .run(&*connection.interrupt_handle(), operation)
            .map_err(|failure| {
                failure.into_error(TabularError::ReadFailed, |error| {
                    TabularError::read(format!("query failed: {error}"))
                })
            })
    }
}

impl Default for Tabular {
    fn default() -> Self {
        Self::new(TabularConfig::default())
    }
}
