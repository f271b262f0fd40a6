//! CLI argument definitions for tabula.
//!
//! Each subcommand maps onto one tabular operation and prints a JSON
//! envelope on stdout.
//!
//! # Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `map` | Dialect, encoding, schema, and chunk layout of a CSV source |
//! | `describe` | Per-column non-null counts and distinct estimates |
//! | `stats` | Per-column statistics by type family |
//! | `rows` | Literal row window in file order |
//! | `query` | Guarded read-only SQL over the `data` table |
//! | `export` | Write a query result to a draft CSV or `.xlsx` file |
//! | `update` | Place a query result into a sheet of a draft workbook |
//! | `invalidate` | Drop the cache of a source |
//!
//! # Examples
//!
//! ```bash
//! tabula --workspaces-dir /srv/ws map -w ws1 sales.csv
//! tabula query -w ws1 sales.csv "SELECT region, SUM(amount) FROM data GROUP BY 1 ORDER BY 1"
//! tabula update -w ws1 sales.csv --target report.xlsx --sheet Summary --mode replace_sheet
//! ```

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use tabula_warehouse::{parse_bool_flag, SourceRequest, TabularConfig};

/// Cached, guarded queries over CSV files in sandboxed workspaces.
#[derive(Debug, Parser)]
#[command(name = "tabula", author, version, about)]
pub struct Cli {
    /// Directory holding one sub-directory per workspace.
    ///
    /// Defaults to `TABULA_WORKSPACES_DIR`, then `$HOME/.tabula/workspaces`.
    #[arg(long, global = true)]
    pub workspaces_dir: Option<PathBuf>,

    /// Statement timeout in milliseconds.
    #[arg(long, global = true)]
    pub query_timeout_ms: Option<u64>,

    /// Memory ceiling per engine connection, in megabytes.
    #[arg(long, global = true)]
    pub memory_limit_mb: Option<u64>,

    /// Thread ceiling per engine connection.
    #[arg(long, global = true)]
    pub max_threads: Option<u64>,

    /// Pretty-print JSON output with indentation.
    #[arg(long, global = true, default_value_t = false)]
    pub pretty: bool,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    /// Environment configuration with command-line overrides applied.
    pub fn config(&self) -> TabularConfig {
        let mut config = TabularConfig::from_env();
        if let Some(dir) = &self.workspaces_dir {
            config.workspaces_dir = dir.clone();
        }
        if let Some(timeout) = self.query_timeout_ms {
            config.query_timeout_ms = timeout;
        }
        if let Some(memory) = self.memory_limit_mb {
            config.memory_limit_mb = memory;
        }
        if let Some(threads) = self.max_threads {
            config.max_threads = threads;
        }
        config.clamped()
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Show dialect, encoding, columns, and chunk ranges of a source.
    Map(SourceArgs),

    /// Show non-null counts, distinct estimates, and nullability per column.
    Describe(SourceArgs),

    /// Compute per-column statistics.
    ///
    /// Numeric columns report min/max/mean/sum/stddev, dates min/max,
    /// booleans true/false counts, text length bounds and top values.
    Stats(StatsArgs),

    /// Read rows in file order.
    Rows(RowsArgs),

    /// Run a read-only SQL query against the `data` table.
    ///
    ///   tabula query -w ws1 sales.csv "SELECT * FROM data WHERE amount > 10"
    Query(QueryArgs),

    /// Export a query result (the whole table by default) to a draft file.
    Export(ExportArgs),

    /// Write a query result into a sheet of a draft `.xlsx` workbook.
    Update(UpdateArgs),

    /// Drop cached artifacts of a source; the next read re-ingests it.
    Invalidate(SourceArgs),
}

/// Identifies a CSV source.
#[derive(Debug, Clone, Args)]
pub struct SourceArgs {
    /// Workspace identifier.
    #[arg(long, short = 'w')]
    pub workspace: String,

    /// Logical root inside the workspace.
    #[arg(long, default_value = "draft")]
    pub root: String,

    /// Source path relative to the root.
    pub path: String,
}

impl SourceArgs {
    pub fn to_request(&self) -> SourceRequest {
        SourceRequest {
            workspace_id: self.workspace.clone(),
            root: Some(self.root.clone()),
            path: self.path.clone(),
        }
    }
}

#[derive(Debug, Args)]
pub struct StatsArgs {
    #[command(flatten)]
    pub source: SourceArgs,

    /// Restrict to these columns (comma separated).
    #[arg(long, value_delimiter = ',')]
    pub columns: Option<Vec<String>>,
}

#[derive(Debug, Args)]
pub struct RowsArgs {
    #[command(flatten)]
    pub source: SourceArgs,

    /// First row to return, 1-based.
    #[arg(long, allow_negative_numbers = true)]
    pub row_start: Option<i64>,

    /// Number of rows to return.
    #[arg(long, allow_negative_numbers = true)]
    pub row_count: Option<i64>,

    /// Restrict to these columns (comma separated).
    #[arg(long, value_delimiter = ',')]
    pub columns: Option<Vec<String>>,
}

#[derive(Debug, Args)]
pub struct QueryArgs {
    #[command(flatten)]
    pub source: SourceArgs,

    /// SQL text; the source is available as table `data`.
    pub sql: String,

    /// Rows to skip before the window.
    #[arg(long, allow_negative_numbers = true)]
    pub window_offset: Option<i64>,

    /// Rows in the window.
    #[arg(long, allow_negative_numbers = true)]
    pub window_rows: Option<i64>,
}

#[derive(Debug, Args)]
pub struct ExportArgs {
    #[command(flatten)]
    pub source: SourceArgs,

    /// Target path relative to the target root.
    #[arg(long)]
    pub target: String,

    /// Target root; must be a draft area.
    #[arg(long)]
    pub target_root: Option<String>,

    /// `csv` or `xlsx`; inferred from the target extension when omitted.
    #[arg(long)]
    pub format: Option<String>,

    /// Sheet name for `.xlsx` targets.
    #[arg(long)]
    pub sheet: Option<String>,

    /// Query to export instead of the whole table.
    #[arg(long)]
    pub query: Option<String>,
}

#[derive(Debug, Args)]
pub struct UpdateArgs {
    #[command(flatten)]
    pub source: SourceArgs,

    /// Target workbook path relative to the target root.
    #[arg(long)]
    pub target: String,

    /// Target root; must be a draft area.
    #[arg(long)]
    pub target_root: Option<String>,

    /// Sheet to write into.
    #[arg(long)]
    pub sheet: String,

    /// `replace_sheet`, `append_rows`, or `write_range`.
    #[arg(long)]
    pub mode: String,

    /// Anchor cell for `write_range`, e.g. `B2`.
    #[arg(long)]
    pub start_cell: Option<String>,

    /// Query to place instead of the whole table.
    #[arg(long)]
    pub query: Option<String>,

    #[arg(long, value_parser = parse_flag)]
    pub include_header: Option<bool>,

    #[arg(long, value_parser = parse_flag)]
    pub create_workbook_if_missing: Option<bool>,

    #[arg(long, value_parser = parse_flag)]
    pub create_sheet_if_missing: Option<bool>,

    #[arg(long, value_parser = parse_flag)]
    pub clear_target_range: Option<bool>,
}

fn parse_flag(raw: &str) -> Result<bool, String> {
    parse_bool_flag(raw).ok_or_else(|| format!("invalid boolean: {raw}"))
}
