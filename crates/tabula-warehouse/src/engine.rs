//! `DuckDB` connection management for cache files.
//!
//! Every connection opened here carries the worker's resource guardrails.
//! Read-only connections additionally disable external file access, so a
//! query that slips past the text validator still cannot read or write
//! anything besides the cache file itself.

use std::path::Path;

use ::duckdb::{Config, Connection};

use crate::config::TabularConfig;

/// Name of the single table held by every cache file.
pub const TABLE_NAME: &str = "data";

/// Access mode for database connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    /// Read-only access.
    ReadOnly,
    /// Read-write access.
    ReadWrite,
}

/// Resource limits applied to each connection before any query runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Guardrails {
    pub memory_limit_mb: u64,
    pub max_threads: u64,
    pub query_timeout_ms: u64,
}

impl From<&TabularConfig> for Guardrails {
    fn from(config: &TabularConfig) -> Self {
        Self {
            memory_limit_mb: config.memory_limit_mb.max(64),
            max_threads: config.max_threads.max(1),
            query_timeout_ms: config.query_timeout_ms.max(100),
        }
    }
}

/// Outcome of applying guardrails to a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GuardrailReport {
    pub memory_limit_applied: bool,
    pub threads_applied: bool,
    pub timeout_applied: bool,
}

/// Open a connection to a cache file.
///
/// # Errors
/// Returns an error if the database file cannot be opened.
pub fn open_connection(
    path: &Path,
    mode: AccessMode,
    guardrails: Guardrails,
) -> Result<Connection, ::duckdb::Error> {
    let connection = match mode {
        AccessMode::ReadOnly => {
            let config = Config::default()
                .access_mode(::duckdb::AccessMode::ReadOnly)?
                .enable_external_access(false)?;
            Connection::open_with_flags(path, config)?
        }
        AccessMode::ReadWrite => Connection::open(path)?,
    };
    if let Err(error) = connection.execute_batch("PRAGMA disable_progress_bar;") {
        tracing::debug!(error = %error, "tabular.progress_bar_disable_failed");
    }
    apply_guardrails(&connection, guardrails);
    Ok(connection)
}

/// Apply memory, thread, and timeout ceilings.
///
/// Each limit has several equivalent spellings across engine versions; the
/// first statement the engine accepts wins.
pub fn apply_guardrails(connection: &Connection, guardrails: Guardrails) -> GuardrailReport {
    let memory = format!("'{}MB'", guardrails.memory_limit_mb);
    let threads = guardrails.max_threads.to_string();
    let timeout = format!("'{}ms'", guardrails.query_timeout_ms);

    let report = GuardrailReport {
        memory_limit_applied: try_set_statement(
            connection,
            &[
                format!("SET memory_limit={memory}"),
                format!("PRAGMA memory_limit={memory}"),
            ],
        ),
        threads_applied: try_set_statement(
            connection,
            &[format!("SET threads={threads}"), format!("PRAGMA threads={threads}")],
        ),
        timeout_applied: try_set_statement(
            connection,
            &[
                format!("SET statement_timeout={timeout}"),
                format!("PRAGMA statement_timeout={timeout}"),
                format!("SET max_execution_time={timeout}"),
                format!("PRAGMA max_execution_time={timeout}"),
            ],
        ),
    };

    if !report.memory_limit_applied || !report.threads_applied {
        tracing::warn!(
            memory_limit_mb = guardrails.memory_limit_mb,
            max_threads = guardrails.max_threads,
            memory_limit_applied = report.memory_limit_applied,
            threads_applied = report.threads_applied,
            "tabular.resource_guardrail_unavailable"
        );
    }
    if !report.timeout_applied {
        tracing::warn!(
            timeout_ms = guardrails.query_timeout_ms,
            "tabular.timeout_guardrail_unavailable"
        );
    }

    report
}

fn try_set_statement(connection: &Connection, statements: &[String]) -> bool {
    statements
        .iter()
        .any(|statement| connection.execute_batch(statement).is_ok())
}

/// Quote an identifier for interpolation into SQL.
pub fn quote_ident(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

/// Quote a string literal for interpolation into SQL.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}
