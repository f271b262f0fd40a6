//! Worker-level configuration for the tabular cache.
//!
//! Resource ceilings are process-wide settings. They are resolved once (from
//! the environment or explicit overrides) and handed to [`crate::Tabular`] at
//! construction rather than read from global state on every request.

use std::env;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_QUERY_TIMEOUT_MS: u64 = 5_000;
pub const DEFAULT_MEMORY_LIMIT_MB: u64 = 512;
pub const DEFAULT_MAX_THREADS: u64 = 2;
pub const DEFAULT_CHUNK_ROWS: u64 = 100;

const QUERY_TIMEOUT_RANGE: (u64, u64) = (100, 600_000);
const MEMORY_LIMIT_RANGE: (u64, u64) = (64, 65_536);
const MAX_THREADS_RANGE: (u64, u64) = (1, 64);

/// Configuration for the tabular cache and query engine.
#[derive(Debug, Clone)]
pub struct TabularConfig {
    /// Directory holding one sub-directory per workspace.
    pub workspaces_dir: PathBuf,
    /// Statement timeout enforced by the cancellation supervisor.
    pub query_timeout_ms: u64,
    /// Memory ceiling applied to every engine connection.
    pub memory_limit_mb: u64,
    /// Thread ceiling applied to every engine connection.
    pub max_threads: u64,
    /// Rows per chunk reported by `get_map` and the default page size.
    pub chunk_rows: u64,
}

impl Default for TabularConfig {
    fn default() -> Self {
        Self {
            workspaces_dir: resolve_workspaces_dir(),
            query_timeout_ms: DEFAULT_QUERY_TIMEOUT_MS,
            memory_limit_mb: DEFAULT_MEMORY_LIMIT_MB,
            max_threads: DEFAULT_MAX_THREADS,
            chunk_rows: DEFAULT_CHUNK_ROWS,
        }
    }
}

impl TabularConfig {
    /// Build a configuration rooted at `workspaces_dir` with default ceilings.
    pub fn new(workspaces_dir: impl Into<PathBuf>) -> Self {
        Self {
            workspaces_dir: workspaces_dir.into(),
            ..Self::default()
        }
    }

    /// Resolve configuration from `TABULA_*` environment variables.
    ///
    /// Values that fail to parse fall back to the default; values outside the
    /// supported range are clamped.
    pub fn from_env() -> Self {
        Self {
            workspaces_dir: resolve_workspaces_dir(),
            query_timeout_ms: env_clamped(
                "TABULA_QUERY_TIMEOUT_MS",
                DEFAULT_QUERY_TIMEOUT_MS,
                QUERY_TIMEOUT_RANGE,
            ),
            memory_limit_mb: env_clamped(
                "TABULA_MEMORY_LIMIT_MB",
                DEFAULT_MEMORY_LIMIT_MB,
                MEMORY_LIMIT_RANGE,
            ),
            max_threads: env_clamped("TABULA_MAX_THREADS", DEFAULT_MAX_THREADS, MAX_THREADS_RANGE),
            chunk_rows: DEFAULT_CHUNK_ROWS,
        }
    }

    /// Return a copy with every ceiling forced into its supported range.
    #[must_use]
    pub fn clamped(mut self) -> Self {
        self.query_timeout_ms = clamp(self.query_timeout_ms, QUERY_TIMEOUT_RANGE);
        self.memory_limit_mb = clamp(self.memory_limit_mb, MEMORY_LIMIT_RANGE);
        self.max_threads = clamp(self.max_threads, MAX_THREADS_RANGE);
        self.chunk_rows = self.chunk_rows.max(1);
        self
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_millis(self.query_timeout_ms.max(1))
    }
}

fn clamp(value: u64, (min, max): (u64, u64)) -> u64 {
    value.clamp(min, max)
}

fn env_clamped(key: &str, default: u64, range: (u64, u64)) -> u64 {
    parse_clamped(env::var(key).ok().as_deref(), default, range)
}

fn parse_clamped(raw: Option<&str>, default: u64, range: (u64, u64)) -> u64 {
    raw.and_then(|value| value.trim().parse::<i64>().ok())
        .map(|value| {
            if value < 0 {
                range.0
            } else {
                clamp(value as u64, range)
            }
        })
        .unwrap_or(default)
}

/// Resolve the workspaces directory from environment or default.
fn resolve_workspaces_dir() -> PathBuf {
    if let Some(path) = env::var_os("TABULA_WORKSPACES_DIR") {
        let path = PathBuf::from(path);
        if !path.as_os_str().is_empty() {
            return path;
        }
    }

    if let Some(home) = env::var_os("HOME") {
        return PathBuf::from(home).join(".tabula").join("workspaces");
    }

    PathBuf::from(".tabula").join("workspaces")
}
