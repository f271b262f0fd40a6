//! On-disk cache of ingested CSV sources.
//!
//! Each source maps to `<meta>/<key>.duckdb` plus `<key>.meta.json`, where the
//! key is derived from the lower-cased relative path. A cache entry is usable
//! only while its stored signature matches the source file; any mismatch
//! deletes the artifacts and rebuilds them from scratch.

use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tempfile::NamedTempFile;

use crate::engine::{open_connection, AccessMode, Guardrails};
use crate::error::TabularError;
use crate::ingest::{load_table, prepare_source, sniff_dialect, LoadError};
use crate::sandbox::{ResolvedPath, Sandbox};
use crate::schema::ColumnSchema;
use crate::signature::{cache_key, SourceSignature};

/// Bumped whenever the persisted layout changes; older entries are rebuilt.
pub const CACHE_SCHEMA_VERSION: u32 = 1;
pub const SOURCE_FORMAT: &str = "csv";

/// Where a persisted entry came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRecord {
    pub root: String,
    pub rel_path: String,
    #[serde(flatten)]
    pub signature: SourceSignature,
}

/// Persisted metadata describing one ingested source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub schema_version: u32,
    pub source: SourceRecord,
    pub format: String,
    pub delimiter: String,
    pub quote_char: String,
    pub has_header: bool,
    pub encoding_detected: String,
    pub encoding_confidence: f64,
    pub row_count: u64,
    pub column_count: usize,
    pub columns: Vec<ColumnSchema>,
}

impl CacheEntry {
    pub fn column(&self, name: &str) -> Option<&ColumnSchema> {
        self.columns.iter().find(|column| column.name == name)
    }
}

/// Physical locations of a cache entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachePaths {
    pub db_path: PathBuf,
    pub metadata_path: PathBuf,
}

impl CachePaths {
    fn wal_path(&self) -> PathBuf {
        with_suffix(&self.db_path, ".wal")
    }

    fn build_path(&self) -> PathBuf {
        with_suffix(&self.db_path, ".building")
    }
}

/// A validated cache entry, ready for read-only queries.
#[derive(Debug, Clone)]
pub struct EnsuredCache {
    pub entry: CacheEntry,
    pub paths: CachePaths,
    pub source: ResolvedPath,
    /// Whether this call had to re-ingest the source.
    pub rebuilt: bool,
}

/// Maps workspace sources to cache artifacts and keeps them fresh.
#[derive(Debug, Clone)]
pub struct CacheStore {
    sandbox: Sandbox,
    guardrails: Guardrails,
}

impl CacheStore {
    pub fn new(sandbox: Sandbox, guardrails: Guardrails) -> Self {
        Self {
            sandbox,
            guardrails,
        }
    }

    pub fn sandbox(&self) -> &Sandbox {
        &self.sandbox
    }

    /// Cache artifact locations for a workspace-relative path.
    pub fn paths(&self, workspace: &str, rel_path: &str) -> Result<CachePaths, TabularError> {
        let dir = self.sandbox.tabular_meta_dir(workspace)?;
        let key = cache_key(rel_path);
        Ok(CachePaths {
            db_path: dir.join(format!("{key}.duckdb")),
            metadata_path: dir.join(format!("{key}.meta.json")),
        })
    }

    /// Return a fresh cache entry for the source, rebuilding it if stale.
    pub fn ensure(
        &self,
        workspace: &str,
        root: Option<&str>,
        rel_path: &str,
    ) -> Result<EnsuredCache, TabularError> {
        let source = self.resolve_source(workspace, root, rel_path)?;
        let signature = SourceSignature::compute(&source.path).map_err(|error| {
            TabularError::read(format!("failed to read {}: {error}", source.rel_path))
        })?;
        let paths = self.paths(&source.workspace, &source.rel_path)?;

        if let Some(entry) = load_metadata(&paths.metadata_path) {
            if is_fresh(&entry, &source, &signature, &paths) {
                tracing::debug!(
                    workspace = %source.workspace,
                    path = %source.rel_path,
                    "tabular.cache_hit"
                );
                return Ok(EnsuredCache {
                    entry,
                    paths,
                    source,
                    rebuilt: false,
                });
            }
        }

        let entry = self.rebuild(&source, &signature, &paths)?;
        Ok(EnsuredCache {
            entry,
            paths,
            source,
            rebuilt: true,
        })
    }

    /// Drop any cache artifacts for `rel_path`; non-CSV paths are ignored.
    pub fn invalidate(&self, workspace: &str, rel_path: &str) {
        let rel_path = rel_path.trim();
        if !has_csv_extension(rel_path) {
            return;
        }
        match self.paths(workspace, rel_path) {
            Ok(paths) => {
                remove_artifacts(&paths);
                tracing::debug!(workspace, path = rel_path, "tabular.cache_invalidated");
            }
            Err(error) => {
                tracing::debug!(workspace, path = rel_path, error = %error, "tabular.cache_invalidate_skipped");
            }
        }
    }

    fn resolve_source(
        &self,
        workspace: &str,
        root: Option<&str>,
        rel_path: &str,
    ) -> Result<ResolvedPath, TabularError> {
        let source = self.sandbox.resolve(workspace, root, rel_path)?;
        if !has_csv_extension(&source.rel_path) {
            return Err(TabularError::validation(
                "tabular tools only support .csv files",
            ));
        }
        if !source.path.is_file() {
            return Err(TabularError::read(format!(
                "file not found: {}",
                source.rel_path
            )));
        }
        Ok(source)
    }

    fn rebuild(
        &self,
        source: &ResolvedPath,
        signature: &SourceSignature,
        paths: &CachePaths,
    ) -> Result<CacheEntry, TabularError> {
        let started = Instant::now();
        let meta_dir = paths
            .db_path
            .parent()
            .ok_or_else(|| TabularError::validation("invalid tabular cache path"))?;
        fs::create_dir_all(meta_dir)
            .map_err(|error| TabularError::read(format!("failed to load csv: {error}")))?;
        remove_artifacts(paths);

        let prepared = prepare_source(&source.path, meta_dir)?;
        let load_path = prepared.load_path(&source.path);

        let build_path = paths.build_path();
        remove_file_if_exists(&build_path);
        remove_file_if_exists(&with_suffix(&build_path, ".wal"));

        let built = (|| {
            let connection = open_connection(&build_path, AccessMode::ReadWrite, self.guardrails)?;
            let dialect = sniff_dialect(&connection, load_path);
            let loaded = load_table(&connection, load_path, &dialect)?;
            connection.execute_batch("CHECKPOINT")?;
            Ok::<_, LoadError>((dialect, loaded))
        })();
        let encoding = prepared.finish();

        let (dialect, loaded) = built.map_err(|error| {
            remove_file_if_exists(&build_path);
            remove_file_if_exists(&with_suffix(&build_path, ".wal"));
            TabularError::read(format!("failed to load csv: {error}"))
        })?;
        fs::rename(&build_path, &paths.db_path)
            .map_err(|error| TabularError::read(format!("failed to load csv: {error}")))?;

        let entry = CacheEntry {
            schema_version: CACHE_SCHEMA_VERSION,
            source: SourceRecord {
                root: source.root.clone(),
                rel_path: source.rel_path.clone(),
                signature: signature.clone(),
            },
            format: SOURCE_FORMAT.to_string(),
            delimiter: dialect.delimiter,
            quote_char: dialect.quote_char,
            has_header: dialect.has_header,
            encoding_detected: encoding.label,
            encoding_confidence: encoding.confidence,
            row_count: loaded.row_count,
            column_count: loaded.columns.len(),
            columns: loaded.columns,
        };
        write_metadata(&paths.metadata_path, &entry)
            .map_err(|error| TabularError::read(format!("failed to load csv: {error}")))?;

        tracing::info!(
            workspace = %source.workspace,
            path = %source.rel_path,
            rows = entry.row_count,
            columns = entry.column_count,
            encoding = %entry.encoding_detected,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "tabular.cache_rebuilt"
        );
        Ok(entry)
    }
}

pub fn has_csv_extension(rel_path: &str) -> bool {
    rel_path.to_ascii_lowercase().ends_with(".csv")
}

fn is_fresh(
    entry: &CacheEntry,
    source: &ResolvedPath,
    signature: &SourceSignature,
    paths: &CachePaths,
) -> bool {
    entry.schema_version == CACHE_SCHEMA_VERSION
        && entry.source.rel_path == source.rel_path
        && entry.source.root == source.root
        && entry.source.signature == *signature
        && paths.db_path.is_file()
}

/// Missing or unreadable metadata reads as absent.
fn load_metadata(path: &Path) -> Option<CacheEntry> {
    let raw = fs::read(path).ok()?;
    serde_json::from_slice(&raw).ok()
}

/// Write metadata as key-sorted JSON through a temp file and rename.
fn write_metadata(path: &Path, entry: &CacheEntry) -> io::Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "metadata path has no parent"))?;
    let value = sorted_keys(serde_json::to_value(entry).map_err(io::Error::other)?);
    let mut file = NamedTempFile::new_in(dir)?;
    serde_json::to_writer(&mut file, &value).map_err(io::Error::other)?;
    file.flush()?;
    file.persist(path).map_err(|error| error.error)?;
    Ok(())
}

fn sorted_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted: BTreeMap<String, Value> = map
                .into_iter()
                .map(|(key, value)| (key, sorted_keys(value)))
                .collect();
            Value::Object(sorted.into_iter().collect())
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sorted_keys).collect()),
        other => other,
    }
}

fn remove_artifacts(paths: &CachePaths) {
    remove_file_if_exists(&paths.db_path);
    remove_file_if_exists(&paths.wal_path());
    remove_file_if_exists(&paths.metadata_path);
}

fn remove_file_if_exists(path: &Path) {
    if let Err(error) = fs::remove_file(path) {
        if error.kind() != io::ErrorKind::NotFound {
            tracing::debug!(path = %path.display(), error = %error, "tabular.artifact_remove_failed");
        }
    }
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut raw = path.as_os_str().to_os_string();
    raw.push(suffix);
    PathBuf::from(raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TabularConfig;
    use tempfile::tempdir;

    fn store(root: &Path) -> CacheStore {
        let config = TabularConfig::new(root);
        CacheStore::new(Sandbox::new(root), Guardrails::from(&config))
    }

    fn write_source(root: &Path, name: &str, body: &str) -> PathBuf {
        let dir = root.join("ws").join("draft");
        fs::create_dir_all(&dir).expect("mkdir");
        let path = dir.join(name);
        fs::write(&path, body).expect("write source");
        path
    }

    #[test]
    fn second_ensure_is_a_cache_hit() {
        let temp = tempdir().expect("tempdir");
        write_source(temp.path(), "a.csv", "id,name\n1,x\n2,y\n");
        let store = store(temp.path());

        let first = store.ensure("ws", None, "a.csv").expect("first");
        let metadata_before = fs::read(&first.paths.metadata_path).expect("metadata");
        let second = store.ensure("ws", None, "a.csv").expect("second");
        let metadata_after = fs::read(&second.paths.metadata_path).expect("metadata");

        assert!(first.rebuilt);
        assert!(!second.rebuilt);
        assert_eq!(metadata_before, metadata_after);
        assert_eq!(second.entry.row_count, 2);
        assert!(!with_suffix(&first.paths.db_path, ".building").exists());
    }

    #[test]
    fn metadata_json_has_sorted_keys() {
        let temp = tempdir().expect("tempdir");
        write_source(temp.path(), "a.csv", "id\n1\n");
        let ensured = store(temp.path()).ensure("ws", None, "a.csv").expect("ensure");

        let raw = fs::read_to_string(&ensured.paths.metadata_path).expect("metadata");
        let column_count = raw.find("\"column_count\"").expect("column_count");
        let columns = raw.find("\"columns\"").expect("columns");
        let version = raw.find("\"schema_version\"").expect("schema_version");
        assert!(column_count < columns && columns < version);
    }

    #[test]
    fn corrupt_metadata_forces_rebuild() {
        let temp = tempdir().expect("tempdir");
        write_source(temp.path(), "a.csv", "id\n1\n");
        let store = store(temp.path());
        let first = store.ensure("ws", None, "a.csv").expect("first");

        fs::write(&first.paths.metadata_path, "{\"columns\": 3}").expect("corrupt");
        let second = store.ensure("ws", None, "a.csv").expect("second");
        assert!(second.rebuilt);
    }

    #[test]
    fn missing_database_forces_rebuild() {
        let temp = tempdir().expect("tempdir");
        write_source(temp.path(), "a.csv", "id\n1\n");
        let store = store(temp.path());
        let first = store.ensure("ws", None, "a.csv").expect("first");

        fs::remove_file(&first.paths.db_path).expect("remove db");
        assert!(store.ensure("ws", None, "a.csv").expect("second").rebuilt);
    }

    #[test]
    fn rejects_non_csv_and_missing_sources() {
        let temp = tempdir().expect("tempdir");
        write_source(temp.path(), "a.txt", "id\n1\n");
        let store = store(temp.path());

        let error = store.ensure("ws", None, "a.txt").expect_err("txt");
        assert_eq!(error.message(), "tabular tools only support .csv files");

        let error = store.ensure("ws", None, "missing.csv").expect_err("missing");
        assert!(matches!(error, TabularError::ReadFailed(_)));
        assert_eq!(error.message(), "file not found: missing.csv");
    }

    #[test]
    fn invalidate_removes_artifacts() {
        let temp = tempdir().expect("tempdir");
        write_source(temp.path(), "a.csv", "id\n1\n");
        let store = store(temp.path());
        let ensured = store.ensure("ws", None, "a.csv").expect("ensure");

        store.invalidate("ws", "A.CSV");
        assert!(!ensured.paths.db_path.exists());
        assert!(!ensured.paths.metadata_path.exists());
    }

    #[test]
    fn non_utf8_source_is_transcoded_before_load() {
        let temp = tempdir().expect("tempdir");
        let dir = temp.path().join("ws").join("draft");
        fs::create_dir_all(&dir).expect("mkdir");
        fs::write(dir.join("latin.csv"), b"name,city\nJos\xE9,M\xE1laga\n").expect("write");

        let ensured = store(temp.path())
            .ensure("ws", None, "latin.csv")
            .expect("ensure");

        assert_eq!(ensured.entry.row_count, 1);
        assert_ne!(ensured.entry.encoding_detected, "utf-8");
        let meta_dir = ensured.paths.db_path.parent().expect("meta dir");
        let leftovers = fs::read_dir(meta_dir)
            .expect("read dir")
            .filter_map(Result::ok)
            .filter(|entry| entry.file_name().to_string_lossy().starts_with("staging-"))
            .count();
        assert_eq!(leftovers, 0);
    }
}
