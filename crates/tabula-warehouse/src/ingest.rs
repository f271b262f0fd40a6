//! CSV ingestion into a cache table.
//!
//! Sources are read in fixed-size blocks: once to check for UTF-8, and once
//! more to transcode legacy encodings into a UTF-8 staging copy. The load
//! itself is strict, and a load that disagrees with the file's own record
//! count or width fails instead of caching a partial table.

use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;

use ::duckdb::types::Value as DuckValue;
use ::duckdb::Connection;
use chardetng::EncodingDetector;
use encoding_rs::{DecoderResult, Encoding, UTF_8};
use tempfile::NamedTempFile;
use thiserror::Error;

use crate::engine::{quote_literal, TABLE_NAME};
use crate::error::TabularError;
use crate::schema::{inferred_type_for, ColumnSchema};

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";
const DEFAULT_DELIMITER: &str = ",";
const DEFAULT_QUOTE: &str = "\"";
const DECODE_BLOCK_BYTES: usize = 1024 * 1024;
/// Bytes fed to the statistical detector.
const DETECT_SAMPLE_BYTES: usize = 1024 * 1024;

/// Text encoding chosen for a source file.
#[derive(Debug, Clone, PartialEq)]
pub struct DetectedEncoding {
    /// Lower-case label, `utf-8` / `utf-8-sig` for Unicode sources.
    pub label: String,
    /// Detector confidence in `[0, 1]`.
    pub confidence: f64,
}

/// A source ready to load: the file itself, or a UTF-8 staging copy of it.
#[derive(Debug)]
pub struct PreparedSource {
    pub encoding: DetectedEncoding,
    staged: Option<NamedTempFile>,
}

impl PreparedSource {
    /// Path the engine should read; the staging copy is removed on drop.
    pub fn load_path<'a>(&'a self, original: &'a Path) -> &'a Path {
        self.staged
            .as_ref()
            .map_or(original, |staged| staged.path())
    }

    /// Remove the staging copy and keep the detection result.
    pub fn finish(self) -> DetectedEncoding {
        self.encoding
    }
}

/// CSV dialect reported by the engine sniffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dialect {
    pub delimiter: String,
    pub quote_char: String,
    pub has_header: bool,
}

impl Default for Dialect {
    fn default() -> Self {
        Self {
            delimiter: DEFAULT_DELIMITER.to_string(),
            quote_char: DEFAULT_QUOTE.to_string(),
            has_header: true,
        }
    }
}

/// Table statistics recorded right after a load.
#[derive(Debug, Clone)]
pub struct LoadedTable {
    pub row_count: u64,
    pub columns: Vec<ColumnSchema>,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error(transparent)]
    Engine(#[from] ::duckdb::Error),
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error("expected {expected} {what}, loaded {loaded}")]
    Mismatch {
        what: &'static str,
        expected: u64,
        loaded: u64,
    },
}

/// Pick an encoding for `source` and stage a UTF-8 copy when it needs one.
///
/// Strict UTF-8 (with or without a byte-order mark) wins outright. Anything
/// else is guessed from a bounded sample and must then decode without errors.
pub fn prepare_source(source: &Path, staging_dir: &Path) -> Result<PreparedSource, TabularError> {
    let io_failed = |error: io::Error| TabularError::read(format!("failed to load csv: {error}"));

    let mut sample = Vec::new();
    File::open(source)
        .map_err(io_failed)?
        .take(DETECT_SAMPLE_BYTES as u64)
        .read_to_end(&mut sample)
        .map_err(io_failed)?;

    if let Decoded::Clean { .. } = decode_stream(source, UTF_8, &mut io::sink()).map_err(io_failed)? {
        let label = if sample.starts_with(UTF8_BOM) {
            "utf-8-sig"
        } else {
            "utf-8"
        };
        return Ok(PreparedSource {
            encoding: DetectedEncoding {
                label: label.to_string(),
                confidence: 1.0,
            },
            staged: None,
        });
    }

    let mut detector = EncodingDetector::new();
    detector.feed(&sample, sample.len() < DETECT_SAMPLE_BYTES);
    let encoding = detector.guess(None, false);
    drop(sample);

    let mut staged = tempfile::Builder::new()
        .prefix("staging-")
        .suffix(".csv")
        .tempfile_in(staging_dir)
        .map_err(io_failed)?;
    let plausibility = match decode_stream(source, encoding, &mut staged).map_err(io_failed)? {
        Decoded::Clean { plausibility } => plausibility,
        Decoded::Malformed => return Err(TabularError::read("encoding detection failed")),
    };
    staged.flush().map_err(io_failed)?;

    Ok(PreparedSource {
        encoding: DetectedEncoding {
            label: encoding.name().to_ascii_lowercase(),
            confidence: normalize_confidence(plausibility),
        },
        staged: Some(staged),
    })
}

/// Force a detector score into `[0, 1]`; percentages are scaled down first.
pub fn normalize_confidence(value: f64) -> f64 {
    if !value.is_finite() {
        return 0.0;
    }
    let value = if value > 1.0 { value / 100.0 } else { value };
    value.clamp(0.0, 1.0)
}

enum Decoded {
    /// Share of decoded characters that look like ordinary text.
    Clean { plausibility: f64 },
    Malformed,
}

/// Decode `source` block by block, writing UTF-8 to `out`.
fn decode_stream(
    source: &Path,
    encoding: &'static Encoding,
    out: &mut dyn Write,
) -> io::Result<Decoded> {
    let mut file = File::open(source)?;
    let mut decoder = encoding.new_decoder_without_bom_handling();
    let mut block = vec![0_u8; DECODE_BLOCK_BYTES];
    let mut text = String::with_capacity(DECODE_BLOCK_BYTES * 3 + 16);
    let (mut plausible, mut total) = (0_u64, 0_u64);

    loop {
        let read = file.read(&mut block)?;
        let last = read == 0;
        let mut input = &block[..read];
        loop {
            let (result, consumed) =
                decoder.decode_to_string_without_replacement(input, &mut text, last);
            input = &input[consumed..];
            for ch in text.chars() {
                total += 1;
                if !ch.is_control() || matches!(ch, '\t' | '\r' | '\n') {
                    plausible += 1;
                }
            }
            out.write_all(text.as_bytes())?;
            text.clear();
            match result {
                DecoderResult::InputEmpty => break,
                DecoderResult::OutputFull => {}
                DecoderResult::Malformed(_, _) => return Ok(Decoded::Malformed),
            }
        }
        if last {
            break;
        }
    }

    let plausibility = if total == 0 {
        1.0
    } else {
        plausible as f64 / total as f64
    };
    Ok(Decoded::Clean { plausibility })
}

/// Sniff delimiter, quote, and header presence; defaults on any failure.
pub fn sniff_dialect(connection: &Connection, source: &Path) -> Dialect {
    match try_sniff(connection, source) {
        Ok(Some(dialect)) => dialect,
        Ok(None) => Dialect::default(),
        Err(error) => {
            tracing::debug!(error = %error, "tabular.sniff_failed");
            Dialect::default()
        }
    }
}

fn try_sniff(connection: &Connection, source: &Path) -> Result<Option<Dialect>, ::duckdb::Error> {
    let sql = format!(
        "SELECT * FROM sniff_csv({}, sample_size=-1)",
        quote_literal(&source.to_string_lossy())
    );
    let mut statement = connection.prepare(&sql)?;
    let mut rows = statement.query([])?;
    let names: Vec<String> = rows
        .as_ref()
        .map(|statement| statement.column_names())
        .unwrap_or_default();
    let Some(row) = rows.next()? else {
        return Ok(None);
    };

    let position = |key: &str| names.iter().position(|name| normalize_key(name) == key);
    let text_at = |index: Option<usize>| -> Result<Option<String>, ::duckdb::Error> {
        let Some(index) = index else {
            return Ok(None);
        };
        Ok(match row.get::<_, DuckValue>(index)? {
            DuckValue::Text(text) => text.chars().next().filter(|ch| *ch != '\0').map(String::from),
            _ => None,
        })
    };

    let delimiter = text_at(position("delimiter"))?.unwrap_or_else(|| DEFAULT_DELIMITER.into());
    let quote_char = text_at(position("quote"))?.unwrap_or_else(|| DEFAULT_QUOTE.into());
    let header_index = position("hasheader").or_else(|| position("header"));
    let has_header = match header_index {
        Some(index) => match row.get::<_, DuckValue>(index)? {
            DuckValue::Boolean(value) => value,
            _ => true,
        },
        None => true,
    };

    Ok(Some(Dialect {
        delimiter,
        quote_char,
        has_header,
    }))
}

fn normalize_key(key: &str) -> String {
    key.chars()
        .filter(|ch| ch.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Load `source` into a fresh `data` table, failing on any malformed row.
pub fn load_table(
    connection: &Connection,
    source: &Path,
    dialect: &Dialect,
) -> Result<LoadedTable, LoadError> {
    let shape = record_shape(source, dialect)?;

    connection.execute_batch(&format!("DROP TABLE IF EXISTS {TABLE_NAME}"))?;
    connection.execute_batch(&format!(
        "CREATE TABLE {TABLE_NAME} AS SELECT * FROM read_csv({}, sample_size=-1, \
         ignore_errors=false, strict_mode=true, null_padding=false, skip=0, \
         all_varchar=false, delim={}, quote={}, header={})",
        quote_literal(&source.to_string_lossy()),
        quote_literal(&dialect.delimiter),
        quote_literal(&dialect.quote_char),
        dialect.has_header,
    ))?;

    let row_count: i64 =
        connection.query_row(&format!("SELECT COUNT(*) FROM {TABLE_NAME}"), [], |row| {
            row.get(0)
        })?;
    let loaded = LoadedTable {
        row_count: row_count.max(0) as u64,
        columns: collect_schema(connection)?,
    };

    if let Some(shape) = shape {
        let expected_rows = shape.records - u64::from(dialect.has_header);
        if loaded.row_count != expected_rows {
            return Err(LoadError::Mismatch {
                what: "rows",
                expected: expected_rows,
                loaded: loaded.row_count,
            });
        }
        if loaded.columns.len() != shape.width {
            return Err(LoadError::Mismatch {
                what: "columns",
                expected: shape.width as u64,
                loaded: loaded.columns.len() as u64,
            });
        }
    }
    Ok(loaded)
}

struct RecordShape {
    records: u64,
    width: usize,
}

/// Count records and check they all have the same number of fields.
fn record_shape(source: &Path, dialect: &Dialect) -> Result<Option<RecordShape>, csv::Error> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(false)
        .delimiter(single_byte(&dialect.delimiter, b','))
        .quote(single_byte(&dialect.quote_char, b'"'))
        .from_path(source)?;

    let mut record = csv::ByteRecord::new();
    let mut shape: Option<RecordShape> = None;
    while reader.read_byte_record(&mut record)? {
        match shape.as_mut() {
            Some(shape) => shape.records += 1,
            None => {
                shape = Some(RecordShape {
                    records: 1,
                    width: record.len(),
                })
            }
        }
    }
    Ok(shape)
}

fn single_byte(text: &str, fallback: u8) -> u8 {
    match text.as_bytes() {
        [byte] => *byte,
        _ => fallback,
    }
}

/// Read the column layout of the `data` table.
pub fn collect_schema(connection: &Connection) -> Result<Vec<ColumnSchema>, ::duckdb::Error> {
    let mut statement = connection.prepare(&format!("PRAGMA table_info('{TABLE_NAME}')"))?;
    let rows = statement.query_map([], |row| {
        Ok((row.get::<_, String>(1)?, row.get::<_, Option<String>>(2)?))
    })?;

    let mut columns = Vec::new();
    for (index, row) in rows.enumerate() {
        let (name, physical_type) = row?;
        let physical_type = physical_type.unwrap_or_default();
        columns.push(ColumnSchema {
            inferred_type: inferred_type_for(&physical_type),
            name,
            index,
            physical_type,
        });
    }
    Ok(columns)
}
