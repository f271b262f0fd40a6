//! Source file fingerprints used for staleness detection.

use std::fs::{self, File};
use std::io::{self, Read};
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

const HASH_BLOCK_BYTES: usize = 1024 * 1024;

/// Size, modification time, and content hash of a source file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceSignature {
    pub size_bytes: u64,
    pub mtime_ns: i64,
    pub content_hash: String,
}

impl SourceSignature {
    /// Compute the signature by streaming the file through SHA-256 in fixed-size blocks.
    pub fn compute(path: &Path) -> Result<Self, io::Error> {
        let metadata = fs::metadata(path)?;
        let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        let mtime_ns = modified
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos()
            .min(i64::MAX as u128) as i64;

        let mut file = File::open(path)?;
        let mut hasher = Sha256::new();
        let mut block = vec![0_u8; HASH_BLOCK_BYTES];
        loop {
            let read = file.read(&mut block)?;
            if read == 0 {
                break;
            }
            hasher.update(&block[..read]);
        }

        Ok(Self {
            size_bytes: metadata.len(),
            mtime_ns,
            content_hash: hex::encode(hasher.finalize()),
        })
    }
}

/// Deterministic cache key for a workspace-relative path.
pub fn cache_key(rel_path: &str) -> String {
    let normalized = rel_path.trim().to_lowercase();
    hex::encode(Sha256::digest(normalized.as_bytes()))
}
