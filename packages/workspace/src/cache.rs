use nacl_parser::ParseResult;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Hash used to key cache records and detect stale entries
pub fn content_hash(content: &str) -> String {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[derive(Debug, Serialize, Deserialize)]
struct CacheRecord {
    /// Hash of the source content the result was parsed from
    hash: String,
    result: ParseResult,
}

/// On-disk parse cache: one serde_json record per source file, keyed by
/// file path and content hash. Any read or decode failure falls back to
/// re-parsing; the cache is never authoritative.
#[derive(Debug, Clone)]
pub struct ParseCache {
    dir: PathBuf,
}

impl ParseCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn record_path(&self, filename: &str) -> PathBuf {
        // flatten the file path into a single cache file name
        self.dir.join(format!("{}.json", content_hash(filename)))
    }

    /// Load the cached result for `filename` if it matches `hash`
    pub fn get(&self, filename: &str, hash: &str) -> Option<ParseResult> {
        let path = self.record_path(filename);
        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(_) => return None,
        };
        let record: CacheRecord = match serde_json::from_str(&raw) {
            Ok(record) => record,
            Err(error) => {
                tracing::warn!(file = filename, %error, "corrupt parse cache record, re-parsing");
                return None;
            }
        };
        if record.hash != hash {
            tracing::debug!(file = filename, "parse cache miss (stale hash)");
            return None;
        }
        tracing::debug!(file = filename, "parse cache hit");
        Some(record.result)
    }

    pub fn put(&self, filename: &str, hash: &str, result: &ParseResult) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.dir)?;
        let record = CacheRecord {
            hash: hash.to_string(),
            result: result.clone(),
        };
        let raw = serde_json::to_string(&record)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
        std::fs::write(self.record_path(filename), raw)
    }

    pub fn remove(&self, filename: &str) {
        let _ = std::fs::remove_file(self.record_path(filename));
    }
}
