//! Metadata cache backing the verification fast path.
//!
//! The cache remembers (size, mtime, ctime) per absolute path from the last
//! successful verification. A later run can skip reading a file whose
//! metadata is unchanged; ctime is the load-bearing signal because it is
//! updated by any inode change and cannot be set from unprivileged
//! user space. The persisted document carries its own SHA-256 so tampering
//! with the cache file is detected on load.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

const CACHE_VERSION: &str = "2.0";

// ctime comparison window. ext4-class filesystems occasionally round the
// stored ctime to microseconds, so Linux tolerates up to 1 us of drift;
// everywhere else nanosecond equality is required.
#[cfg(target_os = "linux")]
const CTIME_TOLERANCE_NANOS: i64 = 1_000;
#[cfg(not(target_os = "linux"))]
const CTIME_TOLERANCE_NANOS: i64 = 0;

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("IO error: {0}")]
    Io(std::io::Error),
    #[error("Failed to stat {path}: {source}")]
    Stat {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Cache corrupt: {0}")]
    Corrupt(String),
    #[error("Cache serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub path: String,
    pub size: u64,
    pub mod_time: DateTime<Utc>,
    pub ctime: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheDocument {
    version: String,
    created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    manifest_gen_time: Option<DateTime<Utc>>,
    cache_hash: String,
    files: BTreeMap<String, CacheEntry>,
}

impl CacheDocument {
    fn fresh() -> Self {
        Self {
            version: CACHE_VERSION.to_string(),
            created_at: Utc::now(),
            manifest_gen_time: None,
            cache_hash: String::new(),
            files: BTreeMap::new(),
        }
    }

    /// SHA-256 over the compact serialization with `cache_hash` cleared.
    fn integrity_hash(&self) -> Result<String, CacheError> {
        let mut canonical = self.clone();
        canonical.cache_hash = String::new();
        let bytes = serde_json::to_vec(&canonical)?;

        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        Ok(format!("{:x}", hasher.finalize()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
}

/// Persistent metadata cache for one (base, app) pair.
///
/// `check` takes a read lock and may run from many workers at once;
/// `update`, `clear`, and `save` take the write lock.
#[derive(Debug)]
pub struct MetadataCache {
    path: PathBuf,
    doc: RwLock<CacheDocument>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl MetadataCache {
    pub fn new(cache_dir: &Path, base: &str, app: &str) -> Self {
        let path = cache_dir.join(format!(".kekkai-cache-{base}-{app}.json"));
        Self {
            path,
            doc: RwLock::new(CacheDocument::fresh()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Reads the cache file, starting fresh when it is missing.
    ///
    /// A file that fails to parse or whose `cache_hash` does not recompute
    /// is replaced with an empty document; the error is returned so the
    /// caller can log it, but the cache stays usable either way.
    pub fn load(&self) -> Result<(), CacheError> {
        let data = match std::fs::read(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                *self.doc.write() = CacheDocument::fresh();
                return Ok(());
            }
            Err(e) => return Err(CacheError::Io(e)),
        };

        let parsed: CacheDocument = match serde_json::from_slice(&data) {
            Ok(parsed) => parsed,
            Err(e) => {
                *self.doc.write() = CacheDocument::fresh();
                return Err(CacheError::Corrupt(format!("failed to parse cache: {e}")));
            }
        };

        if !parsed.cache_hash.is_empty() {
            let actual = parsed.integrity_hash()?;
            if actual != parsed.cache_hash {
                *self.doc.write() = CacheDocument::fresh();
                return Err(CacheError::Corrupt(
                    "cache hash mismatch, starting fresh".to_string(),
                ));
            }
        }

        *self.doc.write() = parsed;
        Ok(())
    }

    /// Records the manifest generation time and drops every entry if the
    /// cache predates the manifest.
    pub fn validate(&self, manifest_time: DateTime<Utc>) {
        let mut doc = self.doc.write();
        doc.manifest_gen_time = Some(manifest_time);

        if doc.created_at < manifest_time {
            info!("Cache is older than manifest, clearing");
            doc.files.clear();
            doc.created_at = Utc::now();
        }
    }

    /// Returns true if `path` has a cache entry whose size, mtime, and
    /// ctime all match the current lstat.
    ///
    /// Missing entries and stat failures count as misses. Symlinks are
    /// never cached, so callers must not ask about them.
    pub fn check(&self, path: &Path) -> bool {
        let key = path.to_string_lossy();

        let matched = self.check_inner(path, key.as_ref());
        if matched {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
        matched
    }

    fn check_inner(&self, path: &Path, key: &str) -> bool {
        let doc = self.doc.read();

        let Some(entry) = doc.files.get(key) else {
            debug!("Cache miss for {key}: not cached");
            return false;
        };

        let Ok(metadata) = std::fs::symlink_metadata(path) else {
            debug!("Cache miss for {key}: stat failed");
            return false;
        };

        if metadata.len() != entry.size {
            debug!("Cache miss for {key}: size changed");
            return false;
        }

        let Ok(modified) = metadata.modified() else {
            return false;
        };
        if DateTime::<Utc>::from(modified) != entry.mod_time {
            debug!("Cache miss for {key}: mtime changed");
            return false;
        }

        if !ctime_matches(ctime_of(&metadata), entry.ctime) {
            debug!("Cache miss for {key}: ctime changed");
            return false;
        }

        true
    }

    /// Re-stats `path` and records its metadata.
    ///
    /// Only call this after the file's content has been proven to match the
    /// manifest in the current run.
    pub fn update(&self, path: &Path) -> Result<(), CacheError> {
        let metadata = std::fs::symlink_metadata(path).map_err(|e| CacheError::Stat {
            path: path.to_path_buf(),
            source: e,
        })?;
        let modified = metadata.modified().map_err(|e| CacheError::Stat {
            path: path.to_path_buf(),
            source: e,
        })?;

        let key = path.to_string_lossy().into_owned();
        let entry = CacheEntry {
            path: key.clone(),
            size: metadata.len(),
            mod_time: modified.into(),
            ctime: ctime_of(&metadata),
        };

        self.doc.write().files.insert(key, entry);
        Ok(())
    }

    /// Recomputes `cache_hash` and atomically rewrites the cache file via a
    /// sibling `.tmp` file.
    pub fn save(&self) -> Result<(), CacheError> {
        let mut doc = self.doc.write();
        doc.cache_hash = String::new();
        doc.cache_hash = doc.integrity_hash()?;

        let data = serde_json::to_vec_pretty(&*doc)?;
        drop(doc);

        let mut tmp_name = self.path.as_os_str().to_os_string();
        tmp_name.push(".tmp");
        let tmp_path = PathBuf::from(tmp_name);

        std::fs::write(&tmp_path, &data).map_err(CacheError::Io)?;
        if let Err(e) = std::fs::rename(&tmp_path, &self.path) {
            let _ = std::fs::remove_file(&tmp_path);
            return Err(CacheError::Io(e));
        }

        Ok(())
    }

    /// Drops every entry and resets the creation time.
    pub fn clear(&self) {
        let mut doc = self.doc.write();
        doc.files.clear();
        doc.created_at = Utc::now();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }

    #[cfg(test)]
    fn entry_count(&self) -> usize {
        self.doc.read().files.len()
    }
}

/// Inode change time of an lstat result.
#[cfg(unix)]
fn ctime_of(metadata: &std::fs::Metadata) -> DateTime<Utc> {
    use std::os::unix::fs::MetadataExt;
    DateTime::from_timestamp(metadata.ctime(), metadata.ctime_nsec() as u32).unwrap_or_default()
}

/// Platforms without a ctime fall back to mtime, which weakens but does not
/// break the check.
#[cfg(not(unix))]
fn ctime_of(metadata: &std::fs::Metadata) -> DateTime<Utc> {
    metadata
        .modified()
        .map(DateTime::from)
        .unwrap_or_default()
}

fn ctime_matches(current: DateTime<Utc>, cached: DateTime<Utc>) -> bool {
    let delta = (current - cached).num_nanoseconds().unwrap_or(i64::MAX);
    delta.abs() <= CTIME_TOLERANCE_NANOS
}
