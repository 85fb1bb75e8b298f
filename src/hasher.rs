//! Parallel fingerprinting of work items.
//!
//! A bounded pool of worker threads turns walker output into file records.
//! Each worker owns its SHA-256 state and a 1 MiB read buffer; the only
//! shared pieces are the job/result channels, the optional rate limiter,
//! and the optional metadata cache.

use crate::cache::MetadataCache;
use crate::cancel::CancelToken;
use crate::limiter::RateLimiter;
use crate::manifest::FileRecord;
use crate::walker::{self, WalkError, WorkItem, WorkKind};
use crossbeam_channel::bounded;
use rand::Rng;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

const BUFFER_SIZE: usize = 1024 * 1024;
const MAX_QUEUE_DEPTH: usize = 100;
const THROTTLE_CHUNK: usize = 64 * 1024;

/// Prefix framing a symlink target into its canonical byte sequence.
/// Part of the manifest hash contract; changing it invalidates every
/// existing manifest.
pub const LINK_DESCRIPTOR_PREFIX: &str = "symlink:";

#[derive(Debug, thiserror::Error)]
pub enum HashError {
    #[error("Walk error: {0}")]
    Walk(#[from] WalkError),
    #[error("Failed to stat {path}: {source}")]
    Stat {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to read symlink {path}: {source}")]
    Readlink {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Permission denied: {0}")]
    PermissionDenied(PathBuf),
    #[error("Operation cancelled")]
    Cancelled,
}

/// Computes file records for a directory tree.
///
/// Configuration is builder-style; a configured calculator is immutable and
/// may be shared across runs.
pub struct Calculator {
    workers: usize,
    limiter: Option<Arc<RateLimiter>>,
    cache: Option<Arc<MetadataCache>>,
    verify_probability: f64,
    reference_hashes: Option<HashMap<String, String>>,
}

impl Calculator {
    /// Creates a calculator with `workers` threads; zero means one per
    /// logical CPU.
    pub fn new(workers: usize) -> Self {
        let workers = if workers == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        } else {
            workers
        };

        Self {
            workers,
            limiter: None,
            cache: None,
            verify_probability: 0.0,
            reference_hashes: None,
        }
    }

    /// Caps aggregate read throughput at `bytes_per_sec` across all workers.
    pub fn with_rate_limit(mut self, bytes_per_sec: u64) -> Self {
        if bytes_per_sec > 0 {
            self.limiter = Some(Arc::new(RateLimiter::new(bytes_per_sec)));
        }
        self
    }

    /// Attaches a metadata cache enabling the hash-skipping fast path.
    pub fn with_cache(mut self, cache: Arc<MetadataCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Probability of re-hashing a file despite a cache hit. Clamped to
    /// `[0, 1]`; 0 always trusts the cache, 1 always re-hashes.
    pub fn with_verify_probability(mut self, p: f64) -> Self {
        self.verify_probability = p.clamp(0.0, 1.0);
        self
    }

    /// Supplies the manifest's path-to-hash map, emitted verbatim on a
    /// trusted cache hit.
    pub fn with_reference_hashes(mut self, hashes: HashMap<String, String>) -> Self {
        self.reference_hashes = Some(hashes);
        self
    }

    /// Walks `root` (honoring `excludes`) and fingerprints every work item.
    ///
    /// The returned records are sorted ascending by relative path, so two
    /// runs over an identical tree produce identical output. The first
    /// walk or hash error aborts the run; cancellation yields
    /// [`HashError::Cancelled`] and no records.
    pub fn scan_tree(
        &self,
        root: &Path,
        excludes: &[String],
        cancel: &CancelToken,
    ) -> Result<Vec<FileRecord>, HashError> {
        let (_, items) = walker::collect_work_items(root, excludes)?;
        let mut records = self.hash_items(items, cancel)?;
        records.sort_by(|a, b| a.path.cmp(&b.path));
        info!("Fingerprinted {} files", records.len());
        Ok(records)
    }

    fn hash_items(
        &self,
        items: Vec<WorkItem>,
        cancel: &CancelToken,
    ) -> Result<Vec<FileRecord>, HashError> {
        let depth = (self.workers * 2).min(MAX_QUEUE_DEPTH).max(1);
        let (job_tx, job_rx) = bounded::<WorkItem>(depth);
        let (result_tx, result_rx) = bounded::<Result<FileRecord, HashError>>(depth);

        // Trips on the first error so remaining workers stop pulling jobs.
        let abort = CancelToken::new();

        let expected = items.len();
        let mut records = Vec::with_capacity(expected);
        let mut first_error: Option<HashError> = None;

        std::thread::scope(|scope| {
            {
                let abort = abort.clone();
                let cancel = cancel.clone();
                scope.spawn(move || {
                    for item in items {
                        if cancel.is_cancelled() || abort.is_cancelled() {
                            break;
                        }
                        if job_tx.send(item).is_err() {
                            break;
                        }
                    }
                });
            }

            for _ in 0..self.workers {
                let job_rx = job_rx.clone();
                let result_tx = result_tx.clone();
                let abort = abort.clone();
                let cancel = cancel.clone();
                scope.spawn(move || {
                    let mut hasher = Sha256::new();
                    let mut buffer = vec![0u8; BUFFER_SIZE];

                    while let Ok(item) = job_rx.recv() {
                        if cancel.is_cancelled() || abort.is_cancelled() {
                            break;
                        }
                        let outcome = self.process_item(&item, &mut hasher, &mut buffer, &cancel);
                        if result_tx.send(outcome).is_err() {
                            break;
                        }
                    }
                });
            }
            drop(job_rx);
            drop(result_tx);

            for outcome in result_rx.iter() {
                match outcome {
                    Ok(record) => records.push(record),
                    Err(e) => {
                        if first_error.is_none() {
                            first_error = Some(e);
                            abort.cancel();
                        }
                    }
                }
            }
        });

        if let Some(e) = first_error {
            return Err(e);
        }
        if cancel.is_cancelled() {
            return Err(HashError::Cancelled);
        }

        debug!("Hashed {} of {} work items", records.len(), expected);
        Ok(records)
    }

    fn process_item(
        &self,
        item: &WorkItem,
        hasher: &mut Sha256,
        buffer: &mut [u8],
        cancel: &CancelToken,
    ) -> Result<FileRecord, HashError> {
        let metadata = std::fs::symlink_metadata(&item.abs_path).map_err(|e| {
            if e.kind() == ErrorKind::PermissionDenied {
                HashError::PermissionDenied(item.abs_path.clone())
            } else {
                HashError::Stat {
                    path: item.abs_path.clone(),
                    source: e,
                }
            }
        })?;

        match item.kind {
            WorkKind::Symlink => {
                let target = std::fs::read_link(&item.abs_path).map_err(|e| HashError::Readlink {
                    path: item.abs_path.clone(),
                    source: e,
                })?;
                let target = target
                    .into_os_string()
                    .into_string()
                    .map_err(|_| HashError::Readlink {
                        path: item.abs_path.clone(),
                        source: std::io::Error::new(
                            ErrorKind::InvalidData,
                            "link target is not valid UTF-8",
                        ),
                    })?;

                hasher.update(LINK_DESCRIPTOR_PREFIX.as_bytes());
                hasher.update(target.as_bytes());
                let hash = format!("{:x}", hasher.finalize_reset());

                Ok(FileRecord {
                    path: item.rel_path.clone(),
                    hash,
                    size: metadata.len(),
                    is_symlink: true,
                    link_target: target,
                })
            }
            WorkKind::File => {
                if let Some(hash) = self.cached_hash(item) {
                    return Ok(FileRecord {
                        path: item.rel_path.clone(),
                        hash,
                        size: metadata.len(),
                        is_symlink: false,
                        link_target: String::new(),
                    });
                }

                let hash = self.hash_file(&item.abs_path, hasher, buffer, cancel)?;

                Ok(FileRecord {
                    path: item.rel_path.clone(),
                    hash,
                    size: metadata.len(),
                    is_symlink: false,
                    link_target: String::new(),
                })
            }
        }
    }

    /// Returns the manifest hash for a trusted cache hit, or `None` when the
    /// file must be read.
    ///
    /// Trusting requires a cache, a reference hash for this path, matching
    /// metadata, and losing the probabilistic re-hash roll.
    fn cached_hash(&self, item: &WorkItem) -> Option<String> {
        let cache = self.cache.as_ref()?;
        let references = self.reference_hashes.as_ref()?;

        if !cache.check(&item.abs_path) {
            return None;
        }

        if self.verify_probability > 0.0 && rand::rng().random::<f64>() <= self.verify_probability {
            debug!("Re-hashing {} despite cache hit", item.rel_path);
            return None;
        }

        references.get(&item.rel_path).cloned()
    }

    fn hash_file(
        &self,
        path: &Path,
        hasher: &mut Sha256,
        buffer: &mut [u8],
        cancel: &CancelToken,
    ) -> Result<String, HashError> {
        let mut file = File::open(path).map_err(|e| {
            if e.kind() == ErrorKind::PermissionDenied {
                HashError::PermissionDenied(path.to_path_buf())
            } else {
                HashError::Read {
                    path: path.to_path_buf(),
                    source: e,
                }
            }
        })?;

        let chunk_len = match &self.limiter {
            Some(limiter) => buffer
                .len()
                .min(limiter.burst() as usize)
                .min(THROTTLE_CHUNK),
            None => buffer.len(),
        };

        loop {
            if cancel.is_cancelled() {
                return Err(HashError::Cancelled);
            }

            if let Some(limiter) = &self.limiter {
                limiter
                    .acquire(chunk_len as u64, cancel)
                    .map_err(|_| HashError::Cancelled)?;
            }

            let n = file.read(&mut buffer[..chunk_len]).map_err(|e| HashError::Read {
                path: path.to_path_buf(),
                source: e,
            })?;
            if n == 0 {
                break;
            }
            hasher.update(&buffer[..n]);
        }

        Ok(format!("{:x}", hasher.finalize_reset()))
    }
}
