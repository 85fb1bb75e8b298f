//! Verification of a live tree against a manifest.
//!
//! Recomputes the tree with the manifest's own exclude list (a caller can
//! never widen or narrow it) and diffs the result. Findings are structured;
//! the legacy `modified:`/`deleted:`/`added:` line format is produced only
//! by their `Display` implementations at the rendering boundary.

use crate::cache::MetadataCache;
use crate::cancel::CancelToken;
use crate::hasher::{Calculator, HashError};
use crate::manifest::{FileRecord, Manifest, ManifestError};
use crate::walker;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    #[error("Manifest error: {0}")]
    Manifest(#[from] ManifestError),
    #[error("Hash error: {0}")]
    Hash(#[from] HashError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    File,
    Symlink,
}

impl FileKind {
    fn of(record: &FileRecord) -> Self {
        if record.is_symlink {
            FileKind::Symlink
        } else {
            FileKind::File
        }
    }
}

impl fmt::Display for FileKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileKind::File => f.write_str("file"),
            FileKind::Symlink => f.write_str("symlink"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModifiedReason {
    /// The entry changed between regular file and symlink. Dominates the
    /// other reasons because it exposes symlink spoofing.
    Type { from: FileKind, to: FileKind },
    Hash,
    Size { old: u64, new: u64 },
}

/// One element of a verification report.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Finding {
    Modified { path: String, reason: ModifiedReason },
    Deleted { path: String },
    Added { path: String },
}

impl Finding {
    pub fn path(&self) -> &str {
        match self {
            Finding::Modified { path, .. } => path,
            Finding::Deleted { path } => path,
            Finding::Added { path } => path,
        }
    }
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Finding::Modified { path, reason } => match reason {
                ModifiedReason::Type { from, to } => {
                    write!(f, "modified: {path} (type {from}\u{2192}{to})")
                }
                ModifiedReason::Hash => write!(f, "modified: {path} (hash)"),
                ModifiedReason::Size { old, new } => {
                    write!(f, "modified: {path} (size {old}\u{2192}{new})")
                }
            },
            Finding::Deleted { path } => write!(f, "deleted: {path}"),
            Finding::Added { path } => write!(f, "added: {path}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyOutcome {
    /// Empty when the tree is intact.
    pub findings: Vec<Finding>,
    /// Number of manifest entries checked.
    pub total_files: usize,
}

impl VerifyOutcome {
    pub fn is_clean(&self) -> bool {
        self.findings.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct VerifyOptions {
    /// Worker pool width; 0 means one per logical CPU.
    pub workers: usize,
    /// Aggregate bytes/sec across workers; 0 disables throttling.
    pub rate_limit: u64,
    pub use_cache: bool,
    /// Cache file directory; `None` means the system temp directory.
    pub cache_dir: Option<PathBuf>,
    pub verify_probability: f64,
    pub base_path: String,
    pub app_name: String,
}

impl Default for VerifyOptions {
    fn default() -> Self {
        Self {
            workers: 0,
            rate_limit: 0,
            use_cache: false,
            cache_dir: None,
            verify_probability: 0.1,
            base_path: "development".to_string(),
            app_name: String::new(),
        }
    }
}

/// Checks `target` against `manifest` and reports every difference.
///
/// The manifest's exclude list is the only one honored. When the cache is
/// enabled and verification succeeds, cache entries are refreshed for every
/// regular file in the manifest and the cache is persisted; cache problems
/// are logged, never fatal.
pub fn verify_tree(
    manifest: &Manifest,
    target: &Path,
    options: &VerifyOptions,
    cancel: &CancelToken,
) -> Result<VerifyOutcome, VerifyError> {
    let resolved = walker::resolve_root(target).map_err(HashError::from)?;

    let mut calculator = Calculator::new(options.workers);
    if options.rate_limit > 0 {
        calculator = calculator.with_rate_limit(options.rate_limit);
    }

    let cache = if options.use_cache {
        let dir = options
            .cache_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir);
        let cache = Arc::new(MetadataCache::new(
            &dir,
            &options.base_path,
            &options.app_name,
        ));

        if let Err(e) = cache.load() {
            warn!("Failed to load cache: {e}");
        }
        cache.validate(manifest.generated_time()?);

        calculator = calculator
            .with_cache(Arc::clone(&cache))
            .with_verify_probability(options.verify_probability)
            .with_reference_hashes(manifest.reference_hashes());

        Some(cache)
    } else {
        None
    };

    let current = calculator.scan_tree(&resolved, &manifest.excludes, cancel)?;
    let findings = diff(manifest, &current);

    if findings.is_empty() {
        if let Some(cache) = &cache {
            refresh_cache(cache, &resolved, manifest);
        }
    }

    Ok(VerifyOutcome {
        findings,
        total_files: manifest.file_count,
    })
}

/// Compares manifest records with the recomputed tree.
///
/// Per path, a type change wins over a hash mismatch, and a hash mismatch
/// wins over a size mismatch; each path yields at most one finding. Size is
/// compared for symlinks too, to catch inode-level manipulation that keeps
/// the link descriptor intact.
fn diff(manifest: &Manifest, current: &[FileRecord]) -> Vec<Finding> {
    let current_map: HashMap<&str, &FileRecord> =
        current.iter().map(|r| (r.path.as_str(), r)).collect();

    let mut findings = Vec::new();

    for expected in &manifest.files {
        let Some(actual) = current_map.get(expected.path.as_str()) else {
            findings.push(Finding::Deleted {
                path: expected.path.clone(),
            });
            continue;
        };

        if expected.is_symlink != actual.is_symlink {
            findings.push(Finding::Modified {
                path: expected.path.clone(),
                reason: ModifiedReason::Type {
                    from: FileKind::of(expected),
                    to: FileKind::of(actual),
                },
            });
            continue;
        }

        if expected.hash != actual.hash {
            findings.push(Finding::Modified {
                path: expected.path.clone(),
                reason: ModifiedReason::Hash,
            });
            continue;
        }

        if expected.size != actual.size {
            findings.push(Finding::Modified {
                path: expected.path.clone(),
                reason: ModifiedReason::Size {
                    old: expected.size,
                    new: actual.size,
                },
            });
        }
    }

    let known: HashMap<&str, ()> = manifest.files.iter().map(|r| (r.path.as_str(), ())).collect();
    for record in current {
        if !known.contains_key(record.path.as_str()) {
            findings.push(Finding::Added {
                path: record.path.clone(),
            });
        }
    }

    findings
}

/// Refreshes cache entries for every regular file and persists the cache.
/// Only called after a clean verification.
fn refresh_cache(cache: &MetadataCache, root: &Path, manifest: &Manifest) {
    for record in &manifest.files {
        if record.is_symlink {
            continue;
        }
        let abs = root.join(&record.path);
        if let Err(e) = cache.update(&abs) {
            warn!("Failed to update cache for {}: {e}", record.path);
        }
    }

    if let Err(e) = cache.save() {
        warn!("Failed to save cache: {e}");
    } else {
        let stats = cache.stats();
        info!(
            "Cache saved ({} hits, {} misses this run)",
            stats.hits, stats.misses
        );
    }
}
