//! Manifest model and persistence.
//!
//! A manifest is the release-time fingerprint of a deployed tree: one
//! record per regular file or symlink, plus the exclude patterns that were
//! active at generation. It is designed to live out-of-band (object storage
//! with write-once-at-deploy semantics), so this module never mutates an
//! existing manifest.

use crate::cancel::CancelToken;
use crate::hasher::{Calculator, HashError};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

const MANIFEST_VERSION: &str = "1.0";

#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("IO error: {0}")]
    Io(std::io::Error),
    #[error("Permission denied: {0}")]
    PermissionDenied(PathBuf),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Unsupported manifest version: {0}")]
    UnsupportedVersion(String),
    #[error("Manifest file_count is {declared} but {actual} files are listed")]
    CountMismatch { declared: usize, actual: usize },
    #[error("Invalid generated_at timestamp: {0}")]
    Timestamp(#[from] chrono::ParseError),
    #[error("Hash error: {0}")]
    Hash(#[from] HashError),
}

/// Fingerprint of one file or symlink inside the scanned tree.
///
/// For a regular file `hash` covers the file bytes; for a symlink it covers
/// the link descriptor (`symlink:` followed by the raw target), so a link
/// and a file with identical bytes still verify differently through the
/// `is_symlink` tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileRecord {
    pub path: String,
    pub hash: String,
    pub size: u64,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_symlink: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub link_target: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    pub version: String,
    pub generated_at: String,
    pub file_count: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub excludes: Vec<String>,
    pub files: Vec<FileRecord>,
}

/// Used to read the version before committing to the full schema, so a
/// future format produces a version error instead of a parse error.
#[derive(Debug, Deserialize)]
struct VersionOnly {
    version: String,
}

impl Manifest {
    /// Fingerprints `target` and assembles a manifest with the excludes
    /// frozen in.
    pub fn generate(
        calculator: &Calculator,
        target: &Path,
        excludes: &[String],
        cancel: &CancelToken,
    ) -> Result<Self, ManifestError> {
        let files = calculator.scan_tree(target, excludes, cancel)?;

        Ok(Manifest {
            version: MANIFEST_VERSION.to_string(),
            generated_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            file_count: files.len(),
            excludes: excludes.to_vec(),
            files,
        })
    }

    pub fn from_json(content: &str) -> Result<Self, ManifestError> {
        let version_only: VersionOnly = serde_json::from_str(content)?;
        if version_only.version != MANIFEST_VERSION {
            return Err(ManifestError::UnsupportedVersion(version_only.version));
        }

        let manifest: Manifest = serde_json::from_str(content)?;

        if manifest.file_count != manifest.files.len() {
            return Err(ManifestError::CountMismatch {
                declared: manifest.file_count,
                actual: manifest.files.len(),
            });
        }

        Ok(manifest)
    }

    pub fn to_json(&self) -> Result<String, ManifestError> {
        let mut out = serde_json::to_string_pretty(self)?;
        out.push('\n');
        Ok(out)
    }

    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::PermissionDenied {
                ManifestError::PermissionDenied(path.to_path_buf())
            } else {
                ManifestError::Io(e)
            }
        })?;

        Self::from_json(&content)
    }

    /// Saves the manifest atomically: temp file in the target directory,
    /// fsync, rename into place.
    pub fn save(&self, path: &Path) -> Result<(), ManifestError> {
        use std::io::Write;

        let content = self.to_json()?;
        let parent = path.parent().unwrap_or(Path::new("."));

        let mut temp_file = tempfile::NamedTempFile::new_in(parent).map_err(|e| {
            if e.kind() == std::io::ErrorKind::PermissionDenied {
                ManifestError::PermissionDenied(parent.to_path_buf())
            } else {
                ManifestError::Io(e)
            }
        })?;

        temp_file
            .write_all(content.as_bytes())
            .map_err(ManifestError::Io)?;
        temp_file.as_file().sync_all().map_err(ManifestError::Io)?;

        temp_file.persist(path).map_err(|e| {
            if e.error.kind() == std::io::ErrorKind::PermissionDenied {
                ManifestError::PermissionDenied(path.to_path_buf())
            } else {
                ManifestError::Io(e.error)
            }
        })?;

        Ok(())
    }

    /// Parses `generated_at` back into an instant, for cache validation.
    pub fn generated_time(&self) -> Result<DateTime<Utc>, ManifestError> {
        Ok(DateTime::parse_from_rfc3339(&self.generated_at)?.with_timezone(&Utc))
    }

    /// The path-to-hash map handed to the hasher as reference hashes.
    pub fn reference_hashes(&self) -> HashMap<String, String> {
        self.files
            .iter()
            .map(|f| (f.path.clone(), f.hash.clone()))
            .collect()
    }
}
