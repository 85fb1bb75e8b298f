//! Out-of-band manifest storage.
//!
//! Manifests are meant to live somewhere the application host cannot
//! rewrite. [`ManifestStore`] is the seam a remote adapter (S3-style object
//! storage with write-once-at-deploy semantics) plugs into; [`DirStore`]
//! keeps the same key layout on a local directory for development and
//! tests.

use crate::manifest::{Manifest, ManifestError};
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(std::io::Error),
    #[error("Manifest error: {0}")]
    Manifest(#[from] ManifestError),
}

pub trait ManifestStore {
    /// Stores the manifest for `(base, app)`, returning the key written.
    fn put(&self, base: &str, app: &str, manifest: &Manifest) -> Result<String, StorageError>;

    /// Fetches the manifest for `(base, app)`.
    fn get(&self, base: &str, app: &str) -> Result<Manifest, StorageError>;
}

/// Fixed key layout shared by every store implementation. Frequent
/// deployers overwrite a single object and rely on the backing store's
/// versioning for history.
fn manifest_key(base: &str, app: &str) -> String {
    format!("{base}/{app}/manifest.json")
}

/// Local-directory store mirroring the remote key layout.
#[derive(Debug)]
pub struct DirStore {
    root: PathBuf,
}

impl DirStore {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
        }
    }

    fn key_path(&self, base: &str, app: &str) -> PathBuf {
        self.root.join(base).join(app).join("manifest.json")
    }
}

impl ManifestStore for DirStore {
    fn put(&self, base: &str, app: &str, manifest: &Manifest) -> Result<String, StorageError> {
        let path = self.key_path(base, app);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(StorageError::Io)?;
        }

        manifest.save(&path)?;
        Ok(manifest_key(base, app))
    }

    fn get(&self, base: &str, app: &str) -> Result<Manifest, StorageError> {
        Ok(Manifest::load(&self.key_path(base, app))?)
    }
}
