//! On-disk layout of a vault root.

use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::fs::ensure_dir;

const SALT_FILE: &str = ".salt";
const VERIFIER_FILE: &str = ".verifier";
const SESSION_FILE: &str = ".session";
const DATABASE_FILE: &str = "vault.db";
const BLOBS_DIR: &str = "blobs";

/// Paths of every file a vault owns, relative to one root directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultPaths {
    root: PathBuf,
}

impl VaultPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn salt(&self) -> PathBuf {
        self.root.join(SALT_FILE)
    }

    pub fn verifier(&self) -> PathBuf {
        self.root.join(VERIFIER_FILE)
    }

    pub fn session(&self) -> PathBuf {
        self.root.join(SESSION_FILE)
    }

    pub fn database(&self) -> PathBuf {
        self.root.join(DATABASE_FILE)
    }

    pub fn blobs(&self) -> PathBuf {
        self.root.join(BLOBS_DIR)
    }

    /// A vault is initialized once its passphrase verifier exists.
    pub fn is_initialized(&self) -> bool {
        self.verifier().is_file()
    }

    /// Create the root and blob directories.
    pub fn ensure_layout(&self) -> Result<()> {
        ensure_dir(&self.root)?;
        ensure_dir(&self.blobs())?;
        Ok(())
    }
}
