// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! On-disk layout under the configured storage path.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

/// Default storage root inside the enclave.
/// This MUST be a protected mount (Gramine `type = "encrypted"` or Occlum's
/// integrity-protected FS).
pub const DATA_ROOT: &str = "/data/tee";

/// Storage path utilities.
#[derive(Debug, Clone)]
pub struct StoragePaths {
    root: PathBuf,
}

impl Default for StoragePaths {
    fn default() -> Self {
        Self::new(DATA_ROOT)
    }
}

impl StoragePaths {
    /// Create a new StoragePaths with a custom root (useful for testing).
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    // ========== Key Material ==========

    /// Directory holding the encryption key file.
    pub fn keys_dir(&self) -> PathBuf {
        self.root.join("keys")
    }

    /// Versioned key file of the encryption transform.
    pub fn key_file(&self) -> PathBuf {
        self.keys_dir().join("storage.keys.json")
    }

    // ========== Provider Layouts ==========

    /// Append-only log of the file provider.
    pub fn log_file(&self) -> PathBuf {
        self.root.join("data.log")
    }

    /// Directory of per-key files for the sealed-FS provider.
    pub fn data_dir(&self) -> PathBuf {
        self.root.join("data")
    }

    /// Metadata sibling directory for the sealed-FS provider.
    pub fn metadata_dir(&self) -> PathBuf {
        self.root.join(".metadata")
    }

    /// Value file for `key`. Names are hashed so arbitrary keys are safe.
    pub fn data_file(&self, key: &str) -> PathBuf {
        self.data_dir().join(format!("{}.dat", key_digest(key)))
    }

    /// Metadata file for `key`.
    pub fn metadata_file(&self, key: &str) -> PathBuf {
        self.metadata_dir().join(format!("{}.meta", key_digest(key)))
    }

    /// redb database file.
    pub fn redb_file(&self) -> PathBuf {
        self.root.join("store.redb")
    }

    /// sled database directory.
    pub fn sled_dir(&self) -> PathBuf {
        self.root.join("sled")
    }
}

/// Hex SHA-256 of a logical key, used as a file stem.
pub fn key_digest(key: &str) -> String {
    hex::encode(Sha256::digest(key.as_bytes()))
}
