// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Capability interface implemented by every storage backend.
//!
//! Providers move opaque bytes. Compression, encryption, chunking and
//! metadata encoding all happen in the [`super::PersistentStorageManager`]
//! before anything reaches a provider.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::providers::{
    LogFileProvider, MemoryProvider, RedbProvider, SealedFsProvider, SledProvider,
};
use super::StorageResult;

/// Backends selectable through configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// Append-only log file with an in-memory index.
    #[default]
    File,
    /// One file per key inside an Occlum/Gramine protected mount.
    Occlum,
    /// Embedded transactional key-value store (redb).
    Redb,
    /// Log-structured embedded store (sled).
    Sled,
    /// Volatile, process-local.
    Memory,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::File => "file",
            ProviderKind::Occlum => "occlum",
            ProviderKind::Redb => "redb",
            ProviderKind::Sled => "sled",
            ProviderKind::Memory => "memory",
        }
    }

    /// Construct an uninitialized provider rooted at `root`.
    pub fn build(self, root: &Path) -> Box<dyn StorageProvider> {
        match self {
            ProviderKind::File => Box::new(LogFileProvider::new(root)),
            ProviderKind::Occlum => Box::new(SealedFsProvider::new(root)),
            ProviderKind::Redb => Box::new(RedbProvider::new(root)),
            ProviderKind::Sled => Box::new(SledProvider::new(root)),
            ProviderKind::Memory => Box::new(MemoryProvider::new()),
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "file" => Ok(ProviderKind::File),
            "occlum" | "occlum_file" | "sealed_fs" => Ok(ProviderKind::Occlum),
            "redb" | "rocksdb" => Ok(ProviderKind::Redb),
            "sled" | "leveldb" => Ok(ProviderKind::Sled),
            "memory" => Ok(ProviderKind::Memory),
            other => Err(format!("unknown storage provider: {other}")),
        }
    }
}

/// One mutation inside a provider batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    /// Store `value` and, when present, its encoded metadata.
    Put {
        key: String,
        value: Vec<u8>,
        metadata: Option<Vec<u8>>,
    },
    /// Remove the value and its metadata.
    Delete { key: String },
}

impl BatchOp {
    pub fn key(&self) -> &str {
        match self {
            BatchOp::Put { key, .. } | BatchOp::Delete { key } => key,
        }
    }
}

/// Storage backend capability set.
///
/// Every method except [`StorageProvider::initialize`] returns
/// `StorageError::NotInitialized` until initialization succeeded.
pub trait StorageProvider: Send {
    fn kind(&self) -> ProviderKind;

    /// Open or create the backing store. Idempotent.
    fn initialize(&mut self, create_if_missing: bool) -> StorageResult<()>;

    fn is_initialized(&self) -> bool;

    fn read(&self, key: &str) -> StorageResult<Option<Vec<u8>>>;

    fn write(&mut self, key: &str, value: &[u8]) -> StorageResult<()>;

    /// Remove a key and its metadata. Returns whether anything was removed.
    fn delete(&mut self, key: &str) -> StorageResult<bool>;

    fn exists(&self, key: &str) -> StorageResult<bool>;

    /// Every stored key, internal chunk keys included, sorted.
    fn keys(&self) -> StorageResult<Vec<String>>;

    fn read_metadata(&self, key: &str) -> StorageResult<Option<Vec<u8>>>;

    fn write_metadata(&mut self, key: &str, metadata: &[u8]) -> StorageResult<()>;

    /// Make every acknowledged write durable.
    fn flush(&mut self) -> StorageResult<()>;

    /// Reclaim space held by overwritten or deleted entries.
    fn compact(&mut self) -> StorageResult<()> {
        Ok(())
    }

    /// Apply a group of mutations.
    ///
    /// The default applies them in order; backends with native transactions
    /// override this to make the group atomic.
    fn apply_batch(&mut self, ops: &[BatchOp]) -> StorageResult<()> {
        for op in ops {
            match op {
                BatchOp::Put {
                    key,
                    value,
                    metadata,
                } => {
                    self.write(key, value)?;
                    if let Some(metadata) = metadata {
                        self.write_metadata(key, metadata)?;
                    }
                }
                BatchOp::Delete { key } => {
                    self.delete(key)?;
                }
            }
        }
        Ok(())
    }

    /// Write, read back and remove a probe key.
    fn health_check(&mut self) -> StorageResult<()> {
        const PROBE_KEY: &str = "__health__/probe";
        const PROBE_VALUE: &[u8] = b"health_check_data";

        self.write(PROBE_KEY, PROBE_VALUE)?;
        let read = self.read(PROBE_KEY)?;
        self.delete(PROBE_KEY)?;

        if read.as_deref() != Some(PROBE_VALUE) {
            return Err(super::StorageError::IntegrityViolation(
                "health check data mismatch".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod conformance {
    //! Behaviour every provider must share, run against each backend.

    use super::*;

    pub fn basic_crud(provider: &mut dyn StorageProvider) {
        assert!(!provider.exists("alpha").unwrap());
        provider.write("alpha", b"one").unwrap();
        provider.write("beta", b"two").unwrap();
        assert!(provider.exists("alpha").unwrap());
        assert_eq!(provider.read("alpha").unwrap().as_deref(), Some(&b"one"[..]));

        provider.write("alpha", b"uno").unwrap();
        assert_eq!(provider.read("alpha").unwrap().as_deref(), Some(&b"uno"[..]));

        assert_eq!(provider.keys().unwrap(), vec!["alpha", "beta"]);

        assert!(provider.delete("alpha").unwrap());
        assert!(!provider.delete("alpha").unwrap());
        assert!(!provider.exists("alpha").unwrap());
        assert!(provider.read("alpha").unwrap().is_none());
    }

    pub fn metadata_follows_value(provider: &mut dyn StorageProvider) {
        provider.write("m", b"value").unwrap();
        provider.write_metadata("m", b"{\"v\":1}").unwrap();
        assert_eq!(
            provider.read_metadata("m").unwrap().as_deref(),
            Some(&b"{\"v\":1}"[..])
        );

        provider.delete("m").unwrap();
        assert!(provider.read_metadata("m").unwrap().is_none());
    }

    pub fn batch_applies_everything(provider: &mut dyn StorageProvider) {
        provider.write("stale", b"x").unwrap();
        provider
            .apply_batch(&[
                BatchOp::Put {
                    key: "a".to_string(),
                    value: b"1".to_vec(),
                    metadata: Some(b"meta-a".to_vec()),
                },
                BatchOp::Put {
                    key: "b".to_string(),
                    value: b"2".to_vec(),
                    metadata: None,
                },
                BatchOp::Delete {
                    key: "stale".to_string(),
                },
            ])
            .unwrap();

        assert_eq!(provider.read("a").unwrap().as_deref(), Some(&b"1"[..]));
        assert_eq!(
            provider.read_metadata("a").unwrap().as_deref(),
            Some(&b"meta-a"[..])
        );
        assert_eq!(provider.read("b").unwrap().as_deref(), Some(&b"2"[..]));
        assert!(!provider.exists("stale").unwrap());
        provider.health_check().unwrap();
        provider.flush().unwrap();
    }

    pub fn run_all(provider: &mut dyn StorageProvider) {
        basic_crud(provider);
        metadata_follows_value(provider);
        batch_applies_everything(provider);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_kind_parses_aliases() {
        assert_eq!("FILE".parse::<ProviderKind>().unwrap(), ProviderKind::File);
        assert_eq!("rocksdb".parse::<ProviderKind>().unwrap(), ProviderKind::Redb);
        assert_eq!("leveldb".parse::<ProviderKind>().unwrap(), ProviderKind::Sled);
        assert_eq!(
            "occlum_file".parse::<ProviderKind>().unwrap(),
            ProviderKind::Occlum
        );
        assert!("postgres".parse::<ProviderKind>().is_err());
    }

    #[test]
    fn provider_kind_serde_is_snake_case() {
        let json = serde_json::to_string(&ProviderKind::Occlum).unwrap();
        assert_eq!(json, "\"occlum\"");
    }
}
