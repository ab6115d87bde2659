// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Embedded ACID key-value provider backed by redb (pure Rust).
//!
//! ## Table Layout
//!
//! - `values`: logical or chunk key → stored bytes
//! - `metadata`: logical key → encoded metadata bytes
//!
//! Every batch runs in a single write transaction.

use std::path::{Path, PathBuf};

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition, WriteTransaction};
use tracing::info;

use crate::storage::paths::StoragePaths;
use crate::storage::provider::{BatchOp, ProviderKind, StorageProvider};
use crate::storage::{StorageError, StorageResult};

// =============================================================================
// Table Definitions
// =============================================================================

const VALUES: TableDefinition<&str, &[u8]> = TableDefinition::new("values");

const METADATA: TableDefinition<&str, &[u8]> = TableDefinition::new("metadata");

// =============================================================================
// RedbProvider
// =============================================================================

pub struct RedbProvider {
    path: PathBuf,
    db: Option<Database>,
}

impl RedbProvider {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            path: StoragePaths::new(root).redb_file(),
            db: None,
        }
    }

    fn db(&self) -> StorageResult<&Database> {
        self.db.as_ref().ok_or(StorageError::NotInitialized)
    }

    fn read_table(
        &self,
        table: TableDefinition<&str, &[u8]>,
        key: &str,
    ) -> StorageResult<Option<Vec<u8>>> {
        let read_txn = self.db()?.begin_read()?;
        let table = read_txn.open_table(table)?;
        Ok(table.get(key)?.map(|v| v.value().to_vec()))
    }

    fn write_in(txn: &WriteTransaction, op: &BatchOp) -> StorageResult<()> {
        let mut values = txn.open_table(VALUES)?;
        let mut metadata = txn.open_table(METADATA)?;
        match op {
            BatchOp::Put {
                key,
                value,
                metadata: meta,
            } => {
                values.insert(key.as_str(), value.as_slice())?;
                if let Some(meta) = meta {
                    metadata.insert(key.as_str(), meta.as_slice())?;
                }
            }
            BatchOp::Delete { key } => {
                values.remove(key.as_str())?;
                metadata.remove(key.as_str())?;
            }
        }
        Ok(())
    }
}

impl StorageProvider for RedbProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Redb
    }

    fn initialize(&mut self, create_if_missing: bool) -> StorageResult<()> {
        if self.db.is_some() {
            return Ok(());
        }
        let db = if create_if_missing {
            if let Some(parent) = self.path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            Database::create(&self.path)?
        } else {
            Database::open(&self.path)?
        };

        // Pre-create all tables so later read transactions don't fail
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(VALUES)?;
            let _ = write_txn.open_table(METADATA)?;
        }
        write_txn.commit()?;

        info!(path = %self.path.display(), "redb provider initialized");
        self.db = Some(db);
        Ok(())
    }

    fn is_initialized(&self) -> bool {
        self.db.is_some()
    }

    fn read(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        self.read_table(VALUES, key)
    }

    fn write(&mut self, key: &str, value: &[u8]) -> StorageResult<()> {
        let write_txn = self.db()?.begin_write()?;
        {
            let mut table = write_txn.open_table(VALUES)?;
            table.insert(key, value)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    fn delete(&mut self, key: &str) -> StorageResult<bool> {
        let write_txn = self.db()?.begin_write()?;
        let existed = {
            let mut values = write_txn.open_table(VALUES)?;
            let mut metadata = write_txn.open_table(METADATA)?;
            metadata.remove(key)?;
            let removed = values.remove(key)?.is_some();
            removed
        };
        write_txn.commit()?;
        Ok(existed)
    }

    fn exists(&self, key: &str) -> StorageResult<bool> {
        Ok(self.read(key)?.is_some())
    }

    fn keys(&self) -> StorageResult<Vec<String>> {
        let read_txn = self.db()?.begin_read()?;
        let table = read_txn.open_table(VALUES)?;
        let mut keys = Vec::new();
        for entry in table.iter()? {
            let (key, _) = entry?;
            keys.push(key.value().to_string());
        }
        Ok(keys)
    }

    fn read_metadata(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        self.read_table(METADATA, key)
    }

    fn write_metadata(&mut self, key: &str, metadata: &[u8]) -> StorageResult<()> {
        let write_txn = self.db()?.begin_write()?;
        {
            let mut table = write_txn.open_table(METADATA)?;
            table.insert(key, metadata)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Commits are durable on return.
    fn flush(&mut self) -> StorageResult<()> {
        self.db()?;
        Ok(())
    }

    fn compact(&mut self) -> StorageResult<()> {
        let db = self.db.as_mut().ok_or(StorageError::NotInitialized)?;
        let compacted = db.compact()?;
        info!(compacted, "redb provider compacted");
        Ok(())
    }

    fn apply_batch(&mut self, ops: &[BatchOp]) -> StorageResult<()> {
        let write_txn = self.db()?.begin_write()?;
        for op in ops {
            Self::write_in(&write_txn, op)?;
        }
        write_txn.commit()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::provider::conformance;
    use tempfile::TempDir;

    #[test]
    fn conforms() {
        let dir = TempDir::new().unwrap();
        let mut provider = RedbProvider::new(dir.path());
        provider.initialize(true).unwrap();
        conformance::run_all(&mut provider);
        provider.compact().unwrap();
    }

    #[test]
    fn open_without_create_fails_on_missing_file() {
        let dir = TempDir::new().unwrap();
        let mut provider = RedbProvider::new(dir.path().join("nope"));
        assert!(provider.initialize(false).is_err());
        assert!(matches!(provider.keys(), Err(StorageError::NotInitialized)));
    }

    #[test]
    fn data_persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let mut provider = RedbProvider::new(dir.path());
            provider.initialize(true).unwrap();
            provider.write("oracle/eth", b"3100").unwrap();
            provider.write_metadata("oracle/eth", b"m").unwrap();
        }
        let mut provider = RedbProvider::new(dir.path());
        provider.initialize(false).unwrap();
        assert_eq!(provider.read("oracle/eth").unwrap().as_deref(), Some(&b"3100"[..]));
        assert_eq!(provider.read_metadata("oracle/eth").unwrap().as_deref(), Some(&b"m"[..]));
    }
}
