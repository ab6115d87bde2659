// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Log-structured provider backed by sled.
//!
//! Values live in the default tree and metadata in a `metadata` tree.
//! Batches run as a multi-tree sled transaction.

use std::path::{Path, PathBuf};

use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::{Db, Transactional, Tree};
use tracing::info;

use crate::storage::paths::StoragePaths;
use crate::storage::provider::{BatchOp, ProviderKind, StorageProvider};
use crate::storage::{StorageError, StorageResult};

const METADATA_TREE: &str = "metadata";

struct Handles {
    db: Db,
    metadata: Tree,
}

pub struct SledProvider {
    path: PathBuf,
    handles: Option<Handles>,
}

impl SledProvider {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            path: StoragePaths::new(root).sled_dir(),
            handles: None,
        }
    }

    fn handles(&self) -> StorageResult<&Handles> {
        self.handles.as_ref().ok_or(StorageError::NotInitialized)
    }
}

impl StorageProvider for SledProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Sled
    }

    fn initialize(&mut self, create_if_missing: bool) -> StorageResult<()> {
        if self.handles.is_some() {
            return Ok(());
        }
        if !create_if_missing && !self.path.is_dir() {
            return Err(StorageError::NotFound(self.path.display().to_string()));
        }
        let db = sled::Config::new()
            .path(&self.path)
            .create_new(false)
            .open()?;
        let metadata = db.open_tree(METADATA_TREE)?;
        info!(path = %self.path.display(), keys = db.len(), "sled provider initialized");
        self.handles = Some(Handles { db, metadata });
        Ok(())
    }

    fn is_initialized(&self) -> bool {
        self.handles.is_some()
    }

    fn read(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.handles()?.db.get(key)?.map(|v| v.to_vec()))
    }

    fn write(&mut self, key: &str, value: &[u8]) -> StorageResult<()> {
        self.handles()?.db.insert(key, value)?;
        Ok(())
    }

    fn delete(&mut self, key: &str) -> StorageResult<bool> {
        let handles = self.handles()?;
        handles.metadata.remove(key)?;
        Ok(handles.db.remove(key)?.is_some())
    }

    fn exists(&self, key: &str) -> StorageResult<bool> {
        Ok(self.handles()?.db.contains_key(key)?)
    }

    fn keys(&self) -> StorageResult<Vec<String>> {
        let mut keys = Vec::new();
        for entry in self.handles()?.db.iter() {
            let (key, _) = entry?;
            keys.push(String::from_utf8_lossy(&key).into_owned());
        }
        Ok(keys)
    }

    fn read_metadata(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.handles()?.metadata.get(key)?.map(|v| v.to_vec()))
    }

    fn write_metadata(&mut self, key: &str, metadata: &[u8]) -> StorageResult<()> {
        self.handles()?.metadata.insert(key, metadata)?;
        Ok(())
    }

    fn flush(&mut self) -> StorageResult<()> {
        let handles = self.handles()?;
        handles.db.flush()?;
        handles.metadata.flush()?;
        Ok(())
    }

    fn apply_batch(&mut self, ops: &[BatchOp]) -> StorageResult<()> {
        let handles = self.handles()?;
        let data: &Tree = &handles.db;
        let result: Result<(), TransactionError<()>> =
            (data, &handles.metadata).transaction(|(values, metadata)| {
                for op in ops {
                    match op {
                        BatchOp::Put {
                            key,
                            value,
                            metadata: meta,
                        } => {
                            values.insert(key.as_bytes(), value.as_slice())?;
                            if let Some(meta) = meta {
                                metadata.insert(key.as_bytes(), meta.as_slice())?;
                            }
                        }
                        BatchOp::Delete { key } => {
                            values.remove(key.as_bytes())?;
                            metadata.remove(key.as_bytes())?;
                        }
                    }
                }
                Ok::<(), ConflictableTransactionError<()>>(())
            });
        match result {
            Ok(()) => Ok(()),
            Err(TransactionError::Storage(e)) => Err(e.into()),
            Err(TransactionError::Abort(())) => Err(StorageError::IntegrityViolation(
                "sled batch aborted".to_string(),
            )),
        }
    }
}
