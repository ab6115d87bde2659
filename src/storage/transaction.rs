// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Buffered storage transactions.
//!
//! Writes and deletes are buffered until `commit()`, which applies them as
//! one provider batch and flushes synchronously. A transaction moves
//! `Pending → Committed` or `Pending → RolledBack`; either terminal state
//! rejects every further call with `TransactionClosed`. Dropping a pending
//! handle rolls it back.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::manager::PersistentStorageManager;
use super::metadata::WriteOptions;
use super::{StorageError, StorageResult};

/// Lifecycle state of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Committed,
    RolledBack,
}

/// A buffered mutation.
#[derive(Debug, Clone)]
pub(crate) enum PendingOp {
    Write {
        key: String,
        value: Vec<u8>,
        options: WriteOptions,
    },
    Delete {
        key: String,
    },
}

impl PendingOp {
    fn key(&self) -> &str {
        match self {
            PendingOp::Write { key, .. } | PendingOp::Delete { key } => key,
        }
    }
}

#[derive(Debug)]
pub(crate) struct TransactionState {
    pub status: TransactionStatus,
    pub pending: Vec<PendingOp>,
}

impl TransactionState {
    pub fn new() -> Self {
        Self {
            status: TransactionStatus::Pending,
            pending: Vec::new(),
        }
    }

    /// Error unless the transaction still accepts calls.
    pub fn ensure_pending(&self) -> StorageResult<()> {
        match self.status {
            TransactionStatus::Pending => Ok(()),
            TransactionStatus::Committed | TransactionStatus::RolledBack => {
                Err(StorageError::TransactionClosed)
            }
        }
    }

    /// Final state per key: `Some` for a write, `None` for a delete.
    pub fn net_effect(&self) -> BTreeMap<String, Option<(Vec<u8>, WriteOptions)>> {
        let mut effect = BTreeMap::new();
        for op in &self.pending {
            match op {
                PendingOp::Write {
                    key,
                    value,
                    options,
                } => {
                    effect.insert(key.clone(), Some((value.clone(), options.clone())));
                }
                PendingOp::Delete { key } => {
                    effect.insert(key.clone(), None);
                }
            }
        }
        effect
    }

    /// Latest buffered operation on `key`, if any.
    pub fn lookup(&self, key: &str) -> Option<&PendingOp> {
        self.pending.iter().rev().find(|op| op.key() == key)
    }
}

/// Handle to a pending transaction on a [`PersistentStorageManager`].
///
/// Rolls back on drop unless committed.
pub struct StorageTransaction<'a> {
    manager: &'a PersistentStorageManager,
    id: u64,
}

impl<'a> StorageTransaction<'a> {
    pub(crate) fn new(manager: &'a PersistentStorageManager, id: u64) -> Self {
        Self { manager, id }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn status(&self) -> StorageResult<TransactionStatus> {
        self.manager.transaction_status(self.id)
    }

    pub fn write(&self, key: &str, value: &[u8]) -> StorageResult<()> {
        self.manager
            .transaction_write(self.id, key, value, WriteOptions::default())
    }

    pub fn write_with(&self, key: &str, value: &[u8], options: WriteOptions) -> StorageResult<()> {
        self.manager.transaction_write(self.id, key, value, options)
    }

    pub fn delete(&self, key: &str) -> StorageResult<()> {
        self.manager.transaction_delete(self.id, key)
    }

    /// Read through the transaction's own pending writes.
    pub fn read(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        self.manager.transaction_read(self.id, key)
    }

    pub fn commit(&self) -> StorageResult<()> {
        self.manager.commit_transaction(self.id)
    }

    pub fn rollback(&self) -> StorageResult<()> {
        self.manager.rollback_transaction(self.id)
    }
}

impl Drop for StorageTransaction<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.manager.release_transaction(self.id) {
            debug!(transaction_id = self.id, error = %e, "Transaction release failed");
        }
    }
}
