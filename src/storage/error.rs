// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Storage error types.

use std::io;

/// Failures of the encryption transform and key file handling.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// Ciphertext did not authenticate under any known key.
    #[error("decryption failed")]
    DecryptionFailed,
    #[error("encryption failed")]
    EncryptionFailed,
    /// Supplied key material has the wrong length or encoding.
    #[error("invalid key material: {0}")]
    InvalidKey(String),
    #[error("key file error: {0}")]
    KeyFile(String),
}

/// Error type for persistent storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("storage not initialized")]
    NotInitialized,
    #[error("invalid key: {0}")]
    InvalidKey(String),
    #[error("not found: {0}")]
    NotFound(String),
    /// Transaction already committed or rolled back.
    #[error("transaction is closed")]
    TransactionClosed,
    #[error("unknown transaction: {0}")]
    TransactionNotFound(u64),
    #[error("encryption is disabled")]
    EncryptionDisabled,
    #[error("integrity violation: {0}")]
    IntegrityViolation(String),
    #[error("compression error: {0}")]
    Compression(String),
    #[error("invalid storage configuration: {0}")]
    Config(String),
    #[error("lock poisoned: {0}")]
    LockPoisoned(&'static str),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("redb error: {0}")]
    Redb(#[from] redb::Error),
    #[error("redb database error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),
    #[error("redb transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),
    #[error("redb table error: {0}")]
    RedbTable(#[from] redb::TableError),
    #[error("redb storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),
    #[error("redb commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),
    #[error("redb compaction error: {0}")]
    RedbCompaction(#[from] redb::CompactionError),
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;
