// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Persistent Storage Module
//!
//! Key/value storage for every enclave component, layered as:
//!
//! ```text
//! PersistentStorageManager   keys, metadata, chunking, cache, transactions
//!   CompressionProvider      lz4 frames
//!   EncryptionProvider       XChaCha20-Poly1305, versioned key file
//!   StorageProvider          file log | sealed fs | redb | sled | memory
//! ```
//!
//! ## Storage Layout
//!
//! ```text
//! {storage_path}/
//!   keys/storage.keys.json   # Versioned data keys (optionally wrapped)
//!   data.log                 # file provider
//!   data/{sha256}.dat        # occlum provider
//!   .metadata/{sha256}.meta  # occlum provider
//!   store.redb               # redb provider
//!   sled/                    # sled provider
//! ```
//!
//! ## Important Notes
//!
//! - Values and metadata are encrypted before reaching any provider.
//! - On Gramine the storage path should also sit on an encrypted mount.

pub mod cache;
pub mod compression;
pub mod crypto;
mod error;
pub mod flush;
pub mod manager;
pub mod metadata;
pub mod paths;
pub mod provider;
pub mod providers;
pub mod transaction;

pub use error::{CryptoError, StorageError, StorageResult};
pub use flush::AutoFlusher;
pub use manager::{PersistentStorageManager, StorageStats};
pub use metadata::{MetadataUpdate, StorageMetadata, WriteOptions};
pub use paths::StoragePaths;
pub use provider::{BatchOp, ProviderKind, StorageProvider};
pub use transaction::{StorageTransaction, TransactionStatus};
