// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Persistent storage manager.
//!
//! Owns one provider plus the compression and encryption transforms.
//!
//! - A write runs `encrypt(compress(value))`, with the storage key bound as
//!   the encryption context.
//! - A read reverses it and checks the plaintext hash against the metadata.
//! - Values larger than `max_chunk_size` are split into chunks stored under
//!   hidden internal keys. Each chunk is bound to `<key>#<index>`.
//! - Metadata is encoded the same way under the context `meta:<key>`.
//!
//! All state sits behind one coarse lock held for the duration of each call.

use std::collections::{HashMap, VecDeque};
use std::fs;
use std::io::{Cursor, Read};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use super::cache::ValueCache;
use super::compression::CompressionProvider;
use super::crypto::{parse_key, EncryptionProvider};
use super::metadata::{MetadataUpdate, StorageMetadata, WriteOptions};
use super::paths::StoragePaths;
use super::provider::{BatchOp, ProviderKind, StorageProvider};
use super::transaction::{PendingOp, StorageTransaction, TransactionState, TransactionStatus};
use super::{StorageError, StorageResult};
use crate::config::StorageConfig;

/// Prefix reserved for keys the manager creates itself.
pub const RESERVED_PREFIX: &str = "__";
const CHUNK_PREFIX: &str = "__chunk__/";
/// Records the enclave keeps for itself (keys, sealed secrets, audit trail).
pub(crate) const INTERNAL_PREFIX: &str = "__enclave__/";
const MAX_KEY_LEN: usize = 1024;
/// Closed transactions remembered so late calls report `TransactionClosed`.
const CLOSED_TRANSACTION_MEMORY: usize = 1024;
/// Open transactions beyond this roll back the oldest one.
pub const MAX_PENDING_TRANSACTIONS: usize = 256;

fn chunk_key(key: &str, index: u64) -> String {
    format!("{CHUNK_PREFIX}{key}/{index:08}")
}

fn chunk_context(key: &str, index: u64) -> String {
    format!("{key}#{index}")
}

fn metadata_context(key: &str) -> String {
    format!("meta:{key}")
}

/// Reject keys callers may not use.
pub fn validate_key(key: &str) -> StorageResult<()> {
    if key.is_empty() {
        return Err(StorageError::InvalidKey("key is empty".to_string()));
    }
    if key.len() > MAX_KEY_LEN {
        return Err(StorageError::InvalidKey(format!(
            "key exceeds {MAX_KEY_LEN} bytes"
        )));
    }
    if key.starts_with(RESERVED_PREFIX) {
        return Err(StorageError::InvalidKey(format!(
            "keys starting with {RESERVED_PREFIX} are reserved"
        )));
    }
    Ok(())
}

fn validate_internal_key(key: &str) -> StorageResult<()> {
    if !key.starts_with(INTERNAL_PREFIX) || key.len() == INTERNAL_PREFIX.len() {
        return Err(StorageError::InvalidKey(format!(
            "internal keys must start with {INTERNAL_PREFIX}"
        )));
    }
    if key.len() > MAX_KEY_LEN {
        return Err(StorageError::InvalidKey(format!(
            "key exceeds {MAX_KEY_LEN} bytes"
        )));
    }
    Ok(())
}

/// Reserved keys hold key material and never enter the plaintext cache.
fn cacheable(key: &str) -> bool {
    !key.starts_with(RESERVED_PREFIX)
}

/// Aggregate usage figures across all logical keys.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StorageStats {
    pub provider: ProviderKind,
    pub total_keys: u64,
    pub chunked_keys: u64,
    /// Plaintext bytes.
    pub total_size: u64,
    /// Bytes handed to the provider.
    pub stored_size: u64,
    /// `stored_size / total_size`; 1.0 when empty.
    pub compression_ratio: f64,
    pub cached_bytes: u64,
    pub key_version: Option<u32>,
}

#[derive(Debug, Clone, Copy)]
struct AccessStat {
    last: DateTime<Utc>,
    count: u64,
}

struct Inner {
    provider: Box<dyn StorageProvider>,
    encryption: Option<EncryptionProvider>,
    compression: CompressionProvider,
    cache: Option<ValueCache>,
    /// Reads since the last flush, persisted into metadata on flush.
    access: HashMap<String, AccessStat>,
    transactions: HashMap<u64, TransactionState>,
    closed_transactions: VecDeque<u64>,
    next_transaction_id: u64,
    initialized: bool,
}

impl Inner {
    fn ensure_initialized(&self) -> StorageResult<()> {
        if !self.initialized {
            return Err(StorageError::NotInitialized);
        }
        Ok(())
    }

    fn encode(&self, plain: &[u8], context: &str) -> StorageResult<Vec<u8>> {
        let framed = self.compression.compress(plain);
        match &self.encryption {
            Some(encryption) => Ok(encryption.encrypt(&framed, Some(context.as_bytes()))?),
            None => Ok(framed),
        }
    }

    fn decode(&self, stored: &[u8], context: &str) -> StorageResult<Vec<u8>> {
        let framed = match &self.encryption {
            Some(encryption) => encryption.decrypt(stored, Some(context.as_bytes()))?,
            None => stored.to_vec(),
        };
        self.compression.decompress(&framed)
    }

    fn load_metadata(&self, key: &str) -> StorageResult<Option<StorageMetadata>> {
        let Some(raw) = self.provider.read_metadata(key)? else {
            return Ok(None);
        };
        let json = self.decode(&raw, &metadata_context(key))?;
        Ok(Some(serde_json::from_slice(&json)?))
    }

    fn encode_metadata(&self, metadata: &StorageMetadata) -> StorageResult<Vec<u8>> {
        let json = serde_json::to_vec(metadata)?;
        self.encode(&json, &metadata_context(&metadata.key))
    }

    /// Metadata with unflushed access statistics applied.
    fn current_metadata(&self, key: &str) -> StorageResult<Option<StorageMetadata>> {
        let mut metadata = self.load_metadata(key)?;
        if let (Some(meta), Some(stat)) = (metadata.as_mut(), self.access.get(key)) {
            meta.last_access_time = stat.last;
            meta.access_count = stat.count;
        }
        Ok(metadata)
    }

    /// Count a read. The first read after a flush starts from the persisted count.
    fn record_access(&mut self, key: &str, known: Option<&StorageMetadata>) {
        if !self.access.contains_key(key) {
            let base = match known {
                Some(meta) => meta.access_count,
                None => self
                    .load_metadata(key)
                    .ok()
                    .flatten()
                    .map(|m| m.access_count)
                    .unwrap_or(0),
            };
            self.access.insert(
                key.to_string(),
                AccessStat {
                    last: Utc::now(),
                    count: base,
                },
            );
        }
        if let Some(stat) = self.access.get_mut(key) {
            stat.last = Utc::now();
            stat.count = stat.count.saturating_add(1);
        }
    }

    fn read_value(&mut self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        if cacheable(key) {
            if let Some(hit) = self.cache.as_mut().and_then(|c| c.get(key)) {
                self.record_access(key, None);
                return Ok(Some(hit));
            }
        }

        let Some(stored) = self.provider.read(key)? else {
            return Ok(None);
        };
        let metadata = self.load_metadata(key)?;

        let value = match &metadata {
            Some(meta) if meta.is_chunked => {
                let mut value = Vec::with_capacity(meta.size as usize);
                for index in 0..meta.chunk_count {
                    let raw = self.provider.read(&chunk_key(key, index))?.ok_or_else(|| {
                        StorageError::IntegrityViolation(format!(
                            "chunk {index} of {key} is missing"
                        ))
                    })?;
                    value.extend(self.decode(&raw, &chunk_context(key, index))?);
                }
                value
            }
            _ => self.decode(&stored, key)?,
        };

        if let Some(meta) = &metadata {
            if !meta.matches(&value) {
                return Err(StorageError::IntegrityViolation(format!(
                    "hash mismatch for {key}"
                )));
            }
        }

        self.record_access(key, metadata.as_ref());
        if let Some(cache) = self.cache.as_mut().filter(|_| cacheable(key)) {
            cache.put(key, &value);
        }
        Ok(Some(value))
    }

    /// Provider operations that store `value` under `key`.
    fn plan_write(
        &self,
        key: &str,
        value: &[u8],
        options: &WriteOptions,
        max_chunk_size: usize,
    ) -> StorageResult<Vec<BatchOp>> {
        let previous = self.load_metadata(key)?;
        let mut metadata = StorageMetadata::for_write(key, value, options, previous.as_ref());
        let mut ops = Vec::new();
        let mut stored_size = 0u64;

        let head = if value.len() > max_chunk_size {
            let mut count = 0u64;
            for (index, chunk) in value.chunks(max_chunk_size).enumerate() {
                let index = index as u64;
                let encoded = self.encode(chunk, &chunk_context(key, index))?;
                stored_size += encoded.len() as u64;
                ops.push(BatchOp::Put {
                    key: chunk_key(key, index),
                    value: encoded,
                    metadata: None,
                });
                count += 1;
            }
            metadata.is_chunked = true;
            metadata.chunk_size = max_chunk_size as u64;
            metadata.chunk_count = count;
            self.encode(&[], key)?
        } else {
            let encoded = self.encode(value, key)?;
            stored_size += encoded.len() as u64;
            encoded
        };

        if let Some(previous) = previous.filter(|p| p.is_chunked) {
            for index in metadata.chunk_count..previous.chunk_count {
                ops.push(BatchOp::Delete {
                    key: chunk_key(key, index),
                });
            }
        }

        metadata.stored_size = stored_size;
        if let Some(stat) = self.access.get(key) {
            metadata.last_access_time = stat.last;
            metadata.access_count = stat.count;
        }
        ops.push(BatchOp::Put {
            key: key.to_string(),
            value: head,
            metadata: Some(self.encode_metadata(&metadata)?),
        });
        Ok(ops)
    }

    /// Provider operations that remove `key` and its chunks.
    fn plan_delete(&self, key: &str) -> StorageResult<Vec<BatchOp>> {
        let mut ops = Vec::new();
        // Metadata that no longer decrypts must not block the delete.
        let metadata = self.load_metadata(key).unwrap_or_else(|e| {
            warn!(key = %key, error = %e, "Unreadable metadata during delete");
            None
        });
        if let Some(meta) = metadata.filter(|m| m.is_chunked) {
            for index in 0..meta.chunk_count {
                ops.push(BatchOp::Delete {
                    key: chunk_key(key, index),
                });
            }
        }
        ops.push(BatchOp::Delete {
            key: key.to_string(),
        });
        Ok(ops)
    }

    fn forget(&mut self, key: &str) {
        if let Some(cache) = self.cache.as_mut() {
            cache.invalidate(key);
        }
        self.access.remove(key);
    }

    fn transaction_mut(&mut self, id: u64) -> StorageResult<&mut TransactionState> {
        self.transactions
            .get_mut(&id)
            .ok_or(StorageError::TransactionNotFound(id))
    }

    fn close_transaction(&mut self, id: u64, status: TransactionStatus) {
        if let Some(state) = self.transactions.get_mut(&id) {
            state.status = status;
            state.pending.clear();
        }
        self.closed_transactions.push_back(id);
        while self.closed_transactions.len() > CLOSED_TRANSACTION_MEMORY {
            if let Some(old) = self.closed_transactions.pop_front() {
                self.transactions.remove(&old);
            }
        }
    }

    /// Persist access statistics gathered since the last flush.
    fn persist_access(&mut self) -> StorageResult<()> {
        let touched: Vec<(String, AccessStat)> = self.access.drain().collect();
        for (key, stat) in touched {
            if !self.provider.exists(&key)? {
                continue;
            }
            let Some(mut metadata) = self.load_metadata(&key)? else {
                continue;
            };
            metadata.last_access_time = stat.last;
            metadata.access_count = stat.count;
            let encoded = self.encode_metadata(&metadata)?;
            self.provider.write_metadata(&key, &encoded)?;
        }
        Ok(())
    }
}

/// Storage façade used by every other component.
pub struct PersistentStorageManager {
    config: StorageConfig,
    inner: Mutex<Inner>,
}

impl PersistentStorageManager {
    /// Does NOT touch the backing store. Call `initialize()` first.
    pub fn new(config: StorageConfig) -> Self {
        let provider = config.provider.build(&config.storage_path);
        Self::with_provider(config, provider)
    }

    /// Use an explicitly constructed provider.
    pub fn with_provider(config: StorageConfig, provider: Box<dyn StorageProvider>) -> Self {
        let compression =
            CompressionProvider::new(config.enable_compression, config.compression_level);
        let cache = config
            .enable_caching
            .then(|| ValueCache::new(config.cache_size_bytes));
        Self {
            inner: Mutex::new(Inner {
                provider,
                encryption: None,
                compression,
                cache,
                access: HashMap::new(),
                transactions: HashMap::new(),
                closed_transactions: VecDeque::new(),
                next_transaction_id: 1,
                initialized: false,
            }),
            config,
        }
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    fn lock(&self) -> StorageResult<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| StorageError::LockPoisoned("storage manager"))
    }

    fn lock_initialized(&self) -> StorageResult<MutexGuard<'_, Inner>> {
        let inner = self.lock()?;
        inner.ensure_initialized()?;
        Ok(inner)
    }

    /// Open the provider and load (or create) the key file. Idempotent.
    pub fn initialize(&self) -> StorageResult<()> {
        let mut inner = self.lock()?;
        if inner.initialized {
            return Ok(());
        }
        self.config
            .validate()
            .map_err(|e| StorageError::Config(e.to_string()))?;

        let create = self.config.create_if_not_exists;
        let persistent = self.config.provider != ProviderKind::Memory;
        if persistent && create {
            fs::create_dir_all(&self.config.storage_path)?;
        }
        inner.provider.initialize(create)?;

        if self.config.enable_encryption {
            let encryption = if persistent {
                let master = self
                    .config
                    .encryption_key
                    .as_deref()
                    .map(parse_key)
                    .transpose()?;
                EncryptionProvider::open(
                    StoragePaths::new(&self.config.storage_path).key_file(),
                    master.as_deref(),
                    create,
                )?
            } else {
                EncryptionProvider::ephemeral()
            };
            inner.encryption = Some(encryption);
        }
        inner.initialized = true;

        info!(
            provider = %self.config.provider,
            path = %self.config.storage_path.display(),
            encryption = self.config.enable_encryption,
            compression_level = inner.compression.level(),
            "Persistent storage initialized"
        );
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.lock().map(|i| i.initialized).unwrap_or(false)
    }

    pub fn provider_kind(&self) -> ProviderKind {
        self.config.provider
    }

    // ========== Key/Value Operations ==========

    pub fn write(&self, key: &str, value: &[u8]) -> StorageResult<()> {
        self.write_with(key, value, WriteOptions::default())
    }

    pub fn write_with(&self, key: &str, value: &[u8], options: WriteOptions) -> StorageResult<()> {
        validate_key(key)?;
        self.store(key, value, options)
    }

    /// `Ok(None)` when the key does not exist.
    pub fn read(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        validate_key(key)?;
        self.lock_initialized()?.read_value(key)
    }

    /// Returns whether the key existed.
    pub fn delete(&self, key: &str) -> StorageResult<bool> {
        validate_key(key)?;
        self.remove(key)
    }

    fn store(&self, key: &str, value: &[u8], options: WriteOptions) -> StorageResult<()> {
        let mut inner = self.lock_initialized()?;
        let ops = inner.plan_write(key, value, &options, self.config.max_chunk_size)?;
        inner.provider.apply_batch(&ops)?;
        if let Some(cache) = inner.cache.as_mut().filter(|_| cacheable(key)) {
            cache.put(key, value);
        }
        debug!(key = %key, bytes = value.len(), "Stored value");
        Ok(())
    }

    fn remove(&self, key: &str) -> StorageResult<bool> {
        let mut inner = self.lock_initialized()?;
        let existed = inner.provider.exists(key)?;
        if existed {
            let ops = inner.plan_delete(key)?;
            inner.provider.apply_batch(&ops)?;
        }
        inner.forget(key);
        Ok(existed)
    }

    // ========== Internal records ==========

    pub(crate) fn write_internal(
        &self,
        key: &str,
        value: &[u8],
        options: WriteOptions,
    ) -> StorageResult<()> {
        validate_internal_key(key)?;
        self.store(key, value, options)
    }

    pub(crate) fn read_internal(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        validate_internal_key(key)?;
        self.lock_initialized()?.read_value(key)
    }

    pub(crate) fn delete_internal(&self, key: &str) -> StorageResult<bool> {
        validate_internal_key(key)?;
        self.remove(key)
    }

    /// Internal keys starting with `prefix`, sorted.
    pub(crate) fn internal_keys(&self, prefix: &str) -> StorageResult<Vec<String>> {
        validate_internal_key(prefix)?;
        let inner = self.lock_initialized()?;
        let mut keys: Vec<String> = inner
            .provider
            .keys()?
            .into_iter()
            .filter(|k| k.starts_with(prefix))
            .collect();
        keys.sort();
        Ok(keys)
    }

    pub fn exists(&self, key: &str) -> StorageResult<bool> {
        validate_key(key)?;
        self.lock_initialized()?.provider.exists(key)
    }

    /// Logical keys, sorted. Chunk and internal keys are never listed.
    pub fn get_all_keys(&self) -> StorageResult<Vec<String>> {
        let inner = self.lock_initialized()?;
        let mut keys: Vec<String> = inner
            .provider
            .keys()?
            .into_iter()
            .filter(|k| !k.starts_with(RESERVED_PREFIX))
            .collect();
        keys.sort();
        Ok(keys)
    }

    /// Logical keys starting with `prefix`.
    pub fn keys_with_prefix(&self, prefix: &str) -> StorageResult<Vec<String>> {
        Ok(self
            .get_all_keys()?
            .into_iter()
            .filter(|k| k.starts_with(prefix))
            .collect())
    }

    pub fn get_metadata(&self, key: &str) -> StorageResult<Option<StorageMetadata>> {
        validate_key(key)?;
        self.lock_initialized()?.current_metadata(key)
    }

    /// Merge `update` into the metadata of an existing key.
    pub fn update_metadata(
        &self,
        key: &str,
        update: MetadataUpdate,
    ) -> StorageResult<StorageMetadata> {
        validate_key(key)?;
        let mut inner = self.lock_initialized()?;
        let mut metadata = inner
            .current_metadata(key)?
            .ok_or_else(|| StorageError::NotFound(key.to_string()))?;
        metadata.apply(update);
        let encoded = inner.encode_metadata(&metadata)?;
        inner.provider.write_metadata(key, &encoded)?;
        inner.access.remove(key);
        Ok(metadata)
    }

    // ========== Streams ==========

    /// Store everything `reader` yields under `key`.
    pub fn write_stream(
        &self,
        key: &str,
        reader: &mut dyn Read,
        options: WriteOptions,
    ) -> StorageResult<u64> {
        let mut buffer = Vec::new();
        reader.read_to_end(&mut buffer)?;
        self.write_with(key, &buffer, options)?;
        Ok(buffer.len() as u64)
    }

    pub fn read_stream(&self, key: &str) -> StorageResult<Option<Box<dyn Read + Send>>> {
        Ok(self
            .read(key)?
            .map(|value| Box::new(Cursor::new(value)) as Box<dyn Read + Send>))
    }

    // ========== Maintenance ==========

    /// Persist access statistics and make all writes durable.
    pub fn flush(&self) -> StorageResult<()> {
        let mut inner = self.lock_initialized()?;
        inner.persist_access()?;
        inner.provider.flush()
    }

    pub fn compact(&self) -> StorageResult<()> {
        let mut inner = self.lock_initialized()?;
        inner.provider.compact()
    }

    /// Append a new encryption key; existing values stay readable.
    pub fn rotate_key(&self) -> StorageResult<u32> {
        let inner = self.lock_initialized()?;
        let encryption = inner
            .encryption
            .as_ref()
            .ok_or(StorageError::EncryptionDisabled)?;
        Ok(encryption.rotate_key()?)
    }

    pub fn usage_stats(&self) -> StorageResult<StorageStats> {
        let keys = self.get_all_keys()?;
        let inner = self.lock_initialized()?;
        let mut stats = StorageStats {
            provider: self.config.provider,
            total_keys: 0,
            chunked_keys: 0,
            total_size: 0,
            stored_size: 0,
            compression_ratio: 1.0,
            cached_bytes: inner.cache.as_ref().map(|c| c.used_bytes() as u64).unwrap_or(0),
            key_version: inner
                .encryption
                .as_ref()
                .and_then(|e| e.active_version().ok()),
        };
        for key in keys {
            stats.total_keys += 1;
            if let Some(meta) = inner.load_metadata(&key)? {
                stats.total_size += meta.size;
                stats.stored_size += meta.stored_size;
                if meta.is_chunked {
                    stats.chunked_keys += 1;
                }
            }
        }
        if stats.total_size > 0 {
            stats.compression_ratio = stats.stored_size as f64 / stats.total_size as f64;
        }
        Ok(stats)
    }

    pub fn health_check(&self) -> StorageResult<()> {
        self.lock_initialized()?.provider.health_check()
    }

    // ========== Transactions ==========

    /// Start a transaction whose handle rolls back on drop.
    pub fn begin_transaction(&self) -> StorageResult<StorageTransaction<'_>> {
        let id = self.begin_transaction_id()?;
        Ok(StorageTransaction::new(self, id))
    }

    /// Start a transaction addressed by id (host call surface).
    pub fn begin_transaction_id(&self) -> StorageResult<u64> {
        let mut inner = self.lock_initialized()?;
        let mut open: Vec<u64> = inner
            .transactions
            .iter()
            .filter(|(_, state)| state.status == TransactionStatus::Pending)
            .map(|(id, _)| *id)
            .collect();
        if open.len() >= MAX_PENDING_TRANSACTIONS {
            open.sort_unstable();
            let excess = open.len() + 1 - MAX_PENDING_TRANSACTIONS;
            for stale in open.into_iter().take(excess) {
                warn!(transaction_id = stale, "Too many open transactions, rolling back oldest");
                inner.close_transaction(stale, TransactionStatus::RolledBack);
            }
        }
        let id = inner.next_transaction_id;
        inner.next_transaction_id += 1;
        inner.transactions.insert(id, TransactionState::new());
        debug!(transaction_id = id, "Transaction started");
        Ok(id)
    }

    pub fn transaction_status(&self, id: u64) -> StorageResult<TransactionStatus> {
        let mut inner = self.lock()?;
        Ok(inner.transaction_mut(id)?.status)
    }

    pub fn transaction_write(
        &self,
        id: u64,
        key: &str,
        value: &[u8],
        options: WriteOptions,
    ) -> StorageResult<()> {
        validate_key(key)?;
        let mut inner = self.lock_initialized()?;
        let state = inner.transaction_mut(id)?;
        state.ensure_pending()?;
        state.pending.push(PendingOp::Write {
            key: key.to_string(),
            value: value.to_vec(),
            options,
        });
        Ok(())
    }

    pub fn transaction_delete(&self, id: u64, key: &str) -> StorageResult<()> {
        validate_key(key)?;
        let mut inner = self.lock_initialized()?;
        let state = inner.transaction_mut(id)?;
        state.ensure_pending()?;
        state.pending.push(PendingOp::Delete {
            key: key.to_string(),
        });
        Ok(())
    }

    pub fn transaction_read(&self, id: u64, key: &str) -> StorageResult<Option<Vec<u8>>> {
        validate_key(key)?;
        let mut inner = self.lock_initialized()?;
        let buffered = {
            let state = inner.transaction_mut(id)?;
            state.ensure_pending()?;
            state.lookup(key).map(|op| match op {
                PendingOp::Write { value, .. } => Some(value.clone()),
                PendingOp::Delete { .. } => None,
            })
        };
        match buffered {
            Some(value) => Ok(value),
            None => inner.read_value(key),
        }
    }

    /// Apply all buffered operations as one batch and flush.
    pub fn commit_transaction(&self, id: u64) -> StorageResult<()> {
        let mut inner = self.lock_initialized()?;
        let effect = {
            let state = inner.transaction_mut(id)?;
            state.ensure_pending()?;
            state.net_effect()
        };

        let mut ops = Vec::new();
        for (key, change) in &effect {
            match change {
                Some((value, options)) => {
                    ops.extend(inner.plan_write(key, value, options, self.config.max_chunk_size)?)
                }
                None => {
                    if inner.provider.exists(key)? {
                        ops.extend(inner.plan_delete(key)?);
                    }
                }
            }
        }

        inner.provider.apply_batch(&ops)?;
        for (key, change) in &effect {
            inner.forget(key);
            if let (Some((value, _)), Some(cache)) = (change, inner.cache.as_mut()) {
                if cacheable(key) {
                    cache.put(key, value);
                }
            }
        }
        inner.provider.flush()?;
        inner.close_transaction(id, TransactionStatus::Committed);

        info!(
            transaction_id = id,
            keys = effect.len(),
            "Transaction committed"
        );
        Ok(())
    }

    /// Discard all buffered operations.
    pub fn rollback_transaction(&self, id: u64) -> StorageResult<()> {
        let mut inner = self.lock()?;
        inner.transaction_mut(id)?.ensure_pending()?;
        inner.close_transaction(id, TransactionStatus::RolledBack);
        debug!(transaction_id = id, "Transaction rolled back");
        Ok(())
    }

    /// Called when a transaction handle is dropped.
    pub(crate) fn release_transaction(&self, id: u64) -> StorageResult<()> {
        let mut inner = self.lock()?;
        let pending = inner
            .transactions
            .get(&id)
            .map(|s| s.status == TransactionStatus::Pending)
            .unwrap_or(false);
        if pending {
            debug!(transaction_id = id, "Dropping pending transaction, rolling back");
        }
        inner.transactions.remove(&id);
        inner.closed_transactions.retain(|closed| *closed != id);
        Ok(())
    }
}

impl Drop for PersistentStorageManager {
    fn drop(&mut self) {
        if let Ok(inner) = self.inner.get_mut() {
            if inner.initialized {
                if let Err(e) = inner.persist_access().and_then(|_| inner.provider.flush()) {
                    warn!(error = %e, "Final storage flush failed");
                }
            }
        }
    }
}
