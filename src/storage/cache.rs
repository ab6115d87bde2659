// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Byte-bounded LRU cache of decrypted values.
//!
//! Avoids repeated provider reads, decryption and decompression for hot
//! keys. Lives inside the storage manager's lock and is invalidated on
//! every mutation of a key. Buffers are wiped when evicted or replaced.

use lru::LruCache;
use zeroize::Zeroizing;

pub struct ValueCache {
    entries: LruCache<String, Zeroizing<Vec<u8>>>,
    capacity_bytes: usize,
    used_bytes: usize,
}

impl ValueCache {
    /// Create a cache holding at most `capacity_bytes` of values.
    pub fn new(capacity_bytes: usize) -> Self {
        Self {
            entries: LruCache::unbounded(),
            capacity_bytes,
            used_bytes: 0,
        }
    }

    pub fn get(&mut self, key: &str) -> Option<Vec<u8>> {
        self.entries.get(key).map(|value| value.to_vec())
    }

    /// Values larger than the whole budget are not cached.
    pub fn put(&mut self, key: &str, value: &[u8]) {
        self.invalidate(key);
        if value.len() > self.capacity_bytes {
            return;
        }
        self.used_bytes += value.len();
        self.entries
            .put(key.to_string(), Zeroizing::new(value.to_vec()));
        while self.used_bytes > self.capacity_bytes {
            match self.entries.pop_lru() {
                Some((_, evicted)) => self.used_bytes -= evicted.len(),
                None => break,
            }
        }
    }

    pub fn invalidate(&mut self, key: &str) {
        if let Some(old) = self.entries.pop(key) {
            self.used_bytes -= old.len();
        }
    }

    pub fn used_bytes(&self) -> usize {
        self.used_bytes
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
