// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Per-key metadata kept alongside every logical value.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Hash algorithm recorded for every stored value.
pub const HASH_ALGORITHM: &str = "SHA256";

/// Content type used when the caller does not supply one.
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Metadata describing one logical key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StorageMetadata {
    pub key: String,
    /// Logical (plaintext) size in bytes.
    pub size: u64,
    /// Bytes handed to the provider after compression and encryption.
    pub stored_size: u64,
    pub creation_time: DateTime<Utc>,
    pub last_modified_time: DateTime<Utc>,
    pub last_access_time: DateTime<Utc>,
    #[serde(default)]
    pub access_count: u64,
    pub content_type: String,
    /// Lowercase hex digest of the plaintext.
    pub hash: String,
    pub hash_algorithm: String,
    pub is_chunked: bool,
    pub chunk_size: u64,
    pub chunk_count: u64,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    #[serde(default)]
    pub custom_metadata: BTreeMap<String, String>,
}

impl StorageMetadata {
    /// Build metadata for a freshly written value.
    ///
    /// `previous` carries the creation time forward on overwrite.
    pub fn for_write(
        key: &str,
        value: &[u8],
        options: &WriteOptions,
        previous: Option<&StorageMetadata>,
    ) -> Self {
        let now = Utc::now();
        let mut tags = previous.map(|p| p.tags.clone()).unwrap_or_default();
        tags.extend(options.tags.clone());
        let mut custom_metadata = previous
            .map(|p| p.custom_metadata.clone())
            .unwrap_or_default();
        custom_metadata.extend(options.custom_metadata.clone());

        Self {
            key: key.to_string(),
            size: value.len() as u64,
            stored_size: 0,
            creation_time: previous.map(|p| p.creation_time).unwrap_or(now),
            last_modified_time: now,
            last_access_time: now,
            access_count: previous.map(|p| p.access_count).unwrap_or(0),
            content_type: options
                .content_type
                .clone()
                .or_else(|| previous.map(|p| p.content_type.clone()))
                .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string()),
            hash: hash_hex(value),
            hash_algorithm: HASH_ALGORITHM.to_string(),
            is_chunked: false,
            chunk_size: 0,
            chunk_count: 0,
            tags,
            custom_metadata,
        }
    }

    /// Record a read.
    pub fn touch(&mut self) {
        self.last_access_time = Utc::now();
        self.access_count = self.access_count.saturating_add(1);
    }

    /// Merge a caller-supplied update.
    pub fn apply(&mut self, update: MetadataUpdate) {
        if let Some(content_type) = update.content_type {
            self.content_type = content_type;
        }
        self.tags.extend(update.tags);
        for key in update.remove_tags {
            self.tags.remove(&key);
        }
        self.custom_metadata.extend(update.custom_metadata);
        self.last_modified_time = Utc::now();
    }

    /// Whether `value` matches the recorded hash.
    pub fn matches(&self, value: &[u8]) -> bool {
        self.hash == hash_hex(value)
    }
}

/// Caller-controlled attributes for a write.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct WriteOptions {
    pub content_type: Option<String>,
    pub tags: BTreeMap<String, String>,
    pub custom_metadata: BTreeMap<String, String>,
}

impl WriteOptions {
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }
}

/// Partial update merged into existing metadata.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct MetadataUpdate {
    pub content_type: Option<String>,
    pub tags: BTreeMap<String, String>,
    pub remove_tags: Vec<String>,
    pub custom_metadata: BTreeMap<String, String>,
}

/// SHA-256 of `value` as lowercase hex.
pub fn hash_hex(value: &[u8]) -> String {
    hex::encode(Sha256::digest(value))
}
