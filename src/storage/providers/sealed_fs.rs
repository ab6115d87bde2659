// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! File-per-key provider for Occlum / Gramine protected mounts.
//!
//! ## Security Note
//!
//! This module uses **standard filesystem I/O**. The LibOS encrypts and
//! integrity-protects every file under the mount transparently; a tampered
//! file surfaces as an I/O error on read.
//!
//! ## Layout
//!
//! ```text
//! {root}/
//!   data/{sha256(key)}.dat        # u32 LE key length, key bytes, value bytes
//!   .metadata/{sha256(key)}.meta  # opaque metadata bytes
//! ```

use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::Path;

use crate::storage::paths::StoragePaths;
use crate::storage::provider::{ProviderKind, StorageProvider};
use crate::storage::{StorageError, StorageResult};

/// Provider storing each key in its own file.
#[derive(Debug, Clone)]
pub struct SealedFsProvider {
    paths: StoragePaths,
    initialized: bool,
}

impl SealedFsProvider {
    /// Does NOT touch the filesystem. Call `initialize()` first.
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            paths: StoragePaths::new(root),
            initialized: false,
        }
    }

    fn ensure_initialized(&self) -> StorageResult<()> {
        if !self.initialized {
            return Err(StorageError::NotInitialized);
        }
        Ok(())
    }

    /// Write to a temp file first, then rename for atomicity.
    fn write_atomic(path: &Path, parts: &[&[u8]]) -> StorageResult<()> {
        let temp_path = path.with_extension("tmp");
        {
            let file = File::create(&temp_path).map_err(classify_io)?;
            let mut writer = BufWriter::new(file);
            for part in parts {
                writer.write_all(part)?;
            }
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        fs::rename(&temp_path, path)?;
        Ok(())
    }

    fn read_file(path: &Path) -> StorageResult<Option<Vec<u8>>> {
        match File::open(path) {
            Ok(mut file) => {
                let mut buf = Vec::new();
                file.read_to_end(&mut buf).map_err(classify_io)?;
                Ok(Some(buf))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(classify_io(e)),
        }
    }

    fn remove_file(path: &Path) -> StorageResult<bool> {
        match fs::remove_file(path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

/// Split a data file into its embedded key and value.
fn decode_entry(raw: &[u8]) -> StorageResult<(&str, &[u8])> {
    let corrupt = || StorageError::IntegrityViolation("truncated data file".to_string());
    let len_bytes: [u8; 4] = raw.get(..4).ok_or_else(corrupt)?.try_into().map_err(|_| corrupt())?;
    let key_len = u32::from_le_bytes(len_bytes) as usize;
    let key_bytes = raw.get(4..4 + key_len).ok_or_else(corrupt)?;
    let key = std::str::from_utf8(key_bytes)
        .map_err(|_| StorageError::IntegrityViolation("non UTF-8 key in data file".to_string()))?;
    Ok((key, &raw[4 + key_len..]))
}

/// The LibOS reports authentication failures as I/O errors.
fn classify_io(e: io::Error) -> StorageError {
    let msg = e.to_string();
    if msg.contains("Authentication") || msg.contains("integrity") || msg.contains("tamper") {
        StorageError::IntegrityViolation(msg)
    } else {
        StorageError::Io(e)
    }
}

impl StorageProvider for SealedFsProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Occlum
    }

    fn initialize(&mut self, create_if_missing: bool) -> StorageResult<()> {
        let dirs = [self.paths.data_dir(), self.paths.metadata_dir()];
        for dir in dirs {
            if create_if_missing {
                fs::create_dir_all(&dir)?;
            } else if !dir.is_dir() {
                return Err(StorageError::NotFound(dir.display().to_string()));
            }
        }
        self.initialized = true;
        Ok(())
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn read(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        self.ensure_initialized()?;
        let Some(raw) = Self::read_file(&self.paths.data_file(key))? else {
            return Ok(None);
        };
        let (stored_key, value) = decode_entry(&raw)?;
        if stored_key != key {
            return Err(StorageError::IntegrityViolation(format!(
                "data file for {key} holds another key"
            )));
        }
        Ok(Some(value.to_vec()))
    }

    fn write(&mut self, key: &str, value: &[u8]) -> StorageResult<()> {
        self.ensure_initialized()?;
        let key_len = u32::try_from(key.len())
            .map_err(|_| StorageError::InvalidKey("key too long".to_string()))?;
        Self::write_atomic(
            &self.paths.data_file(key),
            &[&key_len.to_le_bytes(), key.as_bytes(), value],
        )
    }

    fn delete(&mut self, key: &str) -> StorageResult<bool> {
        self.ensure_initialized()?;
        Self::remove_file(&self.paths.metadata_file(key))?;
        Self::remove_file(&self.paths.data_file(key))
    }

    /// Uses `File::open()` instead of `Path::exists()` because protected
    /// filesystems can fail `stat()` on files that still open and read fine.
    fn exists(&self, key: &str) -> StorageResult<bool> {
        self.ensure_initialized()?;
        Ok(File::open(self.paths.data_file(key)).is_ok())
    }

    fn keys(&self) -> StorageResult<Vec<String>> {
        self.ensure_initialized()?;
        let mut keys = Vec::new();
        for entry in fs::read_dir(self.paths.data_dir())? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("dat") {
                continue;
            }
            if let Some(raw) = Self::read_file(&path)? {
                let (key, _) = decode_entry(&raw)?;
                keys.push(key.to_string());
            }
        }
        keys.sort();
        Ok(keys)
    }

    fn read_metadata(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        self.ensure_initialized()?;
        Self::read_file(&self.paths.metadata_file(key))
    }

    fn write_metadata(&mut self, key: &str, metadata: &[u8]) -> StorageResult<()> {
        self.ensure_initialized()?;
        Self::write_atomic(&self.paths.metadata_file(key), &[metadata])
    }

    /// Writes are synced on rename, so only the directories need syncing.
    fn flush(&mut self) -> StorageResult<()> {
        self.ensure_initialized()?;
        for dir in [self.paths.data_dir(), self.paths.metadata_dir()] {
            if let Ok(handle) = File::open(&dir) {
                // Directory fsync is unsupported on some LibOS mounts.
                let _ = handle.sync_all();
            }
        }
        Ok(())
    }
}
