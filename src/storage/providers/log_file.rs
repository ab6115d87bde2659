// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Append-only log file provider.
//!
//! Every mutation is appended to `data.log` as a checksummed record and an
//! in-memory index maps keys to value offsets. The index is rebuilt by
//! replaying the log on `initialize()`; a torn tail record (crash during
//! append) is truncated away. `compact()` rewrites only live entries.
//!
//! ## Record format
//!
//! ```text
//! op:u8 | key_len:u32 LE | value_len:u32 LE | key | value | sha256[..8]
//! ```
//!
//! A batch is a single record whose value is a sequence of inner records,
//! so a batch is replayed entirely or not at all.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::ops::Range;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::storage::paths::StoragePaths;
use crate::storage::provider::{BatchOp, ProviderKind, StorageProvider};
use crate::storage::{StorageError, StorageResult};

const OP_PUT: u8 = 1;
const OP_METADATA: u8 = 2;
const OP_DELETE: u8 = 3;
const OP_BATCH: u8 = 4;

const HEADER_LEN: usize = 9;
const CHECKSUM_LEN: usize = 8;

/// Location of a value inside the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Slot {
    offset: u64,
    len: usize,
}

/// One decoded record; ranges are relative to the decoded buffer.
struct RawRecord {
    op: u8,
    key: Range<usize>,
    value: Range<usize>,
    end: usize,
}

pub struct LogFileProvider {
    path: PathBuf,
    file: Option<File>,
    len: u64,
    values: BTreeMap<String, Slot>,
    metadata: BTreeMap<String, Slot>,
    /// Bytes belonging to superseded records.
    garbage: u64,
}

impl LogFileProvider {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            path: StoragePaths::new(root).log_file(),
            file: None,
            len: 0,
            values: BTreeMap::new(),
            metadata: BTreeMap::new(),
            garbage: 0,
        }
    }

    fn file_mut(&mut self) -> StorageResult<&mut File> {
        self.file.as_mut().ok_or(StorageError::NotInitialized)
    }

    fn ensure_initialized(&self) -> StorageResult<()> {
        if self.file.is_none() {
            return Err(StorageError::NotInitialized);
        }
        Ok(())
    }

    fn read_slot(&self, slot: Slot) -> StorageResult<Vec<u8>> {
        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(slot.offset))?;
        let mut buf = vec![0u8; slot.len];
        file.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// Append a record at `self.len`.
    ///
    /// A failed write truncates back to the last complete record, and any
    /// bytes found past `self.len` are dropped first, so index offsets always
    /// match the file.
    fn append(&mut self, record: Vec<u8>) -> StorageResult<()> {
        let base = self.len;
        let file = self.file_mut()?;
        if file.metadata()?.len() != base {
            warn!(expected = base, "Log file has a torn tail, truncating");
            file.set_len(base)?;
        }
        if let Err(e) = file.write_all(&record) {
            if let Err(truncate) = file.set_len(base) {
                warn!(error = %truncate, "Failed to truncate partial log record");
            }
            return Err(e.into());
        }
        self.len += record.len() as u64;
        self.index_buffer(&record, base);
        Ok(())
    }

    /// Apply every complete record in `buf` to the index.
    ///
    /// Returns the length of the valid prefix.
    fn index_buffer(&mut self, buf: &[u8], base: u64) -> usize {
        let mut pos = 0;
        while let Some(record) = parse_record(buf, pos) {
            if record.op == OP_BATCH {
                let inner = &buf[record.value.clone()];
                self.index_buffer(inner, base + record.value.start as u64);
            } else {
                self.index_record(buf, &record, base);
            }
            pos = record.end;
        }
        pos
    }

    fn index_record(&mut self, buf: &[u8], record: &RawRecord, base: u64) {
        let Ok(key) = std::str::from_utf8(&buf[record.key.clone()]) else {
            return;
        };
        let slot = Slot {
            offset: base + record.value.start as u64,
            len: record.value.len(),
        };
        match record.op {
            OP_PUT => {
                if let Some(old) = self.values.insert(key.to_string(), slot) {
                    self.garbage += old.len as u64;
                }
            }
            OP_METADATA => {
                if let Some(old) = self.metadata.insert(key.to_string(), slot) {
                    self.garbage += old.len as u64;
                }
            }
            OP_DELETE => {
                if let Some(old) = self.values.remove(key) {
                    self.garbage += old.len as u64;
                }
                if let Some(old) = self.metadata.remove(key) {
                    self.garbage += old.len as u64;
                }
            }
            _ => {}
        }
    }
}

fn checksum(body: &[u8]) -> [u8; CHECKSUM_LEN] {
    let digest = Sha256::digest(body);
    let mut out = [0u8; CHECKSUM_LEN];
    out.copy_from_slice(&digest[..CHECKSUM_LEN]);
    out
}

fn encode_record(op: u8, key: &str, value: &[u8]) -> StorageResult<Vec<u8>> {
    let key_len = u32::try_from(key.len())
        .map_err(|_| StorageError::InvalidKey("key too long".to_string()))?;
    let value_len = u32::try_from(value.len())
        .map_err(|_| StorageError::InvalidKey("value exceeds 4 GiB record limit".to_string()))?;

    let mut out = Vec::with_capacity(HEADER_LEN + key.len() + value.len() + CHECKSUM_LEN);
    out.push(op);
    out.extend_from_slice(&key_len.to_le_bytes());
    out.extend_from_slice(&value_len.to_le_bytes());
    out.extend_from_slice(key.as_bytes());
    out.extend_from_slice(value);
    let sum = checksum(&out);
    out.extend_from_slice(&sum);
    Ok(out)
}

fn parse_record(buf: &[u8], pos: usize) -> Option<RawRecord> {
    let header = buf.get(pos..pos + HEADER_LEN)?;
    let op = header[0];
    let key_len = u32::from_le_bytes(header[1..5].try_into().ok()?) as usize;
    let value_len = u32::from_le_bytes(header[5..9].try_into().ok()?) as usize;

    let key_start = pos + HEADER_LEN;
    let value_start = key_start.checked_add(key_len)?;
    let value_end = value_start.checked_add(value_len)?;
    let end = value_end.checked_add(CHECKSUM_LEN)?;

    let stored = buf.get(value_end..end)?;
    if checksum(&buf[pos..value_end]) != stored {
        return None;
    }
    if !matches!(op, OP_PUT | OP_METADATA | OP_DELETE | OP_BATCH) {
        return None;
    }
    Some(RawRecord {
        op,
        key: key_start..value_start,
        value: value_start..value_end,
        end,
    })
}

impl StorageProvider for LogFileProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::File
    }

    fn initialize(&mut self, create_if_missing: bool) -> StorageResult<()> {
        if self.file.is_some() {
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            if create_if_missing {
                fs::create_dir_all(parent)?;
            }
        }
        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(create_if_missing)
            .open(&self.path)
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::NotFound => {
                    StorageError::NotFound(self.path.display().to_string())
                }
                _ => StorageError::Io(e),
            })?;

        let mut buf = Vec::new();
        file.read_to_end(&mut buf)?;
        self.values.clear();
        self.metadata.clear();
        self.garbage = 0;
        let valid = self.index_buffer(&buf, 0);
        if valid < buf.len() {
            warn!(
                path = %self.path.display(),
                discarded_bytes = buf.len() - valid,
                "Truncating torn tail of storage log"
            );
            file.set_len(valid as u64)?;
        }
        self.len = valid as u64;
        self.file = Some(file);

        info!(
            path = %self.path.display(),
            keys = self.values.len(),
            "Log file provider initialized"
        );
        Ok(())
    }

    fn is_initialized(&self) -> bool {
        self.file.is_some()
    }

    fn read(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        self.ensure_initialized()?;
        self.values
            .get(key)
            .map(|slot| self.read_slot(*slot))
            .transpose()
    }

    fn write(&mut self, key: &str, value: &[u8]) -> StorageResult<()> {
        self.ensure_initialized()?;
        let record = encode_record(OP_PUT, key, value)?;
        self.append(record)
    }

    fn delete(&mut self, key: &str) -> StorageResult<bool> {
        self.ensure_initialized()?;
        if !self.values.contains_key(key) && !self.metadata.contains_key(key) {
            return Ok(false);
        }
        let existed = self.values.contains_key(key);
        let record = encode_record(OP_DELETE, key, &[])?;
        self.append(record)?;
        Ok(existed)
    }

    fn exists(&self, key: &str) -> StorageResult<bool> {
        self.ensure_initialized()?;
        Ok(self.values.contains_key(key))
    }

    fn keys(&self) -> StorageResult<Vec<String>> {
        self.ensure_initialized()?;
        Ok(self.values.keys().cloned().collect())
    }

    fn read_metadata(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        self.ensure_initialized()?;
        self.metadata
            .get(key)
            .map(|slot| self.read_slot(*slot))
            .transpose()
    }

    fn write_metadata(&mut self, key: &str, metadata: &[u8]) -> StorageResult<()> {
        self.ensure_initialized()?;
        let record = encode_record(OP_METADATA, key, metadata)?;
        self.append(record)
    }

    fn flush(&mut self) -> StorageResult<()> {
        self.file_mut()?.sync_data()?;
        Ok(())
    }

    fn compact(&mut self) -> StorageResult<()> {
        self.ensure_initialized()?;
        let mut live = Vec::new();
        for (key, slot) in &self.values {
            live.extend(encode_record(OP_PUT, key, &self.read_slot(*slot)?)?);
        }
        for (key, slot) in &self.metadata {
            live.extend(encode_record(OP_METADATA, key, &self.read_slot(*slot)?)?);
        }

        let temp_path = self.path.with_extension("compact");
        {
            let mut temp = File::create(&temp_path)?;
            temp.write_all(&live)?;
            temp.sync_all()?;
        }
        fs::rename(&temp_path, &self.path)?;

        let reclaimed = self.garbage;
        self.file = Some(OpenOptions::new().read(true).append(true).open(&self.path)?);
        self.values.clear();
        self.metadata.clear();
        self.garbage = 0;
        self.len = 0;
        self.len = self.index_buffer(&live, 0) as u64;

        info!(reclaimed_bytes = reclaimed, "Storage log compacted");
        Ok(())
    }

    fn apply_batch(&mut self, ops: &[BatchOp]) -> StorageResult<()> {
        self.ensure_initialized()?;
        let mut inner = Vec::new();
        for op in ops {
            match op {
                BatchOp::Put {
                    key,
                    value,
                    metadata,
                } => {
                    inner.extend(encode_record(OP_PUT, key, value)?);
                    if let Some(metadata) = metadata {
                        inner.extend(encode_record(OP_METADATA, key, metadata)?);
                    }
                }
                BatchOp::Delete { key } => {
                    inner.extend(encode_record(OP_DELETE, key, &[])?);
                }
            }
        }
        let record = encode_record(OP_BATCH, "", &inner)?;
        self.append(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::provider::conformance;
    use tempfile::TempDir;

    fn open(dir: &TempDir) -> LogFileProvider {
        let mut provider = LogFileProvider::new(dir.path());
        provider.initialize(true).unwrap();
        provider
    }

    #[test]
    fn conforms() {
        let dir = TempDir::new().unwrap();
        let mut provider = open(&dir);
        conformance::run_all(&mut provider);
    }

    #[test]
    fn replays_log_on_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let mut provider = open(&dir);
            provider.write("a", b"1").unwrap();
            provider.write("b", b"2").unwrap();
            provider.write_metadata("b", b"meta").unwrap();
            provider.delete("a").unwrap();
            provider
                .apply_batch(&[BatchOp::Put {
                    key: "c".to_string(),
                    value: b"3".to_vec(),
                    metadata: None,
                }])
                .unwrap();
            provider.flush().unwrap();
        }

        let provider = open(&dir);
        assert_eq!(provider.keys().unwrap(), vec!["b", "c"]);
        assert_eq!(provider.read_metadata("b").unwrap().as_deref(), Some(&b"meta"[..]));
        assert_eq!(provider.read("c").unwrap().as_deref(), Some(&b"3"[..]));
    }

    #[test]
    fn torn_tail_is_truncated() {
        let dir = TempDir::new().unwrap();
        {
            let mut provider = open(&dir);
            provider.write("kept", b"value").unwrap();
        }
        let log = StoragePaths::new(dir.path()).log_file();
        let intact_len = fs::metadata(&log).unwrap().len();
        {
            let mut file = OpenOptions::new().append(true).open(&log).unwrap();
            let partial = encode_record(OP_PUT, "lost", b"half").unwrap();
            file.write_all(&partial[..partial.len() - 3]).unwrap();
        }

        let provider = open(&dir);
        assert_eq!(provider.keys().unwrap(), vec!["kept"]);
        assert_eq!(fs::metadata(&log).unwrap().len(), intact_len);
    }

    #[test]
    fn append_after_partial_write_keeps_offsets_aligned() {
        let dir = TempDir::new().unwrap();
        let log = StoragePaths::new(dir.path()).log_file();
        let mut provider = open(&dir);
        provider.write("before", b"one").unwrap();
        {
            let mut file = OpenOptions::new().append(true).open(&log).unwrap();
            let partial = encode_record(OP_PUT, "torn", b"value").unwrap();
            file.write_all(&partial[..partial.len() / 2]).unwrap();
        }

        provider.write("after", b"two").unwrap();
        assert_eq!(provider.read("after").unwrap().as_deref(), Some(&b"two"[..]));
        assert_eq!(fs::metadata(&log).unwrap().len(), provider.len);

        drop(provider);
        let reopened = open(&dir);
        assert_eq!(reopened.keys().unwrap(), vec!["after", "before"]);
        assert_eq!(reopened.read("before").unwrap().as_deref(), Some(&b"one"[..]));
        assert_eq!(reopened.read("after").unwrap().as_deref(), Some(&b"two"[..]));
    }

    #[test]
    fn compaction_drops_dead_records() {
        let dir = TempDir::new().unwrap();
        let mut provider = open(&dir);
        for i in 0..20 {
            provider.write("hot", format!("value-{i}").as_bytes()).unwrap();
        }
        provider.write("gone", b"x").unwrap();
        provider.delete("gone").unwrap();
        let log = StoragePaths::new(dir.path()).log_file();
        let before = fs::metadata(&log).unwrap().len();

        provider.compact().unwrap();

        let after = fs::metadata(&log).unwrap().len();
        assert!(after < before);
        assert_eq!(provider.read("hot").unwrap().as_deref(), Some(&b"value-19"[..]));
        assert!(!provider.exists("gone").unwrap());

        provider.write("fresh", b"after").unwrap();
        let reopened = open(&dir);
        assert_eq!(reopened.keys().unwrap(), vec!["fresh", "hot"]);
    }
}
