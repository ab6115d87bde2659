// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Volatile provider for tests and ephemeral enclaves.

use std::collections::BTreeMap;

use crate::storage::provider::{ProviderKind, StorageProvider};
use crate::storage::{StorageError, StorageResult};

#[derive(Debug, Default)]
pub struct MemoryProvider {
    data: BTreeMap<String, Vec<u8>>,
    metadata: BTreeMap<String, Vec<u8>>,
    initialized: bool,
}

impl MemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    fn ensure_initialized(&self) -> StorageResult<()> {
        if !self.initialized {
            return Err(StorageError::NotInitialized);
        }
        Ok(())
    }
}

impl StorageProvider for MemoryProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Memory
    }

    fn initialize(&mut self, _create_if_missing: bool) -> StorageResult<()> {
        self.initialized = true;
        Ok(())
    }

    fn is_initialized(&self) -> bool {
        self.initialized
    }

    fn read(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        self.ensure_initialized()?;
        Ok(self.data.get(key).cloned())
    }

    fn write(&mut self, key: &str, value: &[u8]) -> StorageResult<()> {
        self.ensure_initialized()?;
        self.data.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn delete(&mut self, key: &str) -> StorageResult<bool> {
        self.ensure_initialized()?;
        self.metadata.remove(key);
        Ok(self.data.remove(key).is_some())
    }

    fn exists(&self, key: &str) -> StorageResult<bool> {
        self.ensure_initialized()?;
        Ok(self.data.contains_key(key))
    }

    fn keys(&self) -> StorageResult<Vec<String>> {
        self.ensure_initialized()?;
        Ok(self.data.keys().cloned().collect())
    }

    fn read_metadata(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        self.ensure_initialized()?;
        Ok(self.metadata.get(key).cloned())
    }

    fn write_metadata(&mut self, key: &str, metadata: &[u8]) -> StorageResult<()> {
        self.ensure_initialized()?;
        self.metadata.insert(key.to_string(), metadata.to_vec());
        Ok(())
    }

    fn flush(&mut self) -> StorageResult<()> {
        self.ensure_initialized()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::provider::conformance;

    #[test]
    fn rejects_use_before_initialize() {
        let provider = MemoryProvider::new();
        assert!(matches!(
            provider.read("k"),
            Err(StorageError::NotInitialized)
        ));
    }

    #[test]
    fn conforms() {
        let mut provider = MemoryProvider::new();
        provider.initialize(true).unwrap();
        conformance::run_all(&mut provider);
    }
}
