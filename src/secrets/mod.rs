// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Secret Manager
//!
//! Per-user named secrets. Values are sealed with a per-instance key before
//! they enter the in-memory map, so plaintext only exists transiently inside
//! [`SecretManager::get`] and the export path.
//!
//! ## Persistence
//!
//! Both records live in the storage manager's internal namespace, out of
//! reach of host storage calls:
//!
//! ```text
//! __enclave__/secrets/instance_key   32 raw key bytes (encrypted at rest by storage)
//! __enclave__/secrets/user_secrets   {"version":1,"users":{user:{name:b64(sealed)}}}
//! ```
//!
//! Sealed values are bound to `user_id/name` as associated data, so moving a
//! ciphertext to another slot in the document fails to decrypt.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use base64ct::{Base64, Encoding};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use zeroize::{Zeroize, Zeroizing};

use crate::audit::{AuditEvent, AuditEventType, AuditLog};
use crate::storage::crypto::{self, KEY_LEN};
use crate::storage::{CryptoError, PersistentStorageManager, StorageError, WriteOptions};

/// Storage key of the instance encryption key.
pub(crate) const INSTANCE_KEY_STORAGE_KEY: &str = "__enclave__/secrets/instance_key";
/// Storage key of the sealed secrets document.
pub(crate) const SECRETS_STORAGE_KEY: &str = "__enclave__/secrets/user_secrets";

const DOCUMENT_VERSION: u32 = 1;

#[derive(Debug, thiserror::Error)]
pub enum SecretError {
    #[error("secret manager not initialized")]
    NotInitialized,
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("secrets document error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("secret manager lock poisoned")]
    LockPoisoned,
}

pub type SecretResult<T> = Result<T, SecretError>;

#[derive(Serialize, Deserialize)]
struct SecretsDocument {
    version: u32,
    users: BTreeMap<String, BTreeMap<String, String>>,
}

#[derive(Default)]
struct Inner {
    key: Option<Zeroizing<[u8; KEY_LEN]>>,
    /// user_id -> name -> sealed value
    secrets: HashMap<String, BTreeMap<String, Vec<u8>>>,
}

impl Inner {
    fn key(&self) -> SecretResult<&[u8; KEY_LEN]> {
        self.key.as_deref().ok_or(SecretError::NotInitialized)
    }

    fn wipe_secrets(&mut self) {
        for (_, names) in self.secrets.iter_mut() {
            for (_, sealed) in names.iter_mut() {
                sealed.zeroize();
            }
        }
        self.secrets.clear();
    }

    /// Put back the slot a failed mutation replaced (`None`: it was empty).
    fn restore(&mut self, user_id: &str, name: &str, previous: Option<Vec<u8>>) {
        let names = self.secrets.entry(user_id.to_string()).or_default();
        let replaced = match previous {
            Some(sealed) => names.insert(name.to_string(), sealed),
            None => names.remove(name),
        };
        if let Some(mut replaced) = replaced {
            replaced.zeroize();
        }
        if names.is_empty() {
            self.secrets.remove(user_id);
        }
    }

    fn document(&self) -> SecretsDocument {
        let users = self
            .secrets
            .iter()
            .map(|(user, names)| {
                let names = names
                    .iter()
                    .map(|(name, sealed)| (name.clone(), Base64::encode_string(sealed)))
                    .collect();
                (user.clone(), names)
            })
            .collect();
        SecretsDocument {
            version: DOCUMENT_VERSION,
            users,
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.wipe_secrets();
    }
}

fn aad(user_id: &str, name: &str) -> Vec<u8> {
    format!("{user_id}/{name}").into_bytes()
}

fn validate(user_id: &str, name: &str) -> SecretResult<()> {
    if user_id.is_empty() || name.is_empty() {
        return Err(SecretError::InvalidInput(
            "user id and secret name must not be empty".to_string(),
        ));
    }
    // Keeps the `user_id/name` binding unambiguous.
    if user_id.contains('/') {
        return Err(SecretError::InvalidInput(
            "user id must not contain '/'".to_string(),
        ));
    }
    Ok(())
}

pub struct SecretManager {
    inner: Mutex<Inner>,
    storage: Option<Arc<PersistentStorageManager>>,
    audit: Option<AuditLog>,
}

impl SecretManager {
    /// Secrets held in memory only; the instance key dies with the process.
    pub fn in_memory() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            storage: None,
            audit: None,
        }
    }

    /// Secrets and instance key persisted through `storage`.
    pub fn with_storage(storage: Arc<PersistentStorageManager>) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            storage: Some(storage),
            audit: None,
        }
    }

    pub fn with_audit(mut self, audit: AuditLog) -> Self {
        self.audit = Some(audit);
        self
    }

    fn lock(&self) -> SecretResult<MutexGuard<'_, Inner>> {
        self.inner.lock().map_err(|_| SecretError::LockPoisoned)
    }

    fn audit(&self, event: AuditEvent) {
        if let Some(audit) = &self.audit {
            audit.record(event);
        }
    }

    /// Load or create the instance key, then load persisted secrets.
    /// Calling it again is a no-op.
    pub fn initialize(&self) -> SecretResult<()> {
        let mut inner = self.lock()?;
        if inner.key.is_some() {
            return Ok(());
        }

        let key = match &self.storage {
            Some(storage) => load_or_create_key(storage)?,
            None => crypto::random_key(),
        };
        match &self.storage {
            Some(storage) => {
                let loaded = load_into(&mut inner, storage)?;
                info!(secrets = loaded, "Secret manager initialized");
            }
            None => info!("Secret manager initialized (in-memory)"),
        }
        inner.key = Some(key);
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.inner
            .lock()
            .map(|inner| inner.key.is_some())
            .unwrap_or(false)
    }

    /// Store or replace a secret. Returns `true` when the name was new for
    /// this user, `false` when an existing value was replaced.
    pub fn store(&self, user_id: &str, name: &str, value: &str) -> SecretResult<bool> {
        let mut inner = self.lock()?;
        let key = inner.key()?;
        validate(user_id, name)?;
        let sealed = crypto::seal(key, value.as_bytes(), &aad(user_id, name))?;

        let previous = inner
            .secrets
            .entry(user_id.to_string())
            .or_default()
            .insert(name.to_string(), sealed);
        if let Err(e) = self.persist(&inner) {
            inner.restore(user_id, name, previous);
            return Err(e);
        }
        drop(inner);
        let created = match previous {
            Some(mut old) => {
                old.zeroize();
                false
            }
            None => true,
        };

        debug!(user_id = %user_id, secret = %name, created, "Stored secret");
        self.audit(
            AuditEvent::new(AuditEventType::SecretStored)
                .with_user(user_id)
                .with_resource("secret", name),
        );
        Ok(created)
    }

    /// Decrypted value, or `None` when the user has no such secret.
    pub fn get(&self, user_id: &str, name: &str) -> SecretResult<Option<Zeroizing<String>>> {
        let inner = self.lock()?;
        let key = inner.key()?;
        validate(user_id, name)?;

        let Some(sealed) = inner.secrets.get(user_id).and_then(|names| names.get(name)) else {
            return Ok(None);
        };
        decrypt(key, user_id, name, sealed).map(Some)
    }

    /// Remove a secret. Returns `false` when it did not exist.
    pub fn delete(&self, user_id: &str, name: &str) -> SecretResult<bool> {
        let mut inner = self.lock()?;
        inner.key()?;
        validate(user_id, name)?;

        let Some(names) = inner.secrets.get_mut(user_id) else {
            return Ok(false);
        };
        let Some(mut sealed) = names.remove(name) else {
            return Ok(false);
        };
        if names.is_empty() {
            inner.secrets.remove(user_id);
        }

        if let Err(e) = self.persist(&inner) {
            inner.restore(user_id, name, Some(sealed));
            return Err(e);
        }
        drop(inner);
        sealed.zeroize();

        debug!(user_id = %user_id, secret = %name, "Deleted secret");
        self.audit(
            AuditEvent::new(AuditEventType::SecretDeleted)
                .with_user(user_id)
                .with_resource("secret", name),
        );
        Ok(true)
    }

    /// Names of the user's secrets.
    pub fn list(&self, user_id: &str) -> SecretResult<BTreeSet<String>> {
        let inner = self.lock()?;
        inner.key()?;
        Ok(inner
            .secrets
            .get(user_id)
            .map(|names| names.keys().cloned().collect())
            .unwrap_or_default())
    }

    /// All of a user's secrets decrypted into a JSON object `{name: value}`.
    pub fn get_user_secrets_json(&self, user_id: &str) -> SecretResult<Zeroizing<String>> {
        let inner = self.lock()?;
        let key = inner.key()?;

        let mut plain: BTreeMap<&str, Zeroizing<String>> = BTreeMap::new();
        if let Some(names) = inner.secrets.get(user_id) {
            for (name, sealed) in names {
                plain.insert(name.as_str(), decrypt(key, user_id, name, sealed)?);
            }
        }
        let exported: BTreeMap<&str, &str> =
            plain.iter().map(|(name, value)| (*name, value.as_str())).collect();
        Ok(Zeroizing::new(serde_json::to_string(&exported)?))
    }

    /// Write the sealed map to storage. `false` when no storage is attached.
    pub fn save_to_persistent_storage(&self) -> SecretResult<bool> {
        let inner = self.lock()?;
        inner.key()?;
        if self.storage.is_none() {
            return Ok(false);
        }
        self.persist(&inner)?;
        Ok(true)
    }

    /// Replace the in-memory map with the persisted one. Returns the number
    /// of secrets loaded.
    pub fn load_from_persistent_storage(&self) -> SecretResult<usize> {
        let mut inner = self.lock()?;
        inner.key()?;
        match &self.storage {
            Some(storage) => load_into(&mut inner, storage),
            None => Ok(0),
        }
    }

    fn persist(&self, inner: &Inner) -> SecretResult<()> {
        let Some(storage) = &self.storage else {
            return Ok(());
        };
        let document = Zeroizing::new(serde_json::to_vec(&inner.document())?);
        storage.write_internal(
            SECRETS_STORAGE_KEY,
            &document,
            WriteOptions::default().with_content_type("application/json"),
        )?;
        Ok(())
    }
}

fn decrypt(
    key: &[u8; KEY_LEN],
    user_id: &str,
    name: &str,
    sealed: &[u8],
) -> SecretResult<Zeroizing<String>> {
    let plain = Zeroizing::new(crypto::open(key, sealed, &aad(user_id, name))?);
    let value = std::str::from_utf8(&plain).map_err(|_| CryptoError::DecryptionFailed)?;
    Ok(Zeroizing::new(value.to_string()))
}

fn load_or_create_key(
    storage: &PersistentStorageManager,
) -> SecretResult<Zeroizing<[u8; KEY_LEN]>> {
    match storage.read_internal(INSTANCE_KEY_STORAGE_KEY)? {
        Some(bytes) => {
            let bytes = Zeroizing::new(bytes);
            let key: [u8; KEY_LEN] = bytes.as_slice().try_into().map_err(|_| {
                CryptoError::InvalidKey(format!(
                    "instance key must be {KEY_LEN} bytes, got {}",
                    bytes.len()
                ))
            })?;
            Ok(Zeroizing::new(key))
        }
        None => {
            let key = crypto::random_key();
            storage.write_internal(INSTANCE_KEY_STORAGE_KEY, key.as_ref(), WriteOptions::default())?;
            info!("Generated secret manager instance key");
            Ok(key)
        }
    }
}

fn load_into(inner: &mut Inner, storage: &PersistentStorageManager) -> SecretResult<usize> {
    let Some(raw) = storage.read_internal(SECRETS_STORAGE_KEY)? else {
        inner.wipe_secrets();
        return Ok(0);
    };
    let raw = Zeroizing::new(raw);
    let document: SecretsDocument = serde_json::from_slice(&raw)?;
    if document.version != DOCUMENT_VERSION {
        warn!(version = document.version, "Unexpected secrets document version");
    }

    let mut secrets: HashMap<String, BTreeMap<String, Vec<u8>>> = HashMap::new();
    let mut count = 0;
    for (user, names) in document.users {
        let mut decoded = BTreeMap::new();
        for (name, sealed) in names {
            let sealed = Base64::decode_vec(&sealed).map_err(|_| {
                SecretError::InvalidInput(format!("secret '{name}' is not valid base64"))
            })?;
            decoded.insert(name, sealed);
            count += 1;
        }
        if !decoded.is_empty() {
            secrets.insert(user, decoded);
        }
    }

    inner.wipe_secrets();
    inner.secrets = secrets;
    Ok(count)
}
