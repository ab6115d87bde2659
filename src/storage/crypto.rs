// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Authenticated encryption transform for stored values.
//!
//! ## Format
//!
//! ```text
//! nonce (24 bytes) | XChaCha20-Poly1305 ciphertext + tag
//! ```
//!
//! The caller's context (the storage key) is bound as associated data, so a
//! ciphertext copied under another key fails to authenticate.
//!
//! ## Key Ring
//!
//! Keys are versioned and only ever appended. Encryption always uses the
//! newest key; decryption probes keys newest-to-oldest until one
//! authenticates. The ring lives behind an `RwLock`, and rotation swaps it
//! only after the new key file is durable, so a reader sees either the old
//! ring or the new one.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use base64ct::{Base64, Encoding};
use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    Key, XChaCha20Poly1305, XNonce,
};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::info;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use super::CryptoError;

pub const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 24;
const TAG_LEN: usize = 16;
const KEY_FILE_FORMAT: u32 = 1;
const WRAP_KEY_LABEL: &[u8] = b"tee-oracle-core/key-file-wrap/v1";

// =============================================================================
// Primitives
// =============================================================================

/// Encrypt with a fresh random nonce; output is `nonce | ciphertext`.
pub fn seal(key: &[u8; KEY_LEN], plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = XChaCha20Poly1305::new(Key::from_slice(key));
    let mut nonce = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut nonce);
    let ciphertext = cipher
        .encrypt(
            XNonce::from_slice(&nonce),
            Payload {
                msg: plaintext,
                aad,
            },
        )
        .map_err(|_| CryptoError::EncryptionFailed)?;

    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Inverse of [`seal`].
pub fn open(key: &[u8; KEY_LEN], sealed: &[u8], aad: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if sealed.len() < NONCE_LEN + TAG_LEN {
        return Err(CryptoError::DecryptionFailed);
    }
    let (nonce, ciphertext) = sealed.split_at(NONCE_LEN);
    XChaCha20Poly1305::new(Key::from_slice(key))
        .decrypt(
            XNonce::from_slice(nonce),
            Payload {
                msg: ciphertext,
                aad,
            },
        )
        .map_err(|_| CryptoError::DecryptionFailed)
}

/// Fresh random 256-bit key.
pub fn random_key() -> Zeroizing<[u8; KEY_LEN]> {
    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    OsRng.fill_bytes(key.as_mut());
    key
}

/// Parse a 32-byte key given as hex or base64.
pub fn parse_key(encoded: &str) -> Result<Zeroizing<[u8; KEY_LEN]>, CryptoError> {
    let encoded = encoded.trim();
    let bytes = Zeroizing::new(
        hex::decode(encoded)
            .or_else(|_| Base64::decode_vec(encoded))
            .map_err(|_| CryptoError::InvalidKey("expected hex or base64".to_string()))?,
    );
    let array: [u8; KEY_LEN] = bytes.as_slice().try_into().map_err(|_| {
        CryptoError::InvalidKey(format!("expected {KEY_LEN} bytes, got {}", bytes.len()))
    })?;
    Ok(Zeroizing::new(array))
}

/// Key used to wrap the key file, derived from an operator-supplied key.
fn derive_wrap_key(master: &[u8; KEY_LEN]) -> Result<Zeroizing<[u8; KEY_LEN]>, CryptoError> {
    let mut mac = <Hmac<Sha256> as Mac>::new_from_slice(master)
        .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
    mac.update(WRAP_KEY_LABEL);
    let mut out = Zeroizing::new([0u8; KEY_LEN]);
    out.copy_from_slice(&mac.finalize().into_bytes());
    Ok(out)
}

// =============================================================================
// Key File
// =============================================================================

#[derive(Zeroize, ZeroizeOnDrop)]
struct DataKey {
    version: u32,
    #[zeroize(skip)]
    created_at: DateTime<Utc>,
    bytes: [u8; KEY_LEN],
}

#[derive(Serialize, Deserialize)]
struct KeyFile {
    format: u32,
    active_version: u32,
    wrapped: bool,
    keys: Vec<StoredKey>,
}

#[derive(Serialize, Deserialize)]
struct StoredKey {
    version: u32,
    created_at: DateTime<Utc>,
    /// Base64 key bytes, or base64 of the sealed key when `wrapped`.
    material: String,
}

impl Drop for StoredKey {
    fn drop(&mut self) {
        self.material.zeroize();
    }
}

fn wrap_aad(version: u32) -> Vec<u8> {
    format!("storage-key:v{version}").into_bytes()
}

// =============================================================================
// EncryptionProvider
// =============================================================================

/// Versioned-key AEAD transform.
pub struct EncryptionProvider {
    key_file: Option<PathBuf>,
    wrap_key: Option<Zeroizing<[u8; KEY_LEN]>>,
    ring: RwLock<Vec<DataKey>>,
}

impl EncryptionProvider {
    /// Load the key file at `path`, or create it with a first key.
    ///
    /// When `master_key` is given the key file is wrapped under a key
    /// derived from it, and loading requires the same master key.
    pub fn open(
        path: impl AsRef<Path>,
        master_key: Option<&[u8; KEY_LEN]>,
        create_if_missing: bool,
    ) -> Result<Self, CryptoError> {
        let path = path.as_ref().to_path_buf();
        let wrap_key = master_key.map(derive_wrap_key).transpose()?;

        let ring = match fs::read(&path) {
            Ok(raw) => Self::decode_key_file(&raw, wrap_key.as_deref())?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && create_if_missing => {
                let ring = vec![DataKey {
                    version: 1,
                    created_at: Utc::now(),
                    bytes: *random_key(),
                }];
                Self::persist(&path, &ring, wrap_key.as_deref())?;
                info!(path = %path.display(), "Created storage key file");
                ring
            }
            Err(e) => return Err(CryptoError::KeyFile(e.to_string())),
        };

        Ok(Self {
            key_file: Some(path),
            wrap_key,
            ring: RwLock::new(ring),
        })
    }

    /// Provider whose keys live only in memory.
    pub fn ephemeral() -> Self {
        Self {
            key_file: None,
            wrap_key: None,
            ring: RwLock::new(vec![DataKey {
                version: 1,
                created_at: Utc::now(),
                bytes: *random_key(),
            }]),
        }
    }

    pub fn key_file(&self) -> Option<&Path> {
        self.key_file.as_deref()
    }

    /// Version of the key used for new ciphertexts.
    pub fn active_version(&self) -> Result<u32, CryptoError> {
        let ring = self.read_ring()?;
        ring.last()
            .map(|k| k.version)
            .ok_or_else(|| CryptoError::KeyFile("empty key ring".to_string()))
    }

    pub fn encrypt(&self, plaintext: &[u8], context: Option<&[u8]>) -> Result<Vec<u8>, CryptoError> {
        let ring = self.read_ring()?;
        let key = ring.last().ok_or(CryptoError::EncryptionFailed)?;
        seal(&key.bytes, plaintext, context.unwrap_or_default())
    }

    /// Fails closed: any authentication failure is `DecryptionFailed`.
    pub fn decrypt(&self, ciphertext: &[u8], context: Option<&[u8]>) -> Result<Vec<u8>, CryptoError> {
        let ring = self.read_ring()?;
        let aad = context.unwrap_or_default();
        ring.iter()
            .rev()
            .find_map(|key| open(&key.bytes, ciphertext, aad).ok())
            .ok_or(CryptoError::DecryptionFailed)
    }

    /// Append a fresh key and make it active. Returns the new version.
    ///
    /// Old keys are kept so existing ciphertexts stay readable.
    pub fn rotate_key(&self) -> Result<u32, CryptoError> {
        let mut ring = self
            .ring
            .write()
            .map_err(|_| CryptoError::KeyFile("key ring lock poisoned".to_string()))?;
        let version = ring.last().map(|k| k.version + 1).unwrap_or(1);
        ring.push(DataKey {
            version,
            created_at: Utc::now(),
            bytes: *random_key(),
        });

        if let Some(path) = &self.key_file {
            if let Err(e) = Self::persist(path, &ring, self.wrap_key.as_deref()) {
                ring.pop();
                return Err(e);
            }
        }

        info!(version, "Rotated storage encryption key");
        Ok(version)
    }

    fn read_ring(&self) -> Result<std::sync::RwLockReadGuard<'_, Vec<DataKey>>, CryptoError> {
        self.ring
            .read()
            .map_err(|_| CryptoError::KeyFile("key ring lock poisoned".to_string()))
    }

    fn persist(
        path: &Path,
        ring: &[DataKey],
        wrap_key: Option<&[u8; KEY_LEN]>,
    ) -> Result<(), CryptoError> {
        let keys = ring
            .iter()
            .map(|key| {
                let material = match wrap_key {
                    Some(wrap) => Base64::encode_string(&seal(wrap, &key.bytes, &wrap_aad(key.version))?),
                    None => Base64::encode_string(&key.bytes),
                };
                Ok(StoredKey {
                    version: key.version,
                    created_at: key.created_at,
                    material,
                })
            })
            .collect::<Result<Vec<_>, CryptoError>>()?;
        let file = KeyFile {
            format: KEY_FILE_FORMAT,
            active_version: ring.last().map(|k| k.version).unwrap_or(0),
            wrapped: wrap_key.is_some(),
            keys,
        };
        let json = Zeroizing::new(
            serde_json::to_vec_pretty(&file).map_err(|e| CryptoError::KeyFile(e.to_string()))?,
        );

        let io_err = |e: std::io::Error| CryptoError::KeyFile(e.to_string());
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        // Write to temp file first, then rename for atomicity
        let temp_path = path.with_extension("tmp");
        {
            let mut temp = File::create(&temp_path).map_err(io_err)?;
            temp.write_all(&json).map_err(io_err)?;
            temp.sync_all().map_err(io_err)?;
        }
        fs::rename(&temp_path, path).map_err(io_err)?;
        Ok(())
    }

    fn decode_key_file(
        raw: &[u8],
        wrap_key: Option<&[u8; KEY_LEN]>,
    ) -> Result<Vec<DataKey>, CryptoError> {
        let file: KeyFile =
            serde_json::from_slice(raw).map_err(|e| CryptoError::KeyFile(e.to_string()))?;
        if file.format != KEY_FILE_FORMAT {
            return Err(CryptoError::KeyFile(format!(
                "unsupported key file format {}",
                file.format
            )));
        }
        if file.wrapped != wrap_key.is_some() {
            return Err(CryptoError::KeyFile(
                "key file wrapping does not match configured encryption key".to_string(),
            ));
        }

        let mut ring = Vec::with_capacity(file.keys.len());
        for stored in &file.keys {
            let decoded = Zeroizing::new(
                Base64::decode_vec(&stored.material)
                    .map_err(|e| CryptoError::KeyFile(e.to_string()))?,
            );
            let bytes = match wrap_key {
                Some(wrap) => Zeroizing::new(open(wrap, &decoded, &wrap_aad(stored.version))?),
                None => decoded,
            };
            let bytes: [u8; KEY_LEN] = bytes
                .as_slice()
                .try_into()
                .map_err(|_| CryptoError::InvalidKey("stored key has wrong length".to_string()))?;
            ring.push(DataKey {
                version: stored.version,
                created_at: stored.created_at,
                bytes,
            });
        }
        ring.sort_by_key(|k| k.version);
        if ring.last().map(|k| k.version) != Some(file.active_version) {
            return Err(CryptoError::KeyFile(
                "active key version is not the newest key".to_string(),
            ));
        }
        Ok(ring)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn round_trips_empty_and_large_values() {
        let provider = EncryptionProvider::ephemeral();
        let mut large = vec![0u8; 1024 * 1024];
        OsRng.fill_bytes(&mut large);

        for value in [Vec::new(), large] {
            let sealed = provider.encrypt(&value, Some(b"k")).unwrap();
            assert_eq!(provider.decrypt(&sealed, Some(b"k")).unwrap(), value);
        }
    }

    #[test]
    fn context_is_authenticated() {
        let provider = EncryptionProvider::ephemeral();
        let sealed = provider.encrypt(b"price=42", Some(b"feeds/a")).unwrap();
        assert!(matches!(
            provider.decrypt(&sealed, Some(b"feeds/b")),
            Err(CryptoError::DecryptionFailed)
        ));
        assert!(provider.decrypt(&sealed, None).is_err());
    }

    #[test]
    fn tampering_fails_closed() {
        let provider = EncryptionProvider::ephemeral();
        let mut sealed = provider.encrypt(b"payload", None).unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0x01;
        assert!(matches!(
            provider.decrypt(&sealed, None),
            Err(CryptoError::DecryptionFailed)
        ));
        assert!(provider.decrypt(&sealed[..10], None).is_err());
    }

    #[test]
    fn rotation_keeps_old_ciphertexts_readable() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("keys/storage.keys.json");
        let provider = EncryptionProvider::open(&path, None, true).unwrap();
        let before = provider.encrypt(b"old", None).unwrap();
        let file_before = fs::read(&path).unwrap();

        assert_eq!(provider.rotate_key().unwrap(), 2);
        assert_eq!(provider.active_version().unwrap(), 2);
        assert_ne!(fs::read(&path).unwrap(), file_before);

        let after = provider.encrypt(b"new", None).unwrap();
        assert_eq!(provider.decrypt(&before, None).unwrap(), b"old");
        assert_eq!(provider.decrypt(&after, None).unwrap(), b"new");

        let reopened = EncryptionProvider::open(&path, None, false).unwrap();
        assert_eq!(reopened.active_version().unwrap(), 2);
        assert_eq!(reopened.decrypt(&before, None).unwrap(), b"old");
        assert_eq!(reopened.decrypt(&after, None).unwrap(), b"new");
    }

    #[test]
    fn new_key_is_not_the_old_key() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("k.json");
        let provider = EncryptionProvider::open(&path, None, true).unwrap();
        provider.rotate_key().unwrap();
        let after = provider.encrypt(b"new", None).unwrap();

        // Drop the newest key from the file: the old key alone must not open it.
        let mut file: KeyFile = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        file.keys.pop();
        file.active_version = 1;
        fs::write(&path, serde_json::to_vec(&file).unwrap()).unwrap();

        let old_only = EncryptionProvider::open(&path, None, false).unwrap();
        assert!(old_only.decrypt(&after, None).is_err());
    }

    #[test]
    fn wrapped_key_file_requires_master_key() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("k.json");
        let master = [7u8; KEY_LEN];
        let provider = EncryptionProvider::open(&path, Some(&master), true).unwrap();
        let sealed = provider.encrypt(b"secret", None).unwrap();

        let raw = fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"wrapped\": true"));

        assert!(EncryptionProvider::open(&path, None, false).is_err());
        assert!(EncryptionProvider::open(&path, Some(&[8u8; KEY_LEN]), false).is_err());

        let reopened = EncryptionProvider::open(&path, Some(&master), false).unwrap();
        assert_eq!(reopened.decrypt(&sealed, None).unwrap(), b"secret");
    }

    #[test]
    fn missing_key_file_without_create_is_an_error() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            EncryptionProvider::open(dir.path().join("absent.json"), None, false),
            Err(CryptoError::KeyFile(_))
        ));
    }

    #[test]
    fn parses_hex_and_base64_keys() {
        let hex_key = "11".repeat(KEY_LEN);
        assert_eq!(*parse_key(&hex_key).unwrap(), [0x11u8; KEY_LEN]);
        let b64 = Base64::encode_string(&[0x22u8; KEY_LEN]);
        assert_eq!(*parse_key(&b64).unwrap(), [0x22u8; KEY_LEN]);
        assert!(parse_key("abcd").is_err());
    }
}
