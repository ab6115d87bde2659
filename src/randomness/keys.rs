// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Enclave signing key for randomness proofs.
//!
//! secp256k1 ECDSA with deterministic (RFC 6979) nonces, so re-signing the
//! same digest reproduces the same proof. The private key is kept as PKCS#8
//! PEM in persistent storage (encrypted at rest) and never leaves the
//! enclave.

use std::sync::{Arc, RwLock};

use k256::ecdsa::signature::hazmat::{PrehashSigner, PrehashVerifier};
use k256::ecdsa::{Signature, SigningKey};
use k256::elliptic_curve::rand_core::OsRng;
use k256::pkcs8::{DecodePrivateKey, EncodePrivateKey, LineEnding};
use tracing::info;

use super::RandomnessError;
use crate::storage::{PersistentStorageManager, WriteOptions};

/// Storage key of the PEM encoded signing key.
pub(crate) const SIGNING_KEY_STORAGE_KEY: &str = "__enclave__/randomness/signing_key.pem";

/// Signs and verifies SHA-256 digests.
pub trait KeyManager: Send + Sync {
    /// Fixed-size (r || s) signature over `digest`.
    fn sign_digest(&self, digest: &[u8; 32]) -> Result<Vec<u8>, RandomnessError>;

    /// Verify against the current public key. Malformed signatures are `false`.
    fn verify_digest(&self, digest: &[u8; 32], signature: &[u8]) -> bool;

    /// Compressed SEC1 public key, hex encoded.
    fn public_key_hex(&self) -> String;

    /// Replace the signing key. Proofs made with the old key stop verifying.
    fn rotate(&self) -> Result<(), RandomnessError>;
}

pub struct EnclaveKeyManager {
    key: RwLock<SigningKey>,
    storage: Option<Arc<PersistentStorageManager>>,
}

impl EnclaveKeyManager {
    /// In-memory key, lost on restart.
    pub fn ephemeral() -> Self {
        Self {
            key: RwLock::new(SigningKey::random(&mut OsRng)),
            storage: None,
        }
    }

    /// Load the key from storage, creating and persisting one if absent.
    pub fn load_or_create(storage: Arc<PersistentStorageManager>) -> Result<Self, RandomnessError> {
        let key = match storage.read_internal(SIGNING_KEY_STORAGE_KEY)? {
            Some(pem) => {
                let pem = std::str::from_utf8(&pem)
                    .map_err(|e| RandomnessError::Signing(format!("signing key is not UTF-8: {e}")))?;
                SigningKey::from_pkcs8_pem(pem)
                    .map_err(|e| RandomnessError::Signing(format!("invalid signing key: {e}")))?
            }
            None => {
                let key = SigningKey::random(&mut OsRng);
                persist(&storage, &key)?;
                info!("Generated randomness signing key");
                key
            }
        };
        Ok(Self {
            key: RwLock::new(key),
            storage: Some(storage),
        })
    }

    fn read_key(&self) -> Result<std::sync::RwLockReadGuard<'_, SigningKey>, RandomnessError> {
        self.key.read().map_err(|_| RandomnessError::LockPoisoned)
    }
}

fn persist(storage: &PersistentStorageManager, key: &SigningKey) -> Result<(), RandomnessError> {
    let pem = key
        .to_pkcs8_pem(LineEnding::LF)
        .map_err(|e| RandomnessError::Signing(format!("failed to encode signing key: {e}")))?;
    storage.write_internal(
        SIGNING_KEY_STORAGE_KEY,
        pem.as_bytes(),
        WriteOptions::default().with_content_type("application/x-pem-file"),
    )?;
    Ok(())
}

impl KeyManager for EnclaveKeyManager {
    fn sign_digest(&self, digest: &[u8; 32]) -> Result<Vec<u8>, RandomnessError> {
        let key = self.read_key()?;
        let signature: Signature = key
            .sign_prehash(digest)
            .map_err(|e| RandomnessError::Signing(e.to_string()))?;
        Ok(signature.to_bytes().to_vec())
    }

    fn verify_digest(&self, digest: &[u8; 32], signature: &[u8]) -> bool {
        let Ok(signature) = Signature::from_slice(signature) else {
            return false;
        };
        match self.read_key() {
            Ok(key) => key.verifying_key().verify_prehash(digest, &signature).is_ok(),
            Err(_) => false,
        }
    }

    fn public_key_hex(&self) -> String {
        match self.read_key() {
            Ok(key) => hex::encode(key.verifying_key().to_encoded_point(true).as_bytes()),
            Err(_) => String::new(),
        }
    }

    fn rotate(&self) -> Result<(), RandomnessError> {
        let fresh = SigningKey::random(&mut OsRng);
        if let Some(storage) = &self.storage {
            persist(storage, &fresh)?;
        }
        let mut key = self.key.write().map_err(|_| RandomnessError::LockPoisoned)?;
        *key = fresh;
        info!("Rotated randomness signing key");
        Ok(())
    }
}
