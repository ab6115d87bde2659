// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Randomness Service
//!
//! Provably-fair random numbers, byte strings and seeds. Every value is
//! signed together with its context (user, request id, generation
//! timestamp) so any third party holding the enclave public key can check it.
//!
//! ## Request Lifecycle
//!
//! `Requested -> Generated -> (optionally) Verified`. Records are never
//! mutated once generated. Reusing a request id is rejected unless the
//! configured [`RequestIdPolicy`] is `Overwrite`.
//!
//! ## Verification
//!
//! 1. Exact match against the in-memory record (fast path).
//! 2. Otherwise recompute the digest from the supplied inputs and the
//!    timestamp carried in the proof, then check the signature.
//!
//! The second path lets a different enclave instance verify foreign proofs.

pub mod keys;
pub mod proof;

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rand::rngs::{OsRng, StdRng};
use rand::{Rng, RngCore, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::audit::{AuditEvent, AuditEventType, AuditLog};
use crate::storage::StorageError;
use keys::KeyManager;

/// Upper bound for a single `generate_bytes` call.
pub const MAX_RANDOM_BYTES: usize = 1024 * 1024;
pub const SEED_LEN: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum RandomnessError {
    #[error("randomness service not initialized")]
    NotInitialized,
    #[error("invalid range: min {min} > max {max}")]
    InvalidRange { min: u64, max: u64 },
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("request id already used: {0}")]
    DuplicateRequestId(String),
    #[error("unknown request id: {0}")]
    UnknownRequestId(String),
    #[error("signing failed: {0}")]
    Signing(String),
    #[error("entropy source failed: {0}")]
    Entropy(String),
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("randomness lock poisoned")]
    LockPoisoned,
}

/// What to do when a request id is reused.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestIdPolicy {
    /// Refuse with `InvalidInput`.
    #[default]
    Reject,
    /// Replace the earlier record and log a warning.
    Overwrite,
}

impl FromStr for RequestIdPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reject" => Ok(RequestIdPolicy::Reject),
            "overwrite" => Ok(RequestIdPolicy::Overwrite),
            other => Err(format!("unknown request id policy '{other}'")),
        }
    }
}

impl fmt::Display for RequestIdPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestIdPolicy::Reject => f.write_str("reject"),
            RequestIdPolicy::Overwrite => f.write_str("overwrite"),
        }
    }
}

// =============================================================================
// Records
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NumberRecord {
    pub request_id: String,
    pub user_id: String,
    pub value: u64,
    pub min: u64,
    pub max: u64,
    /// Unix milliseconds, captured once at generation.
    pub timestamp: u64,
    pub proof: String,
    pub created_at: DateTime<Utc>,
    /// Signing key generation the proof was made with.
    #[serde(skip)]
    key_generation: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BytesRecord {
    pub request_id: String,
    pub user_id: String,
    /// Hex encoded.
    pub random_bytes: String,
    pub timestamp: u64,
    pub proof: String,
    pub created_at: DateTime<Utc>,
    /// Signing key generation the proof was made with.
    #[serde(skip)]
    key_generation: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SeedRecord {
    pub request_id: String,
    pub user_id: String,
    /// Hex encoded.
    pub seed: String,
    pub timestamp: u64,
    pub proof: String,
    pub created_at: DateTime<Utc>,
    /// Signing key generation the proof was made with.
    #[serde(skip)]
    key_generation: u64,
}

struct Inner {
    rng: Option<StdRng>,
    numbers: HashMap<String, NumberRecord>,
    bytes: HashMap<String, BytesRecord>,
    seeds: HashMap<String, SeedRecord>,
    /// Bumped on every signing key rotation.
    key_generation: u64,
}

impl Inner {
    fn rng(&mut self) -> Result<&mut StdRng, RandomnessError> {
        self.rng.as_mut().ok_or(RandomnessError::NotInitialized)
    }

    fn is_used(&self, request_id: &str) -> bool {
        self.numbers.contains_key(request_id)
            || self.bytes.contains_key(request_id)
            || self.seeds.contains_key(request_id)
    }

    fn claim_request_id(
        &mut self,
        request_id: &str,
        policy: RequestIdPolicy,
    ) -> Result<(), RandomnessError> {
        if request_id.is_empty() {
            return Err(RandomnessError::InvalidInput("request id is empty".to_string()));
        }
        if !self.is_used(request_id) {
            return Ok(());
        }
        match policy {
            RequestIdPolicy::Reject => Err(RandomnessError::DuplicateRequestId(request_id.to_string())),
            RequestIdPolicy::Overwrite => {
                warn!(request_id = %request_id, "Request id reused, overwriting earlier record");
                self.numbers.remove(request_id);
                self.bytes.remove(request_id);
                self.seeds.remove(request_id);
                Ok(())
            }
        }
    }
}

fn now_millis() -> u64 {
    u64::try_from(Utc::now().timestamp_millis()).unwrap_or(0)
}

// =============================================================================
// Service
// =============================================================================

pub struct RandomnessService {
    inner: Mutex<Inner>,
    keys: Arc<dyn KeyManager>,
    policy: RequestIdPolicy,
    audit: Option<AuditLog>,
}

impl RandomnessService {
    pub fn new(keys: Arc<dyn KeyManager>, policy: RequestIdPolicy) -> Self {
        Self {
            inner: Mutex::new(Inner {
                rng: None,
                numbers: HashMap::new(),
                bytes: HashMap::new(),
                seeds: HashMap::new(),
                key_generation: 0,
            }),
            keys,
            policy,
            audit: None,
        }
    }

    pub fn with_audit(mut self, audit: AuditLog) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Seed the generator from the platform entropy source.
    pub fn initialize(&self) -> Result<(), RandomnessError> {
        let mut inner = self.lock()?;
        let rng = StdRng::from_rng(OsRng)
            .map_err(|e| RandomnessError::Entropy(e.to_string()))?;
        inner.rng = Some(rng);
        info!(policy = %self.policy, "Randomness service initialized");
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.lock().map(|i| i.rng.is_some()).unwrap_or(false)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, RandomnessError> {
        self.inner.lock().map_err(|_| RandomnessError::LockPoisoned)
    }

    fn sign(&self, digest: &[u8; 32], timestamp: u64) -> Result<String, RandomnessError> {
        let signature = self.keys.sign_digest(digest)?;
        Ok(proof::encode_proof(timestamp, &signature))
    }

    fn verify_signature(&self, digest: &[u8; 32], signature: &[u8]) -> bool {
        self.keys.verify_digest(digest, signature)
    }

    fn audit(&self, event: AuditEvent) {
        if let Some(audit) = &self.audit {
            audit.record(event);
        }
    }

    pub fn public_key(&self) -> String {
        self.keys.public_key_hex()
    }

    /// Replace the signing key. Earlier proofs stop verifying.
    pub fn rotate_signing_key(&self) -> Result<(), RandomnessError> {
        let mut inner = self.lock()?;
        self.keys.rotate()?;
        inner.key_generation += 1;
        drop(inner);
        self.audit(AuditEvent::new(AuditEventType::SigningKeyRotated));
        Ok(())
    }

    // ========== Numbers ==========

    /// Uniform value in `[min, max]`.
    pub fn generate_number(
        &self,
        min: u64,
        max: u64,
        user_id: &str,
        request_id: &str,
    ) -> Result<u64, RandomnessError> {
        if min > max {
            return Err(RandomnessError::InvalidRange { min, max });
        }
        let mut inner = self.lock()?;
        inner.rng()?;
        inner.claim_request_id(request_id, self.policy)?;

        let value = inner.rng()?.gen_range(min..=max);
        let timestamp = now_millis();
        let digest = proof::number_digest(value, min, max, user_id, request_id, timestamp)?;
        let proof = self.sign(&digest, timestamp)?;
        let generation = inner.key_generation;

        inner.numbers.insert(
            request_id.to_string(),
            NumberRecord {
                request_id: request_id.to_string(),
                user_id: user_id.to_string(),
                value,
                min,
                max,
                timestamp,
                proof,
                created_at: Utc::now(),
                key_generation: generation,
            },
        );
        drop(inner);

        debug!(request_id = %request_id, user_id = %user_id, "Generated random number");
        self.audit(
            AuditEvent::new(AuditEventType::RandomNumberGenerated)
                .with_user(user_id)
                .with_resource("randomness", request_id)
                .with_details(serde_json::json!({ "min": min, "max": max })),
        );
        Ok(value)
    }

    pub fn get_number_proof(&self, request_id: &str) -> Result<String, RandomnessError> {
        let record = self
            .number_record(request_id)?
            .ok_or_else(|| RandomnessError::UnknownRequestId(request_id.to_string()))?;
        let digest = proof::number_digest(
            record.value,
            record.min,
            record.max,
            &record.user_id,
            &record.request_id,
            record.timestamp,
        )?;
        self.sign(&digest, record.timestamp)
    }

    pub fn number_record(&self, request_id: &str) -> Result<Option<NumberRecord>, RandomnessError> {
        Ok(self.lock()?.numbers.get(request_id).cloned())
    }

    /// Whether a record signed with generation `generation` is still current.
    fn is_current(&self, generation: u64) -> bool {
        self.lock()
            .map(|inner| inner.key_generation == generation)
            .unwrap_or(false)
    }

    pub fn verify_number(
        &self,
        value: u64,
        min: u64,
        max: u64,
        user_id: &str,
        request_id: &str,
        proof: &str,
    ) -> bool {
        if let Ok(Some(record)) = self.number_record(request_id) {
            if record.value == value
                && record.min == min
                && record.max == max
                && record.user_id == user_id
                && record.proof == proof
            {
                return self.is_current(record.key_generation);
            }
        }
        if value < min || value > max {
            return false;
        }
        let Some((timestamp, signature)) = proof::decode_proof(proof) else {
            return false;
        };
        match proof::number_digest(value, min, max, user_id, request_id, timestamp) {
            Ok(digest) => self.verify_signature(&digest, &signature),
            Err(_) => false,
        }
    }

    // ========== Bytes ==========

    pub fn generate_bytes(
        &self,
        length: usize,
        user_id: &str,
        request_id: &str,
    ) -> Result<Vec<u8>, RandomnessError> {
        if length > MAX_RANDOM_BYTES {
            return Err(RandomnessError::InvalidInput(format!(
                "length must not exceed {MAX_RANDOM_BYTES}"
            )));
        }
        let mut inner = self.lock()?;
        inner.rng()?;
        inner.claim_request_id(request_id, self.policy)?;

        let mut bytes = vec![0u8; length];
        inner.rng()?.fill_bytes(&mut bytes);
        let timestamp = now_millis();
        let digest = proof::bytes_digest(&bytes, user_id, request_id, timestamp)?;
        let proof = self.sign(&digest, timestamp)?;
        let generation = inner.key_generation;

        inner.bytes.insert(
            request_id.to_string(),
            BytesRecord {
                request_id: request_id.to_string(),
                user_id: user_id.to_string(),
                random_bytes: hex::encode(&bytes),
                timestamp,
                proof,
                created_at: Utc::now(),
                key_generation: generation,
            },
        );
        drop(inner);

        self.audit(
            AuditEvent::new(AuditEventType::RandomBytesGenerated)
                .with_user(user_id)
                .with_resource("randomness", request_id)
                .with_details(serde_json::json!({ "length": length })),
        );
        Ok(bytes)
    }

    pub fn get_bytes_proof(&self, request_id: &str) -> Result<String, RandomnessError> {
        let record = self
            .bytes_record(request_id)?
            .ok_or_else(|| RandomnessError::UnknownRequestId(request_id.to_string()))?;
        let bytes = hex::decode(&record.random_bytes)
            .map_err(|e| RandomnessError::InvalidInput(e.to_string()))?;
        let digest =
            proof::bytes_digest(&bytes, &record.user_id, &record.request_id, record.timestamp)?;
        self.sign(&digest, record.timestamp)
    }

    pub fn bytes_record(&self, request_id: &str) -> Result<Option<BytesRecord>, RandomnessError> {
        Ok(self.lock()?.bytes.get(request_id).cloned())
    }

    pub fn verify_bytes(&self, bytes: &[u8], user_id: &str, request_id: &str, proof: &str) -> bool {
        if let Ok(Some(record)) = self.bytes_record(request_id) {
            if record.random_bytes == hex::encode(bytes)
                && record.user_id == user_id
                && record.proof == proof
            {
                return self.is_current(record.key_generation);
            }
        }
        let Some((timestamp, signature)) = proof::decode_proof(proof) else {
            return false;
        };
        match proof::bytes_digest(bytes, user_id, request_id, timestamp) {
            Ok(digest) => self.verify_signature(&digest, &signature),
            Err(_) => false,
        }
    }

    // ========== Seeds ==========

    /// 32 random bytes, hex encoded.
    pub fn generate_seed(&self, user_id: &str, request_id: &str) -> Result<String, RandomnessError> {
        let mut inner = self.lock()?;
        inner.rng()?;
        inner.claim_request_id(request_id, self.policy)?;

        let mut raw = [0u8; SEED_LEN];
        inner.rng()?.fill_bytes(&mut raw);
        let seed = hex::encode(raw);
        let timestamp = now_millis();
        let digest = proof::seed_digest(&seed, user_id, request_id, timestamp)?;
        let proof = self.sign(&digest, timestamp)?;
        let generation = inner.key_generation;

        inner.seeds.insert(
            request_id.to_string(),
            SeedRecord {
                request_id: request_id.to_string(),
                user_id: user_id.to_string(),
                seed: seed.clone(),
                timestamp,
                proof,
                created_at: Utc::now(),
                key_generation: generation,
            },
        );
        drop(inner);

        self.audit(
            AuditEvent::new(AuditEventType::SeedGenerated)
                .with_user(user_id)
                .with_resource("randomness", request_id),
        );
        Ok(seed)
    }

    pub fn get_seed_proof(&self, request_id: &str) -> Result<String, RandomnessError> {
        let record = self
            .seed_record(request_id)?
            .ok_or_else(|| RandomnessError::UnknownRequestId(request_id.to_string()))?;
        let digest =
            proof::seed_digest(&record.seed, &record.user_id, &record.request_id, record.timestamp)?;
        self.sign(&digest, record.timestamp)
    }

    pub fn seed_record(&self, request_id: &str) -> Result<Option<SeedRecord>, RandomnessError> {
        Ok(self.lock()?.seeds.get(request_id).cloned())
    }

    pub fn verify_seed(&self, seed: &str, user_id: &str, request_id: &str, proof: &str) -> bool {
        if let Ok(Some(record)) = self.seed_record(request_id) {
            if record.seed == seed && record.user_id == user_id && record.proof == proof {
                return self.is_current(record.key_generation);
            }
        }
        let Some((timestamp, signature)) = proof::decode_proof(proof) else {
            return false;
        };
        match proof::seed_digest(seed, user_id, request_id, timestamp) {
            Ok(digest) => self.verify_signature(&digest, &signature),
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageConfig;
    use crate::storage::PersistentStorageManager;
    use keys::EnclaveKeyManager;

    fn service(policy: RequestIdPolicy) -> RandomnessService {
        let service = RandomnessService::new(Arc::new(EnclaveKeyManager::ephemeral()), policy);
        service.initialize().unwrap();
        service
    }

    #[test]
    fn calls_before_initialize_fail() {
        let service = RandomnessService::new(
            Arc::new(EnclaveKeyManager::ephemeral()),
            RequestIdPolicy::Reject,
        );
        assert!(!service.is_initialized());
        assert!(matches!(
            service.generate_number(1, 10, "u", "r"),
            Err(RandomnessError::NotInitialized)
        ));
    }

    #[test]
    fn numbers_stay_in_range_and_verify() {
        let service = service(RequestIdPolicy::Reject);
        for (i, (min, max)) in [(0u64, 0u64), (1, 6), (10, 1_000_000), (0, u64::MAX)]
            .into_iter()
            .enumerate()
        {
            let request_id = format!("req-{i}");
            let value = service.generate_number(min, max, "alice", &request_id).unwrap();
            assert!(value >= min && value <= max);

            let proof = service.get_number_proof(&request_id).unwrap();
            assert_eq!(proof, service.number_record(&request_id).unwrap().unwrap().proof);
            assert!(service.verify_number(value, min, max, "alice", &request_id, &proof));
        }
    }

    #[test]
    fn altered_fields_fail_verification() {
        let service = service(RequestIdPolicy::Reject);
        let value = service.generate_number(1, 100, "alice", "r1").unwrap();
        let proof = service.get_number_proof("r1").unwrap();
        let other = if value == 100 { 99 } else { value + 1 };

        assert!(!service.verify_number(other, 1, 100, "alice", "r1", &proof));
        assert!(!service.verify_number(value, 1, 100, "bob", "r1", &proof));
        assert!(!service.verify_number(value, 1, 100, "alice", "r2", &proof));
        assert!(!service.verify_number(value, 0, 100, "alice", "r1", &proof));
        assert!(!service.verify_number(value, 1, 100, "alice", "r1", "garbage"));
    }

    #[test]
    fn invalid_range_is_rejected() {
        let service = service(RequestIdPolicy::Reject);
        assert!(matches!(
            service.generate_number(10, 1, "u", "r"),
            Err(RandomnessError::InvalidRange { min: 10, max: 1 })
        ));
    }

    #[test]
    fn foreign_instance_verifies_through_signature() {
        let keys: Arc<dyn KeyManager> = Arc::new(EnclaveKeyManager::ephemeral());
        let generator = RandomnessService::new(Arc::clone(&keys), RequestIdPolicy::Reject);
        generator.initialize().unwrap();
        let verifier = RandomnessService::new(keys, RequestIdPolicy::Reject);

        let seed = generator.generate_seed("alice", "s1").unwrap();
        let proof = generator.get_seed_proof("s1").unwrap();
        assert!(verifier.seed_record("s1").unwrap().is_none());
        assert!(verifier.verify_seed(&seed, "alice", "s1", &proof));
        assert!(!verifier.verify_seed(&seed, "mallory", "s1", &proof));
    }

    #[test]
    fn seed_proof_is_bound_to_seed_and_user() {
        let service = service(RequestIdPolicy::Reject);
        let seed = service.generate_seed("alice", "s1").unwrap();
        assert_eq!(seed.len(), SEED_LEN * 2);
        let proof = service.get_seed_proof("s1").unwrap();
        assert!(service.verify_seed(&seed, "alice", "s1", &proof));

        let other_seed = service.generate_seed("alice", "s2").unwrap();
        assert!(!service.verify_seed(&other_seed, "alice", "s1", &proof));
        assert!(!service.verify_seed(&seed, "bob", "s1", &proof));
    }

    #[test]
    fn bytes_are_bounded_and_verify() {
        let service = service(RequestIdPolicy::Reject);
        assert!(service.generate_bytes(MAX_RANDOM_BYTES + 1, "u", "b0").is_err());
        let empty = service.generate_bytes(0, "u", "b0").unwrap();
        assert!(empty.is_empty());
        let proof = service.get_bytes_proof("b0").unwrap();
        assert!(service.verify_bytes(&empty, "u", "b0", &proof));

        let bytes = service.generate_bytes(48, "u", "b1").unwrap();
        assert_eq!(bytes.len(), 48);
        let proof = service.get_bytes_proof("b1").unwrap();
        assert!(service.verify_bytes(&bytes, "u", "b1", &proof));
        let mut tampered = bytes.clone();
        tampered[0] ^= 1;
        assert!(!service.verify_bytes(&tampered, "u", "b1", &proof));
    }

    #[test]
    fn request_id_reuse_follows_policy() {
        let strict = service(RequestIdPolicy::Reject);
        strict.generate_number(1, 10, "u", "dup").unwrap();
        assert!(matches!(
            strict.generate_seed("u", "dup"),
            Err(RandomnessError::DuplicateRequestId(_))
        ));

        let lenient = service(RequestIdPolicy::Overwrite);
        lenient.generate_number(1, 10, "u", "dup").unwrap();
        lenient.generate_seed("u", "dup").unwrap();
        assert!(lenient.number_record("dup").unwrap().is_none());
        assert!(lenient.seed_record("dup").unwrap().is_some());
    }

    #[test]
    fn unknown_request_id_has_no_proof() {
        let service = service(RequestIdPolicy::Reject);
        assert!(matches!(
            service.get_number_proof("missing"),
            Err(RandomnessError::UnknownRequestId(_))
        ));
        assert!(service.get_seed_proof("missing").is_err());
    }

    #[test]
    fn rotation_invalidates_earlier_proofs() {
        let service = service(RequestIdPolicy::Reject);
        let seed = service.generate_seed("u", "s").unwrap();
        let proof = service.get_seed_proof("s").unwrap();
        assert!(service.verify_seed(&seed, "u", "s", &proof));
        service.rotate_signing_key().unwrap();
        assert!(!service.verify_seed(&seed, "u", "s", &proof));
        // Fresh proofs use the new key.
        assert!(service.verify_seed(&seed, "u", "s", &service.get_seed_proof("s").unwrap()));
    }

    #[test]
    fn generation_is_audited() {
        let storage = Arc::new(PersistentStorageManager::new(StorageConfig::in_memory()));
        storage.initialize().unwrap();
        let audit = AuditLog::new(Arc::clone(&storage));
        let service = RandomnessService::new(
            Arc::new(EnclaveKeyManager::ephemeral()),
            RequestIdPolicy::Reject,
        )
        .with_audit(audit.clone());
        service.initialize().unwrap();
        service.generate_number(1, 2, "u", "audited").unwrap();

        let today = Utc::now().format("%Y-%m-%d").to_string();
        let events = audit.read_events(&today).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, AuditEventType::RandomNumberGenerated);
        assert_eq!(events[0].resource_id.as_deref(), Some("audited"));
    }
}
