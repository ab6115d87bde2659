// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Enclave composition root.
//!
//! Builds every component from one [`EnclaveConfig`] in dependency order:
//! storage first, since the audit log, signing key and secrets all live in
//! it.

use std::sync::Arc;

use tracing::info;

use crate::attestation::{AttestationManager, MeasurementPolicy};
use crate::audit::{AuditEvent, AuditEventType, AuditLog};
use crate::compliance::ComplianceGate;
use crate::config::EnclaveConfig;
use crate::error::{EnclaveError, EnclaveResult};
use crate::randomness::keys::EnclaveKeyManager;
use crate::randomness::RandomnessService;
use crate::secrets::SecretManager;
use crate::storage::{AutoFlusher, PersistentStorageManager};

pub struct Enclave {
    pub storage: Arc<PersistentStorageManager>,
    pub attestation: AttestationManager,
    pub randomness: RandomnessService,
    pub secrets: SecretManager,
    pub compliance: ComplianceGate,
    pub audit: AuditLog,
}

impl Enclave {
    /// Construct and initialize all components.
    pub fn build(config: &EnclaveConfig) -> EnclaveResult<Self> {
        config.validate()?;

        let storage = Arc::new(PersistentStorageManager::new(config.storage.clone()));
        storage.initialize()?;
        let audit = AuditLog::new(Arc::clone(&storage));

        let policy =
            MeasurementPolicy::from_hex(&config.expected_mr_enclave, &config.expected_mr_signer)?;
        let pck_root = config
            .pck_root_cert
            .as_ref()
            .map(|path| {
                std::fs::read(path).map_err(|e| {
                    EnclaveError::InvalidInput(format!("read {}: {e}", path.display()))
                })
            })
            .transpose()?;
        let attestation =
            AttestationManager::new(config.attestation_mode, policy, pck_root.as_deref())?;

        let keys = EnclaveKeyManager::load_or_create(Arc::clone(&storage))?;
        let randomness = RandomnessService::new(Arc::new(keys), config.request_id_policy)
            .with_audit(audit.clone());
        randomness.initialize()?;

        let secrets = SecretManager::with_storage(Arc::clone(&storage)).with_audit(audit.clone());
        secrets.initialize()?;

        let compliance =
            ComplianceGate::new(config.compliance_cache_capacity).with_audit(audit.clone());

        info!(
            provider = storage.provider_kind().as_str(),
            attestation = attestation.is_available(),
            "Enclave components initialized"
        );

        Ok(Self {
            storage,
            attestation,
            randomness,
            secrets,
            compliance,
            audit,
        })
    }

    /// Rotate the storage encryption key and record it in the audit log.
    pub fn rotate_storage_key(&self) -> EnclaveResult<u32> {
        let version = self.storage.rotate_key()?;
        self.audit.record(
            AuditEvent::new(AuditEventType::StorageKeyRotated)
                .with_details(serde_json::json!({ "key_version": version })),
        );
        Ok(version)
    }

    /// Background flusher when auto-flush is enabled.
    pub fn auto_flusher(&self) -> Option<AutoFlusher> {
        self.storage
            .config()
            .enable_auto_flush
            .then(|| AutoFlusher::new(Arc::clone(&self.storage)))
    }

    /// Persist secrets and flush storage.
    pub fn shutdown(&self) -> EnclaveResult<()> {
        self.secrets.save_to_persistent_storage()?;
        self.storage.flush()?;
        info!("Enclave state flushed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attestation::AttestationMode;
    use crate::config::StorageConfig;
    use crate::storage::ProviderKind;
    use tempfile::TempDir;

    fn config_at(dir: &TempDir) -> EnclaveConfig {
        EnclaveConfig {
            storage: StorageConfig::at(dir.path(), ProviderKind::Sled),
            attestation_mode: AttestationMode::Simulation,
            ..EnclaveConfig::default()
        }
    }

    #[test]
    fn state_survives_restart() {
        let dir = TempDir::new().unwrap();
        let public_key;
        {
            let enclave = Enclave::build(&config_at(&dir)).unwrap();
            enclave.secrets.store("u", "api", "token").unwrap();
            public_key = enclave.randomness.public_key();
            enclave.shutdown().unwrap();
        }

        let enclave = Enclave::build(&config_at(&dir)).unwrap();
        assert_eq!(enclave.randomness.public_key(), public_key);
        assert_eq!(
            enclave.secrets.get("u", "api").unwrap().as_deref().map(String::as_str),
            Some("token")
        );
    }

    #[test]
    fn invalid_configuration_is_rejected() {
        let config = EnclaveConfig {
            storage: StorageConfig {
                compression_level: 42,
                ..StorageConfig::in_memory()
            },
            ..EnclaveConfig::default()
        };
        assert!(matches!(
            Enclave::build(&config),
            Err(EnclaveError::InvalidInput(_))
        ));
    }

    #[test]
    fn auto_flusher_follows_config() {
        let dir = TempDir::new().unwrap();
        let enclave = Enclave::build(&config_at(&dir)).unwrap();
        assert!(enclave.auto_flusher().is_some());

        let config = EnclaveConfig {
            storage: StorageConfig::in_memory(),
            attestation_mode: AttestationMode::Simulation,
            ..EnclaveConfig::default()
        };
        assert!(Enclave::build(&config).unwrap().auto_flusher().is_none());
    }
}
