// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! Configuration is supplied once at enclave start-up, either from the
//! environment ([`EnclaveConfig::from_env`]) or as a JSON document handed over
//! by the host ([`EnclaveConfig::from_json`]). JSON field names are camelCase
//! (`storagePath`, `enableEncryption`, ...).
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `TEE_STORAGE_PATH` | Root directory of persistent storage | `/data/tee` |
//! | `TEE_STORAGE_PROVIDER` | `file`, `occlum`, `redb`, `sled` or `memory` | `file` |
//! | `TEE_ENABLE_ENCRYPTION` | Encrypt stored values | `true` |
//! | `TEE_ENCRYPTION_KEY` | 32-byte hex/base64 key wrapping the key file | unset |
//! | `TEE_ENABLE_COMPRESSION` | Compress stored values | `true` |
//! | `TEE_COMPRESSION_LEVEL` | 0-9, 0 stores uncompressed, higher keeps LZ4 output for smaller gains | `6` |
//! | `TEE_MAX_CHUNK_SIZE` | Values larger than this are chunked (bytes) | `4194304` |
//! | `TEE_CREATE_IF_NOT_EXISTS` | Create storage on first start | `true` |
//! | `TEE_ENABLE_AUTO_FLUSH` | Flush storage periodically | `true` |
//! | `TEE_AUTO_FLUSH_INTERVAL_MS` | Auto-flush period | `5000` |
//! | `TEE_ENABLE_CACHING` | Cache decrypted values | `true` |
//! | `TEE_CACHE_SIZE_BYTES` | Cache budget | `104857600` |
//! | `TEE_ENABLE_LOGGING` | Emit logs at all | `true` |
//! | `TEE_LOG_LEVEL` | Level when `RUST_LOG` is unset | `info` |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `TEE_ATTESTATION_MODE` | `hardware` or `simulation` | `hardware` |
//! | `TEE_EXPECTED_MR_ENCLAVE` | Hex MRENCLAVE accepted by verification | unset |
//! | `TEE_EXPECTED_MR_SIGNER` | Hex MRSIGNER accepted by verification | unset |
//! | `TEE_PCK_ROOT_CERT` | Intel SGX root CA (PEM or DER) anchoring hardware quotes | unset |
//! | `TEE_REQUEST_ID_POLICY` | `reject` or `overwrite` reused request ids | `reject` |
//! | `TEE_COMPLIANCE_CACHE_CAPACITY` | Cached compliance verdicts | `1024` |

use std::env;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::attestation::AttestationMode;
use crate::randomness::RequestIdPolicy;
use crate::storage::compression::MAX_LEVEL;
use crate::storage::crypto::parse_key;
use crate::storage::paths::DATA_ROOT;
use crate::storage::ProviderKind;

pub const STORAGE_PATH_ENV: &str = "TEE_STORAGE_PATH";
pub const STORAGE_PROVIDER_ENV: &str = "TEE_STORAGE_PROVIDER";
pub const ENABLE_ENCRYPTION_ENV: &str = "TEE_ENABLE_ENCRYPTION";
pub const ENCRYPTION_KEY_ENV: &str = "TEE_ENCRYPTION_KEY";
pub const ENABLE_COMPRESSION_ENV: &str = "TEE_ENABLE_COMPRESSION";
pub const COMPRESSION_LEVEL_ENV: &str = "TEE_COMPRESSION_LEVEL";
pub const MAX_CHUNK_SIZE_ENV: &str = "TEE_MAX_CHUNK_SIZE";
pub const CREATE_IF_NOT_EXISTS_ENV: &str = "TEE_CREATE_IF_NOT_EXISTS";
pub const ENABLE_AUTO_FLUSH_ENV: &str = "TEE_ENABLE_AUTO_FLUSH";
pub const AUTO_FLUSH_INTERVAL_MS_ENV: &str = "TEE_AUTO_FLUSH_INTERVAL_MS";
pub const ENABLE_CACHING_ENV: &str = "TEE_ENABLE_CACHING";
pub const CACHE_SIZE_BYTES_ENV: &str = "TEE_CACHE_SIZE_BYTES";
pub const ENABLE_LOGGING_ENV: &str = "TEE_ENABLE_LOGGING";
pub const LOG_LEVEL_ENV: &str = "TEE_LOG_LEVEL";
/// Shared with other services in the deployment.
pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";
pub const ATTESTATION_MODE_ENV: &str = "TEE_ATTESTATION_MODE";
pub const EXPECTED_MR_ENCLAVE_ENV: &str = "TEE_EXPECTED_MR_ENCLAVE";
pub const EXPECTED_MR_SIGNER_ENV: &str = "TEE_EXPECTED_MR_SIGNER";
pub const PCK_ROOT_CERT_ENV: &str = "TEE_PCK_ROOT_CERT";
pub const REQUEST_ID_POLICY_ENV: &str = "TEE_REQUEST_ID_POLICY";
pub const COMPLIANCE_CACHE_CAPACITY_ENV: &str = "TEE_COMPLIANCE_CACHE_CAPACITY";

pub const DEFAULT_COMPRESSION_LEVEL: u32 = 6;
pub const DEFAULT_MAX_CHUNK_SIZE: usize = 4 * 1024 * 1024;
pub const DEFAULT_AUTO_FLUSH_INTERVAL_MS: u64 = 5_000;
pub const DEFAULT_CACHE_SIZE_BYTES: usize = 100 * 1024 * 1024;
pub const DEFAULT_COMPLIANCE_CACHE_CAPACITY: usize = 1024;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {name}: {value}")]
    InvalidValue { name: &'static str, value: String },
    #[error("invalid configuration: {0}")]
    Invalid(String),
    #[error("malformed configuration document: {0}")]
    Json(#[from] serde_json::Error),
}

// =============================================================================
// Storage
// =============================================================================

/// Options of the persistent storage manager.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct StorageConfig {
    pub storage_path: PathBuf,
    pub provider: ProviderKind,
    pub enable_encryption: bool,
    /// Operator key (hex or base64, 32 bytes) wrapping the key file.
    pub encryption_key: Option<String>,
    pub enable_compression: bool,
    pub compression_level: u32,
    pub max_chunk_size: usize,
    pub create_if_not_exists: bool,
    pub enable_auto_flush: bool,
    pub auto_flush_interval_ms: u64,
    pub enable_caching: bool,
    pub cache_size_bytes: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            storage_path: PathBuf::from(DATA_ROOT),
            provider: ProviderKind::default(),
            enable_encryption: true,
            encryption_key: None,
            enable_compression: true,
            compression_level: DEFAULT_COMPRESSION_LEVEL,
            max_chunk_size: DEFAULT_MAX_CHUNK_SIZE,
            create_if_not_exists: true,
            enable_auto_flush: true,
            auto_flush_interval_ms: DEFAULT_AUTO_FLUSH_INTERVAL_MS,
            enable_caching: true,
            cache_size_bytes: DEFAULT_CACHE_SIZE_BYTES,
        }
    }
}

impl fmt::Debug for StorageConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StorageConfig")
            .field("storage_path", &self.storage_path)
            .field("provider", &self.provider)
            .field("enable_encryption", &self.enable_encryption)
            .field(
                "encryption_key",
                &self.encryption_key.as_ref().map(|_| "<redacted>"),
            )
            .field("enable_compression", &self.enable_compression)
            .field("compression_level", &self.compression_level)
            .field("max_chunk_size", &self.max_chunk_size)
            .field("create_if_not_exists", &self.create_if_not_exists)
            .field("enable_auto_flush", &self.enable_auto_flush)
            .field("auto_flush_interval_ms", &self.auto_flush_interval_ms)
            .field("enable_caching", &self.enable_caching)
            .field("cache_size_bytes", &self.cache_size_bytes)
            .finish()
    }
}

impl StorageConfig {
    /// In-memory storage, used by tests and ephemeral enclaves.
    pub fn in_memory() -> Self {
        Self {
            provider: ProviderKind::Memory,
            enable_auto_flush: false,
            ..Self::default()
        }
    }

    /// Storage of the given kind rooted at `path`.
    pub fn at(path: impl Into<PathBuf>, provider: ProviderKind) -> Self {
        Self {
            storage_path: path.into(),
            provider,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.compression_level > MAX_LEVEL {
            return Err(ConfigError::InvalidValue {
                name: "compressionLevel",
                value: self.compression_level.to_string(),
            });
        }
        if self.max_chunk_size == 0 {
            return Err(ConfigError::InvalidValue {
                name: "maxChunkSize",
                value: "0".to_string(),
            });
        }
        if self.enable_auto_flush && self.auto_flush_interval_ms == 0 {
            return Err(ConfigError::InvalidValue {
                name: "autoFlushIntervalMs",
                value: "0".to_string(),
            });
        }
        if let Some(key) = &self.encryption_key {
            parse_key(key).map_err(|e| ConfigError::Invalid(format!("encryptionKey: {e}")))?;
        }
        if self.provider != ProviderKind::Memory && self.storage_path.as_os_str().is_empty() {
            return Err(ConfigError::Invalid("storagePath is empty".to_string()));
        }
        Ok(())
    }
}

// =============================================================================
// Enclave
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Complete start-up configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, rename_all = "camelCase")]
pub struct EnclaveConfig {
    #[serde(flatten)]
    pub storage: StorageConfig,
    pub enable_logging: bool,
    pub log_level: String,
    pub log_format: LogFormat,
    pub attestation_mode: AttestationMode,
    /// Hex MRENCLAVE values accepted when verifying quotes. Empty accepts any.
    pub expected_mr_enclave: Vec<String>,
    /// Hex MRSIGNER values accepted when verifying quotes. Empty accepts any.
    pub expected_mr_signer: Vec<String>,
    /// Intel SGX root certificate file. Without it hardware quotes never verify.
    pub pck_root_cert: Option<PathBuf>,
    pub request_id_policy: RequestIdPolicy,
    pub compliance_cache_capacity: usize,
}

impl Default for EnclaveConfig {
    fn default() -> Self {
        Self {
            storage: StorageConfig::default(),
            enable_logging: true,
            log_level: "info".to_string(),
            log_format: LogFormat::default(),
            attestation_mode: AttestationMode::default(),
            expected_mr_enclave: Vec::new(),
            expected_mr_signer: Vec::new(),
            pck_root_cert: None,
            request_id_policy: RequestIdPolicy::default(),
            compliance_cache_capacity: DEFAULT_COMPLIANCE_CACHE_CAPACITY,
        }
    }
}

impl EnclaveConfig {
    /// Parse a host-supplied JSON document; absent fields take defaults.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build from any variable source; unset variables keep defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let storage = &mut config.storage;

        if let Some(path) = lookup(STORAGE_PATH_ENV) {
            storage.storage_path = PathBuf::from(path);
        }
        parse_into(&lookup, STORAGE_PROVIDER_ENV, &mut storage.provider)?;
        parse_bool_into(&lookup, ENABLE_ENCRYPTION_ENV, &mut storage.enable_encryption)?;
        storage.encryption_key = lookup(ENCRYPTION_KEY_ENV).filter(|k| !k.trim().is_empty());
        parse_bool_into(&lookup, ENABLE_COMPRESSION_ENV, &mut storage.enable_compression)?;
        parse_into(&lookup, COMPRESSION_LEVEL_ENV, &mut storage.compression_level)?;
        parse_into(&lookup, MAX_CHUNK_SIZE_ENV, &mut storage.max_chunk_size)?;
        parse_bool_into(&lookup, CREATE_IF_NOT_EXISTS_ENV, &mut storage.create_if_not_exists)?;
        parse_bool_into(&lookup, ENABLE_AUTO_FLUSH_ENV, &mut storage.enable_auto_flush)?;
        parse_into(&lookup, AUTO_FLUSH_INTERVAL_MS_ENV, &mut storage.auto_flush_interval_ms)?;
        parse_bool_into(&lookup, ENABLE_CACHING_ENV, &mut storage.enable_caching)?;
        parse_into(&lookup, CACHE_SIZE_BYTES_ENV, &mut storage.cache_size_bytes)?;

        parse_bool_into(&lookup, ENABLE_LOGGING_ENV, &mut config.enable_logging)?;
        if let Some(level) = lookup(LOG_LEVEL_ENV) {
            config.log_level = level;
        }
        if let Some(format) = lookup(LOG_FORMAT_ENV) {
            config.log_format = if format.eq_ignore_ascii_case("json") {
                LogFormat::Json
            } else {
                LogFormat::Pretty
            };
        }
        parse_into(&lookup, ATTESTATION_MODE_ENV, &mut config.attestation_mode)?;
        if let Some(list) = lookup(EXPECTED_MR_ENCLAVE_ENV) {
            config.expected_mr_enclave = split_list(&list);
        }
        if let Some(list) = lookup(EXPECTED_MR_SIGNER_ENV) {
            config.expected_mr_signer = split_list(&list);
        }
        config.pck_root_cert = lookup(PCK_ROOT_CERT_ENV)
            .filter(|path| !path.trim().is_empty())
            .map(PathBuf::from);
        parse_into(&lookup, REQUEST_ID_POLICY_ENV, &mut config.request_id_policy)?;
        parse_into(
            &lookup,
            COMPLIANCE_CACHE_CAPACITY_ENV,
            &mut config.compliance_cache_capacity,
        )?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.storage.validate()?;
        if self.compliance_cache_capacity == 0 {
            return Err(ConfigError::InvalidValue {
                name: "complianceCacheCapacity",
                value: "0".to_string(),
            });
        }
        for (name, list) in [
            ("expectedMrEnclave", &self.expected_mr_enclave),
            ("expectedMrSigner", &self.expected_mr_signer),
        ] {
            for value in list {
                if !matches!(hex::decode(value), Ok(bytes) if bytes.len() == 32) {
                    return Err(ConfigError::InvalidValue {
                        name,
                        value: value.clone(),
                    });
                }
            }
        }
        self.attestation_mode
            .ensure_permitted()
            .map_err(ConfigError::Invalid)
    }
}

fn parse_into<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    target: &mut T,
) -> Result<(), ConfigError> {
    if let Some(raw) = lookup(name) {
        *target = raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue { name, value: raw })?;
    }
    Ok(())
}

fn parse_bool_into(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    target: &mut bool,
) -> Result<(), ConfigError> {
    if let Some(raw) = lookup(name) {
        *target = match raw.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => true,
            "0" | "false" | "no" | "off" => false,
            _ => return Err(ConfigError::InvalidValue { name, value: raw }),
        };
    }
    Ok(())
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_ascii_lowercase())
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name: &str| map.get(name).cloned()
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = EnclaveConfig::default();
        let storage = &config.storage;
        assert!(storage.enable_encryption);
        assert!(storage.enable_compression);
        assert_eq!(storage.compression_level, 6);
        assert_eq!(storage.max_chunk_size, 4 * 1024 * 1024);
        assert_eq!(storage.auto_flush_interval_ms, 5_000);
        assert_eq!(storage.cache_size_bytes, 100 * 1024 * 1024);
        assert_eq!(storage.storage_path, PathBuf::from("/data/tee"));
        assert_eq!(config.request_id_policy, RequestIdPolicy::Reject);
    }

    #[test]
    fn env_overrides_defaults() {
        let config = EnclaveConfig::from_lookup(lookup_from(&[
            (STORAGE_PATH_ENV, "/tmp/oracle"),
            (STORAGE_PROVIDER_ENV, "sled"),
            (ENABLE_COMPRESSION_ENV, "false"),
            (COMPRESSION_LEVEL_ENV, "0"),
            (AUTO_FLUSH_INTERVAL_MS_ENV, "250"),
            (LOG_FORMAT_ENV, "JSON"),
            (REQUEST_ID_POLICY_ENV, "overwrite"),
            (PCK_ROOT_CERT_ENV, "/etc/sgx/root.pem"),
        ]))
        .unwrap();

        assert_eq!(config.storage.storage_path, PathBuf::from("/tmp/oracle"));
        assert_eq!(config.storage.provider, ProviderKind::Sled);
        assert!(!config.storage.enable_compression);
        assert_eq!(config.storage.auto_flush_interval_ms, 250);
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.request_id_policy, RequestIdPolicy::Overwrite);
        assert_eq!(config.pck_root_cert, Some(PathBuf::from("/etc/sgx/root.pem")));
    }

    #[test]
    fn rejects_out_of_range_values() {
        let err = EnclaveConfig::from_lookup(lookup_from(&[(COMPRESSION_LEVEL_ENV, "10")]))
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                name: "compressionLevel",
                ..
            }
        ));

        let err =
            EnclaveConfig::from_lookup(lookup_from(&[(ENABLE_CACHING_ENV, "maybe")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));

        assert!(EnclaveConfig::from_lookup(lookup_from(&[(MAX_CHUNK_SIZE_ENV, "0")])).is_err());
        assert!(EnclaveConfig::from_lookup(lookup_from(&[(ENCRYPTION_KEY_ENV, "short")])).is_err());
    }

    #[test]
    fn json_uses_recognised_option_names() {
        let config = EnclaveConfig::from_json(
            r#"{
                "storagePath": "/srv/enclave",
                "enableEncryption": false,
                "compressionLevel": 3,
                "maxChunkSize": 1024,
                "enableAutoFlush": false,
                "cacheSizeBytes": 2048,
                "logLevel": "debug"
            }"#,
        )
        .unwrap();

        assert_eq!(config.storage.storage_path, PathBuf::from("/srv/enclave"));
        assert!(!config.storage.enable_encryption);
        assert_eq!(config.storage.compression_level, 3);
        assert_eq!(config.storage.max_chunk_size, 1024);
        assert_eq!(config.storage.cache_size_bytes, 2048);
        assert_eq!(config.log_level, "debug");
        assert!(config.storage.enable_compression);
    }

    #[test]
    fn debug_output_redacts_encryption_key() {
        let config = StorageConfig {
            encryption_key: Some("00".repeat(32)),
            ..StorageConfig::default()
        };
        let printed = format!("{config:?}");
        assert!(printed.contains("<redacted>"));
        assert!(!printed.contains(&"00".repeat(32)));
    }

    #[test]
    fn measurement_allow_lists_must_be_hex_digests() {
        let config = EnclaveConfig {
            expected_mr_enclave: vec!["abcd".to_string()],
            ..EnclaveConfig::default()
        };
        assert!(config.validate().is_err());

        let config = EnclaveConfig {
            expected_mr_signer: vec!["ab".repeat(32)],
            ..EnclaveConfig::default()
        };
        assert!(config.validate().is_ok());
    }
}
