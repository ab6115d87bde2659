// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Errors reported across the host/enclave boundary.
//!
//! Component errors convert into [`EnclaveError`] with `?`. Only the stable
//! `error_code()` and `public_message()` cross the boundary; internal
//! details stay in the enclave log.

use crate::attestation::AttestationError;
use crate::config::ConfigError;
use crate::randomness::RandomnessError;
use crate::secrets::SecretError;
use crate::storage::{CryptoError, StorageError};

/// Boundary error taxonomy.
#[derive(Debug, thiserror::Error)]
pub enum EnclaveError {
    /// Component used before `initialize()`.
    #[error("{0} is not initialized")]
    NotInitialized(&'static str),
    /// Range or format violation caught before touching crypto or hardware.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),
    /// Encryption, decryption or signature failure.
    #[error("cryptographic failure: {0}")]
    CryptoFailure(String),
    #[error("storage failure: {0}")]
    StorageFailure(String),
    #[error("transaction is closed")]
    TransactionClosed,
    /// Attestation hardware or driver is absent.
    #[error("attestation unavailable: {0}")]
    AttestationUnavailable(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl EnclaveError {
    /// Stable code for the response envelope.
    pub fn error_code(&self) -> &'static str {
        match self {
            EnclaveError::NotInitialized(_) => "not_initialized",
            EnclaveError::InvalidInput(_) => "invalid_input",
            EnclaveError::UnsupportedFormat(_) => "unsupported_format",
            EnclaveError::CryptoFailure(_) => "crypto_failure",
            EnclaveError::StorageFailure(_) => "storage_failure",
            EnclaveError::TransactionClosed => "transaction_closed",
            EnclaveError::AttestationUnavailable(_) => "attestation_unavailable",
            EnclaveError::Internal(_) => "internal_error",
        }
    }

    /// Message safe to hand to the host.
    pub fn public_message(&self) -> String {
        match self {
            EnclaveError::Internal(_) => "Internal enclave error".to_string(),
            // Crypto details can act as an oracle for attacker-supplied input.
            EnclaveError::CryptoFailure(_) => "Cryptographic operation failed".to_string(),
            other => other.to_string(),
        }
    }
}

pub type EnclaveResult<T> = Result<T, EnclaveError>;

impl From<StorageError> for EnclaveError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotInitialized => EnclaveError::NotInitialized("storage"),
            StorageError::InvalidKey(msg) | StorageError::Config(msg) => {
                EnclaveError::InvalidInput(msg)
            }
            StorageError::TransactionNotFound(id) => {
                EnclaveError::InvalidInput(format!("unknown transaction {id}"))
            }
            StorageError::EncryptionDisabled => {
                EnclaveError::InvalidInput("encryption is disabled".to_string())
            }
            StorageError::TransactionClosed => EnclaveError::TransactionClosed,
            StorageError::Crypto(e) => EnclaveError::from(e),
            StorageError::IntegrityViolation(msg) => EnclaveError::CryptoFailure(msg),
            StorageError::LockPoisoned(what) => {
                EnclaveError::Internal(format!("{what} lock poisoned"))
            }
            other => EnclaveError::StorageFailure(other.to_string()),
        }
    }
}

impl From<CryptoError> for EnclaveError {
    fn from(err: CryptoError) -> Self {
        EnclaveError::CryptoFailure(err.to_string())
    }
}

impl From<ConfigError> for EnclaveError {
    fn from(err: ConfigError) -> Self {
        EnclaveError::InvalidInput(err.to_string())
    }
}

impl From<AttestationError> for EnclaveError {
    fn from(err: AttestationError) -> Self {
        match err {
            AttestationError::Unavailable(msg) => EnclaveError::AttestationUnavailable(msg),
            AttestationError::UnsupportedFormat(fmt) => EnclaveError::UnsupportedFormat(fmt),
            AttestationError::InvalidInput(msg) => EnclaveError::InvalidInput(msg),
            AttestationError::Signing(msg) => EnclaveError::CryptoFailure(msg),
            AttestationError::Io(e) => EnclaveError::AttestationUnavailable(e.to_string()),
        }
    }
}

impl From<RandomnessError> for EnclaveError {
    fn from(err: RandomnessError) -> Self {
        match err {
            RandomnessError::NotInitialized => EnclaveError::NotInitialized("randomness service"),
            RandomnessError::InvalidRange { .. }
            | RandomnessError::InvalidInput(_)
            | RandomnessError::DuplicateRequestId(_)
            | RandomnessError::UnknownRequestId(_) => EnclaveError::InvalidInput(err.to_string()),
            RandomnessError::Signing(msg) => EnclaveError::CryptoFailure(msg),
            RandomnessError::Entropy(msg) => EnclaveError::Internal(msg),
            RandomnessError::Storage(e) => EnclaveError::from(e),
            RandomnessError::LockPoisoned => {
                EnclaveError::Internal("randomness lock poisoned".to_string())
            }
        }
    }
}

impl From<SecretError> for EnclaveError {
    fn from(err: SecretError) -> Self {
        match err {
            SecretError::NotInitialized => EnclaveError::NotInitialized("secret manager"),
            SecretError::InvalidInput(msg) => EnclaveError::InvalidInput(msg),
            SecretError::Crypto(e) => EnclaveError::from(e),
            SecretError::Storage(e) => EnclaveError::from(e),
            SecretError::Json(e) => EnclaveError::StorageFailure(e.to_string()),
            SecretError::LockPoisoned => {
                EnclaveError::Internal("secret manager lock poisoned".to_string())
            }
        }
    }
}
