// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Boundary Data Models
//!
//! Messages exchanged with the host across the enclave boundary. Each
//! request is one JSON object:
//!
//! ```json
//! {"kind": "generate_number", "payload": {"min": 1, "max": 6, "user_id": "u", "request_id": "r"}}
//! ```
//!
//! Kinds without parameters may omit `payload`. Binary fields are standard
//! base64.
//!
//! ## Responses
//!
//! ```json
//! {"status": "ok", "result": ...}
//! {"status": "error", "code": "invalid_input", "message": "..."}
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::compliance::{ComplianceRules, IdentityRules, GLOBAL};
use crate::error::EnclaveError;
use crate::storage::{MetadataUpdate, WriteOptions};

/// Serde adapter for base64 encoded byte fields.
pub mod base64_bytes {
    use base64ct::{Base64, Encoding};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&Base64::encode_string(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        Base64::decode_vec(&encoded).map_err(serde::de::Error::custom)
    }
}

fn global() -> String {
    GLOBAL.to_string()
}

// =============================================================================
// Requests
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum EnclaveRequest {
    Health,

    // ----- Attestation -----
    GenerateEvidence {
        #[serde(default, with = "base64_bytes")]
        custom_claims: Vec<u8>,
    },
    GenerateReport {
        #[serde(default, with = "base64_bytes")]
        custom_claims: Vec<u8>,
        #[serde(default)]
        format: String,
    },
    VerifyEvidence {
        #[serde(with = "base64_bytes")]
        evidence: Vec<u8>,
    },
    VerifyReport {
        #[serde(with = "base64_bytes")]
        report: Vec<u8>,
        #[serde(default)]
        format: String,
    },
    CreateCustomClaims {
        claims: BTreeMap<String, String>,
    },
    ParseCustomClaims {
        #[serde(with = "base64_bytes")]
        custom_claims: Vec<u8>,
    },

    // ----- Randomness -----
    GenerateNumber {
        min: u64,
        max: u64,
        user_id: String,
        request_id: String,
    },
    GetNumberProof {
        request_id: String,
    },
    VerifyNumber {
        value: u64,
        min: u64,
        max: u64,
        user_id: String,
        request_id: String,
        proof: String,
    },
    GenerateBytes {
        length: usize,
        user_id: String,
        request_id: String,
    },
    GetBytesProof {
        request_id: String,
    },
    VerifyBytes {
        #[serde(with = "base64_bytes")]
        bytes: Vec<u8>,
        user_id: String,
        request_id: String,
        proof: String,
    },
    GenerateSeed {
        user_id: String,
        request_id: String,
    },
    GetSeedProof {
        request_id: String,
    },
    VerifySeed {
        seed: String,
        user_id: String,
        request_id: String,
        proof: String,
    },
    GetPublicKey,
    RotateSigningKey,

    // ----- Secrets -----
    StoreSecret {
        user_id: String,
        name: String,
        value: String,
    },
    GetSecret {
        user_id: String,
        name: String,
    },
    DeleteSecret {
        user_id: String,
        name: String,
    },
    ListSecrets {
        user_id: String,
    },
    ExportUserSecrets {
        user_id: String,
    },

    // ----- Storage -----
    StorageWrite {
        key: String,
        #[serde(with = "base64_bytes")]
        value: Vec<u8>,
        #[serde(default)]
        options: WriteOptions,
    },
    StorageRead {
        key: String,
    },
    StorageDelete {
        key: String,
    },
    StorageExists {
        key: String,
    },
    StorageListKeys {
        #[serde(default)]
        prefix: Option<String>,
    },
    StorageGetMetadata {
        key: String,
    },
    StorageUpdateMetadata {
        key: String,
        update: MetadataUpdate,
    },
    StorageFlush,
    StorageCompact,
    StorageRotateKey,
    StorageStats,
    BeginTransaction,
    TransactionWrite {
        transaction_id: u64,
        key: String,
        #[serde(with = "base64_bytes")]
        value: Vec<u8>,
        #[serde(default)]
        options: WriteOptions,
    },
    TransactionDelete {
        transaction_id: u64,
        key: String,
    },
    TransactionRead {
        transaction_id: u64,
        key: String,
    },
    CommitTransaction {
        transaction_id: u64,
    },
    RollbackTransaction {
        transaction_id: u64,
    },

    // ----- Compliance -----
    VerifyCode {
        code: String,
        user_id: String,
        function_id: String,
        /// Rule document; empty selects the global table.
        #[serde(default)]
        rules: String,
    },
    VerifyIdentity {
        user_id: String,
        /// Identity document as a JSON string.
        identity: String,
        #[serde(default = "global")]
        jurisdiction: String,
    },
    GetComplianceStatus {
        function_id: String,
        #[serde(default = "global")]
        jurisdiction: String,
    },
    GetIdentityStatus {
        user_id: String,
        #[serde(default = "global")]
        jurisdiction: String,
    },
    GetComplianceRules {
        #[serde(default = "global")]
        jurisdiction: String,
    },
    SetComplianceRules {
        jurisdiction: String,
        rules: ComplianceRules,
    },
    GetIdentityRules {
        #[serde(default = "global")]
        jurisdiction: String,
    },
    SetIdentityRules {
        jurisdiction: String,
        rules: IdentityRules,
    },

    // Audit
    GetAuditEvents {
        /// `YYYY-MM-DD`
        date: String,
        #[serde(default)]
        user_id: Option<String>,
    },
}

impl EnclaveRequest {
    /// The `kind` tag, for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            EnclaveRequest::Health => "health",
            EnclaveRequest::GenerateEvidence { .. } => "generate_evidence",
            EnclaveRequest::GenerateReport { .. } => "generate_report",
            EnclaveRequest::VerifyEvidence { .. } => "verify_evidence",
            EnclaveRequest::VerifyReport { .. } => "verify_report",
            EnclaveRequest::CreateCustomClaims { .. } => "create_custom_claims",
            EnclaveRequest::ParseCustomClaims { .. } => "parse_custom_claims",
            EnclaveRequest::GenerateNumber { .. } => "generate_number",
            EnclaveRequest::GetNumberProof { .. } => "get_number_proof",
            EnclaveRequest::VerifyNumber { .. } => "verify_number",
            EnclaveRequest::GenerateBytes { .. } => "generate_bytes",
            EnclaveRequest::GetBytesProof { .. } => "get_bytes_proof",
            EnclaveRequest::VerifyBytes { .. } => "verify_bytes",
            EnclaveRequest::GenerateSeed { .. } => "generate_seed",
            EnclaveRequest::GetSeedProof { .. } => "get_seed_proof",
            EnclaveRequest::VerifySeed { .. } => "verify_seed",
            EnclaveRequest::GetPublicKey => "get_public_key",
            EnclaveRequest::RotateSigningKey => "rotate_signing_key",
            EnclaveRequest::StoreSecret { .. } => "store_secret",
            EnclaveRequest::GetSecret { .. } => "get_secret",
            EnclaveRequest::DeleteSecret { .. } => "delete_secret",
            EnclaveRequest::ListSecrets { .. } => "list_secrets",
            EnclaveRequest::ExportUserSecrets { .. } => "export_user_secrets",
            EnclaveRequest::StorageWrite { .. } => "storage_write",
            EnclaveRequest::StorageRead { .. } => "storage_read",
            EnclaveRequest::StorageDelete { .. } => "storage_delete",
            EnclaveRequest::StorageExists { .. } => "storage_exists",
            EnclaveRequest::StorageListKeys { .. } => "storage_list_keys",
            EnclaveRequest::StorageGetMetadata { .. } => "storage_get_metadata",
            EnclaveRequest::StorageUpdateMetadata { .. } => "storage_update_metadata",
            EnclaveRequest::StorageFlush => "storage_flush",
            EnclaveRequest::StorageCompact => "storage_compact",
            EnclaveRequest::StorageRotateKey => "storage_rotate_key",
            EnclaveRequest::StorageStats => "storage_stats",
            EnclaveRequest::BeginTransaction => "begin_transaction",
            EnclaveRequest::TransactionWrite { .. } => "transaction_write",
            EnclaveRequest::TransactionDelete { .. } => "transaction_delete",
            EnclaveRequest::TransactionRead { .. } => "transaction_read",
            EnclaveRequest::CommitTransaction { .. } => "commit_transaction",
            EnclaveRequest::RollbackTransaction { .. } => "rollback_transaction",
            EnclaveRequest::VerifyCode { .. } => "verify_code",
            EnclaveRequest::VerifyIdentity { .. } => "verify_identity",
            EnclaveRequest::GetComplianceStatus { .. } => "get_compliance_status",
            EnclaveRequest::GetIdentityStatus { .. } => "get_identity_status",
            EnclaveRequest::GetComplianceRules { .. } => "get_compliance_rules",
            EnclaveRequest::SetComplianceRules { .. } => "set_compliance_rules",
            EnclaveRequest::GetIdentityRules { .. } => "get_identity_rules",
            EnclaveRequest::SetIdentityRules { .. } => "set_identity_rules",
            EnclaveRequest::GetAuditEvents { .. } => "get_audit_events",
        }
    }
}

// =============================================================================
// Responses
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum EnclaveResponse {
    Ok {
        result: serde_json::Value,
    },
    Error {
        code: String,
        message: String,
    },
}

impl EnclaveResponse {
    pub fn ok(result: serde_json::Value) -> Self {
        EnclaveResponse::Ok { result }
    }

    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        EnclaveResponse::Error {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        matches!(self, EnclaveResponse::Ok { .. })
    }
}

impl From<&EnclaveError> for EnclaveResponse {
    fn from(err: &EnclaveError) -> Self {
        EnclaveResponse::error(err.error_code(), err.public_message())
    }
}

/// Result of `verify_evidence` / `verify_report`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationResponse {
    pub valid: bool,
    #[serde(with = "base64_bytes")]
    pub custom_claims: Vec<u8>,
}

/// Attestation evidence or report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttestationResponse {
    #[serde(with = "base64_bytes")]
    pub evidence: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NumberResponse {
    pub value: u64,
    pub proof: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BytesResponse {
    #[serde(with = "base64_bytes")]
    pub bytes: Vec<u8>,
    pub proof: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedResponse {
    pub seed: String,
    pub proof: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProofResponse {
    pub proof: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidResponse {
    pub valid: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValueResponse {
    #[serde(default, with = "optional_base64_bytes")]
    pub value: Option<Vec<u8>>,
}

/// Serde adapter for optional base64 fields; `None` is `null`.
pub mod optional_base64_bytes {
    use base64ct::{Base64, Encoding};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        bytes: &Option<Vec<u8>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match bytes {
            Some(bytes) => serializer.serialize_some(&Base64::encode_string(bytes)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Vec<u8>>, D::Error> {
        Option::<String>::deserialize(deserializer)?
            .map(|encoded| Base64::decode_vec(&encoded).map_err(serde::de::Error::custom))
            .transpose()
    }
}
