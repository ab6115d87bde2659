// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Attestation handlers.

use std::collections::BTreeMap;

use crate::attestation;
use crate::error::EnclaveResult;
use crate::models::{AttestationResponse, VerificationResponse};
use crate::state::Enclave;

pub fn generate_evidence(enclave: &Enclave, custom_claims: &[u8]) -> EnclaveResult<AttestationResponse> {
    let evidence = enclave.attestation.generate_evidence(custom_claims)?;
    Ok(AttestationResponse { evidence })
}

pub fn generate_report(
    enclave: &Enclave,
    custom_claims: &[u8],
    format: &str,
) -> EnclaveResult<AttestationResponse> {
    let evidence = enclave.attestation.generate_report(custom_claims, format)?;
    Ok(AttestationResponse { evidence })
}

pub fn verify_evidence(enclave: &Enclave, evidence: &[u8]) -> VerificationResponse {
    let result = enclave.attestation.verify_evidence(evidence);
    VerificationResponse {
        valid: result.valid,
        custom_claims: result.custom_claims,
    }
}

pub fn verify_report(enclave: &Enclave, report: &[u8], format: &str) -> VerificationResponse {
    let result = enclave.attestation.verify_report(report, format);
    VerificationResponse {
        valid: result.valid,
        custom_claims: result.custom_claims,
    }
}

/// Encoded claims, base64 on the wire like every other binary field.
pub fn create_custom_claims(claims: &BTreeMap<String, String>) -> serde_json::Value {
    use base64ct::{Base64, Encoding};
    serde_json::json!({
        "custom_claims": Base64::encode_string(&attestation::create_custom_claims(claims)),
    })
}

pub fn parse_custom_claims(custom_claims: &[u8]) -> BTreeMap<String, String> {
    attestation::parse_custom_claims(custom_claims)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::test_support::enclave;
    use base64ct::{Base64, Encoding};

    #[test]
    fn evidence_round_trip_with_claims() {
        let enclave = enclave();
        let mut claims = BTreeMap::new();
        claims.insert("feed".to_string(), "btc-usd".to_string());
        let encoded = create_custom_claims(&claims);
        let raw = Base64::decode_vec(encoded["custom_claims"].as_str().unwrap()).unwrap();

        let evidence = generate_evidence(&enclave, &raw).unwrap();
        let verified = verify_evidence(&enclave, &evidence.evidence);
        assert!(verified.valid);
        assert_eq!(parse_custom_claims(&verified.custom_claims), claims);
    }

    #[test]
    fn tampered_report_is_invalid() {
        let enclave = enclave();
        let report = generate_report(&enclave, b"claims", "ecdsa").unwrap();
        assert!(verify_report(&enclave, &report.evidence, "sgx_ecdsa").valid);

        let mut tampered = report.evidence.clone();
        let last = tampered.len() - 3;
        tampered[last] ^= 0x01;
        let result = verify_report(&enclave, &tampered, "sgx_ecdsa");
        assert!(!result.valid);
        assert!(result.custom_claims.is_empty());
    }
}
