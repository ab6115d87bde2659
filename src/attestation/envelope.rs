// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Self-describing JSON envelopes around raw quotes.
//!
//! ```text
//! evidence: {"evidence": "<b64 quote>", "custom_claims": "<b64 claims>"}
//! report:   {"report": "<b64 quote>", "format": "sgx_ecdsa", "custom_claims": "<b64 claims>"}
//! ```
//!
//! Raw quotes always start with the little-endian version number, never with
//! `{`, so the first byte tells the two apart.

use base64ct::{Base64, Encoding};
use serde::{Deserialize, Serialize};

pub fn is_envelope(bytes: &[u8]) -> bool {
    bytes.first() == Some(&b'{')
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EvidenceEnvelope {
    pub evidence: String,
    #[serde(default)]
    pub custom_claims: String,
}

impl EvidenceEnvelope {
    pub fn new(evidence: &[u8], custom_claims: &[u8]) -> Self {
        Self {
            evidence: Base64::encode_string(evidence),
            custom_claims: Base64::encode_string(custom_claims),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Raw quote and claims, or `None` for anything malformed.
    pub fn decode(bytes: &[u8]) -> Option<(Vec<u8>, Vec<u8>)> {
        let envelope: Self = serde_json::from_slice(bytes).ok()?;
        let evidence = Base64::decode_vec(&envelope.evidence).ok()?;
        let claims = Base64::decode_vec(&envelope.custom_claims).ok()?;
        Some((evidence, claims))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportEnvelope {
    pub report: String,
    pub format: String,
    #[serde(default)]
    pub custom_claims: String,
}

/// A decoded report envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedReport {
    pub quote: Vec<u8>,
    pub format: String,
    pub custom_claims: Vec<u8>,
}

impl ReportEnvelope {
    pub fn new(report: &[u8], format: &str, custom_claims: &[u8]) -> Self {
        Self {
            report: Base64::encode_string(report),
            format: format.to_string(),
            custom_claims: Base64::encode_string(custom_claims),
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn decode(bytes: &[u8]) -> Option<DecodedReport> {
        let envelope: Self = serde_json::from_slice(bytes).ok()?;
        Some(DecodedReport {
            quote: Base64::decode_vec(&envelope.report).ok()?,
            custom_claims: Base64::decode_vec(&envelope.custom_claims).ok()?,
            format: envelope.format,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evidence_envelope_round_trips() {
        let bytes = EvidenceEnvelope::new(&[3, 0, 2, 0], b"nonce").to_bytes().unwrap();
        assert!(is_envelope(&bytes));
        let (evidence, claims) = EvidenceEnvelope::decode(&bytes).unwrap();
        assert_eq!(evidence, vec![3, 0, 2, 0]);
        assert_eq!(claims, b"nonce");
    }

    #[test]
    fn report_envelope_keeps_format() {
        let bytes = ReportEnvelope::new(b"quote", "sgx_ecdsa", b"")
            .to_bytes()
            .unwrap();
        let decoded = ReportEnvelope::decode(&bytes).unwrap();
        assert_eq!(decoded.format, "sgx_ecdsa");
        assert_eq!(decoded.quote, b"quote");
        assert!(decoded.custom_claims.is_empty());
    }

    #[test]
    fn malformed_envelopes_decode_to_none() {
        assert!(EvidenceEnvelope::decode(b"{not json").is_none());
        assert!(EvidenceEnvelope::decode(br#"{"evidence":"!!!"}"#).is_none());
        assert!(ReportEnvelope::decode(br#"{"report":"AAAA"}"#).is_none());
        assert!(!is_envelope(&[3, 0]));
        assert!(!is_envelope(&[]));
    }
}
