// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! PCK trust anchors.
//!
//! A quote is only as good as the key that signed its quoting enclave
//! report. On hardware that key is the PCK leaf certificate carried in the
//! quote's certification data, and the chain must end at a pinned Intel SGX
//! root certificate. The simulator pins its own PCK public key instead.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use p256::ecdsa::signature::Verifier;
use p256::ecdsa::{Signature, VerifyingKey};
use x509_cert::der::asn1::ObjectIdentifier;
use x509_cert::der::{Decode, DecodePem, Encode};
use x509_cert::Certificate;

use super::quote::{ParsedQuote, QuoteError, CERT_TYPE_PCK_CHAIN};

/// ecdsa-with-SHA256, the only algorithm used in the SGX PCK hierarchy.
const ECDSA_WITH_SHA256: ObjectIdentifier = ObjectIdentifier::new_unwrap("1.2.840.10045.4.3.2");

/// Which PCK keys are accepted.
#[derive(Debug, Clone)]
pub enum PckTrust {
    /// The quote's PCK chain must end at this root certificate (DER).
    PinnedRoot(Vec<u8>),
    /// Quoting enclave reports must be signed by exactly this key.
    PinnedKey(VerifyingKey),
    /// No anchor configured. Every quote is rejected.
    Unconfigured,
}

impl PckTrust {
    /// Root certificate from PEM or DER bytes.
    pub fn root_from_bytes(bytes: &[u8]) -> Result<Self, QuoteError> {
        let cert = if bytes.trim_ascii_start().starts_with(b"-----BEGIN") {
            Certificate::from_pem(bytes)
        } else {
            Certificate::from_der(bytes)
        }
        .map_err(|e| QuoteError::Certification(format!("root certificate: {e}")))?;
        let der = cert
            .to_der()
            .map_err(|e| QuoteError::Certification(format!("root certificate: {e}")))?;
        Ok(PckTrust::PinnedRoot(der))
    }

    /// Check the quoting enclave report signature against the trusted PCK key.
    pub fn verify(&self, quote: &ParsedQuote) -> Result<(), QuoteError> {
        match self {
            PckTrust::PinnedKey(key) => quote.verify_qe_report(key),
            PckTrust::PinnedRoot(root) => {
                if quote.cert_data_type != CERT_TYPE_PCK_CHAIN {
                    return Err(QuoteError::Certification(format!(
                        "certification data type {} is not a PCK chain",
                        quote.cert_data_type
                    )));
                }
                let leaf = verify_pck_chain(&quote.cert_data, root, unix_now())?;
                quote.verify_qe_report(&leaf)
            }
            PckTrust::Unconfigured => Err(QuoteError::Certification(
                "no PCK trust anchor configured".to_string(),
            )),
        }
    }
}

fn unix_now() -> Duration {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
}

fn rejected(reason: impl Into<String>) -> QuoteError {
    QuoteError::Certification(reason.into())
}

fn public_key(cert: &Certificate) -> Result<VerifyingKey, QuoteError> {
    let bytes = cert
        .tbs_certificate
        .subject_public_key_info
        .subject_public_key
        .as_bytes()
        .ok_or_else(|| rejected("unaligned subject public key"))?;
    VerifyingKey::from_sec1_bytes(bytes).map_err(|_| rejected("subject key is not P-256"))
}

fn verify_issued_by(cert: &Certificate, issuer: &Certificate) -> Result<(), QuoteError> {
    if cert.signature_algorithm.oid != ECDSA_WITH_SHA256 {
        return Err(rejected("certificate is not signed with ecdsa-with-SHA256"));
    }
    let tbs = cert
        .tbs_certificate
        .to_der()
        .map_err(|e| rejected(format!("re-encode certificate: {e}")))?;
    let signature = cert
        .signature
        .as_bytes()
        .and_then(|der| Signature::from_der(der).ok())
        .ok_or_else(|| rejected("malformed certificate signature"))?;
    public_key(issuer)?
        .verify(&tbs, &signature)
        .map_err(|_| rejected("certificate signature does not verify"))
}

fn check_validity(cert: &Certificate, now: Duration) -> Result<(), QuoteError> {
    let validity = &cert.tbs_certificate.validity;
    if now < validity.not_before.to_unix_duration() || now > validity.not_after.to_unix_duration() {
        return Err(rejected("certificate outside its validity period"));
    }
    Ok(())
}

/// Walk the PEM chain leaf to root and return the PCK leaf key.
pub fn verify_pck_chain(
    cert_data: &[u8],
    root_der: &[u8],
    now: Duration,
) -> Result<VerifyingKey, QuoteError> {
    // Quotes NUL-terminate the PEM blob.
    let end = cert_data
        .iter()
        .rposition(|b| *b != 0)
        .map_or(0, |pos| pos + 1);
    let pem = &cert_data[..end];
    if pem.is_empty() {
        return Err(rejected("empty PCK certificate chain"));
    }

    let chain = Certificate::load_pem_chain(pem)
        .map_err(|e| rejected(format!("PCK chain: {e}")))?;
    if chain.len() < 2 {
        return Err(rejected("PCK chain must include an issuer"));
    }

    let top = &chain[chain.len() - 1];
    let top_der = top
        .to_der()
        .map_err(|e| rejected(format!("re-encode root: {e}")))?;
    if top_der != root_der {
        return Err(rejected("PCK chain does not end at the pinned root"));
    }

    for cert in &chain {
        check_validity(cert, now)?;
    }
    for pair in chain.windows(2) {
        verify_issued_by(&pair[0], &pair[1])?;
    }
    public_key(&chain[0])
}
