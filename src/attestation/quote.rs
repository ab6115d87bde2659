// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! SGX ECDSA quote (version 3) layout, parsing and verification.
//!
//! ## Layout
//!
//! ```text
//! offset  size  field
//! 0       48    header (version, attestation key type, QE vendor id, ...)
//! 48      384   ISV enclave report body
//! 432     4     signature data length
//! 436     ...   signature data:
//!               64   ISV report signature (P-256, r || s) over bytes 0..432
//!               64   attestation public key (x || y)
//!               384  quoting enclave report body
//!               64   quoting enclave report signature
//!               2+n  QE authentication data
//!               2    certification data type
//!               4+n  certification data
//! ```
//!
//! Verification covers the ISV signature, the binding between the quoting
//! enclave report and the attestation key, the PCK signature over the quoting
//! enclave report, and the report data. Which PCK key is trusted is decided
//! by [`super::pck::PckTrust`].

use p256::ecdsa::signature::{Signer, Verifier};
use p256::ecdsa::{Signature, SigningKey, VerifyingKey};
use sha2::{Digest, Sha256};

pub const QUOTE_VERSION: u16 = 3;
pub const ATT_KEY_TYPE_ECDSA_P256: u16 = 2;
pub const HEADER_LEN: usize = 48;
pub const REPORT_BODY_LEN: usize = 384;
pub const REPORT_DATA_LEN: usize = 64;
/// Header and report body, the bytes covered by the ISV signature.
pub const SIGNED_LEN: usize = HEADER_LEN + REPORT_BODY_LEN;
const SIGNATURE_LEN: usize = 64;
const PUBLIC_KEY_LEN: usize = 64;
/// Intel's quoting enclave vendor id.
pub const INTEL_QE_VENDOR_ID: [u8; 16] = [
    0x93, 0x9a, 0x72, 0x33, 0xf7, 0x9c, 0x4c, 0xa9, 0x94, 0x0a, 0x0d, 0xb3, 0x95, 0x7f, 0x06, 0x07,
];
/// PCK certificate chain, PEM encoded.
pub const CERT_TYPE_PCK_CHAIN: u16 = 5;

// Offsets inside a report body.
const MR_ENCLAVE: std::ops::Range<usize> = 64..96;
const MR_SIGNER: std::ops::Range<usize> = 128..160;
const ISV_PROD_ID: std::ops::Range<usize> = 256..258;
const ISV_SVN: std::ops::Range<usize> = 258..260;
const REPORT_DATA: std::ops::Range<usize> = 320..384;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QuoteError {
    #[error("quote truncated at offset {0}")]
    Truncated(usize),
    #[error("unsupported quote version {0}")]
    UnsupportedVersion(u16),
    #[error("unsupported attestation key type {0}")]
    UnsupportedKeyType(u16),
    #[error("signature data length does not match quote")]
    SignatureDataLength,
    #[error("malformed attestation key")]
    AttestationKey,
    #[error("enclave report signature is invalid")]
    ReportSignature,
    #[error("quoting enclave report does not bind the attestation key")]
    QeBinding,
    #[error("quoting enclave report signature is invalid")]
    QeReportSignature,
    #[error("certification data rejected: {0}")]
    Certification(String),
    #[error("report data does not match custom claims")]
    ClaimsBinding,
    #[error("measurement not in allow-list: {0}")]
    Measurement(&'static str),
}

/// Report data binding `claims`: SHA-256 in the first half, zeros after.
pub fn report_data_for(claims: &[u8]) -> [u8; REPORT_DATA_LEN] {
    let mut data = [0u8; REPORT_DATA_LEN];
    if !claims.is_empty() {
        data[..32].copy_from_slice(&Sha256::digest(claims));
    }
    data
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], QuoteError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.buf.len())
            .ok_or(QuoteError::Truncated(self.pos))?;
        let slice = &self.buf[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], QuoteError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    fn u16(&mut self) -> Result<u16, QuoteError> {
        Ok(u16::from_le_bytes(self.array()?))
    }

    fn u32(&mut self) -> Result<u32, QuoteError> {
        Ok(u32::from_le_bytes(self.array()?))
    }
}

/// A structurally valid quote. Signatures are NOT checked by parsing.
#[derive(Debug, Clone)]
pub struct ParsedQuote {
    pub version: u16,
    pub att_key_type: u16,
    pub qe_vendor_id: [u8; 16],
    pub report_body: [u8; REPORT_BODY_LEN],
    pub isv_signature: [u8; SIGNATURE_LEN],
    pub attestation_key: [u8; PUBLIC_KEY_LEN],
    pub qe_report: [u8; REPORT_BODY_LEN],
    pub qe_report_signature: [u8; SIGNATURE_LEN],
    pub qe_auth_data: Vec<u8>,
    pub cert_data_type: u16,
    pub cert_data: Vec<u8>,
    signed: Vec<u8>,
}

impl ParsedQuote {
    pub fn parse(raw: &[u8]) -> Result<Self, QuoteError> {
        let mut reader = Reader::new(raw);

        let version = reader.u16()?;
        if version != QUOTE_VERSION {
            return Err(QuoteError::UnsupportedVersion(version));
        }
        let att_key_type = reader.u16()?;
        if att_key_type != ATT_KEY_TYPE_ECDSA_P256 {
            return Err(QuoteError::UnsupportedKeyType(att_key_type));
        }
        // reserved(4) qe_svn(2) pce_svn(2)
        reader.take(8)?;
        let qe_vendor_id = reader.array::<16>()?;
        // user_data
        reader.take(20)?;
        let report_body = reader.array::<REPORT_BODY_LEN>()?;

        let sig_data_len = reader.u32()? as usize;
        if raw.len() - reader.pos != sig_data_len {
            return Err(QuoteError::SignatureDataLength);
        }

        let isv_signature = reader.array::<SIGNATURE_LEN>()?;
        let attestation_key = reader.array::<PUBLIC_KEY_LEN>()?;
        let qe_report = reader.array::<REPORT_BODY_LEN>()?;
        let qe_report_signature = reader.array::<SIGNATURE_LEN>()?;
        let auth_len = reader.u16()? as usize;
        let qe_auth_data = reader.take(auth_len)?.to_vec();
        let cert_data_type = reader.u16()?;
        let cert_len = reader.u32()? as usize;
        let cert_data = reader.take(cert_len)?.to_vec();
        if reader.pos != raw.len() {
            return Err(QuoteError::SignatureDataLength);
        }

        Ok(Self {
            version,
            att_key_type,
            qe_vendor_id,
            report_body,
            isv_signature,
            attestation_key,
            qe_report,
            qe_report_signature,
            qe_auth_data,
            cert_data_type,
            cert_data,
            signed: raw[..SIGNED_LEN].to_vec(),
        })
    }

    pub fn mr_enclave(&self) -> [u8; 32] {
        let mut out = [0u8; 32];
        out.copy_from_slice(&self.report_body[MR_ENCLAVE]);
        out
    }

    pub fn mr_signer(&self) -> [u8; 32] {
        let mut out = [0u8; 32];
        out.copy_from_slice(&self.report_body[MR_SIGNER]);
        out
    }

    pub fn isv_prod_id(&self) -> u16 {
        u16::from_le_bytes([self.report_body[ISV_PROD_ID.start], self.report_body[ISV_PROD_ID.start + 1]])
    }

    pub fn isv_svn(&self) -> u16 {
        u16::from_le_bytes([self.report_body[ISV_SVN.start], self.report_body[ISV_SVN.start + 1]])
    }

    pub fn report_data(&self) -> &[u8] {
        &self.report_body[REPORT_DATA]
    }

    /// ISV signature and quoting enclave binding.
    pub fn verify_signatures(&self) -> Result<(), QuoteError> {
        let mut sec1 = [0u8; 1 + PUBLIC_KEY_LEN];
        sec1[0] = 0x04;
        sec1[1..].copy_from_slice(&self.attestation_key);
        let key = VerifyingKey::from_sec1_bytes(&sec1).map_err(|_| QuoteError::AttestationKey)?;
        let signature =
            Signature::from_slice(&self.isv_signature).map_err(|_| QuoteError::ReportSignature)?;
        key.verify(&self.signed, &signature)
            .map_err(|_| QuoteError::ReportSignature)?;

        let mut hasher = Sha256::new();
        hasher.update(self.attestation_key);
        hasher.update(&self.qe_auth_data);
        if hasher.finalize().as_slice() != &self.qe_report[REPORT_DATA][..32] {
            return Err(QuoteError::QeBinding);
        }
        Ok(())
    }

    /// Quoting enclave report signed by the platform's PCK key.
    pub fn verify_qe_report(&self, pck_key: &VerifyingKey) -> Result<(), QuoteError> {
        let signature = Signature::from_slice(&self.qe_report_signature)
            .map_err(|_| QuoteError::QeReportSignature)?;
        pck_key
            .verify(&self.qe_report, &signature)
            .map_err(|_| QuoteError::QeReportSignature)
    }

    /// Whether the report data commits to `claims`.
    pub fn verify_claims(&self, claims: &[u8]) -> Result<(), QuoteError> {
        if self.report_data() != report_data_for(claims).as_slice() {
            return Err(QuoteError::ClaimsBinding);
        }
        Ok(())
    }
}

/// Identity fields of a report body.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReportIdentity {
    pub mr_enclave: [u8; 32],
    pub mr_signer: [u8; 32],
    pub isv_prod_id: u16,
    pub isv_svn: u16,
}

fn report_body(identity: &ReportIdentity, report_data: &[u8; REPORT_DATA_LEN]) -> [u8; REPORT_BODY_LEN] {
    let mut body = [0u8; REPORT_BODY_LEN];
    body[MR_ENCLAVE].copy_from_slice(&identity.mr_enclave);
    body[MR_SIGNER].copy_from_slice(&identity.mr_signer);
    body[ISV_PROD_ID].copy_from_slice(&identity.isv_prod_id.to_le_bytes());
    body[ISV_SVN].copy_from_slice(&identity.isv_svn.to_le_bytes());
    body[REPORT_DATA].copy_from_slice(report_data);
    body
}

/// Assemble and sign a quote with software keys.
///
/// `attestation_key` signs the ISV report, `pck_key` signs the quoting
/// enclave report. The certification data is left empty.
pub fn build_quote(
    identity: &ReportIdentity,
    report_data: &[u8; REPORT_DATA_LEN],
    attestation_key: &SigningKey,
    pck_key: &SigningKey,
) -> Vec<u8> {
    let mut quote = Vec::with_capacity(SIGNED_LEN + 4 + 700);
    quote.extend_from_slice(&QUOTE_VERSION.to_le_bytes());
    quote.extend_from_slice(&ATT_KEY_TYPE_ECDSA_P256.to_le_bytes());
    quote.extend_from_slice(&[0u8; 8]);
    quote.extend_from_slice(&INTEL_QE_VENDOR_ID);
    quote.extend_from_slice(&[0u8; 20]);
    quote.extend_from_slice(&report_body(identity, report_data));

    let isv_signature: Signature = attestation_key.sign(&quote[..SIGNED_LEN]);
    let encoded = attestation_key.verifying_key().to_encoded_point(false);
    let attest_pub = &encoded.as_bytes()[1..];

    let qe_auth_data: Vec<u8> = (0u8..32).collect();
    let mut hasher = Sha256::new();
    hasher.update(attest_pub);
    hasher.update(&qe_auth_data);
    let mut qe_report_data = [0u8; REPORT_DATA_LEN];
    qe_report_data[..32].copy_from_slice(&hasher.finalize());
    let qe_report = report_body(&ReportIdentity::default(), &qe_report_data);
    let qe_signature: Signature = pck_key.sign(&qe_report);

    let mut sig_data = Vec::new();
    sig_data.extend_from_slice(&isv_signature.to_bytes());
    sig_data.extend_from_slice(attest_pub);
    sig_data.extend_from_slice(&qe_report);
    sig_data.extend_from_slice(&qe_signature.to_bytes());
    sig_data.extend_from_slice(&(qe_auth_data.len() as u16).to_le_bytes());
    sig_data.extend_from_slice(&qe_auth_data);
    sig_data.extend_from_slice(&CERT_TYPE_PCK_CHAIN.to_le_bytes());
    sig_data.extend_from_slice(&0u32.to_le_bytes());

    quote.extend_from_slice(&(sig_data.len() as u32).to_le_bytes());
    quote.extend_from_slice(&sig_data);
    quote
}
