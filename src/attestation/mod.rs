// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Attestation Manager
//!
//! Produces SGX quotes that bind caller-supplied custom claims and verifies
//! quotes received from other enclaves.
//!
//! ## Binding
//!
//! `report_data[0..32] = SHA-256(custom_claims)`. When claims are present the
//! output is a JSON envelope carrying both the quote and the claims, so a
//! verifier needs no out-of-band knowledge.
//!
//! ## Failure Semantics
//!
//! - Missing attestation hardware is a hard error (`Unavailable`).
//! - Verification never errors. Malformed or tampered input, or a quote whose
//!   PCK key is not trusted, yields `valid = false` with empty claims.

pub mod envelope;
pub mod pck;
pub mod providers;
pub mod quote;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use envelope::{is_envelope, EvidenceEnvelope, ReportEnvelope};
use pck::PckTrust;
use providers::{GramineQuoteProvider, QuoteProvider, SimulationQuoteProvider};
use quote::{report_data_for, ParsedQuote, QuoteError};

#[derive(Debug, thiserror::Error)]
pub enum AttestationError {
    #[error("attestation hardware unavailable: {0}")]
    Unavailable(String),
    #[error("unsupported report format: {0}")]
    UnsupportedFormat(String),
    #[error("invalid attestation input: {0}")]
    InvalidInput(String),
    #[error("attestation signing failed: {0}")]
    Signing(String),
    #[error("attestation device I/O: {0}")]
    Io(#[from] std::io::Error),
}

// =============================================================================
// Mode and formats
// =============================================================================

/// Where quotes come from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttestationMode {
    /// Gramine `/dev/attestation`.
    #[default]
    Hardware,
    /// Software-signed quotes for tests and development.
    Simulation,
}

impl AttestationMode {
    /// Simulation is refused unless built for tests or with the `dev` feature.
    pub fn ensure_permitted(&self) -> Result<(), String> {
        match self {
            AttestationMode::Hardware => Ok(()),
            AttestationMode::Simulation if cfg!(any(test, feature = "dev")) => Ok(()),
            AttestationMode::Simulation => Err(
                "simulation attestation requires a build with the `dev` feature".to_string(),
            ),
        }
    }
}

impl FromStr for AttestationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hardware" | "sgx" | "gramine" => Ok(AttestationMode::Hardware),
            "simulation" | "sim" => Ok(AttestationMode::Simulation),
            other => Err(format!("unknown attestation mode '{other}'")),
        }
    }
}

/// Signature scheme of a report.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportFormat {
    #[default]
    SgxEcdsa,
    SgxEpid,
}

impl ReportFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReportFormat::SgxEcdsa => "sgx_ecdsa",
            ReportFormat::SgxEpid => "sgx_epid",
        }
    }
}

impl fmt::Display for ReportFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReportFormat {
    type Err = AttestationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "sgx_ecdsa" | "ecdsa" => Ok(ReportFormat::SgxEcdsa),
            "sgx_epid" | "epid" => Ok(ReportFormat::SgxEpid),
            other => Err(AttestationError::UnsupportedFormat(other.to_string())),
        }
    }
}

// =============================================================================
// Custom claims
// =============================================================================

/// Deterministic encoding of a claims map (keys sorted).
pub fn create_custom_claims(claims: &BTreeMap<String, String>) -> Vec<u8> {
    serde_json::to_vec(claims).unwrap_or_default()
}

/// Inverse of [`create_custom_claims`]; malformed input yields an empty map.
pub fn parse_custom_claims(bytes: &[u8]) -> BTreeMap<String, String> {
    serde_json::from_slice(bytes).unwrap_or_default()
}

// =============================================================================
// Verification policy
// =============================================================================

/// Optional allow-lists for enclave measurements. Empty lists accept any value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MeasurementPolicy {
    pub mr_enclave: Vec<[u8; 32]>,
    pub mr_signer: Vec<[u8; 32]>,
}

impl MeasurementPolicy {
    /// Build from hex strings as found in configuration.
    pub fn from_hex(mr_enclave: &[String], mr_signer: &[String]) -> Result<Self, AttestationError> {
        fn parse(values: &[String], name: &str) -> Result<Vec<[u8; 32]>, AttestationError> {
            values
                .iter()
                .map(|value| {
                    let bytes = hex::decode(value.trim()).map_err(|e| {
                        AttestationError::InvalidInput(format!("{name} '{value}': {e}"))
                    })?;
                    <[u8; 32]>::try_from(bytes.as_slice()).map_err(|_| {
                        AttestationError::InvalidInput(format!("{name} '{value}' is not 32 bytes"))
                    })
                })
                .collect()
        }
        Ok(Self {
            mr_enclave: parse(mr_enclave, "mr_enclave")?,
            mr_signer: parse(mr_signer, "mr_signer")?,
        })
    }

    fn check(&self, quote: &ParsedQuote) -> Result<(), QuoteError> {
        if !self.mr_enclave.is_empty() && !self.mr_enclave.contains(&quote.mr_enclave()) {
            return Err(QuoteError::Measurement("mr_enclave"));
        }
        if !self.mr_signer.is_empty() && !self.mr_signer.contains(&quote.mr_signer()) {
            return Err(QuoteError::Measurement("mr_signer"));
        }
        Ok(())
    }
}

/// Outcome of verifying evidence or a report.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct VerificationResult {
    pub valid: bool,
    pub custom_claims: Vec<u8>,
}

impl VerificationResult {
    pub fn invalid() -> Self {
        Self::default()
    }
}

// =============================================================================
// Manager
// =============================================================================

pub struct AttestationManager {
    provider: Mutex<Box<dyn QuoteProvider>>,
    policy: MeasurementPolicy,
    trust: PckTrust,
}

impl AttestationManager {
    /// `pck_root` is the Intel SGX root certificate (PEM or DER) that hardware
    /// quotes must chain to. Simulation pins the simulator's own PCK key.
    pub fn new(
        mode: AttestationMode,
        policy: MeasurementPolicy,
        pck_root: Option<&[u8]>,
    ) -> Result<Self, AttestationError> {
        mode.ensure_permitted().map_err(AttestationError::InvalidInput)?;
        match mode {
            AttestationMode::Hardware => {
                let trust = match pck_root {
                    Some(root) => PckTrust::root_from_bytes(root)
                        .map_err(|e| AttestationError::InvalidInput(e.to_string()))?,
                    None => {
                        warn!("No PCK root certificate configured - quote verification will fail");
                        PckTrust::Unconfigured
                    }
                };
                Ok(Self::with_provider(Box::new(GramineQuoteProvider::new()), policy, trust))
            }
            AttestationMode::Simulation => {
                warn!("Using SIMULATED attestation - quotes are not hardware backed");
                let provider = SimulationQuoteProvider::new();
                let trust = PckTrust::PinnedKey(provider.pck_public_key());
                Ok(Self::with_provider(Box::new(provider), policy, trust))
            }
        }
    }

    pub fn with_provider(
        provider: Box<dyn QuoteProvider>,
        policy: MeasurementPolicy,
        trust: PckTrust,
    ) -> Self {
        info!(
            provider = provider.name(),
            available = provider.is_available(),
            "Attestation manager ready"
        );
        Self {
            provider: Mutex::new(provider),
            policy,
            trust,
        }
    }

    pub fn is_available(&self) -> bool {
        self.provider
            .lock()
            .map(|p| p.is_available())
            .unwrap_or(false)
    }

    fn quote(&self, claims: &[u8], format: Option<ReportFormat>) -> Result<Vec<u8>, AttestationError> {
        let mut provider = self
            .provider
            .lock()
            .map_err(|_| AttestationError::Unavailable("provider lock poisoned".to_string()))?;
        if !provider.is_available() {
            return Err(AttestationError::Unavailable(format!(
                "{} attestation device not present",
                provider.name()
            )));
        }
        if let Some(requested) = format {
            match provider.scheme() {
                Some(scheme) if scheme == requested => {}
                Some(scheme) => {
                    return Err(AttestationError::Unavailable(format!(
                        "platform provides {scheme} attestation, not {requested}"
                    )))
                }
                None => {
                    return Err(AttestationError::Unavailable(
                        "platform attestation type unknown".to_string(),
                    ))
                }
            }
        }
        provider.quote(&report_data_for(claims))
    }

    /// Raw quote when `custom_claims` is empty, otherwise an evidence envelope.
    pub fn generate_evidence(&self, custom_claims: &[u8]) -> Result<Vec<u8>, AttestationError> {
        let quote = self.quote(custom_claims, None)?;
        debug!(quote_bytes = quote.len(), claims_bytes = custom_claims.len(), "Generated evidence");
        if custom_claims.is_empty() {
            return Ok(quote);
        }
        EvidenceEnvelope::new(&quote, custom_claims)
            .to_bytes()
            .map_err(|e| AttestationError::Signing(e.to_string()))
    }

    /// Report envelope recording the requested format.
    ///
    /// Unknown formats are rejected before the hardware is touched.
    pub fn generate_report(
        &self,
        custom_claims: &[u8],
        format: &str,
    ) -> Result<Vec<u8>, AttestationError> {
        let format: ReportFormat = format.parse()?;
        let quote = self.quote(custom_claims, Some(format))?;
        ReportEnvelope::new(&quote, format.as_str(), custom_claims)
            .to_bytes()
            .map_err(|e| AttestationError::Signing(e.to_string()))
    }

    pub fn verify_evidence(&self, evidence: &[u8]) -> VerificationResult {
        let (quote, claims) = if is_envelope(evidence) {
            match EvidenceEnvelope::decode(evidence) {
                Some(decoded) => decoded,
                None => {
                    debug!("Evidence envelope is malformed");
                    return VerificationResult::invalid();
                }
            }
        } else {
            (evidence.to_vec(), Vec::new())
        };
        self.verify_quote(&quote, claims)
    }

    pub fn verify_report(&self, report: &[u8], format: &str) -> VerificationResult {
        let Ok(format) = format.parse::<ReportFormat>() else {
            debug!(format = %format, "Unsupported report format");
            return VerificationResult::invalid();
        };
        let (quote, claims) = if is_envelope(report) {
            match ReportEnvelope::decode(report) {
                Some(decoded) if decoded.format.parse::<ReportFormat>().ok() == Some(format) => {
                    (decoded.quote, decoded.custom_claims)
                }
                _ => {
                    debug!("Report envelope is malformed or has another format");
                    return VerificationResult::invalid();
                }
            }
        } else {
            (report.to_vec(), Vec::new())
        };
        if format == ReportFormat::SgxEpid {
            // EPID quotes can only be checked by Intel's attestation service.
            debug!("EPID reports cannot be verified locally");
            return VerificationResult::invalid();
        }
        self.verify_quote(&quote, claims)
    }

    fn verify_quote(&self, raw: &[u8], claims: Vec<u8>) -> VerificationResult {
        let outcome = ParsedQuote::parse(raw).and_then(|quote| {
            quote.verify_signatures()?;
            self.trust.verify(&quote)?;
            if !claims.is_empty() {
                quote.verify_claims(&claims)?;
            }
            self.policy.check(&quote)
        });
        match outcome {
            Ok(()) => VerificationResult {
                valid: true,
                custom_claims: claims,
            },
            Err(e) => {
                debug!(reason = %e, "Quote verification failed");
                VerificationResult::invalid()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quote::REPORT_DATA_LEN;
    use tempfile::TempDir;

    fn simulated() -> AttestationManager {
        AttestationManager::new(AttestationMode::Simulation, MeasurementPolicy::default(), None)
            .unwrap()
    }

    fn forged_evidence(claims: &[u8]) -> Vec<u8> {
        use p256::ecdsa::SigningKey;
        use rand::rngs::OsRng;

        let identity = providers::SimulationQuoteProvider::new().identity();
        let quote = quote::build_quote(
            &identity,
            &report_data_for(claims),
            &SigningKey::random(&mut OsRng),
            &SigningKey::random(&mut OsRng),
        );
        EvidenceEnvelope::new(&quote, claims).to_bytes().unwrap()
    }

    fn claims() -> Vec<u8> {
        let mut map = BTreeMap::new();
        map.insert("nonce".to_string(), "42".to_string());
        map.insert("feed".to_string(), "BTC/USD".to_string());
        create_custom_claims(&map)
    }

    #[test]
    fn claims_round_trip_exactly() {
        let mut map = BTreeMap::new();
        map.insert("b".to_string(), "2".to_string());
        map.insert("a".to_string(), "1 \"quoted\"".to_string());
        let bytes = create_custom_claims(&map);
        assert_eq!(parse_custom_claims(&bytes), map);
        assert_eq!(create_custom_claims(&map), bytes);
        assert!(parse_custom_claims(b"\x00garbage").is_empty());
    }

    #[test]
    fn evidence_with_claims_verifies_and_returns_claims() {
        let manager = simulated();
        let evidence = manager.generate_evidence(&claims()).unwrap();
        assert!(envelope::is_envelope(&evidence));

        let result = manager.verify_evidence(&evidence);
        assert!(result.valid);
        assert_eq!(result.custom_claims, claims());
    }

    #[test]
    fn evidence_without_claims_is_a_raw_quote() {
        let manager = simulated();
        let evidence = manager.generate_evidence(&[]).unwrap();
        assert!(!envelope::is_envelope(&evidence));
        let result = manager.verify_evidence(&evidence);
        assert!(result.valid);
        assert!(result.custom_claims.is_empty());
    }

    #[test]
    fn tampered_evidence_fails() {
        let manager = simulated();
        let mut raw = manager.generate_evidence(&[]).unwrap();
        raw[100] ^= 0x01;
        assert_eq!(manager.verify_evidence(&raw), VerificationResult::invalid());

        // Claims swapped inside an otherwise valid envelope.
        let evidence = manager.generate_evidence(&claims()).unwrap();
        let (quote, _) = EvidenceEnvelope::decode(&evidence).unwrap();
        let forged = EvidenceEnvelope::new(&quote, b"{\"nonce\":\"43\"}")
            .to_bytes()
            .unwrap();
        assert!(!manager.verify_evidence(&forged).valid);
    }

    #[test]
    fn garbage_never_panics() {
        let manager = simulated();
        for input in [&b""[..], b"{", b"{\"evidence\":1}", &[0xff; 600][..]] {
            let result = manager.verify_evidence(input);
            assert!(!result.valid);
            assert!(result.custom_claims.is_empty());
        }
    }

    #[test]
    fn report_round_trip_and_format_checks() {
        let manager = simulated();
        let report = manager.generate_report(&claims(), "ecdsa").unwrap();
        let result = manager.verify_report(&report, "sgx_ecdsa");
        assert!(result.valid);
        assert_eq!(result.custom_claims, claims());

        assert!(!manager.verify_report(&report, "epid").valid);
        assert!(!manager.verify_report(&report, "rsa").valid);
    }

    #[test]
    fn unknown_report_format_is_rejected_before_hardware() {
        let dir = TempDir::new().unwrap();
        let manager = AttestationManager::with_provider(
            Box::new(providers::GramineQuoteProvider::at(dir.path().join("none"))),
            MeasurementPolicy::default(),
            PckTrust::Unconfigured,
        );
        assert!(matches!(
            manager.generate_report(b"x", "rsa"),
            Err(AttestationError::UnsupportedFormat(_))
        ));
        assert!(matches!(
            manager.generate_report(b"x", "ecdsa"),
            Err(AttestationError::Unavailable(_))
        ));
        assert!(matches!(
            manager.generate_evidence(b"x"),
            Err(AttestationError::Unavailable(_))
        ));
        assert!(!manager.is_available());
    }

    #[test]
    fn epid_is_unavailable_on_dcap_platform() {
        let manager = simulated();
        assert!(matches!(
            manager.generate_report(&[], "sgx_epid"),
            Err(AttestationError::Unavailable(_))
        ));
    }

    #[test]
    fn measurement_policy_filters_quotes() {
        let mut provider = providers::SimulationQuoteProvider::new();
        let identity = provider.identity();
        let pck = provider.pck_public_key();
        let raw = provider.quote(&[0u8; REPORT_DATA_LEN]).unwrap();

        let accepting = AttestationManager::with_provider(
            Box::new(providers::SimulationQuoteProvider::new()),
            MeasurementPolicy::from_hex(&[hex::encode(identity.mr_enclave)], &[]).unwrap(),
            PckTrust::PinnedKey(pck),
        );
        assert!(accepting.verify_evidence(&raw).valid);

        let rejecting = AttestationManager::with_provider(
            Box::new(providers::SimulationQuoteProvider::new()),
            MeasurementPolicy::from_hex(&[hex::encode([0xAB; 32])], &[]).unwrap(),
            PckTrust::PinnedKey(pck),
        );
        assert!(!rejecting.verify_evidence(&raw).valid);

        assert!(MeasurementPolicy::from_hex(&["zz".to_string()], &[]).is_err());
        assert!(MeasurementPolicy::from_hex(&["abcd".to_string()], &[]).is_err());
    }

    #[test]
    fn quotes_signed_with_foreign_keys_are_invalid() {
        let mut map = BTreeMap::new();
        map.insert("nonce".to_string(), "attacker".to_string());
        let forged = forged_evidence(&create_custom_claims(&map));

        let result = simulated().verify_evidence(&forged);
        assert!(!result.valid);
        assert!(result.custom_claims.is_empty());

        let dir = TempDir::new().unwrap();
        let hardware = AttestationManager::with_provider(
            Box::new(providers::GramineQuoteProvider::at(dir.path())),
            MeasurementPolicy::default(),
            PckTrust::Unconfigured,
        );
        assert!(!hardware.verify_evidence(&forged).valid);

        let pinned_root = AttestationManager::with_provider(
            Box::new(providers::GramineQuoteProvider::at(dir.path())),
            MeasurementPolicy::default(),
            PckTrust::PinnedRoot(vec![0x30, 0x00]),
        );
        assert!(!pinned_root.verify_evidence(&forged).valid);
    }

    #[test]
    fn hardware_mode_rejects_unparseable_root_certificates() {
        assert!(matches!(
            AttestationManager::new(
                AttestationMode::Hardware,
                MeasurementPolicy::default(),
                Some(&b"not a certificate"[..]),
            ),
            Err(AttestationError::InvalidInput(_))
        ));
        let unanchored =
            AttestationManager::new(AttestationMode::Hardware, MeasurementPolicy::default(), None);
        assert!(unanchored.is_ok());
    }

    #[test]
    fn mode_parsing() {
        assert_eq!("simulation".parse::<AttestationMode>().unwrap(), AttestationMode::Simulation);
        assert_eq!("HARDWARE".parse::<AttestationMode>().unwrap(), AttestationMode::Hardware);
        assert!("tpm".parse::<AttestationMode>().is_err());
        assert!(AttestationMode::Simulation.ensure_permitted().is_ok());
    }
}
