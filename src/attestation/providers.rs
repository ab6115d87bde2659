// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Quote sources.
//!
//! - [`GramineQuoteProvider`] talks to the Gramine attestation pseudo-files.
//! - [`SimulationQuoteProvider`] signs structurally identical quotes with
//!   software keys. Only available in tests and `dev` builds.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use p256::ecdsa::{SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use sha2::{Digest, Sha256};
use tracing::debug;

use super::quote::{build_quote, ReportIdentity, REPORT_DATA_LEN};
use super::{AttestationError, ReportFormat};

/// Gramine attestation pseudo-filesystem.
pub const GRAMINE_ATTESTATION_DIR: &str = "/dev/attestation";

/// Produces quotes over caller-chosen report data.
pub trait QuoteProvider: Send {
    fn name(&self) -> &'static str;

    /// Whether the backing device is present.
    fn is_available(&self) -> bool;

    /// Signature scheme of produced quotes, `None` when unknown.
    fn scheme(&self) -> Option<ReportFormat>;

    fn quote(&mut self, report_data: &[u8; REPORT_DATA_LEN]) -> Result<Vec<u8>, AttestationError>;
}

// =============================================================================
// Gramine
// =============================================================================

pub struct GramineQuoteProvider {
    root: PathBuf,
}

impl GramineQuoteProvider {
    pub fn new() -> Self {
        Self::at(GRAMINE_ATTESTATION_DIR)
    }

    /// Use an alternative attestation directory.
    pub fn at(root: impl AsRef<Path>) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
        }
    }

    fn unavailable(&self, e: std::io::Error) -> AttestationError {
        match e.kind() {
            ErrorKind::NotFound | ErrorKind::PermissionDenied => AttestationError::Unavailable(
                format!("{} not accessible: {e}", self.root.display()),
            ),
            _ => AttestationError::Io(e),
        }
    }
}

impl Default for GramineQuoteProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl QuoteProvider for GramineQuoteProvider {
    fn name(&self) -> &'static str {
        "gramine"
    }

    fn is_available(&self) -> bool {
        self.root.join("quote").exists()
    }

    fn scheme(&self) -> Option<ReportFormat> {
        let raw = fs::read_to_string(self.root.join("attestation_type")).ok()?;
        match raw.trim() {
            "dcap" => Some(ReportFormat::SgxEcdsa),
            "epid" => Some(ReportFormat::SgxEpid),
            _ => None,
        }
    }

    fn quote(&mut self, report_data: &[u8; REPORT_DATA_LEN]) -> Result<Vec<u8>, AttestationError> {
        fs::write(self.root.join("user_report_data"), report_data)
            .map_err(|e| self.unavailable(e))?;
        let quote = fs::read(self.root.join("quote")).map_err(|e| self.unavailable(e))?;
        debug!(bytes = quote.len(), "Read quote from Gramine");
        Ok(quote)
    }
}

// =============================================================================
// Simulation
// =============================================================================

/// Software quote signer with a fixed simulated enclave identity.
pub struct SimulationQuoteProvider {
    identity: ReportIdentity,
    attestation_key: SigningKey,
    pck_key: SigningKey,
}

impl SimulationQuoteProvider {
    pub fn new() -> Self {
        let mut identity = ReportIdentity::default();
        identity
            .mr_enclave
            .copy_from_slice(&Sha256::digest(b"tee-oracle-core/simulation/mr_enclave"));
        identity
            .mr_signer
            .copy_from_slice(&Sha256::digest(b"tee-oracle-core/simulation/mr_signer"));
        Self {
            identity,
            attestation_key: SigningKey::random(&mut OsRng),
            pck_key: SigningKey::random(&mut OsRng),
        }
    }

    pub fn identity(&self) -> ReportIdentity {
        self.identity
    }

    /// Key that signs the simulated quoting enclave reports.
    pub fn pck_public_key(&self) -> VerifyingKey {
        *self.pck_key.verifying_key()
    }
}

impl Default for SimulationQuoteProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl QuoteProvider for SimulationQuoteProvider {
    fn name(&self) -> &'static str {
        "simulation"
    }

    fn is_available(&self) -> bool {
        true
    }

    fn scheme(&self) -> Option<ReportFormat> {
        Some(ReportFormat::SgxEcdsa)
    }

    fn quote(&mut self, report_data: &[u8; REPORT_DATA_LEN]) -> Result<Vec<u8>, AttestationError> {
        Ok(build_quote(
            &self.identity,
            report_data,
            &self.attestation_key,
            &self.pck_key,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attestation::quote::ParsedQuote;
    use tempfile::TempDir;

    #[test]
    fn missing_gramine_device_is_unavailable() {
        let dir = TempDir::new().unwrap();
        let mut provider = GramineQuoteProvider::at(dir.path().join("attestation"));
        assert!(!provider.is_available());
        assert!(provider.scheme().is_none());
        assert!(matches!(
            provider.quote(&[0u8; REPORT_DATA_LEN]),
            Err(AttestationError::Unavailable(_))
        ));
    }

    #[test]
    fn gramine_provider_reads_quote_after_writing_report_data() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("quote"), b"fake-quote").unwrap();
        fs::write(dir.path().join("attestation_type"), b"dcap\n").unwrap();

        let mut provider = GramineQuoteProvider::at(dir.path());
        assert!(provider.is_available());
        assert_eq!(provider.scheme(), Some(ReportFormat::SgxEcdsa));
        assert_eq!(provider.quote(&[7u8; REPORT_DATA_LEN]).unwrap(), b"fake-quote");
        assert_eq!(
            fs::read(dir.path().join("user_report_data")).unwrap(),
            vec![7u8; REPORT_DATA_LEN]
        );
    }

    #[test]
    fn simulated_quotes_verify() {
        let mut provider = SimulationQuoteProvider::new();
        let raw = provider.quote(&[1u8; REPORT_DATA_LEN]).unwrap();
        let quote = ParsedQuote::parse(&raw).unwrap();
        quote.verify_signatures().unwrap();
        quote.verify_qe_report(&provider.pck_public_key()).unwrap();
        assert_eq!(quote.mr_enclave(), provider.identity().mr_enclave);
        assert_eq!(quote.report_data(), &[1u8; REPORT_DATA_LEN][..]);
    }
}
