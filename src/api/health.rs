// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use serde::Serialize;

use crate::state::Enclave;

/// Health report with individual component status.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Overall health status ("ok" or "degraded").
    pub status: String,
    /// Storage provider in use.
    pub provider: String,
    /// Individual health checks and their results.
    pub checks: HealthChecks,
}

/// Individual health check results.
#[derive(Debug, Serialize)]
pub struct HealthChecks {
    /// Round trip of a probe value through the storage pipeline.
    pub storage: String,
    pub randomness: String,
    pub secrets: String,
    pub compliance: String,
    /// Attestation hardware presence. Informational: a host without SGX
    /// still serves every other component.
    pub attestation: String,
}

fn ready(initialized: bool) -> String {
    if initialized { "ok" } else { "not_initialized" }.to_string()
}

/// Overall status is `degraded` when any component other than attestation
/// fails its check.
pub fn health(enclave: &Enclave) -> HealthResponse {
    let storage = match enclave.storage.health_check() {
        Ok(()) => "ok".to_string(),
        Err(e) => {
            tracing::warn!(error = %e, "Storage health check failed");
            "error".to_string()
        }
    };
    let checks = HealthChecks {
        storage,
        randomness: ready(enclave.randomness.is_initialized()),
        secrets: ready(enclave.secrets.is_initialized()),
        compliance: "ok".to_string(),
        attestation: if enclave.attestation.is_available() {
            "available"
        } else {
            "unavailable"
        }
        .to_string(),
    };

    let healthy = [&checks.storage, &checks.randomness, &checks.secrets, &checks.compliance]
        .iter()
        .all(|status| status.as_str() == "ok");

    HealthResponse {
        status: if healthy { "ok" } else { "degraded" }.to_string(),
        provider: enclave.storage.provider_kind().as_str().to_string(),
        checks,
    }
}
