// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Host Call Surface
//!
//! Routes [`EnclaveRequest`]s to the component handlers and turns every
//! outcome into an [`EnclaveResponse`]. Nothing escapes this layer: errors
//! become error responses with a stable code, and panics are caught and
//! reported as `internal_error`.

use std::panic::{catch_unwind, AssertUnwindSafe};

use serde::Serialize;
use tracing::{debug, error, warn};

use crate::error::{EnclaveError, EnclaveResult};
use crate::models::{EnclaveRequest, EnclaveResponse};
use crate::state::Enclave;

pub mod attestation;
pub mod audit;
pub mod compliance;
pub mod health;
pub mod randomness;
pub mod secrets;
pub mod storage;

/// Serialize a handler result into the response payload.
fn to_value<T: Serialize>(value: T) -> EnclaveResult<serde_json::Value> {
    serde_json::to_value(value).map_err(|e| EnclaveError::Internal(format!("encode response: {e}")))
}

fn route(enclave: &Enclave, request: EnclaveRequest) -> EnclaveResult<serde_json::Value> {
    use EnclaveRequest as R;

    match request {
        R::Health => to_value(health::health(enclave)),

        R::GenerateEvidence { custom_claims } => {
            to_value(attestation::generate_evidence(enclave, &custom_claims)?)
        }
        R::GenerateReport {
            custom_claims,
            format,
        } => to_value(attestation::generate_report(enclave, &custom_claims, &format)?),
        R::VerifyEvidence { evidence } => to_value(attestation::verify_evidence(enclave, &evidence)),
        R::VerifyReport { report, format } => {
            to_value(attestation::verify_report(enclave, &report, &format))
        }
        R::CreateCustomClaims { claims } => to_value(attestation::create_custom_claims(&claims)),
        R::ParseCustomClaims { custom_claims } => {
            to_value(attestation::parse_custom_claims(&custom_claims))
        }

        R::GenerateNumber {
            min,
            max,
            user_id,
            request_id,
        } => to_value(randomness::generate_number(
            enclave,
            min,
            max,
            &user_id,
            &request_id,
        )?),
        R::GetNumberProof { request_id } => {
            to_value(randomness::get_number_proof(enclave, &request_id)?)
        }
        R::VerifyNumber {
            value,
            min,
            max,
            user_id,
            request_id,
            proof,
        } => to_value(randomness::verify_number(
            enclave,
            value,
            min,
            max,
            &user_id,
            &request_id,
            &proof,
        )),
        R::GenerateBytes {
            length,
            user_id,
            request_id,
        } => to_value(randomness::generate_bytes(
            enclave,
            length,
            &user_id,
            &request_id,
        )?),
        R::GetBytesProof { request_id } => {
            to_value(randomness::get_bytes_proof(enclave, &request_id)?)
        }
        R::VerifyBytes {
            bytes,
            user_id,
            request_id,
            proof,
        } => to_value(randomness::verify_bytes(
            enclave,
            &bytes,
            &user_id,
            &request_id,
            &proof,
        )),
        R::GenerateSeed {
            user_id,
            request_id,
        } => to_value(randomness::generate_seed(enclave, &user_id, &request_id)?),
        R::GetSeedProof { request_id } => {
            to_value(randomness::get_seed_proof(enclave, &request_id)?)
        }
        R::VerifySeed {
            seed,
            user_id,
            request_id,
            proof,
        } => to_value(randomness::verify_seed(
            enclave,
            &seed,
            &user_id,
            &request_id,
            &proof,
        )),
        R::GetPublicKey => to_value(randomness::public_key(enclave)),
        R::RotateSigningKey => to_value(randomness::rotate_signing_key(enclave)?),

        R::StoreSecret {
            user_id,
            name,
            value,
        } => to_value(secrets::store(enclave, &user_id, &name, &value)?),
        R::GetSecret { user_id, name } => to_value(secrets::get(enclave, &user_id, &name)?),
        R::DeleteSecret { user_id, name } => {
            to_value(secrets::delete(enclave, &user_id, &name)?)
        }
        R::ListSecrets { user_id } => to_value(secrets::list(enclave, &user_id)?),
        R::ExportUserSecrets { user_id } => secrets::export(enclave, &user_id),

        R::StorageWrite {
            key,
            value,
            options,
        } => to_value(storage::write(enclave, &key, &value, options)?),
        R::StorageRead { key } => to_value(storage::read(enclave, &key)?),
        R::StorageDelete { key } => to_value(storage::delete(enclave, &key)?),
        R::StorageExists { key } => to_value(storage::exists(enclave, &key)?),
        R::StorageListKeys { prefix } => {
            to_value(storage::list_keys(enclave, prefix.as_deref())?)
        }
        R::StorageGetMetadata { key } => to_value(storage::get_metadata(enclave, &key)?),
        R::StorageUpdateMetadata { key, update } => {
            to_value(storage::update_metadata(enclave, &key, update)?)
        }
        R::StorageFlush => to_value(storage::flush(enclave)?),
        R::StorageCompact => to_value(storage::compact(enclave)?),
        R::StorageRotateKey => to_value(storage::rotate_key(enclave)?),
        R::StorageStats => to_value(storage::stats(enclave)?),
        R::BeginTransaction => to_value(storage::begin_transaction(enclave)?),
        R::TransactionWrite {
            transaction_id,
            key,
            value,
            options,
        } => to_value(storage::transaction_write(
            enclave,
            transaction_id,
            &key,
            &value,
            options,
        )?),
        R::TransactionDelete {
            transaction_id,
            key,
        } => to_value(storage::transaction_delete(enclave, transaction_id, &key)?),
        R::TransactionRead {
            transaction_id,
            key,
        } => to_value(storage::transaction_read(enclave, transaction_id, &key)?),
        R::CommitTransaction { transaction_id } => {
            to_value(storage::commit_transaction(enclave, transaction_id)?)
        }
        R::RollbackTransaction { transaction_id } => {
            to_value(storage::rollback_transaction(enclave, transaction_id)?)
        }

        R::VerifyCode {
            code,
            user_id,
            function_id,
            rules,
        } => to_value(compliance::verify_code(
            enclave,
            &code,
            &user_id,
            &function_id,
            &rules,
        )),
        R::VerifyIdentity {
            user_id,
            identity,
            jurisdiction,
        } => to_value(compliance::verify_identity(
            enclave,
            &user_id,
            &identity,
            &jurisdiction,
        )),
        R::GetComplianceStatus {
            function_id,
            jurisdiction,
        } => to_value(compliance::get_compliance_status(
            enclave,
            &function_id,
            &jurisdiction,
        )),
        R::GetIdentityStatus {
            user_id,
            jurisdiction,
        } => to_value(compliance::get_identity_status(
            enclave,
            &user_id,
            &jurisdiction,
        )),
        R::GetComplianceRules { jurisdiction } => {
            to_value(compliance::get_compliance_rules(enclave, &jurisdiction))
        }
        R::SetComplianceRules {
            jurisdiction,
            rules,
        } => to_value(compliance::set_compliance_rules(enclave, &jurisdiction, rules)),
        R::GetIdentityRules { jurisdiction } => {
            to_value(compliance::get_identity_rules(enclave, &jurisdiction))
        }
        R::SetIdentityRules {
            jurisdiction,
            rules,
        } => to_value(compliance::set_identity_rules(enclave, &jurisdiction, rules)),

        R::GetAuditEvents { date, user_id } => {
            to_value(audit::events(enclave, &date, user_id.as_deref())?)
        }
    }
}

/// Execute one request. Never panics and never returns internal details.
pub fn dispatch(enclave: &Enclave, request: EnclaveRequest) -> EnclaveResponse {
    let kind = request.kind();
    match catch_unwind(AssertUnwindSafe(|| route(enclave, request))) {
        Ok(Ok(result)) => {
            debug!(kind, "Request completed");
            EnclaveResponse::ok(result)
        }
        Ok(Err(err)) => {
            match &err {
                EnclaveError::Internal(_) => error!(kind, error = %err, "Request failed"),
                _ => warn!(kind, code = err.error_code(), error = %err, "Request rejected"),
            }
            EnclaveResponse::from(&err)
        }
        Err(_) => {
            error!(kind, "Request handler panicked");
            EnclaveResponse::from(&EnclaveError::Internal("handler panicked".to_string()))
        }
    }
}

/// Decode one JSON request line, dispatch it and encode the response.
pub fn handle_raw(enclave: &Enclave, line: &str) -> String {
    let response = match serde_json::from_str::<EnclaveRequest>(line) {
        Ok(request) => dispatch(enclave, request),
        Err(e) => {
            warn!(error = %e, "Malformed request");
            EnclaveResponse::from(&EnclaveError::InvalidInput(format!("malformed request: {e}")))
        }
    };
    serde_json::to_string(&response).unwrap_or_else(|e| {
        error!(error = %e, "Failed to encode response");
        r#"{"status":"error","code":"internal_error","message":"Internal enclave error"}"#
            .to_string()
    })
}


#[cfg(test)]
mod tests {
    use super::test_support::enclave;
    use super::*;
    use serde_json::{json, Value};

    fn call(enclave: &Enclave, request: Value) -> Value {
        let line = handle_raw(enclave, &request.to_string());
        serde_json::from_str(&line).unwrap()
    }

    #[test]
    fn malformed_requests_are_invalid_input() {
        let enclave = enclave();
        let response: Value = serde_json::from_str(&handle_raw(&enclave, "not json")).unwrap();
        assert_eq!(response["status"], "error");
        assert_eq!(response["code"], "invalid_input");

        let response = call(&enclave, json!({"kind": "no_such_kind"}));
        assert_eq!(response["code"], "invalid_input");
    }

    #[test]
    fn errors_carry_stable_codes() {
        let enclave = enclave();
        let response = call(
            &enclave,
            json!({"kind": "generate_number", "payload": {"min": 9, "max": 1, "user_id": "u", "request_id": "r"}}),
        );
        assert_eq!(response["status"], "error");
        assert_eq!(response["code"], "invalid_input");

        let response = call(
            &enclave,
            json!({"kind": "generate_report", "payload": {"format": "tpm"}}),
        );
        assert_eq!(response["code"], "unsupported_format");

        let response = call(
            &enclave,
            json!({"kind": "commit_transaction", "payload": {"transaction_id": 424242}}),
        );
        assert_eq!(response["code"], "invalid_input");
    }

    #[test]
    fn transaction_lifecycle_over_the_boundary() {
        let enclave = enclave();
        let begin = call(&enclave, json!({"kind": "begin_transaction"}));
        let id = begin["result"]["transaction_id"].as_u64().unwrap();

        let write = call(
            &enclave,
            json!({"kind": "transaction_write", "payload": {"transaction_id": id, "key": "tx/k", "value": "dg=="}}),
        );
        assert_eq!(write["status"], "ok");

        let exists = call(&enclave, json!({"kind": "storage_exists", "payload": {"key": "tx/k"}}));
        assert_eq!(exists["result"]["exists"], false);

        let commit = call(
            &enclave,
            json!({"kind": "commit_transaction", "payload": {"transaction_id": id}}),
        );
        assert_eq!(commit["status"], "ok");
        let again = call(
            &enclave,
            json!({"kind": "commit_transaction", "payload": {"transaction_id": id}}),
        );
        assert_eq!(again["code"], "transaction_closed");

        let read = call(&enclave, json!({"kind": "storage_read", "payload": {"key": "tx/k"}}));
        assert_eq!(read["result"]["value"], "dg==");
    }

    #[test]
    fn internal_records_are_out_of_host_reach() {
        let enclave = enclave();
        let stored = call(
            &enclave,
            json!({"kind": "store_secret", "payload": {"user_id": "u", "name": "k", "value": "v"}}),
        );
        assert_eq!(stored["status"], "ok");

        for key in [
            "__enclave__/secrets/instance_key",
            "__enclave__/secrets/user_secrets",
            "__enclave__/randomness/signing_key.pem",
        ] {
            let read = call(&enclave, json!({"kind": "storage_read", "payload": {"key": key}}));
            assert_eq!(read["code"], "invalid_input", "read {key}");
            let write = call(
                &enclave,
                json!({"kind": "storage_write", "payload": {"key": key, "value": "AAAA"}}),
            );
            assert_eq!(write["code"], "invalid_input", "write {key}");
            let delete = call(&enclave, json!({"kind": "storage_delete", "payload": {"key": key}}));
            assert_eq!(delete["code"], "invalid_input", "delete {key}");
        }

        let keys = call(&enclave, json!({"kind": "storage_list_keys", "payload": {}}));
        assert_eq!(keys["status"], "ok");
        assert!(!keys["result"].to_string().contains("__enclave__"));

        let secret = call(
            &enclave,
            json!({"kind": "get_secret", "payload": {"user_id": "u", "name": "k"}}),
        );
        assert_eq!(secret["result"]["value"], "v");
    }

    #[test]
    fn audit_trail_is_queryable() {
        let enclave = enclave();
        call(
            &enclave,
            json!({"kind": "store_secret", "payload": {"user_id": "alice", "name": "k", "value": "v"}}),
        );
        call(
            &enclave,
            json!({"kind": "store_secret", "payload": {"user_id": "bob", "name": "k", "value": "v"}}),
        );
        let today = chrono::Utc::now().format("%Y-%m-%d").to_string();

        let all = call(&enclave, json!({"kind": "get_audit_events", "payload": {"date": today}}));
        assert_eq!(all["result"]["events"].as_array().unwrap().len(), 2);

        let alice = call(
            &enclave,
            json!({"kind": "get_audit_events", "payload": {"date": today, "user_id": "alice"}}),
        );
        let events = alice["result"]["events"].as_array().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["user_id"], "alice");
        assert_eq!(events[0]["event_type"], "secret_stored");

        let bad = call(&enclave, json!({"kind": "get_audit_events", "payload": {"date": "today"}}));
        assert_eq!(bad["code"], "invalid_input");
    }
}
