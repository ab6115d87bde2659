// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Secret handlers.
//!
//! Plaintext leaves the enclave only through `get` and the export call.

use serde_json::json;

use crate::error::{EnclaveError, EnclaveResult};
use crate::state::Enclave;

pub fn store(enclave: &Enclave, user_id: &str, name: &str, value: &str) -> EnclaveResult<serde_json::Value> {
    let created = enclave.secrets.store(user_id, name, value)?;
    Ok(json!({ "stored": true, "created": created }))
}

pub fn get(enclave: &Enclave, user_id: &str, name: &str) -> EnclaveResult<serde_json::Value> {
    let value = enclave.secrets.get(user_id, name)?;
    Ok(json!({ "value": value.as_deref().map(String::as_str) }))
}

pub fn delete(enclave: &Enclave, user_id: &str, name: &str) -> EnclaveResult<serde_json::Value> {
    let deleted = enclave.secrets.delete(user_id, name)?;
    Ok(json!({ "deleted": deleted }))
}

pub fn list(enclave: &Enclave, user_id: &str) -> EnclaveResult<serde_json::Value> {
    let names = enclave.secrets.list(user_id)?;
    Ok(json!({ "names": names }))
}

pub fn export(enclave: &Enclave, user_id: &str) -> EnclaveResult<serde_json::Value> {
    let exported = enclave.secrets.get_user_secrets_json(user_id)?;
    let secrets: serde_json::Value = serde_json::from_str(&exported)
        .map_err(|e| EnclaveError::Internal(format!("secret export: {e}")))?;
    Ok(json!({ "secrets": secrets }))
}
