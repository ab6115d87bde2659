// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Randomness handlers.

use serde_json::json;

use crate::error::EnclaveResult;
use crate::models::{BytesResponse, NumberResponse, ProofResponse, SeedResponse, ValidResponse};
use crate::state::Enclave;

pub fn generate_number(
    enclave: &Enclave,
    min: u64,
    max: u64,
    user_id: &str,
    request_id: &str,
) -> EnclaveResult<NumberResponse> {
    let value = enclave
        .randomness
        .generate_number(min, max, user_id, request_id)?;
    let proof = enclave.randomness.get_number_proof(request_id)?;
    Ok(NumberResponse { value, proof })
}

pub fn get_number_proof(enclave: &Enclave, request_id: &str) -> EnclaveResult<ProofResponse> {
    let proof = enclave.randomness.get_number_proof(request_id)?;
    Ok(ProofResponse { proof })
}

pub fn verify_number(
    enclave: &Enclave,
    value: u64,
    min: u64,
    max: u64,
    user_id: &str,
    request_id: &str,
    proof: &str,
) -> ValidResponse {
    ValidResponse {
        valid: enclave
            .randomness
            .verify_number(value, min, max, user_id, request_id, proof),
    }
}

pub fn generate_bytes(
    enclave: &Enclave,
    length: usize,
    user_id: &str,
    request_id: &str,
) -> EnclaveResult<BytesResponse> {
    let bytes = enclave
        .randomness
        .generate_bytes(length, user_id, request_id)?;
    let proof = enclave.randomness.get_bytes_proof(request_id)?;
    Ok(BytesResponse { bytes, proof })
}

pub fn get_bytes_proof(enclave: &Enclave, request_id: &str) -> EnclaveResult<ProofResponse> {
    let proof = enclave.randomness.get_bytes_proof(request_id)?;
    Ok(ProofResponse { proof })
}

pub fn verify_bytes(
    enclave: &Enclave,
    bytes: &[u8],
    user_id: &str,
    request_id: &str,
    proof: &str,
) -> ValidResponse {
    ValidResponse {
        valid: enclave
            .randomness
            .verify_bytes(bytes, user_id, request_id, proof),
    }
}

pub fn generate_seed(
    enclave: &Enclave,
    user_id: &str,
    request_id: &str,
) -> EnclaveResult<SeedResponse> {
    let seed = enclave.randomness.generate_seed(user_id, request_id)?;
    let proof = enclave.randomness.get_seed_proof(request_id)?;
    Ok(SeedResponse { seed, proof })
}

pub fn get_seed_proof(enclave: &Enclave, request_id: &str) -> EnclaveResult<ProofResponse> {
    let proof = enclave.randomness.get_seed_proof(request_id)?;
    Ok(ProofResponse { proof })
}

pub fn verify_seed(
    enclave: &Enclave,
    seed: &str,
    user_id: &str,
    request_id: &str,
    proof: &str,
) -> ValidResponse {
    ValidResponse {
        valid: enclave
            .randomness
            .verify_seed(seed, user_id, request_id, proof),
    }
}

pub fn public_key(enclave: &Enclave) -> serde_json::Value {
    json!({ "public_key": enclave.randomness.public_key() })
}

pub fn rotate_signing_key(enclave: &Enclave) -> EnclaveResult<serde_json::Value> {
    enclave.randomness.rotate_signing_key()?;
    Ok(public_key(enclave))
}
