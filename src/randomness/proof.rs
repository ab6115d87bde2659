// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Canonical claims and proof encoding.
//!
//! A proof signs `SHA-256(canonical_json)` where the JSON object has a fixed
//! field order per kind:
//!
//! ```text
//! number: {"random_number","min","max","user_id","request_id","timestamp"}
//! bytes:  {"random_bytes","user_id","request_id","timestamp"}
//! seed:   {"seed","user_id","request_id","timestamp"}
//! ```
//!
//! `random_bytes` is lowercase hex and `timestamp` is Unix milliseconds. The
//! proof string is `<timestamp>.<base64 signature>` so a verifier holding only
//! the value and context can recompute the digest.

use base64ct::{Base64, Encoding};
use serde::Serialize;
use sha2::{Digest, Sha256};

use super::RandomnessError;

#[derive(Serialize)]
struct NumberClaim<'a> {
    random_number: u64,
    min: u64,
    max: u64,
    user_id: &'a str,
    request_id: &'a str,
    timestamp: u64,
}

#[derive(Serialize)]
struct BytesClaim<'a> {
    random_bytes: String,
    user_id: &'a str,
    request_id: &'a str,
    timestamp: u64,
}

#[derive(Serialize)]
struct SeedClaim<'a> {
    seed: &'a str,
    user_id: &'a str,
    request_id: &'a str,
    timestamp: u64,
}

fn digest<T: Serialize>(claim: &T) -> Result<[u8; 32], RandomnessError> {
    let canonical = serde_json::to_vec(claim)
        .map_err(|e| RandomnessError::Signing(format!("canonical encoding failed: {e}")))?;
    Ok(Sha256::digest(&canonical).into())
}

pub fn number_digest(
    value: u64,
    min: u64,
    max: u64,
    user_id: &str,
    request_id: &str,
    timestamp: u64,
) -> Result<[u8; 32], RandomnessError> {
    digest(&NumberClaim {
        random_number: value,
        min,
        max,
        user_id,
        request_id,
        timestamp,
    })
}

pub fn bytes_digest(
    bytes: &[u8],
    user_id: &str,
    request_id: &str,
    timestamp: u64,
) -> Result<[u8; 32], RandomnessError> {
    digest(&BytesClaim {
        random_bytes: hex::encode(bytes),
        user_id,
        request_id,
        timestamp,
    })
}

pub fn seed_digest(
    seed: &str,
    user_id: &str,
    request_id: &str,
    timestamp: u64,
) -> Result<[u8; 32], RandomnessError> {
    digest(&SeedClaim {
        seed,
        user_id,
        request_id,
        timestamp,
    })
}

pub fn encode_proof(timestamp: u64, signature: &[u8]) -> String {
    format!("{timestamp}.{}", Base64::encode_string(signature))
}

/// `(timestamp, signature)`, or `None` when malformed.
pub fn decode_proof(proof: &str) -> Option<(u64, Vec<u8>)> {
    let (timestamp, signature) = proof.split_once('.')?;
    let timestamp = timestamp.parse().ok()?;
    let signature = Base64::decode_vec(signature).ok()?;
    Some((timestamp, signature))
}
