// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! TEE Oracle Core - enclave trusted computing base
//!
//! Services that run inside an SGX enclave (Gramine or Occlum) and carry the
//! oracle platform's security guarantees. The host is untrusted and talks to
//! the enclave only through [`api::dispatch`].
//!
//! ## Modules
//!
//! - `attestation` - SGX quote generation and verification
//! - `randomness` - Provably-fair numbers, bytes and seeds
//! - `secrets` - Per-user sealed secrets
//! - `storage` - Persistent storage with encryption, compression and transactions
//! - `compliance` - Static policy checks on code and identity payloads
//! - `api` - Host call surface

pub mod api;
pub mod attestation;
pub mod audit;
pub mod compliance;
pub mod config;
pub mod error;
pub mod logging;
pub mod models;
pub mod randomness;
pub mod secrets;
pub mod state;
pub mod storage;
