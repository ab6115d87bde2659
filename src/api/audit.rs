// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Audit trail queries.

use serde_json::json;

use crate::error::EnclaveResult;
use crate::state::Enclave;

/// A day's events, optionally narrowed to one user.
pub fn events(enclave: &Enclave, date: &str, user_id: Option<&str>) -> EnclaveResult<serde_json::Value> {
    let events = match user_id {
        Some(user_id) => enclave.audit.search_by_user(user_id, date)?,
        None => enclave.audit.read_events(date)?,
    };
    Ok(json!({ "date": date, "events": events }))
}
