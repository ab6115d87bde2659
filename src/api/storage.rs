// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Storage handlers.
//!
//! Keys in the reserved `__` namespace are rejected by the manager, so the
//! host cannot address chunk or health-probe entries directly.

use serde_json::json;

use crate::error::EnclaveResult;
use crate::models::ValueResponse;
use crate::state::Enclave;
use crate::storage::{MetadataUpdate, StorageMetadata, StorageStats, WriteOptions};

pub fn write(
    enclave: &Enclave,
    key: &str,
    value: &[u8],
    options: WriteOptions,
) -> EnclaveResult<serde_json::Value> {
    enclave.storage.write_with(key, value, options)?;
    Ok(json!({ "written": value.len() }))
}

pub fn read(enclave: &Enclave, key: &str) -> EnclaveResult<ValueResponse> {
    Ok(ValueResponse {
        value: enclave.storage.read(key)?,
    })
}

pub fn delete(enclave: &Enclave, key: &str) -> EnclaveResult<serde_json::Value> {
    let deleted = enclave.storage.delete(key)?;
    Ok(json!({ "deleted": deleted }))
}

pub fn exists(enclave: &Enclave, key: &str) -> EnclaveResult<serde_json::Value> {
    let exists = enclave.storage.exists(key)?;
    Ok(json!({ "exists": exists }))
}

pub fn list_keys(enclave: &Enclave, prefix: Option<&str>) -> EnclaveResult<serde_json::Value> {
    let keys = match prefix {
        Some(prefix) => enclave.storage.keys_with_prefix(prefix)?,
        None => enclave.storage.get_all_keys()?,
    };
    Ok(json!({ "keys": keys }))
}

pub fn get_metadata(enclave: &Enclave, key: &str) -> EnclaveResult<Option<StorageMetadata>> {
    Ok(enclave.storage.get_metadata(key)?)
}

pub fn update_metadata(
    enclave: &Enclave,
    key: &str,
    update: MetadataUpdate,
) -> EnclaveResult<StorageMetadata> {
    Ok(enclave.storage.update_metadata(key, update)?)
}

pub fn flush(enclave: &Enclave) -> EnclaveResult<serde_json::Value> {
    enclave.storage.flush()?;
    Ok(json!({ "flushed": true }))
}

pub fn compact(enclave: &Enclave) -> EnclaveResult<serde_json::Value> {
    enclave.storage.compact()?;
    Ok(json!({ "compacted": true }))
}

pub fn rotate_key(enclave: &Enclave) -> EnclaveResult<serde_json::Value> {
    let version = enclave.rotate_storage_key()?;
    Ok(json!({ "key_version": version }))
}

pub fn stats(enclave: &Enclave) -> EnclaveResult<StorageStats> {
    Ok(enclave.storage.usage_stats()?)
}

pub fn begin_transaction(enclave: &Enclave) -> EnclaveResult<serde_json::Value> {
    let id = enclave.storage.begin_transaction_id()?;
    Ok(json!({ "transaction_id": id }))
}

pub fn transaction_write(
    enclave: &Enclave,
    transaction_id: u64,
    key: &str,
    value: &[u8],
    options: WriteOptions,
) -> EnclaveResult<serde_json::Value> {
    enclave
        .storage
        .transaction_write(transaction_id, key, value, options)?;
    Ok(json!({ "buffered": true }))
}

pub fn transaction_delete(
    enclave: &Enclave,
    transaction_id: u64,
    key: &str,
) -> EnclaveResult<serde_json::Value> {
    enclave.storage.transaction_delete(transaction_id, key)?;
    Ok(json!({ "buffered": true }))
}

pub fn transaction_read(
    enclave: &Enclave,
    transaction_id: u64,
    key: &str,
) -> EnclaveResult<ValueResponse> {
    Ok(ValueResponse {
        value: enclave.storage.transaction_read(transaction_id, key)?,
    })
}

pub fn commit_transaction(enclave: &Enclave, transaction_id: u64) -> EnclaveResult<serde_json::Value> {
    enclave.storage.commit_transaction(transaction_id)?;
    Ok(json!({ "status": "committed" }))
}

pub fn rollback_transaction(
    enclave: &Enclave,
    transaction_id: u64,
) -> EnclaveResult<serde_json::Value> {
    enclave.storage.rollback_transaction(transaction_id)?;
    Ok(json!({ "status": "rolled_back" }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::test_support::enclave;
    use crate::error::EnclaveError;

    #[test]
    fn crud_and_metadata() {
        let enclave = enclave();
        write(&enclave, "feeds/btc", b"42000", WriteOptions::default().with_content_type("text/plain")).unwrap();
        assert_eq!(exists(&enclave, "feeds/btc").unwrap()["exists"], true);
        assert_eq!(read(&enclave, "feeds/btc").unwrap().value.as_deref(), Some(&b"42000"[..]));

        let metadata = get_metadata(&enclave, "feeds/btc").unwrap().unwrap();
        assert_eq!(metadata.size, 5);
        assert_eq!(metadata.content_type, "text/plain");

        assert_eq!(list_keys(&enclave, Some("feeds/")).unwrap()["keys"], json!(["feeds/btc"]));
        assert_eq!(delete(&enclave, "feeds/btc").unwrap()["deleted"], true);
        assert!(read(&enclave, "feeds/btc").unwrap().value.is_none());
    }

    #[test]
    fn reserved_keys_are_rejected() {
        let enclave = enclave();
        let err = write(&enclave, "__chunk__/x/00000000", b"v", WriteOptions::default()).unwrap_err();
        assert!(matches!(err, EnclaveError::InvalidInput(_)));
    }

    #[test]
    fn rotation_is_audited() {
        let enclave = enclave();
        write(&enclave, "k", b"before", WriteOptions::default()).unwrap();
        let rotated = rotate_key(&enclave).unwrap();
        assert_eq!(rotated["key_version"], 2);
        assert_eq!(read(&enclave, "k").unwrap().value.as_deref(), Some(&b"before"[..]));

        let today = chrono::Utc::now().format("%Y-%m-%d").to_string();
        let events = enclave.audit.read_events(&today).unwrap();
        assert!(events
            .iter()
            .any(|e| e.event_type == crate::audit::AuditEventType::StorageKeyRotated));
    }

    #[test]
    fn rollback_discards_writes() {
        let enclave = enclave();
        let id = begin_transaction(&enclave).unwrap()["transaction_id"].as_u64().unwrap();
        transaction_write(&enclave, id, "tx", b"v", WriteOptions::default()).unwrap();
        assert_eq!(transaction_read(&enclave, id, "tx").unwrap().value.as_deref(), Some(&b"v"[..]));
        rollback_transaction(&enclave, id).unwrap();
        assert!(read(&enclave, "tx").unwrap().value.is_none());
        assert!(matches!(
            transaction_write(&enclave, id, "tx", b"v", WriteOptions::default()),
            Err(EnclaveError::TransactionClosed)
        ));
    }
}
