// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Audit logging for security-sensitive operations.
//!
//! Secret mutations, key rotations, randomness generation and compliance
//! verdicts are written to persistent storage, one record per event under a
//! per-day prefix in the enclave's internal namespace, so the trail is
//! encrypted at rest and unreachable through host storage calls. Secret
//! values never appear in events.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::storage::{PersistentStorageManager, StorageError, StorageResult, WriteOptions};

/// Types of auditable events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    // Secret events
    SecretStored,
    SecretDeleted,

    // Key events
    StorageKeyRotated,
    SigningKeyRotated,

    // Randomness events
    RandomNumberGenerated,
    RandomBytesGenerated,
    SeedGenerated,

    // Compliance events
    CodeVerified,
    IdentityVerified,
}

/// An audit log entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: AuditEventType,
    /// User on whose behalf the operation ran (if known).
    pub user_id: Option<String>,
    /// Resource affected (request id, secret name, function id).
    pub resource_id: Option<String>,
    /// Resource type (secret, randomness, function, identity).
    pub resource_type: Option<String>,
    pub details: Option<serde_json::Value>,
    pub success: bool,
    pub error: Option<String>,
}

impl AuditEvent {
    pub fn new(event_type: AuditEventType) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type,
            user_id: None,
            resource_id: None,
            resource_type: None,
            details: None,
            success: true,
            error: None,
        }
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_resource(
        mut self,
        resource_type: impl Into<String>,
        resource_id: impl Into<String>,
    ) -> Self {
        self.resource_type = Some(resource_type.into());
        self.resource_id = Some(resource_id.into());
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Mark as failed with error message.
    pub fn failed(mut self, error: impl Into<String>) -> Self {
        self.success = false;
        self.error = Some(error.into());
        self
    }
}

const AUDIT_PREFIX: &str = "__enclave__/audit/";

fn day_prefix(date: &str) -> StorageResult<String> {
    let day = NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .map_err(|e| StorageError::InvalidKey(format!("invalid date '{date}': {e}")))?;
    Ok(format!("{AUDIT_PREFIX}{}/", day.format("%Y-%m-%d")))
}

/// Audit trail stored through the persistent storage manager.
#[derive(Clone)]
pub struct AuditLog {
    storage: Arc<PersistentStorageManager>,
    sequence: Arc<AtomicU64>,
}

impl AuditLog {
    pub fn new(storage: Arc<PersistentStorageManager>) -> Self {
        Self {
            storage,
            sequence: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Store an event as its own record under the day's prefix.
    ///
    /// Record keys sort by event time, then by append order.
    pub fn log(&self, event: &AuditEvent) -> StorageResult<()> {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        let key = format!(
            "{AUDIT_PREFIX}{}/{}-{sequence:016x}-{}",
            event.timestamp.format("%Y-%m-%d"),
            event.timestamp.format("%H%M%S%.9f"),
            event.event_id
        );
        let event_json = serde_json::to_vec(event)?;
        self.storage.write_internal(
            &key,
            &event_json,
            WriteOptions::default().with_content_type("application/json"),
        )
    }

    /// Log and swallow failures; auditing must not abort the audited call.
    pub fn record(&self, event: AuditEvent) {
        if let Err(e) = self.log(&event) {
            warn!(
                event_type = ?event.event_type,
                error = %e,
                "Failed to write audit event"
            );
        }
    }

    /// Events for a specific date (`YYYY-MM-DD`), oldest first.
    pub fn read_events(&self, date: &str) -> StorageResult<Vec<AuditEvent>> {
        let prefix = day_prefix(date)?;
        let mut events = Vec::new();
        for key in self.storage.internal_keys(&prefix)? {
            if let Some(raw) = self.storage.read_internal(&key)? {
                events.push(serde_json::from_slice(&raw)?);
            }
        }
        Ok(events)
    }

    /// The user's events for a date.
    pub fn search_by_user(&self, user_id: &str, date: &str) -> StorageResult<Vec<AuditEvent>> {
        Ok(self
            .read_events(date)?
            .into_iter()
            .filter(|e| e.user_id.as_deref() == Some(user_id))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageConfig;

    fn setup() -> AuditLog {
        let storage = Arc::new(PersistentStorageManager::new(StorageConfig::in_memory()));
        storage.initialize().unwrap();
        AuditLog::new(storage)
    }

    #[test]
    fn create_audit_event() {
        let event = AuditEvent::new(AuditEventType::SecretStored)
            .with_user("user_123")
            .with_resource("secret", "api_key");

        assert_eq!(event.event_type, AuditEventType::SecretStored);
        assert_eq!(event.user_id, Some("user_123".to_string()));
        assert_eq!(event.resource_type, Some("secret".to_string()));
        assert_eq!(event.resource_id, Some("api_key".to_string()));
        assert!(event.success);
    }

    #[test]
    fn failed_event() {
        let event = AuditEvent::new(AuditEventType::CodeVerified)
            .with_user("user_123")
            .failed("prohibited_api");

        assert!(!event.success);
        assert_eq!(event.error, Some("prohibited_api".to_string()));
    }

    #[test]
    fn log_and_read_events() {
        let audit = setup();
        audit
            .log(&AuditEvent::new(AuditEventType::SecretStored).with_user("user_1"))
            .unwrap();
        audit
            .log(&AuditEvent::new(AuditEventType::SeedGenerated).with_user("user_2"))
            .unwrap();

        let today = Utc::now().format("%Y-%m-%d").to_string();
        let events = audit.read_events(&today).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, AuditEventType::SecretStored);
        assert_eq!(events[1].event_type, AuditEventType::SeedGenerated);

        assert!(audit.read_events("1999-01-01").unwrap().is_empty());
    }

    #[test]
    fn search_by_user() {
        let audit = setup();
        audit.record(AuditEvent::new(AuditEventType::SecretStored).with_user("user_target"));
        audit.record(AuditEvent::new(AuditEventType::SecretStored).with_user("user_other"));

        let today = Utc::now().format("%Y-%m-%d").to_string();
        let events = audit.search_by_user("user_target", &today).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].user_id, Some("user_target".to_string()));
    }

    #[test]
    fn invalid_dates_are_rejected() {
        let audit = setup();
        assert!(matches!(
            audit.read_events("yesterday"),
            Err(StorageError::InvalidKey(_))
        ));
        assert!(audit.search_by_user("u", "2026-13-01").is_err());
    }

    #[test]
    fn concurrent_appends_are_all_kept() {
        let audit = setup();
        let writers: Vec<_> = (0..8)
            .map(|thread| {
                let audit = audit.clone();
                std::thread::spawn(move || {
                    for i in 0..50 {
                        audit
                            .log(
                                &AuditEvent::new(AuditEventType::RandomBytesGenerated)
                                    .with_user(format!("user_{thread}"))
                                    .with_resource("randomness", format!("req_{i}")),
                            )
                            .unwrap();
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.join().unwrap();
        }

        let today = Utc::now().format("%Y-%m-%d").to_string();
        let events = audit.read_events(&today).unwrap();
        assert_eq!(events.len(), 400);
        assert_eq!(audit.search_by_user("user_3", &today).unwrap().len(), 50);
        assert!(events.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }

    #[test]
    fn records_are_not_visible_to_host_storage_calls() {
        let audit = setup();
        audit.record(AuditEvent::new(AuditEventType::SeedGenerated));
        assert!(audit.storage.get_all_keys().unwrap().is_empty());
    }
}
