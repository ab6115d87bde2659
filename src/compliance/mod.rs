// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Compliance Gate
//!
//! Static policy checks run before untrusted code is executed or an identity
//! payload is accepted. Verdicts are always returned as status values: bad
//! input produces a status carrying an `error` message, never a failure
//! that crosses the enclave boundary.
//!
//! ## Code checks
//!
//! | Check | Violation |
//! |-------|-----------|
//! | Prohibited API (whole word) | `prohibited_api` |
//! | Prohibited data field (whole word) | `prohibited_data` |
//! | Network idiom, unless allowed | `network_access` |
//! | `len * 10 + loops * 1000 > max_gas` | `resource_usage` |
//!
//! Verdicts are cached by `(function_id, jurisdiction)` and identity
//! verdicts by `(user_id, jurisdiction)`.

pub mod checks;
pub mod rules;

use std::num::NonZeroUsize;
use std::sync::{Mutex, MutexGuard};

use chrono::Utc;
use lru::LruCache;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::audit::{AuditEvent, AuditEventType, AuditLog};
pub use checks::Violation;
pub use rules::{ComplianceRules, IdentityRules, GLOBAL};
use rules::{RuleBook, RuleOverrides};

pub const FUNCTION_NOT_VERIFIED: &str = "Function not verified";
pub const USER_NOT_VERIFIED: &str = "User not verified";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplianceStatus {
    pub function_id: String,
    pub user_id: String,
    pub jurisdiction: String,
    /// Unix milliseconds.
    pub timestamp: i64,
    pub compliant: bool,
    pub violations: Vec<Violation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityStatus {
    pub user_id: String,
    pub jurisdiction: String,
    pub timestamp: i64,
    pub verified: bool,
    pub violations: Vec<Violation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

type CacheKey = (String, String);

struct Inner {
    rules: RuleBook,
    code_statuses: LruCache<CacheKey, ComplianceStatus>,
    identity_statuses: LruCache<CacheKey, IdentityStatus>,
}

pub struct ComplianceGate {
    inner: Mutex<Inner>,
    audit: Option<AuditLog>,
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

impl ComplianceGate {
    /// Gate with the default rule tables and `cache_capacity` cached verdicts
    /// of each kind.
    pub fn new(cache_capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(cache_capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(Inner {
                rules: RuleBook::default(),
                code_statuses: LruCache::new(capacity),
                identity_statuses: LruCache::new(capacity),
            }),
            audit: None,
        }
    }

    pub fn with_audit(mut self, audit: AuditLog) -> Self {
        self.audit = Some(audit);
        self
    }

    // Verdicts stay meaningful after a panic elsewhere; recover the guard.
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Check `code` against `rules_json`, or the global table when empty.
    ///
    /// `rules_json` may name a `jurisdiction` and override any rule field;
    /// fields it omits come from that jurisdiction's table.
    pub fn verify_code(
        &self,
        code: &str,
        user_id: &str,
        function_id: &str,
        rules_json: &str,
    ) -> ComplianceStatus {
        let overrides = if rules_json.trim().is_empty() {
            RuleOverrides::default()
        } else {
            match serde_json::from_str::<RuleOverrides>(rules_json) {
                Ok(overrides) => overrides,
                Err(e) => {
                    warn!(function_id = %function_id, error = %e, "Rejected compliance rules");
                    return ComplianceStatus {
                        function_id: function_id.to_string(),
                        user_id: user_id.to_string(),
                        jurisdiction: GLOBAL.to_string(),
                        timestamp: now_millis(),
                        compliant: false,
                        violations: Vec::new(),
                        error: Some(format!("invalid compliance rules: {e}")),
                    };
                }
            }
        };

        let jurisdiction = overrides
            .jurisdiction
            .clone()
            .unwrap_or_else(|| GLOBAL.to_string());

        let mut inner = self.lock();
        let rules = overrides.apply(inner.rules.code_rules(&jurisdiction));

        let mut violations = Vec::new();
        let mut compliant = checks::check_prohibited_apis(code, &rules.prohibited_apis, &mut violations);
        compliant &= checks::check_data_access(code, &rules.prohibited_data, &mut violations);
        if !rules.allow_network_access {
            compliant &= checks::check_network_access(code, &mut violations);
        }
        compliant &= checks::check_resource_usage(code, rules.max_gas, &mut violations);

        let status = ComplianceStatus {
            function_id: function_id.to_string(),
            user_id: user_id.to_string(),
            jurisdiction: jurisdiction.clone(),
            timestamp: now_millis(),
            compliant,
            violations,
            error: None,
        };
        inner
            .code_statuses
            .put((function_id.to_string(), jurisdiction.clone()), status.clone());
        drop(inner);

        debug!(
            function_id = %function_id,
            jurisdiction = %jurisdiction,
            compliant,
            violations = status.violations.len(),
            "Verified code"
        );
        let mut event = AuditEvent::new(AuditEventType::CodeVerified)
            .with_user(user_id)
            .with_resource("function", function_id)
            .with_details(serde_json::json!({
                "jurisdiction": jurisdiction,
                "violations": status.violations.iter().map(Violation::kind).collect::<Vec<_>>(),
            }));
        if !compliant {
            event = event.failed("non_compliant");
        }
        self.audit(event);

        status
    }

    /// Check that `identity_json` carries every field `jurisdiction` requires.
    pub fn verify_identity(
        &self,
        user_id: &str,
        identity_json: &str,
        jurisdiction: &str,
    ) -> IdentityStatus {
        let failed = |error: String| IdentityStatus {
            user_id: user_id.to_string(),
            jurisdiction: jurisdiction.to_string(),
            timestamp: now_millis(),
            verified: false,
            violations: Vec::new(),
            error: Some(error),
        };

        let identity = match serde_json::from_str::<serde_json::Value>(identity_json) {
            Ok(serde_json::Value::Object(map)) => map,
            Ok(_) => return failed("identity payload must be a JSON object".to_string()),
            Err(e) => return failed(format!("invalid identity payload: {e}")),
        };

        let mut inner = self.lock();
        let rules = inner.rules.identity_rules(jurisdiction);
        let mut violations = Vec::new();
        let verified =
            checks::check_required_fields(&identity, &rules.required_fields, &mut violations);

        let status = IdentityStatus {
            user_id: user_id.to_string(),
            jurisdiction: jurisdiction.to_string(),
            timestamp: now_millis(),
            verified,
            violations,
            error: None,
        };
        inner
            .identity_statuses
            .put((user_id.to_string(), jurisdiction.to_string()), status.clone());
        drop(inner);

        debug!(user_id = %user_id, jurisdiction = %jurisdiction, verified, "Verified identity");
        let mut event = AuditEvent::new(AuditEventType::IdentityVerified)
            .with_user(user_id)
            .with_resource("identity", user_id)
            .with_details(serde_json::json!({ "jurisdiction": jurisdiction }));
        if !verified {
            event = event.failed("missing_field");
        }
        self.audit(event);

        status
    }

    /// Last cached verdict for a function.
    pub fn get_compliance_status(&self, function_id: &str, jurisdiction: &str) -> ComplianceStatus {
        let key = (function_id.to_string(), jurisdiction.to_string());
        if let Some(status) = self.lock().code_statuses.get(&key) {
            return status.clone();
        }
        ComplianceStatus {
            function_id: function_id.to_string(),
            user_id: String::new(),
            jurisdiction: jurisdiction.to_string(),
            timestamp: now_millis(),
            compliant: false,
            violations: Vec::new(),
            error: Some(FUNCTION_NOT_VERIFIED.to_string()),
        }
    }

    /// Last cached identity verdict for a user.
    pub fn get_identity_status(&self, user_id: &str, jurisdiction: &str) -> IdentityStatus {
        let key = (user_id.to_string(), jurisdiction.to_string());
        if let Some(status) = self.lock().identity_statuses.get(&key) {
            return status.clone();
        }
        IdentityStatus {
            user_id: user_id.to_string(),
            jurisdiction: jurisdiction.to_string(),
            timestamp: now_millis(),
            verified: false,
            violations: Vec::new(),
            error: Some(USER_NOT_VERIFIED.to_string()),
        }
    }

    pub fn get_compliance_rules(&self, jurisdiction: &str) -> ComplianceRules {
        self.lock().rules.code_rules(jurisdiction)
    }

    pub fn set_compliance_rules(&self, jurisdiction: &str, rules: ComplianceRules) {
        self.lock().rules.set_code_rules(jurisdiction, rules);
        debug!(jurisdiction = %jurisdiction, "Updated compliance rules");
    }

    pub fn get_identity_rules(&self, jurisdiction: &str) -> IdentityRules {
        self.lock().rules.identity_rules(jurisdiction)
    }

    pub fn set_identity_rules(&self, jurisdiction: &str, rules: IdentityRules) {
        self.lock().rules.set_identity_rules(jurisdiction, rules);
        debug!(jurisdiction = %jurisdiction, "Updated identity rules");
    }

    fn audit(&self, event: AuditEvent) {
        if let Some(audit) = &self.audit {
            audit.record(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageConfig;
    use crate::storage::PersistentStorageManager;
    use std::sync::Arc;

    fn gate() -> ComplianceGate {
        ComplianceGate::new(16)
    }

    fn kinds(violations: &[Violation]) -> Vec<&'static str> {
        violations.iter().map(Violation::kind).collect()
    }

    #[test]
    fn clean_code_is_compliant() {
        let status = gate().verify_code("let x = 1 + 2;", "u", "f", "");
        assert!(status.compliant);
        assert!(status.violations.is_empty());
        assert_eq!(status.jurisdiction, GLOBAL);
        assert!(status.error.is_none());
    }

    #[test]
    fn eval_is_flagged() {
        let status = gate().verify_code("eval(input)", "u", "f", "");
        assert!(!status.compliant);
        assert_eq!(kinds(&status.violations), vec!["prohibited_api"]);
        let json = serde_json::to_value(&status.violations[0]).unwrap();
        assert_eq!(json["api"], "eval");
        assert_eq!(json["message"], "Code contains prohibited API: eval");
    }

    #[test]
    fn all_violations_are_reported() {
        let code = "fetch(url); const p = user.password; for (;;) {}";
        let status = gate().verify_code(code, "u", "f", r#"{"max_gas": 10}"#);
        assert!(!status.compliant);
        assert_eq!(
            kinds(&status.violations),
            vec!["prohibited_api", "prohibited_data", "network_access", "resource_usage"]
        );
    }

    #[test]
    fn gas_limit_from_rules() {
        let code = "for (let i = 0; i < 3; i++) {}";
        let gas = 10 * code.len() as u64 + 1000;

        let ok = gate().verify_code(code, "u", "f", &format!(r#"{{"max_gas": {gas}}}"#));
        assert!(ok.compliant);

        let status = gate().verify_code(code, "u", "f", &format!(r#"{{"max_gas": {}}}"#, gas - 1));
        assert!(!status.compliant);
        assert_eq!(
            status.violations,
            vec![Violation::ResourceUsage {
                estimated_gas: gas,
                max_gas: gas - 1,
                message: "Estimated gas usage exceeds maximum allowed".to_string(),
            }]
        );
    }

    #[test]
    fn network_access_can_be_allowed() {
        let gate = gate();
        let code = "new WebSocket(url)";
        assert!(!gate.verify_code(code, "u", "f", "").compliant);
        assert!(gate
            .verify_code(code, "u", "f", r#"{"allow_network_access": true}"#)
            .compliant);
    }

    #[test]
    fn jurisdiction_selects_table() {
        let gate = gate();
        let code = "record.driver_license";
        assert!(gate.verify_code(code, "u", "f", "").compliant);
        let status = gate.verify_code(code, "u", "f", r#"{"jurisdiction":"US"}"#);
        assert!(!status.compliant);
        assert_eq!(status.jurisdiction, "US");
    }

    #[test]
    fn verification_is_idempotent() {
        let gate = gate();
        let code = "eval(x); ssn";
        let first = gate.verify_code(code, "u", "f", "");
        let second = gate.verify_code(code, "u", "f", "");
        assert_eq!(first.violations, second.violations);
        assert_eq!(first.compliant, second.compliant);
    }

    #[test]
    fn bad_rules_return_error_status() {
        let gate = gate();
        let status = gate.verify_code("x", "u", "f", "{not json");
        assert!(!status.compliant);
        assert!(status.error.unwrap().starts_with("invalid compliance rules"));
        assert_eq!(
            gate.get_compliance_status("f", GLOBAL).error.as_deref(),
            Some(FUNCTION_NOT_VERIFIED)
        );
    }

    #[test]
    fn statuses_are_cached() {
        let gate = gate();
        let status = gate.verify_code("eval(1)", "u", "f1", r#"{"jurisdiction":"EU"}"#);
        assert_eq!(gate.get_compliance_status("f1", "EU"), status);
        assert_eq!(
            gate.get_compliance_status("f1", GLOBAL).error.as_deref(),
            Some(FUNCTION_NOT_VERIFIED)
        );

        let identity = gate.verify_identity("u", r#"{"name":"A","email":"a@b"}"#, GLOBAL);
        assert_eq!(gate.get_identity_status("u", GLOBAL), identity);
        assert_eq!(
            gate.get_identity_status("v", GLOBAL).error.as_deref(),
            Some(USER_NOT_VERIFIED)
        );
    }

    #[test]
    fn cache_is_bounded() {
        let gate = ComplianceGate::new(1);
        gate.verify_code("x", "u", "a", "");
        gate.verify_code("x", "u", "b", "");
        assert!(gate.get_compliance_status("a", GLOBAL).error.is_some());
        assert!(gate.get_compliance_status("b", GLOBAL).error.is_none());
    }

    #[test]
    fn identity_missing_fields() {
        let status = gate().verify_identity("u", r#"{"name":"A","email":"a@b","phone":null}"#, "US");
        assert!(!status.verified);
        let missing: Vec<_> = status
            .violations
            .iter()
            .map(|v| match v {
                Violation::MissingField { field, .. } => field.as_str(),
                _ => "",
            })
            .collect();
        assert_eq!(missing, vec!["address", "phone"]);
    }

    #[test]
    fn identity_bad_json() {
        let gate = gate();
        let status = gate.verify_identity("u", "nope", "EU");
        assert!(!status.verified);
        assert!(status.error.is_some());
        let status = gate.verify_identity("u", "[1,2]", "EU");
        assert!(status.error.is_some());
    }

    #[test]
    fn rules_can_be_replaced() {
        let gate = gate();
        let mut rules = gate.get_compliance_rules("APAC");
        assert_eq!(rules, gate.get_compliance_rules(GLOBAL));

        rules.prohibited_apis.push("require".to_string());
        gate.set_compliance_rules("APAC", rules);
        let status = gate.verify_code("require('fs')", "u", "f", r#"{"jurisdiction":"APAC"}"#);
        assert_eq!(kinds(&status.violations), vec!["prohibited_api"]);
        assert!(gate.verify_code("require('fs')", "u", "f", "").compliant);

        gate.set_identity_rules(
            "APAC",
            IdentityRules {
                required_fields: vec!["tax_id".to_string()],
            },
        );
        assert!(!gate.verify_identity("u", r#"{"name":"A"}"#, "APAC").verified);
    }

    #[test]
    fn verdicts_are_audited() {
        let storage = Arc::new(PersistentStorageManager::new(StorageConfig::in_memory()));
        storage.initialize().unwrap();
        let audit = AuditLog::new(storage);
        let gate = gate().with_audit(audit.clone());

        gate.verify_code("eval(1)", "u", "f", "");
        gate.verify_identity("u", r#"{"name":"A","email":"e"}"#, GLOBAL);

        let today = Utc::now().format("%Y-%m-%d").to_string();
        let events = audit.read_events(&today).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].event_type, AuditEventType::CodeVerified);
        assert!(!events[0].success);
        assert_eq!(events[1].event_type, AuditEventType::IdentityVerified);
        assert!(events[1].success);
    }
}
