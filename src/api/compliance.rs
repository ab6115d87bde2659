// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Compliance handlers. Verdicts are returned as-is, including error statuses.

use serde_json::json;

use crate::compliance::{ComplianceRules, ComplianceStatus, IdentityRules, IdentityStatus};
use crate::state::Enclave;

pub fn verify_code(
    enclave: &Enclave,
    code: &str,
    user_id: &str,
    function_id: &str,
    rules: &str,
) -> ComplianceStatus {
    enclave
        .compliance
        .verify_code(code, user_id, function_id, rules)
}

pub fn verify_identity(
    enclave: &Enclave,
    user_id: &str,
    identity: &str,
    jurisdiction: &str,
) -> IdentityStatus {
    enclave
        .compliance
        .verify_identity(user_id, identity, jurisdiction)
}

pub fn get_compliance_status(
    enclave: &Enclave,
    function_id: &str,
    jurisdiction: &str,
) -> ComplianceStatus {
    enclave
        .compliance
        .get_compliance_status(function_id, jurisdiction)
}

pub fn get_identity_status(enclave: &Enclave, user_id: &str, jurisdiction: &str) -> IdentityStatus {
    enclave.compliance.get_identity_status(user_id, jurisdiction)
}

pub fn get_compliance_rules(enclave: &Enclave, jurisdiction: &str) -> ComplianceRules {
    enclave.compliance.get_compliance_rules(jurisdiction)
}

pub fn set_compliance_rules(
    enclave: &Enclave,
    jurisdiction: &str,
    rules: ComplianceRules,
) -> serde_json::Value {
    enclave.compliance.set_compliance_rules(jurisdiction, rules);
    json!({ "updated": true, "jurisdiction": jurisdiction })
}

pub fn get_identity_rules(enclave: &Enclave, jurisdiction: &str) -> IdentityRules {
    enclave.compliance.get_identity_rules(jurisdiction)
}

pub fn set_identity_rules(
    enclave: &Enclave,
    jurisdiction: &str,
    rules: IdentityRules,
) -> serde_json::Value {
    enclave.compliance.set_identity_rules(jurisdiction, rules);
    json!({ "updated": true, "jurisdiction": jurisdiction })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::test_support::enclave;

    #[test]
    fn verdicts_pass_through() {
        let enclave = enclave();
        let status = verify_code(&enclave, "eval(x)", "u", "f", "");
        assert!(!status.compliant);
        assert_eq!(get_compliance_status(&enclave, "f", "global"), status);

        let identity = verify_identity(&enclave, "u", "{bad", "global");
        assert!(identity.error.is_some());
    }

    #[test]
    fn rules_update_through_handler() {
        let enclave = enclave();
        let mut rules = get_compliance_rules(&enclave, "global");
        rules.max_gas = 1;
        set_compliance_rules(&enclave, "global", rules);
        assert!(!verify_code(&enclave, "x", "u", "f", "").compliant);
    }

    #[test]
    fn identity_rules_update_through_handler() {
        let enclave = enclave();
        let mut rules = get_identity_rules(&enclave, "EU");
        assert!(rules.required_fields.contains(&"consent".to_string()));

        rules.required_fields.push("tax_id".to_string());
        set_identity_rules(&enclave, "EU", rules);
        let status = verify_identity(
            &enclave,
            "u",
            r#"{"name":"a","email":"b","address":"c","phone":"d","consent":true}"#,
            "EU",
        );
        assert!(!status.verified);
        assert_eq!(get_identity_rules(&enclave, "EU").required_fields.last().unwrap(), "tax_id");
    }
}
