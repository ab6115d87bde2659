// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Jurisdiction rule tables.
//!
//! Tables are plain values owned by the compliance gate. Lookups for an
//! unknown jurisdiction fall back to [`GLOBAL`].

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

pub const GLOBAL: &str = "global";

/// Code rules for one jurisdiction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplianceRules {
    pub prohibited_apis: Vec<String>,
    pub prohibited_data: Vec<String>,
    #[serde(default)]
    pub allow_network_access: bool,
    #[serde(default = "unlimited_gas")]
    pub max_gas: u64,
}

fn unlimited_gas() -> u64 {
    u64::MAX
}

/// Identity rules for one jurisdiction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityRules {
    pub required_fields: Vec<String>,
}

/// Rules supplied with a single `verify_code` call. Absent fields inherit
/// from the jurisdiction's table.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct RuleOverrides {
    pub jurisdiction: Option<String>,
    pub prohibited_apis: Option<Vec<String>>,
    pub prohibited_data: Option<Vec<String>>,
    pub allow_network_access: Option<bool>,
    pub max_gas: Option<u64>,
}

impl RuleOverrides {
    pub fn apply(self, mut base: ComplianceRules) -> ComplianceRules {
        if let Some(apis) = self.prohibited_apis {
            base.prohibited_apis = apis;
        }
        if let Some(data) = self.prohibited_data {
            base.prohibited_data = data;
        }
        if let Some(allow) = self.allow_network_access {
            base.allow_network_access = allow;
        }
        if let Some(max_gas) = self.max_gas {
            base.max_gas = max_gas;
        }
        base
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

const DEFAULT_PROHIBITED_APIS: &[&str] = &[
    "eval",
    "Function",
    "setTimeout",
    "setInterval",
    "XMLHttpRequest",
    "fetch",
];

#[derive(Debug, Clone)]
pub struct RuleBook {
    code: HashMap<String, ComplianceRules>,
    identity: HashMap<String, IdentityRules>,
}

impl Default for RuleBook {
    fn default() -> Self {
        let mut code = HashMap::new();
        code.insert(
            GLOBAL.to_string(),
            ComplianceRules {
                prohibited_apis: strings(DEFAULT_PROHIBITED_APIS),
                prohibited_data: strings(&["password", "credit_card", "ssn", "passport"]),
                allow_network_access: false,
                max_gas: 1_000_000,
            },
        );
        code.insert(
            "US".to_string(),
            ComplianceRules {
                prohibited_apis: strings(DEFAULT_PROHIBITED_APIS),
                prohibited_data: strings(&[
                    "password",
                    "credit_card",
                    "ssn",
                    "passport",
                    "driver_license",
                ]),
                allow_network_access: false,
                max_gas: 500_000,
            },
        );
        code.insert(
            "EU".to_string(),
            ComplianceRules {
                prohibited_apis: strings(DEFAULT_PROHIBITED_APIS),
                prohibited_data: strings(&[
                    "password",
                    "credit_card",
                    "national_id",
                    "passport",
                    "health_data",
                ]),
                allow_network_access: false,
                max_gas: 500_000,
            },
        );

        let mut identity = HashMap::new();
        identity.insert(
            GLOBAL.to_string(),
            IdentityRules {
                required_fields: strings(&["name", "email"]),
            },
        );
        identity.insert(
            "US".to_string(),
            IdentityRules {
                required_fields: strings(&["name", "email", "address", "phone"]),
            },
        );
        identity.insert(
            "EU".to_string(),
            IdentityRules {
                required_fields: strings(&["name", "email", "address", "phone", "consent"]),
            },
        );

        Self { code, identity }
    }
}

impl RuleBook {
    pub fn code_rules(&self, jurisdiction: &str) -> ComplianceRules {
        self.code
            .get(jurisdiction)
            .or_else(|| self.code.get(GLOBAL))
            .cloned()
            .unwrap_or_else(|| ComplianceRules {
                prohibited_apis: Vec::new(),
                prohibited_data: Vec::new(),
                allow_network_access: false,
                max_gas: u64::MAX,
            })
    }

    pub fn identity_rules(&self, jurisdiction: &str) -> IdentityRules {
        self.identity
            .get(jurisdiction)
            .or_else(|| self.identity.get(GLOBAL))
            .cloned()
            .unwrap_or(IdentityRules {
                required_fields: Vec::new(),
            })
    }

    pub fn set_code_rules(&mut self, jurisdiction: &str, rules: ComplianceRules) {
        self.code.insert(jurisdiction.to_string(), rules);
    }

    pub fn set_identity_rules(&mut self, jurisdiction: &str, rules: IdentityRules) {
        self.identity.insert(jurisdiction.to_string(), rules);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_tables() {
        let book = RuleBook::default();
        assert_eq!(book.code_rules("US").max_gas, 500_000);
        assert!(book
            .code_rules("EU")
            .prohibited_data
            .contains(&"health_data".to_string()));
        assert_eq!(book.identity_rules("EU").required_fields.len(), 5);
    }

    #[test]
    fn unknown_jurisdiction_falls_back_to_global() {
        let book = RuleBook::default();
        assert_eq!(book.code_rules("JP"), book.code_rules(GLOBAL));
        assert_eq!(
            book.identity_rules("JP").required_fields,
            vec!["name".to_string(), "email".to_string()]
        );
    }

    #[test]
    fn overrides_inherit_missing_fields() {
        let book = RuleBook::default();
        let overrides: RuleOverrides =
            serde_json::from_str(r#"{"jurisdiction":"US","max_gas":10}"#).unwrap();
        assert_eq!(overrides.jurisdiction.as_deref(), Some("US"));
        let rules = overrides.apply(book.code_rules("US"));
        assert_eq!(rules.max_gas, 10);
        assert!(rules.prohibited_data.contains(&"driver_license".to_string()));
    }

    #[test]
    fn rules_deserialize_with_defaults() {
        let rules: ComplianceRules =
            serde_json::from_str(r#"{"prohibited_apis":["eval"],"prohibited_data":[]}"#).unwrap();
        assert!(!rules.allow_network_access);
        assert_eq!(rules.max_gas, u64::MAX);
    }
}
