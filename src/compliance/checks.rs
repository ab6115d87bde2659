// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Static checks over untrusted code and identity payloads.
//!
//! Each check appends to a violation list instead of returning early, so one
//! pass reports everything that is wrong.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Idioms that reach the network from a script.
pub const NETWORK_IDIOMS: &[&str] = &[
    "XMLHttpRequest",
    "fetch",
    "WebSocket",
    "navigator.sendBeacon",
    "window.open",
    "location.href",
    "location.replace",
    "location.assign",
];

pub const GAS_PER_BYTE: u64 = 10;
pub const GAS_PER_LOOP: u64 = 1000;

static LOOP_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(for|while|do)\b").expect("valid loop pattern"));

static NETWORK_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    NETWORK_IDIOMS
        .iter()
        .filter_map(|idiom| word_pattern(idiom))
        .collect()
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Violation {
    ProhibitedApi {
        api: String,
        message: String,
    },
    ProhibitedData {
        data: String,
        message: String,
    },
    NetworkAccess {
        message: String,
    },
    ResourceUsage {
        estimated_gas: u64,
        max_gas: u64,
        message: String,
    },
    MissingField {
        field: String,
        message: String,
    },
}

impl Violation {
    /// The `type` tag.
    pub fn kind(&self) -> &'static str {
        match self {
            Violation::ProhibitedApi { .. } => "prohibited_api",
            Violation::ProhibitedData { .. } => "prohibited_data",
            Violation::NetworkAccess { .. } => "network_access",
            Violation::ResourceUsage { .. } => "resource_usage",
            Violation::MissingField { .. } => "missing_field",
        }
    }
}

/// Whole-word, literal match of `identifier`.
fn word_pattern(identifier: &str) -> Option<Regex> {
    Regex::new(&format!(r"\b{}\b", regex::escape(identifier))).ok()
}

fn contains_word(code: &str, identifier: &str) -> bool {
    if identifier.is_empty() {
        return false;
    }
    word_pattern(identifier).is_some_and(|re| re.is_match(code))
}

pub fn check_prohibited_apis(code: &str, apis: &[String], violations: &mut Vec<Violation>) -> bool {
    let before = violations.len();
    for api in apis.iter().filter(|api| contains_word(code, api)) {
        violations.push(Violation::ProhibitedApi {
            api: api.clone(),
            message: format!("Code contains prohibited API: {api}"),
        });
    }
    violations.len() == before
}

pub fn check_data_access(code: &str, data: &[String], violations: &mut Vec<Violation>) -> bool {
    let before = violations.len();
    for field in data.iter().filter(|field| contains_word(code, field)) {
        violations.push(Violation::ProhibitedData {
            data: field.clone(),
            message: format!("Code contains prohibited data: {field}"),
        });
    }
    violations.len() == before
}

/// At most one violation, however many idioms appear.
pub fn check_network_access(code: &str, violations: &mut Vec<Violation>) -> bool {
    if NETWORK_PATTERNS.iter().any(|re| re.is_match(code)) {
        violations.push(Violation::NetworkAccess {
            message: "Code contains network access".to_string(),
        });
        return false;
    }
    true
}

/// `len * 10 + loops * 1000`, where loops counts `for`, `while` and `do`.
pub fn estimate_gas(code: &str) -> u64 {
    let loops = LOOP_PATTERN.find_iter(code).count() as u64;
    (code.len() as u64)
        .saturating_mul(GAS_PER_BYTE)
        .saturating_add(loops.saturating_mul(GAS_PER_LOOP))
}

pub fn check_resource_usage(code: &str, max_gas: u64, violations: &mut Vec<Violation>) -> bool {
    let estimated_gas = estimate_gas(code);
    if estimated_gas > max_gas {
        violations.push(Violation::ResourceUsage {
            estimated_gas,
            max_gas,
            message: "Estimated gas usage exceeds maximum allowed".to_string(),
        });
        return false;
    }
    true
}

/// Missing and `null` fields are both reported, one violation each.
pub fn check_required_fields(
    identity: &serde_json::Map<String, serde_json::Value>,
    required: &[String],
    violations: &mut Vec<Violation>,
) -> bool {
    let before = violations.len();
    for field in required {
        let present = identity.get(field).is_some_and(|value| !value.is_null());
        if !present {
            violations.push(Violation::MissingField {
                field: field.clone(),
                message: "Required field is missing".to_string(),
            });
        }
    }
    violations.len() == before
}

#[cfg(test)]
mod tests {
    use super::*;

    fn list(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn apis_match_whole_words_only() {
        let mut violations = Vec::new();
        assert!(!check_prohibited_apis("eval('1')", &list(&["eval"]), &mut violations));
        assert_eq!(violations[0].kind(), "prohibited_api");

        let mut violations = Vec::new();
        assert!(check_prohibited_apis(
            "const medieval = retrieval();",
            &list(&["eval"]),
            &mut violations
        ));
        assert!(violations.is_empty());
    }

    #[test]
    fn identifiers_are_literal() {
        let mut violations = Vec::new();
        assert!(check_prohibited_apis("a+b", &list(&["a.b"]), &mut violations));
        assert!(check_data_access("x", &list(&[""]), &mut violations));
        assert!(violations.is_empty());
    }

    #[test]
    fn every_match_is_reported() {
        let mut violations = Vec::new();
        check_data_access("user.password + user.ssn", &list(&["password", "ssn", "passport"]), &mut violations);
        let fields: Vec<_> = violations
            .iter()
            .map(|v| match v {
                Violation::ProhibitedData { data, .. } => data.as_str(),
                _ => "",
            })
            .collect();
        assert_eq!(fields, vec!["password", "ssn"]);
    }

    #[test]
    fn network_access_reported_once() {
        let mut violations = Vec::new();
        assert!(!check_network_access(
            "fetch(u); new WebSocket(u); window.open(u)",
            &mut violations
        ));
        assert_eq!(violations.len(), 1);
        assert!(check_network_access("let x = 1;", &mut violations));
    }

    #[test]
    fn gas_counts_length_and_loops() {
        let code = "for (;;) {}";
        assert_eq!(estimate_gas(code), 10 * code.len() as u64 + 1000);
        assert_eq!(estimate_gas("do { } while (x)"), 16 * 10 + 2000);
        assert_eq!(estimate_gas("format(); doing();"), 18 * 10);

        let mut violations = Vec::new();
        let needed = estimate_gas(code);
        assert!(check_resource_usage(code, needed, &mut violations));
        assert!(!check_resource_usage(code, needed - 1, &mut violations));
        assert_eq!(
            violations,
            vec![Violation::ResourceUsage {
                estimated_gas: needed,
                max_gas: needed - 1,
                message: "Estimated gas usage exceeds maximum allowed".to_string(),
            }]
        );
    }

    #[test]
    fn missing_and_null_fields_are_reported_individually() {
        let identity = serde_json::json!({"name": "A", "email": null});
        let identity = identity.as_object().unwrap();
        let mut violations = Vec::new();
        assert!(!check_required_fields(
            identity,
            &list(&["name", "email", "phone"]),
            &mut violations
        ));
        assert_eq!(violations.len(), 2);
        let json = serde_json::to_value(&violations[0]).unwrap();
        assert_eq!(json["type"], "missing_field");
        assert_eq!(json["field"], "email");
        assert_eq!(json["message"], "Required field is missing");
    }
}
