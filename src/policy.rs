//! Policy configuration and resolution.
//!
//! This module handles loading the policy table from configuration and
//! resolving an inbound request's endpoint class and subscription tier to a
//! concrete limit/window pair. Resolution is a pure lookup against a static
//! table built at startup; an incomplete table is a construction-time error,
//! never a request-time surprise.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::info;

use crate::error::{EngineError, Result};

/// Tier value that matches any tier for an endpoint class.
pub const TIER_WILDCARD: &str = "*";

/// How the caller derives the identity string for a policy.
///
/// The engine never interprets the identity itself; this enum only records
/// which strategy a policy expects so the caller knows what to supply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum IdentityStrategy {
    /// Key on the client IP address.
    Ip,
    /// Key on the authenticated user id.
    UserId,
    /// Key on the account email address.
    Email,
}

impl Default for IdentityStrategy {
    fn default() -> Self {
        IdentityStrategy::Ip
    }
}

/// A resolved, immutable rate limit policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Policy {
    /// Policy name, used in window keys and response metadata.
    pub name: String,
    /// Maximum requests allowed per window. Zero means unlimited.
    pub limit: u32,
    /// Window length in milliseconds.
    pub window_ms: u64,
    /// Identity strategy the policy expects.
    pub identity_strategy: IdentityStrategy,
}

impl Policy {
    /// Whether this policy admits everything (limit of zero).
    pub fn is_unlimited(&self) -> bool {
        self.limit == 0
    }
}

/// A single entry in the policy table configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyRule {
    /// The endpoint class this rule applies to (e.g. `auth-login`, `api`).
    pub endpoint_class: String,
    /// The subscription tier this rule applies to, or `"*"` for any tier.
    #[serde(default = "default_tier")]
    pub tier: String,
    /// Maximum requests allowed per window. Zero means unlimited.
    pub limit: u32,
    /// Window length in milliseconds.
    pub window_ms: u64,
    /// Identity strategy for this rule.
    #[serde(default)]
    pub identity_strategy: IdentityStrategy,
    /// Optional explicit policy name. Defaults to `{endpoint_class}-{tier}`.
    #[serde(default)]
    pub name: Option<String>,
}

fn default_tier() -> String {
    TIER_WILDCARD.to_string()
}

/// The validated policy table, resolving `(endpoint_class, tier)` to a
/// [`Policy`].
///
/// Lookups fall back from an exact tier match to the class wildcard entry to
/// the most restrictive tier defined for the class, in that order. Unknown
/// tiers therefore fail closed. Unknown endpoint classes are a configuration
/// error: use [`PolicyTable::ensure_classes`] at startup so the process
/// refuses to boot with an unmapped route instead of silently allowing it.
#[derive(Debug, Clone)]
pub struct PolicyTable {
    policies: HashMap<(String, String), Policy>,
}

impl PolicyTable {
    /// Build and validate a policy table from configuration rules.
    pub fn build(rules: Vec<PolicyRule>) -> Result<Self> {
        if rules.is_empty() {
            return Err(EngineError::Config("policy table is empty".to_string()));
        }

        let mut policies = HashMap::with_capacity(rules.len());
        for rule in rules {
            if rule.window_ms == 0 {
                return Err(EngineError::Config(format!(
                    "policy for '{}'/'{}' has a zero-length window",
                    rule.endpoint_class, rule.tier
                )));
            }
            if rule.endpoint_class.is_empty() {
                return Err(EngineError::Config(
                    "policy rule with empty endpoint class".to_string(),
                ));
            }

            let name = rule
                .name
                .unwrap_or_else(|| format!("{}-{}", rule.endpoint_class, rule.tier));
            let key = (rule.endpoint_class.clone(), rule.tier.clone());
            let policy = Policy {
                name,
                limit: rule.limit,
                window_ms: rule.window_ms,
                identity_strategy: rule.identity_strategy,
            };

            if policies.insert(key, policy).is_some() {
                return Err(EngineError::Config(format!(
                    "duplicate policy for '{}'/'{}'",
                    rule.endpoint_class, rule.tier
                )));
            }
        }

        info!(policies = policies.len(), "Policy table loaded");
        Ok(Self { policies })
    }

    /// Load a policy table from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading policy table");

        let contents = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("Failed to read policy table: {}", e)))?;
        Self::from_yaml(&contents)
    }

    /// Load a policy table from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let rules: Vec<PolicyRule> = serde_yaml::from_str(yaml)
            .map_err(|e| EngineError::Config(format!("Failed to parse policy table: {}", e)))?;
        Self::build(rules)
    }

    /// Load a policy table from a JSON string.
    pub fn from_json(json: &str) -> Result<Self> {
        let rules: Vec<PolicyRule> = serde_json::from_str(json)
            .map_err(|e| EngineError::Config(format!("Failed to parse policy table: {}", e)))?;
        Self::build(rules)
    }

    /// Verify that every listed endpoint class has at least one policy.
    ///
    /// Intended to be called at startup with the full set of routed classes
    /// so that an unmapped route is a boot failure, not an allow-all hole.
    pub fn ensure_classes(&self, classes: &[&str]) -> Result<()> {
        for class in classes {
            if !self.policies.keys().any(|(c, _)| c == class) {
                return Err(EngineError::PolicyNotFound((*class).to_string()));
            }
        }
        Ok(())
    }

    /// Resolve the policy governing `(endpoint_class, tier)`.
    ///
    /// Falls back to the class wildcard, then to the most restrictive tier
    /// defined for the class. Returns [`EngineError::PolicyNotFound`] only
    /// when the class has no entries at all.
    pub fn resolve(&self, endpoint_class: &str, tier: &str) -> Result<&Policy> {
        let exact = (endpoint_class.to_string(), tier.to_string());
        if let Some(policy) = self.policies.get(&exact) {
            return Ok(policy);
        }

        let wildcard = (endpoint_class.to_string(), TIER_WILDCARD.to_string());
        if let Some(policy) = self.policies.get(&wildcard) {
            return Ok(policy);
        }

        // Unknown tier: fail closed onto the tightest limit for the class.
        self.policies
            .iter()
            .filter(|((class, _), _)| class == endpoint_class)
            .map(|(_, policy)| policy)
            .min_by_key(|p| Self::restrictiveness(p))
            .ok_or_else(|| EngineError::PolicyNotFound(endpoint_class.to_string()))
    }

    /// Ordering key for fail-closed fallback. Unlimited ranks last.
    fn restrictiveness(policy: &Policy) -> u64 {
        if policy.is_unlimited() {
            u64::MAX
        } else {
            policy.limit as u64
        }
    }

    /// The smallest window configured in the table, in milliseconds.
    ///
    /// Useful for sizing the in-process store's sweep interval.
    pub fn min_window_ms(&self) -> u64 {
        self.policies
            .values()
            .map(|p| p.window_ms)
            .min()
            .unwrap_or(60_000)
    }

    /// Number of policies in the table.
    pub fn len(&self) -> usize {
        self.policies.len()
    }

    /// Whether the table is empty. A built table never is.
    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(class: &str, tier: &str, limit: u32, window_ms: u64) -> PolicyRule {
        PolicyRule {
            endpoint_class: class.to_string(),
            tier: tier.to_string(),
            limit,
            window_ms,
            identity_strategy: IdentityStrategy::default(),
            name: None,
        }
    }

    fn sample_table() -> PolicyTable {
        PolicyTable::build(vec![
            rule("auth-login", "*", 5, 900_000),
            rule("api", "free", 100, 3_600_000),
            rule("api", "pro", 1_000, 3_600_000),
            rule("api", "enterprise", 0, 3_600_000),
        ])
        .unwrap()
    }

    #[test]
    fn test_empty_table_rejected() {
        let err = PolicyTable::build(Vec::new()).unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }

    #[test]
    fn test_zero_window_rejected() {
        let err = PolicyTable::build(vec![rule("api", "free", 10, 0)]).unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }

    #[test]
    fn test_duplicate_rule_rejected() {
        let err = PolicyTable::build(vec![
            rule("api", "free", 10, 1000),
            rule("api", "free", 20, 1000),
        ])
        .unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }

    #[test]
    fn test_exact_tier_match() {
        let table = sample_table();
        let policy = table.resolve("api", "pro").unwrap();
        assert_eq!(policy.limit, 1_000);
        assert_eq!(policy.name, "api-pro");
    }

    #[test]
    fn test_wildcard_match() {
        let table = sample_table();
        let policy = table.resolve("auth-login", "enterprise").unwrap();
        assert_eq!(policy.limit, 5);
        assert_eq!(policy.window_ms, 900_000);
    }

    #[test]
    fn test_unknown_tier_fails_closed() {
        let table = sample_table();
        // No "api"/"trial" entry and no wildcard: tightest defined limit wins.
        let policy = table.resolve("api", "trial").unwrap();
        assert_eq!(policy.limit, 100);
        assert_eq!(policy.name, "api-free");
    }

    #[test]
    fn test_unlimited_never_wins_fallback() {
        let table = PolicyTable::build(vec![
            rule("export", "enterprise", 0, 60_000),
            rule("export", "pro", 50, 60_000),
        ])
        .unwrap();
        let policy = table.resolve("export", "unknown").unwrap();
        assert_eq!(policy.limit, 50);
    }

    #[test]
    fn test_unknown_class_is_error() {
        let table = sample_table();
        let err = table.resolve("webhooks", "free").unwrap_err();
        assert!(matches!(err, EngineError::PolicyNotFound(_)));
    }

    #[test]
    fn test_min_window() {
        let table = sample_table();
        assert_eq!(table.min_window_ms(), 900_000);

        let tight = PolicyTable::build(vec![
            rule("api", "free", 10, 60_000),
            rule("search", "*", 30, 1_000),
        ])
        .unwrap();
        assert_eq!(tight.min_window_ms(), 1_000);
    }

    #[test]
    fn test_ensure_classes() {
        let table = sample_table();
        assert!(table.ensure_classes(&["api", "auth-login"]).is_ok());
        assert!(table.ensure_classes(&["api", "webhooks"]).is_err());
    }

    #[test]
    fn test_parse_yaml() {
        let yaml = r#"
- endpoint_class: auth-login
  limit: 5
  window_ms: 900000
- endpoint_class: api
  tier: free
  limit: 100
  window_ms: 3600000
  identity_strategy: userId
"#;
        let table = PolicyTable::from_yaml(yaml).unwrap();
        assert_eq!(table.len(), 2);

        let login = table.resolve("auth-login", "free").unwrap();
        assert_eq!(login.identity_strategy, IdentityStrategy::Ip);

        let api = table.resolve("api", "free").unwrap();
        assert_eq!(api.identity_strategy, IdentityStrategy::UserId);
    }

    #[test]
    fn test_parse_json() {
        let json = r#"[
            { "endpoint_class": "search", "tier": "*", "limit": 30, "window_ms": 60000 }
        ]"#;
        let table = PolicyTable::from_json(json).unwrap();
        let policy = table.resolve("search", "free").unwrap();
        assert_eq!(policy.limit, 30);
        assert_eq!(policy.name, "search-*");
    }
}
