//! Limit table configuration and resolution.
//!
//! This module handles loading the (tier, endpoint pattern) -> ceiling table
//! and resolving the ceiling that applies to a request. Patterns are either
//! the literal `default` or a path prefix; the most specific match wins.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info};

use super::tier::Tier;
use crate::error::{Result, TiergateError};

/// Pattern key that holds a tier's fallback ceiling.
pub const DEFAULT_PATTERN: &str = "default";

/// Ceiling used when the table cannot resolve anything else.
pub const GLOBAL_FALLBACK_LIMIT: u64 = 100;

/// A complete limit table covering every tier.
///
/// ```yaml
/// tiers:
///   free:
///     default: 100
///     /api/data: 200
///   admin:
///     default: 10000
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitTable {
    /// Map of tier to its endpoint rules
    #[serde(default)]
    pub tiers: HashMap<Tier, TierRules>,

    /// Ceiling applied when a tier has no rules and no free tier exists
    #[serde(default = "default_fallback_limit")]
    pub fallback_limit: u64,
}

/// Endpoint pattern -> requests per window, for a single tier.
pub type TierRules = HashMap<String, u64>;

fn default_fallback_limit() -> u64 {
    GLOBAL_FALLBACK_LIMIT
}

impl Default for LimitTable {
    fn default() -> Self {
        Self::new()
    }
}

impl LimitTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self {
            tiers: HashMap::new(),
            fallback_limit: GLOBAL_FALLBACK_LIMIT,
        }
    }

    /// The table used when no rules file is configured.
    ///
    /// Values mirror the documented public tiers: free 100/hour by default,
    /// elevated and admin ten and a hundred times that.
    pub fn builtin() -> Self {
        let mut table = Self::new();
        table.insert_tier(
            Tier::Free,
            [
                (DEFAULT_PATTERN, 100),
                ("/api/data", 200),
                ("/api/sponsor-transaction", 50),
            ],
        );
        table.insert_tier(
            Tier::Elevated,
            [
                (DEFAULT_PATTERN, 1000),
                ("/api/data", 2000),
                ("/api/sponsor-transaction", 500),
            ],
        );
        table.insert_tier(
            Tier::Admin,
            [
                (DEFAULT_PATTERN, 10000),
                ("/api/data", 20000),
                ("/api/sponsor-transaction", 5000),
            ],
        );
        table
    }

    /// Replace a tier's rules.
    pub fn insert_tier<I, S>(&mut self, tier: Tier, rules: I) -> &mut Self
    where
        I: IntoIterator<Item = (S, u64)>,
        S: Into<String>,
    {
        let rules = rules.into_iter().map(|(p, l)| (p.into(), l)).collect();
        self.tiers.insert(tier, rules);
        self
    }

    /// Load a table from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading limit table");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load a table from a YAML string. The result is validated.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let table: LimitTable = serde_yaml::from_str(yaml)
            .map_err(|e| TiergateError::Config(format!("Failed to parse limit table: {}", e)))?;
        table.validate()?;
        Ok(table)
    }

    /// Check the table is usable at request time.
    ///
    /// Every configured tier needs a `default` entry and the free tier must
    /// exist, since unknown tiers fall back to it.
    pub fn validate(&self) -> Result<()> {
        if !self.tiers.contains_key(&Tier::Free) {
            return Err(TiergateError::Config(
                "limit table has no rules for tier 'free'".to_string(),
            ));
        }

        for (tier, rules) in &self.tiers {
            if !rules.contains_key(DEFAULT_PATTERN) {
                return Err(TiergateError::Config(format!(
                    "tier '{}' has no '{}' limit",
                    tier, DEFAULT_PATTERN
                )));
            }
            if let Some(pattern) = rules.keys().find(|p| p.is_empty()) {
                return Err(TiergateError::Config(format!(
                    "tier '{}' has an empty endpoint pattern {:?}",
                    tier, pattern
                )));
            }
        }

        Ok(())
    }

    /// Resolve the ceiling for a tier and request path.
    ///
    /// Order: exact path, longest matching prefix, the tier's `default`,
    /// then the free tier's rules if the tier is not configured, then
    /// `fallback_limit`.
    pub fn resolve(&self, tier: Tier, path: &str) -> u64 {
        let rules = match self.tiers.get(&tier).or_else(|| self.tiers.get(&Tier::Free)) {
            Some(rules) => rules,
            None => return self.fallback_limit,
        };

        let limit = Self::resolve_in(rules, path).unwrap_or(self.fallback_limit);
        debug!(tier = %tier, path = path, limit = limit, "Resolved limit");
        limit
    }

    fn resolve_in(rules: &TierRules, path: &str) -> Option<u64> {
        if path != DEFAULT_PATTERN {
            if let Some(limit) = rules.get(path) {
                return Some(*limit);
            }
        }

        rules
            .iter()
            .filter(|(pattern, _)| pattern.as_str() != DEFAULT_PATTERN)
            .filter(|(pattern, _)| path.starts_with(pattern.as_str()))
            .max_by_key(|(pattern, _)| pattern.len())
            .map(|(_, limit)| *limit)
            .or_else(|| rules.get(DEFAULT_PATTERN).copied())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_table() {
        let yaml = r#"
tiers:
  free:
    default: 100
    /api/data: 200
"#;
        let table = LimitTable::from_yaml(yaml).unwrap();
        assert_eq!(table.tiers[&Tier::Free].len(), 2);
        assert_eq!(table.fallback_limit, GLOBAL_FALLBACK_LIMIT);
    }

    #[test]
    fn test_parse_staking_user_alias() {
        let yaml = r#"
tiers:
  free:
    default: 1
  staking_user:
    default: 10
"#;
        let table = LimitTable::from_yaml(yaml).unwrap();
        assert_eq!(table.resolve(Tier::Elevated, "/x"), 10);
    }

    #[test]
    fn test_missing_default_rejected() {
        let yaml = r#"
tiers:
  free:
    default: 100
  admin:
    /api/data: 5
"#;
        let err = LimitTable::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("admin"));
    }

    #[test]
    fn test_missing_free_tier_rejected() {
        let yaml = r#"
tiers:
  admin:
    default: 5
"#;
        assert!(LimitTable::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_invalid_yaml_rejected() {
        assert!(LimitTable::from_yaml("tiers: [not, a, map").is_err());
    }

    #[test]
    fn test_builtin_table_is_valid() {
        let table = LimitTable::builtin();
        table.validate().unwrap();
        assert_eq!(table.resolve(Tier::Free, "/anything"), 100);
        assert_eq!(table.resolve(Tier::Elevated, "/api/sponsor-transaction"), 500);
        assert_eq!(table.resolve(Tier::Admin, "/api/data"), 20000);
    }

    #[test]
    fn test_exact_match_wins() {
        let mut table = LimitTable::new();
        table.insert_tier(Tier::Free, [(DEFAULT_PATTERN, 100), ("/api", 10), ("/api/data", 200)]);
        assert_eq!(table.resolve(Tier::Free, "/api/data"), 200);
    }

    #[test]
    fn test_longest_prefix_wins() {
        let mut table = LimitTable::new();
        table.insert_tier(
            Tier::Free,
            [(DEFAULT_PATTERN, 100), ("/api", 10), ("/api/data", 200)],
        );
        assert_eq!(table.resolve(Tier::Free, "/api/data/42"), 200);
        assert_eq!(table.resolve(Tier::Free, "/api/other"), 10);
        assert_eq!(table.resolve(Tier::Free, "/static/app.js"), 100);
    }

    #[test]
    fn test_unconfigured_tier_uses_free_rules() {
        let mut table = LimitTable::new();
        table.insert_tier(Tier::Free, [(DEFAULT_PATTERN, 7), ("/api/data", 9)]);
        assert_eq!(table.resolve(Tier::Admin, "/api/data"), 9);
        assert_eq!(table.resolve(Tier::Elevated, "/"), 7);
    }

    #[test]
    fn test_empty_table_uses_global_fallback() {
        let table = LimitTable::new();
        assert_eq!(table.resolve(Tier::Admin, "/api/data"), GLOBAL_FALLBACK_LIMIT);
    }

    #[test]
    fn test_literal_default_path_is_not_special() {
        let mut table = LimitTable::new();
        table.insert_tier(Tier::Free, [(DEFAULT_PATTERN, 3), ("/", 8)]);
        // "default" has no leading slash, so it only matches via the fallback entry
        assert_eq!(table.resolve(Tier::Free, "default"), 3);
    }
}
