//! Domain rule tables driving statement canonicalization.
//!
//! A [`RuleSet`] is data, not code: relationship aliases, canonical
//! directions, required links, and variable prefixes. The financial
//! defaults ship as [`RuleSet::financial`]; other domains load their own
//! table from TOML (see `[correction] rules_path`).
//!
//! ```toml
//! [prefixes]
//! Account = "acc"
//!
//! [aliases]
//! HOLDS_POSITION = "HAS_POSITION"
//!
//! [[directions]]
//! rel_type = "HAS_POSITION"
//! from_labels = ["Account"]
//! to_labels = ["Position"]
//!
//! [[required_links]]
//! subject_labels = ["Trade"]
//! target_labels = ["Account"]
//! rel_type = "HAS_TRADE"
//! subject_is_source = false
//! ```

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RuleError {
    #[error("relationship alias cycle through '{0}'")]
    AliasCycle(String),
    #[error("relationship type '{0}' has more than one direction rule")]
    DuplicateDirection(String),
    #[error("required link '{0}' needs at least one subject and one target label")]
    EmptyRequiredLink(String),
}

/// Canonical orientation for one relationship type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectionRule {
    pub rel_type: String,
    pub from_labels: Vec<String>,
    pub to_labels: Vec<String>,
}

/// Every node of a subject label must be linked to some node of a target label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequiredLink {
    pub subject_labels: Vec<String>,
    pub target_labels: Vec<String>,
    pub rel_type: String,
    #[serde(default = "default_true")]
    pub subject_is_source: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSet {
    /// Label → variable-name prefix (`Account` → `acc`).
    #[serde(default)]
    pub prefixes: BTreeMap<String, String>,
    /// Relationship type → canonical type.
    #[serde(default)]
    pub aliases: BTreeMap<String, String>,
    #[serde(default)]
    pub directions: Vec<DirectionRule>,
    #[serde(default)]
    pub required_links: Vec<RequiredLink>,
}

impl RuleSet {
    /// No aliases, directions, or required links.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Rules for account / position / security / trade documents.
    pub fn financial() -> Self {
        let prefixes = [
            ("Account", "acc"),
            ("Position", "pos"),
            ("Security", "sec"),
            ("Trade", "trd"),
            ("Transaction", "txn"),
            ("Investment", "inv"),
            ("Holding", "hld"),
            ("Client", "cli"),
            ("Person", "per"),
            ("Company", "co"),
            ("Portfolio", "pf"),
            ("Fund", "fund"),
            ("Custodian", "cust"),
            ("Advisor", "adv"),
        ];
        let aliases = [
            ("HELD_IN_POSITION", "IN_SECURITY"),
            ("HOLDS_SECURITY", "IN_SECURITY"),
            ("OF_SECURITY", "IN_SECURITY"),
            ("POSITION_IN", "IN_SECURITY"),
            ("INVESTS_IN", "IN_SECURITY"),
            ("HOLDS_POSITION", "HAS_POSITION"),
            ("OWNS_POSITION", "HAS_POSITION"),
            ("POSITION_OF", "HAS_POSITION"),
            ("EXECUTED_IN", "HAS_TRADE"),
            ("TRADED_IN", "HAS_TRADE"),
            ("HAS_TRANSACTION", "HAS_TRADE"),
            ("TRADES", "FOR_SECURITY"),
            ("TRADE_OF", "FOR_SECURITY"),
            ("INVOLVES_SECURITY", "FOR_SECURITY"),
            ("OWNS_ACCOUNT", "HAS_ACCOUNT"),
            ("ACCOUNT_OF", "HAS_ACCOUNT"),
        ];

        let direction = |rel_type: &str, from: &[&str], to: &[&str]| DirectionRule {
            rel_type: rel_type.to_string(),
            from_labels: strings(from),
            to_labels: strings(to),
        };
        let required = |subjects: &[&str], targets: &[&str], rel_type: &str, source: bool| {
            RequiredLink {
                subject_labels: strings(subjects),
                target_labels: strings(targets),
                rel_type: rel_type.to_string(),
                subject_is_source: source,
            }
        };

        Self {
            prefixes: pairs(&prefixes),
            aliases: pairs(&aliases),
            directions: vec![
                direction("HAS_POSITION", &["Account", "Portfolio"], &["Position"]),
                direction(
                    "IN_SECURITY",
                    &["Position", "Investment", "Holding"],
                    &["Security"],
                ),
                direction("HAS_TRADE", &["Account"], &["Trade", "Transaction"]),
                direction("FOR_SECURITY", &["Trade", "Transaction"], &["Security"]),
                direction("HAS_ACCOUNT", &["Client", "Person", "Company"], &["Account"]),
            ],
            required_links: vec![
                required(&["Investment", "Holding"], &["Security"], "IN_SECURITY", true),
                required(&["Trade", "Transaction"], &["Account"], "HAS_TRADE", false),
                required(&["Trade", "Transaction"], &["Security"], "FOR_SECURITY", true),
            ],
        }
    }

    /// Reject alias cycles, conflicting direction rules, and empty links.
    pub fn validate(&self) -> Result<(), RuleError> {
        for start in self.aliases.keys() {
            let mut seen = HashSet::new();
            let mut current = start.as_str();
            while let Some(next) = self.aliases.get(current) {
                if !seen.insert(current) {
                    return Err(RuleError::AliasCycle(start.clone()));
                }
                current = next.as_str();
            }
        }
        let mut seen = HashSet::new();
        for rule in &self.directions {
            if !seen.insert(rule.rel_type.as_str()) {
                return Err(RuleError::DuplicateDirection(rule.rel_type.clone()));
            }
        }
        for link in &self.required_links {
            if link.subject_labels.is_empty() || link.target_labels.is_empty() {
                return Err(RuleError::EmptyRequiredLink(link.rel_type.clone()));
            }
        }
        Ok(())
    }

    /// Follow the alias chain to its end. Unknown types pass through.
    ///
    /// Bounded by the alias count, so an unvalidated cyclic table still
    /// terminates.
    pub fn canonical_type(&self, rel_type: &str) -> String {
        let mut current = rel_type;
        for _ in 0..=self.aliases.len() {
            match self.aliases.get(current) {
                Some(next) => current = next.as_str(),
                None => break,
            }
        }
        current.to_string()
    }

    pub fn direction_for(&self, rel_type: &str) -> Option<&DirectionRule> {
        self.directions.iter().find(|d| d.rel_type == rel_type)
    }

    /// Whether an edge `from_label -[rel_type]-> to_label` runs against its
    /// canonical direction and should be flipped.
    pub fn is_reversed(&self, rel_type: &str, from_label: &str, to_label: &str) -> bool {
        let Some(rule) = self.direction_for(rel_type) else {
            return false;
        };
        let has = |labels: &[String], l: &str| labels.iter().any(|x| x == l);
        let forward = has(&rule.from_labels, from_label) && has(&rule.to_labels, to_label);
        let backward = has(&rule.from_labels, to_label) && has(&rule.to_labels, from_label);
        backward && !forward
    }

    /// Variable prefix for a label; falls back to its lowercased initial.
    pub fn prefix_for(&self, label: &str) -> String {
        if let Some(prefix) = self.prefixes.get(label) {
            return prefix.clone();
        }
        match label.chars().next() {
            Some(c) if c.is_ascii_alphabetic() => c.to_ascii_lowercase().to_string(),
            _ => "n".to_string(),
        }
    }
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn pairs(items: &[(&str, &str)]) -> BTreeMap<String, String> {
    items
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_financial_rules_are_valid() {
        assert_eq!(RuleSet::financial().validate(), Ok(()));
        assert_eq!(RuleSet::empty().validate(), Ok(()));
    }

    #[test]
    fn test_aliases_are_transitive() {
        let mut rules = RuleSet::empty();
        rules.aliases.insert("A".into(), "B".into());
        rules.aliases.insert("B".into(), "C".into());
        assert_eq!(rules.validate(), Ok(()));
        assert_eq!(rules.canonical_type("A"), "C");
        assert_eq!(rules.canonical_type("UNKNOWN"), "UNKNOWN");
    }

    #[test]
    fn test_alias_cycle_rejected() {
        let mut rules = RuleSet::empty();
        rules.aliases.insert("A".into(), "B".into());
        rules.aliases.insert("B".into(), "A".into());
        assert!(matches!(rules.validate(), Err(RuleError::AliasCycle(_))));
        // Still terminates when used unvalidated.
        let _ = rules.canonical_type("A");
    }

    #[test]
    fn test_duplicate_direction_rejected() {
        let mut rules = RuleSet::financial();
        rules.directions.push(rules.directions[0].clone());
        assert!(matches!(
            rules.validate(),
            Err(RuleError::DuplicateDirection(_))
        ));
    }

    #[test]
    fn test_reversed_only_for_exact_label_swap() {
        let rules = RuleSet::financial();
        assert!(rules.is_reversed("IN_SECURITY", "Security", "Position"));
        assert!(!rules.is_reversed("IN_SECURITY", "Position", "Security"));
        assert!(!rules.is_reversed("IN_SECURITY", "Security", "Account"));
        assert!(!rules.is_reversed("MENTIONS", "Security", "Position"));
    }

    #[test]
    fn test_prefixes() {
        let rules = RuleSet::financial();
        assert_eq!(rules.prefix_for("Account"), "acc");
        assert_eq!(rules.prefix_for("Broker"), "b");
        assert_eq!(rules.prefix_for("_x"), "n");
    }

    #[test]
    fn test_rules_deserialize_with_defaults() {
        let json = r#"{"required_links": [{"subject_labels": ["Loan"], "target_labels": ["Borrower"], "rel_type": "OWED_BY"}]}"#;
        let rules: RuleSet = serde_json::from_str(json).unwrap();
        assert!(rules.required_links[0].subject_is_source);
        assert!(rules.aliases.is_empty());
    }
}
