// src/archive/protected.rs

//! Files an operator customizes after install
//!
//! Integration files such as LDAP bean definitions are edited in place on
//! each host. Extraction must not clobber them once they exist; on a fresh
//! install the archive copy is still written.

use glob::{MatchOptions, Pattern};
use std::path::Path;
use tracing::warn;

/// Provider pack files that are never overwritten once present
const DEFAULT_PATTERNS: &[&str] = &[
    "components/sakai-provider-pack/WEB-INF/unboundid-ldap*.xml",
    "components/sakai-provider-pack/WEB-INF/jldap-beans*.xml",
    "components/sakai-provider-pack/WEB-INF/components.xml",
];

const MATCH_OPTIONS: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// A set of path patterns, relative to the instance root
#[derive(Debug, Clone)]
pub struct ProtectedFiles {
    patterns: Vec<Pattern>,
}

impl ProtectedFiles {
    /// Build a set from glob expressions; invalid expressions are logged and dropped
    pub fn new<'a>(expressions: impl IntoIterator<Item = &'a str>) -> Self {
        let patterns = expressions
            .into_iter()
            .filter_map(|expr| match Pattern::new(expr) {
                Ok(pattern) => Some(pattern),
                Err(e) => {
                    warn!("Ignoring invalid protected pattern {}: {}", expr, e);
                    None
                }
            })
            .collect();
        Self { patterns }
    }

    /// A set that protects nothing
    pub fn none() -> Self {
        Self {
            patterns: Vec::new(),
        }
    }

    /// Does the normalized entry path match any pattern?
    pub fn matches(&self, entry_path: &str) -> bool {
        self.patterns
            .iter()
            .any(|p| p.matches_with(entry_path, MATCH_OPTIONS))
    }

    /// Should extraction leave this entry alone?
    ///
    /// Only true when the path is protected and something already exists at
    /// the destination.
    pub fn should_skip(&self, entry_path: &str, root: &Path) -> bool {
        self.matches(entry_path) && root.join(entry_path).exists()
    }
}

impl Default for ProtectedFiles {
    fn default() -> Self {
        Self::new(DEFAULT_PATTERNS.iter().copied())
    }
}
