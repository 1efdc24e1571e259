//! Symbol resolution policy.
//!
//! An ordered table of `(prefix, action)` rules. The first rule whose
//! prefix matches the symbol decides. The table always ends with a
//! catch-all parent-first rule, so evaluation is total.

use std::fmt;

/// Prefixes denied to every module by default.
pub const DEFAULT_DENIED_PREFIXES: &[&str] = &["kiln:internal/", "kiln:host/", "extism:host/user"];

/// What to do with a matching symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleAction {
    /// Fail the load.
    Deny,
    /// Resolve from the artifact first, then the host.
    ChildFirst,
    /// Resolve from the host first, then the artifact.
    ParentFirst,
}

impl fmt::Display for RuleAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Deny => "deny",
            Self::ChildFirst => "child-first",
            Self::ParentFirst => "parent-first",
        })
    }
}

/// One row of the table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyRule {
    /// Symbol prefix; empty matches everything.
    pub prefix: String,
    /// Action for matching symbols.
    pub action: RuleAction,
}

/// The full rule table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolPolicy {
    rules: Vec<PolicyRule>,
}

impl Default for SymbolPolicy {
    fn default() -> Self {
        Self::new(
            DEFAULT_DENIED_PREFIXES.iter().copied(),
            kiln_build::DEFAULT_NAMESPACE_PREFIX,
        )
    }
}

impl SymbolPolicy {
    /// Deny rules first, then the module namespace child-first, then the
    /// parent-first catch-all. Blank denied prefixes are ignored.
    #[must_use]
    pub fn new<I, S>(denied_prefixes: I, own_namespace_prefix: &str) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut rules: Vec<PolicyRule> = denied_prefixes
            .into_iter()
            .map(Into::into)
            .filter(|p: &String| !p.trim().is_empty())
            .map(|prefix| PolicyRule {
                prefix,
                action: RuleAction::Deny,
            })
            .collect();
        rules.push(PolicyRule {
            prefix: own_namespace_prefix.to_string(),
            action: RuleAction::ChildFirst,
        });
        rules.push(PolicyRule {
            prefix: String::new(),
            action: RuleAction::ParentFirst,
        });
        Self { rules }
    }

    /// Rules in evaluation order.
    #[must_use]
    pub fn rules(&self) -> &[PolicyRule] {
        &self.rules
    }

    /// Decide `symbol` (`<namespace>::<name>`).
    #[must_use]
    pub fn evaluate(&self, symbol: &str) -> RuleAction {
        self.rules
            .iter()
            .find(|rule| symbol.starts_with(&rule.prefix))
            .map_or(RuleAction::ParentFirst, |rule| rule.action)
    }

    /// Whether `symbol` is denied.
    #[must_use]
    pub fn is_denied(&self, symbol: &str) -> bool {
        self.evaluate(symbol) == RuleAction::Deny
    }
}
