//! Routing rules and notification destinations.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::event::carries_branch;
use crate::matching::match_any;

/// Where a notification is delivered: a named transport plus a
/// platform-defined target.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Destination {
    /// Name of the transport in the registry.
    pub transport: String,
    /// Platform target type, e.g. `"group"` or `"private"`.
    pub target_type: String,
    /// Platform target id (numeric ids are kept in string form).
    pub target_id: String,
}

impl Destination {
    /// Build a destination.
    pub fn new(
        transport: impl Into<String>,
        target_type: impl Into<String>,
        target_id: impl Into<String>,
    ) -> Self {
        Self {
            transport: transport.into(),
            target_type: target_type.into(),
            target_id: target_id.into(),
        }
    }
}

impl std::fmt::Display for Destination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.transport, self.target_type, self.target_id)
    }
}

/// A routing entry mapping repository/branch/event patterns to a secret and
/// a list of destinations.
///
/// Rules are immutable once built; configuration reloads replace the whole
/// [`RuleIndex`](crate::RuleIndex).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Rule {
    name: String,
    repos: Vec<String>,
    branches: Vec<String>,
    events: BTreeSet<String>,
    secret: Vec<u8>,
    branch_check_all: bool,
    destinations: Vec<Destination>,
}

/// Outcome of checking a rule against an event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum RuleMatch {
    /// Every criterion matched.
    Matched,
    /// The rule wanted a branch but the event carried none; branch check skipped.
    MatchedWithoutBranch,
    /// At least one criterion did not match.
    NoMatch,
}

impl Rule {
    /// Start building a rule named `name`.
    pub fn builder(name: impl Into<String>) -> RuleBuilder {
        RuleBuilder {
            rule: Rule {
                name: name.into(),
                repos: Vec::new(),
                branches: Vec::new(),
                events: BTreeSet::new(),
                secret: Vec::new(),
                branch_check_all: false,
                destinations: Vec::new(),
            },
        }
    }

    /// Rule name (used in logs).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Repository patterns, in configuration order.
    pub fn repos(&self) -> &[String] {
        &self.repos
    }

    /// Branch patterns, in configuration order.
    pub fn branches(&self) -> &[String] {
        &self.branches
    }

    /// Event types this rule accepts.
    pub fn events(&self) -> &BTreeSet<String> {
        &self.events
    }

    /// Shared webhook secret; empty means signature checks are skipped.
    pub fn secret(&self) -> &[u8] {
        &self.secret
    }

    /// Whether branch filtering also applies to branchless event types.
    pub fn branch_check_all(&self) -> bool {
        self.branch_check_all
    }

    /// Destinations, in delivery order.
    pub fn destinations(&self) -> &[Destination] {
        &self.destinations
    }

    /// Whether any repository pattern matches `repo`.
    pub fn matches_repo(&self, repo: &str) -> bool {
        match_any(repo, &self.repos)
    }

    pub(crate) fn check(&self, repo: &str, branch: Option<&str>, event_type: &str) -> RuleMatch {
        if !self.matches_repo(repo) || !self.events.contains(event_type) {
            return RuleMatch::NoMatch;
        }

        if !(carries_branch(event_type) || self.branch_check_all) {
            return RuleMatch::Matched;
        }

        match branch.filter(|b| !b.is_empty()) {
            Some(branch) if match_any(branch, &self.branches) => RuleMatch::Matched,
            Some(_) => RuleMatch::NoMatch,
            None => RuleMatch::MatchedWithoutBranch,
        }
    }
}

/// Builder for [`Rule`].
#[derive(Debug)]
pub struct RuleBuilder {
    rule: Rule,
}

impl RuleBuilder {
    /// Add a repository pattern.
    #[must_use]
    pub fn repo(mut self, pattern: impl Into<String>) -> Self {
        self.rule.repos.push(pattern.into());
        self
    }

    /// Add a branch pattern.
    #[must_use]
    pub fn branch(mut self, pattern: impl Into<String>) -> Self {
        self.rule.branches.push(pattern.into());
        self
    }

    /// Accept an event type.
    #[must_use]
    pub fn event(mut self, event_type: impl Into<String>) -> Self {
        let _ = self.rule.events.insert(event_type.into());
        self
    }

    /// Set the webhook secret.
    #[must_use]
    pub fn secret(mut self, secret: impl Into<Vec<u8>>) -> Self {
        self.rule.secret = secret.into();
        self
    }

    /// Apply branch filtering to every event type.
    #[must_use]
    pub fn branch_check_all(mut self, enabled: bool) -> Self {
        self.rule.branch_check_all = enabled;
        self
    }

    /// Append a destination.
    #[must_use]
    pub fn destination(mut self, destination: Destination) -> Self {
        self.rule.destinations.push(destination);
        self
    }

    /// Finish the rule. Returns `None` when no repository pattern was given.
    pub fn build(self) -> Option<Rule> {
        (!self.rule.repos.is_empty()).then_some(self.rule)
    }
}
