//! First-match rule resolution.
//!
//! [`RuleIndex`] is an immutable, ordered rule list. Rule order is a
//! user-visible contract: the first rule satisfying repository, event type
//! and branch criteria wins, even when a later rule would match "better".
//!
//! [`RuleIndexHandle`] holds the live index behind a single reference so a
//! configuration reload can swap the whole rule set at once; lookups that
//! started before the swap keep using the snapshot they took.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::rules::{Rule, RuleMatch};

/// Ordered, read-only collection of routing rules.
#[derive(Clone, Debug, Default)]
pub struct RuleIndex {
    rules: Vec<Rule>,
}

impl RuleIndex {
    /// Build an index over `rules`, preserving their order.
    pub fn new(rules: Vec<Rule>) -> Self {
        Self { rules }
    }

    /// All rules, in configuration order.
    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    /// Number of rules.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Whether the index holds no rules.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Resolve an event to the first matching rule.
    ///
    /// `branch` is `None` for events without branch semantics. When a rule
    /// requires a branch and none is available the branch check is skipped
    /// with a warning so non-push events stay routable.
    pub fn resolve(&self, repo: &str, branch: Option<&str>, event_type: &str) -> Option<&Rule> {
        debug!(repo, ?branch, event_type, "resolving rule");

        for rule in &self.rules {
            match rule.check(repo, branch, event_type) {
                RuleMatch::NoMatch => {}
                RuleMatch::Matched => {
                    debug!(rule = rule.name(), "rule matched");
                    return Some(rule);
                }
                RuleMatch::MatchedWithoutBranch => {
                    warn!(
                        rule = rule.name(),
                        repo,
                        event_type,
                        "event has no branch, skipping branch check"
                    );
                    return Some(rule);
                }
            }
        }

        debug!(repo, event_type, "no matching rule");
        None
    }

    /// The first rule whose repository patterns match `repo`.
    ///
    /// Used to pick the secret for signature verification before routing.
    pub fn rule_for_repo(&self, repo: &str) -> Option<&Rule> {
        self.rules.iter().find(|rule| rule.matches_repo(repo))
    }
}

/// Shared, atomically replaceable reference to the live [`RuleIndex`].
#[derive(Clone, Debug, Default)]
pub struct RuleIndexHandle {
    inner: Arc<RwLock<Arc<RuleIndex>>>,
}

impl RuleIndexHandle {
    /// Wrap an initial index.
    pub fn new(index: RuleIndex) -> Self {
        Self {
            inner: Arc::new(RwLock::new(Arc::new(index))),
        }
    }

    /// Snapshot of the current index. The snapshot never changes, even if
    /// the handle is swapped while it is in use.
    pub fn load(&self) -> Arc<RuleIndex> {
        Arc::clone(&*self.inner.read())
    }

    /// Replace the live index, returning the previous one.
    pub fn swap(&self, index: RuleIndex) -> Arc<RuleIndex> {
        std::mem::replace(&mut *self.inner.write(), Arc::new(index))
    }
}
