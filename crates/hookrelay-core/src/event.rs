//! The validated event record handed over by the ingress layer.

/// Event types whose payload carries branch semantics.
pub const BRANCH_EVENTS: [&str; 2] = ["push", "pull_request"];

/// Whether `event_type` carries a branch that rules must match.
pub fn carries_branch(event_type: &str) -> bool {
    BRANCH_EVENTS.contains(&event_type)
}

/// An inbound repository event, exactly as received.
///
/// `raw_body` is kept byte-for-byte so signatures can be verified over the
/// original payload.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EventRecord {
    /// Value of the `X-GitHub-Event` header.
    pub event_type: String,
    /// `owner/name` of the repository.
    pub repo_full_name: String,
    /// Branch name, when the event has one.
    pub branch: Option<String>,
    /// The unmodified request body.
    pub raw_body: Vec<u8>,
    /// Value of the `X-Hub-Signature-256` header, if present.
    pub signature_header: Option<String>,
}

impl EventRecord {
    /// Branch as `&str`, treating an empty branch as absent.
    pub fn branch(&self) -> Option<&str> {
        self.branch.as_deref().filter(|b| !b.is_empty())
    }
}
