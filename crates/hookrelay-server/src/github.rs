//! GitHub webhook payloads.
//!
//! Only the fields the relay reads are modelled. Every struct defaults its
//! missing fields so partial payloads (and test fixtures) still decode.

use hookrelay_core::EventRecord;
use hookrelay_core::event::carries_branch;
use serde::Deserialize;
use serde_json::Value;

/// Header carrying the event name.
pub const EVENT_HEADER: &str = "X-GitHub-Event";
/// Header carrying the delivery id.
pub const DELIVERY_HEADER: &str = "X-GitHub-Delivery";

const BRANCH_REF_PREFIX: &str = "refs/heads/";

/// `repository` object.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct Repository {
    /// `owner/name`.
    pub full_name: String,
    /// Web URL.
    pub html_url: String,
}

/// `sender`, `user` and similar account objects.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct Account {
    /// Login name.
    pub login: String,
}

/// Push `pusher` object.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct Pusher {
    /// Display name.
    pub name: String,
}

/// Commit author.
#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct CommitAuthor {
    /// Display name.
    pub name: String,
}

impl Default for CommitAuthor {
    fn default() -> Self {
        Self {
            name: "unknown".to_string(),
        }
    }
}

/// One commit in a push.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct Commit {
    /// Full SHA.
    pub id: String,
    /// Full commit message.
    pub message: String,
    /// Author.
    pub author: CommitAuthor,
    /// Web URL.
    pub url: String,
}

impl Commit {
    /// First seven characters of the SHA.
    pub fn short_id(&self) -> &str {
        self.id.get(..7).unwrap_or(&self.id)
    }

    /// First line of the message.
    pub fn summary(&self) -> &str {
        self.message.lines().next().unwrap_or_default()
    }
}

/// `push` event.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct PushEvent {
    /// Full ref, e.g. `refs/heads/main`.
    #[serde(rename = "ref")]
    pub git_ref: String,
    /// Repository.
    pub repository: Repository,
    /// Who pushed.
    pub pusher: Pusher,
    /// Pushed commits, oldest first.
    pub commits: Vec<Commit>,
    /// Compare URL.
    pub compare: String,
}

impl PushEvent {
    /// Branch name with `refs/heads/` stripped.
    pub fn branch(&self) -> &str {
        strip_branch_ref(&self.git_ref)
    }
}

/// `base` / `head` ref of a pull request.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct PullRequestRef {
    /// Branch name.
    #[serde(rename = "ref")]
    pub git_ref: String,
}

/// `pull_request` object.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct PullRequest {
    /// PR number.
    pub number: u64,
    /// Title.
    pub title: String,
    /// `open` or `closed`.
    pub state: String,
    /// Set once merged.
    pub merged: bool,
    /// Target branch.
    pub base: PullRequestRef,
    /// Source branch.
    pub head: PullRequestRef,
    /// Web URL.
    pub html_url: String,
}

/// `pull_request` event.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct PullRequestEvent {
    /// Action, e.g. `opened`.
    pub action: String,
    /// The pull request.
    pub pull_request: PullRequest,
    /// Repository.
    pub repository: Repository,
    /// Who triggered the event.
    pub sender: Account,
}

/// Issue label.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct Label {
    /// Label name.
    pub name: String,
}

/// `issue` object. Pull requests show up here too in comment events.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct Issue {
    /// Issue number.
    pub number: u64,
    /// Title.
    pub title: String,
    /// `open` or `closed`.
    pub state: String,
    /// Labels.
    pub labels: Vec<Label>,
    /// Web URL.
    pub html_url: String,
    /// Present when the issue is a pull request.
    pub pull_request: Option<Value>,
}

impl Issue {
    /// Label names joined with `", "`.
    pub fn label_names(&self) -> String {
        self.labels
            .iter()
            .map(|l| l.name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// `issues` event.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct IssuesEvent {
    /// Action, e.g. `opened`.
    pub action: String,
    /// The issue.
    pub issue: Issue,
    /// Repository.
    pub repository: Repository,
    /// Who triggered the event.
    pub sender: Account,
}

/// `comment` object.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct Comment {
    /// Markdown body.
    pub body: String,
    /// Web URL.
    pub html_url: String,
}

/// `issue_comment` event.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct IssueCommentEvent {
    /// Action, e.g. `created`.
    pub action: String,
    /// The issue or pull request commented on.
    pub issue: Issue,
    /// The comment.
    pub comment: Comment,
    /// Repository.
    pub repository: Repository,
    /// Who commented.
    pub sender: Account,
}

impl IssueCommentEvent {
    /// Whether the comment is on a pull request rather than an issue.
    pub fn is_pull_request(&self) -> bool {
        self.issue.pull_request.is_some()
    }
}

/// `release` object.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct Release {
    /// Tag, e.g. `v1.2.0`.
    pub tag_name: String,
    /// Display name; GitHub sends `null` when unset.
    pub name: Option<String>,
    /// Pre-release flag.
    pub prerelease: bool,
    /// RFC 3339 publish time.
    pub published_at: Option<String>,
    /// Web URL.
    pub html_url: String,
}

impl Release {
    /// Release name, falling back to the tag.
    pub fn display_name(&self) -> &str {
        self.name
            .as_deref()
            .filter(|n| !n.is_empty())
            .unwrap_or(&self.tag_name)
    }
}

/// `release` event.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct ReleaseEvent {
    /// Action, e.g. `published`.
    pub action: String,
    /// The release.
    pub release: Release,
    /// Repository.
    pub repository: Repository,
    /// Who triggered the event.
    pub sender: Account,
}

/// Strip `refs/heads/` from a ref. Other refs are returned unchanged.
pub fn strip_branch_ref(git_ref: &str) -> &str {
    git_ref.strip_prefix(BRANCH_REF_PREFIX).unwrap_or(git_ref)
}

/// `repository.full_name`, or empty when absent.
pub fn repository_name(payload: &Value) -> &str {
    payload
        .pointer("/repository/full_name")
        .and_then(Value::as_str)
        .unwrap_or_default()
}

/// Branch an event refers to.
///
/// Pull request events use the base branch; anything else with a `ref`
/// uses that ref with `refs/heads/` stripped.
pub fn branch_name(event_type: &str, payload: &Value) -> Option<String> {
    let git_ref = if event_type == "pull_request" {
        payload.pointer("/pull_request/base/ref")
    } else {
        payload.get("ref")
    };
    git_ref
        .and_then(Value::as_str)
        .map(strip_branch_ref)
        .filter(|b| !b.is_empty())
        .map(str::to_string)
}

/// Build the event record the dispatcher routes on.
///
/// Branches are only attached for event types that carry branch semantics.
pub fn event_record(
    event_type: &str,
    payload: &Value,
    raw_body: Vec<u8>,
    signature_header: Option<String>,
) -> EventRecord {
    let branch = if carries_branch(event_type) {
        branch_name(event_type, payload)
    } else {
        None
    };
    EventRecord {
        event_type: event_type.to_string(),
        repo_full_name: repository_name(payload).to_string(),
        branch,
        raw_body,
        signature_header,
    }
}
