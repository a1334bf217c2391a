//! Plain-text notifications for GitHub events.
//!
//! Each notification is a list of lines. On the wire every line becomes one
//! OneBot `text` segment terminated by a newline.

use chrono::{DateTime, Utc};
use hookrelay_transport::text_segment;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::github::{
    IssueCommentEvent, IssuesEvent, PullRequestEvent, PushEvent, ReleaseEvent, repository_name,
};

/// Commits listed in a push notification.
pub const MAX_COMMITS: usize = 3;
/// Characters of a comment body shown in a preview.
pub const COMMENT_PREVIEW_CHARS: usize = 100;

/// RFC 3339 timestamps shown as `YYYY-MM-DD HH:MM UTC`; anything else verbatim.
fn timestamp(raw: &str) -> String {
    DateTime::parse_from_rfc3339(raw).map_or_else(
        |_| raw.to_string(),
        |t| t.with_timezone(&Utc).format("%Y-%m-%d %H:%M UTC").to_string(),
    )
}

/// A rendered notification.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Notification {
    lines: Vec<String>,
}

impl Notification {
    fn push(&mut self, line: impl Into<String>) {
        self.lines.push(line.into());
    }

    /// Rendered lines, without terminators.
    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    /// The whole notification as one string.
    pub fn text(&self) -> String {
        self.lines.join("\n")
    }

    /// OneBot segment array, one `text` segment per line.
    pub fn segments(&self) -> Value {
        Value::Array(
            self.lines
                .iter()
                .map(|line| text_segment(&format!("{line}\n")))
                .collect(),
        )
    }
}

/// Render `payload` for `event_type`.
///
/// Known events get a dedicated layout. Unknown events, or known events
/// whose payload doesn't decode, get a one-line generic notice.
pub fn render(event_type: &str, payload: &Value) -> Notification {
    let rendered = match event_type {
        "push" => decode(payload).map(|e| push(&e)),
        "pull_request" => decode(payload).map(|e| pull_request(&e)),
        "issues" => decode(payload).map(|e| issues(&e)),
        "issue_comment" => decode(payload).map(|e| issue_comment(&e)),
        "release" => decode(payload).map(|e| release(&e)),
        _ => None,
    };
    rendered.unwrap_or_else(|| generic(event_type, payload))
}

fn decode<T: DeserializeOwned>(payload: &Value) -> Option<T> {
    T::deserialize(payload).ok()
}

fn push(event: &PushEvent) -> Notification {
    let mut n = Notification::default();
    n.push("📢 GitHub push");
    n.push(format!("Repository: {}", event.repository.full_name));
    n.push(format!("Branch: {}", event.branch()));
    n.push(format!("Pusher: {}", event.pusher.name));
    n.push(format!("Commits: {}", event.commits.len()));
    if !event.commits.is_empty() {
        n.push("Latest commits:");
    }
    for commit in event.commits.iter().take(MAX_COMMITS) {
        n.push(format!(
            "[{}] {} (by {})",
            commit.short_id(),
            commit.summary(),
            commit.author.name
        ));
    }
    n
}

fn pull_request(event: &PullRequestEvent) -> Notification {
    let pr = &event.pull_request;
    let action = if event.action == "closed" && pr.merged {
        "merged"
    } else {
        match event.action.as_str() {
            "review_requested" => "review requested",
            "review_request_removed" => "review request removed",
            "synchronize" => "synchronized",
            other => other,
        }
    };

    let mut n = Notification::default();
    n.push(format!("📢 GitHub pull request {action}"));
    n.push(format!("Repository: {}", event.repository.full_name));
    n.push(format!("PR #{}: {}", pr.number, pr.title));
    n.push(format!("User: {}", event.sender.login));
    n.push(format!("State: {}", pr.state));
    if !pr.base.git_ref.is_empty() && !pr.head.git_ref.is_empty() {
        n.push(format!("Branches: {} ← {}", pr.base.git_ref, pr.head.git_ref));
    }
    if !pr.html_url.is_empty() {
        n.push(format!("Link: {}", pr.html_url));
    }
    n
}

fn issues(event: &IssuesEvent) -> Notification {
    let issue = &event.issue;

    let mut n = Notification::default();
    n.push(format!("📢 GitHub issue {}", event.action));
    n.push(format!("Repository: {}", event.repository.full_name));
    n.push(format!("Issue #{}: {}", issue.number, issue.title));
    n.push(format!("User: {}", event.sender.login));
    n.push(format!("State: {}", issue.state));
    if !issue.labels.is_empty() {
        n.push(format!("Labels: {}", issue.label_names()));
    }
    if !issue.html_url.is_empty() {
        n.push(format!("Link: {}", issue.html_url));
    }
    n
}

fn issue_comment(event: &IssueCommentEvent) -> Notification {
    let kind = if event.is_pull_request() { "PR" } else { "Issue" };
    let action = match event.action.as_str() {
        "created" => "posted",
        other => other,
    };

    let mut n = Notification::default();
    n.push(format!("📢 GitHub {kind} comment {action}"));
    n.push(format!("Repository: {}", event.repository.full_name));
    n.push(format!("{kind} #{}", event.issue.number));
    n.push(format!("User: {}", event.sender.login));
    if !event.comment.body.is_empty() && event.action != "deleted" {
        n.push(format!("Comment: {}", preview(&event.comment.body)));
    }
    if !event.comment.html_url.is_empty() {
        n.push(format!("Link: {}", event.comment.html_url));
    }
    n
}

fn release(event: &ReleaseEvent) -> Notification {
    let release = &event.release;
    let action = match event.action.as_str() {
        "prereleased" => "pre-released",
        other => other,
    };

    let mut n = Notification::default();
    n.push(format!("📢 GitHub release {action}"));
    n.push(format!("Repository: {}", event.repository.full_name));
    n.push(format!(
        "Version: {} ({})",
        release.display_name(),
        release.tag_name
    ));
    n.push(format!("Publisher: {}", event.sender.login));
    if release.prerelease {
        n.push("Type: pre-release");
    }
    if let Some(published_at) = release.published_at.as_deref().filter(|p| !p.is_empty()) {
        n.push(format!("Published: {}", timestamp(published_at)));
    }
    if !release.html_url.is_empty() {
        n.push(format!("Link: {}", release.html_url));
    }
    n
}

fn generic(event_type: &str, payload: &Value) -> Notification {
    let repo = repository_name(payload);
    let mut n = Notification::default();
    if repo.is_empty() {
        n.push(format!("📢 GitHub {event_type} event"));
    } else {
        n.push(format!("📢 GitHub {event_type} event in {repo}"));
    }
    n
}

/// First [`COMMENT_PREVIEW_CHARS`] characters on one line, with `...` when
/// truncated.
fn preview(body: &str) -> String {
    let mut out: String = body.chars().take(COMMENT_PREVIEW_CHARS).collect();
    if body.chars().count() > COMMENT_PREVIEW_CHARS {
        out.push_str("...");
    }
    out.replace(['\r', '\n'], " ")
}
