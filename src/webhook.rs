//! Webhook related structures

use axum::body::Bytes;
use axum::http::HeaderMap;
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

use crate::error::{Result, RhobotError};
use crate::utils::verify_github_signature;

pub const HEADER_EVENT: &str = "x-github-event";
pub const HEADER_DELIVERY: &str = "x-github-delivery";
pub const HEADER_SIGNATURE: &str = "x-hub-signature-256";

/// Event kind taken from the `X-GitHub-Event` header
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    Ping,
    Push,
    IssueComment,
    Other(String),
}

impl EventKind {
    pub fn from_header(value: &str) -> Self {
        match value {
            "ping" => Self::Ping,
            "push" => Self::Push,
            "issue_comment" => Self::IssueComment,
            other => Self::Other(other.to_string()),
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ping => f.write_str("ping"),
            Self::Push => f.write_str("push"),
            Self::IssueComment => f.write_str("issue_comment"),
            Self::Other(name) => f.write_str(name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommentAction {
    Created,
    Edited,
    Deleted,
    Unknown(String),
}

impl CommentAction {
    fn parse(value: &str) -> Self {
        match value {
            "created" => Self::Created,
            "edited" => Self::Edited,
            "deleted" => Self::Deleted,
            other => Self::Unknown(other.to_string()),
        }
    }

    /// Only new or edited comments can carry a command.
    pub fn may_carry_command(&self) -> bool {
        matches!(self, Self::Created | Self::Edited)
    }
}

/// Repository coordinates on GitHub
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoId {
    pub owner: String,
    pub name: String,
}

impl fmt::Display for RepoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// Fields of an `issue_comment` delivery
#[derive(Debug, Clone)]
pub struct IssueComment {
    pub action: CommentAction,
    pub body: String,
    pub commenter_login: String,
    pub repository: RepoId,
    pub issue_number: u64,
    /// API url of the pull request; absent when the comment is on a plain issue
    pub pull_request_url: Option<String>,
}

/// A verified, classified webhook delivery
#[derive(Debug, Clone)]
pub struct WebhookEvent {
    pub delivery_id: String,
    pub kind: EventKind,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub git_ref: Option<String>,
    pub comment: Option<IssueComment>,
}

/// Checks the `X-Hub-Signature-256` header against the raw body.
///
/// Must run before anything in the body is looked at.
pub fn verify_delivery(headers: &HeaderMap, body: &[u8], secret: &str) -> Result<()> {
    let signature = headers
        .get(HEADER_SIGNATURE)
        .ok_or_else(|| RhobotError::Authentication("no signature header supplied".to_string()))?
        .to_str()
        .map_err(|_| RhobotError::Authentication("signature header is not ASCII".to_string()))?;

    if verify_github_signature(secret, body, signature) {
        Ok(())
    } else {
        Err(RhobotError::Authentication(
            "signature does not match payload".to_string(),
        ))
    }
}

/// Delivery id from `X-GitHub-Delivery`, or a fresh one so logs still correlate.
pub fn delivery_id(headers: &HeaderMap) -> String {
    headers
        .get(HEADER_DELIVERY)
        .and_then(|v| v.to_str().ok())
        .map(String::from)
        .unwrap_or_else(|| Uuid::now_v7().to_string())
}

impl WebhookEvent {
    /// Classify a verified delivery.
    ///
    /// Unknown event kinds are returned as [`EventKind::Other`]; a known kind
    /// with missing fields is a [`RhobotError::MalformedEvent`].
    pub fn classify(delivery_id: String, headers: HeaderMap, body: Bytes) -> Result<Self> {
        let kind = headers
            .get(HEADER_EVENT)
            .and_then(|v| v.to_str().ok())
            .map(EventKind::from_header)
            .unwrap_or_else(|| EventKind::Other(String::new()));

        let mut event = Self {
            delivery_id,
            kind,
            headers,
            body,
            git_ref: None,
            comment: None,
        };

        match event.kind {
            EventKind::Push => {
                let payload = event.payload("push")?;
                let git_ref = str_at(&payload, &["ref"])
                    .ok_or_else(|| RhobotError::malformed_event("push", "missing ref"))?;
                event.git_ref = Some(git_ref.to_string());
            }
            EventKind::IssueComment => {
                let payload = event.payload("issue_comment")?;
                event.comment = Some(parse_issue_comment(&payload)?);
            }
            EventKind::Ping | EventKind::Other(_) => {}
        }

        Ok(event)
    }

    fn payload(&self, event: &str) -> Result<Value> {
        serde_json::from_slice(&self.body)
            .map_err(|e| RhobotError::malformed_event(event, format!("invalid JSON body: {}", e)))
    }
}

fn parse_issue_comment(payload: &Value) -> Result<IssueComment> {
    let field = |path: &[&str]| {
        str_at(payload, path).ok_or_else(|| {
            RhobotError::malformed_event("issue_comment", format!("missing {}", path.join(".")))
        })
    };

    let action = CommentAction::parse(field(&["action"])?);
    let body = field(&["comment", "body"])?.to_string();
    let commenter_login = field(&["comment", "user", "login"])?.to_string();
    let repository = RepoId {
        owner: field(&["repository", "owner", "login"])?.to_string(),
        name: field(&["repository", "name"])?.to_string(),
    };
    let issue_number = payload
        .get("issue")
        .and_then(|i| i.get("number"))
        .and_then(Value::as_u64)
        .ok_or_else(|| RhobotError::malformed_event("issue_comment", "missing issue.number"))?;
    let pull_request_url = str_at(payload, &["issue", "pull_request", "url"]).map(String::from);

    Ok(IssueComment {
        action,
        body,
        commenter_login,
        repository,
        issue_number,
        pull_request_url,
    })
}

fn str_at<'a>(value: &'a Value, path: &[&str]) -> Option<&'a str> {
    path.iter()
        .try_fold(value, |v, key| v.get(*key))
        .and_then(Value::as_str)
}
