//! Remote error taxonomy.
//!
//! Every failure the remote client can produce is translated once, at the
//! capability boundary, into a [`RemoteError`] with a [`RemoteErrorKind`].
//! The engine only ever sees these types, never transport details:
//!
//! - **Unauthorized** (401/403): credentials or permissions are wrong
//! - **RateLimited** (429): the service throttled us; rerunning later helps
//! - **NotFound** (404): the record or endpoint does not exist
//! - **ServerError** (5xx): the service failed
//! - **NetworkFailure**: no usable HTTP response (DNS, connect, timeout, decode)
//! - **Rejected**: any other 4xx, typically a validation failure
//!
//! Identity lookups add their own [`ResolveError`] on top.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

/// Longest raw response body quoted in an error message.
const MAX_BODY_IN_MESSAGE: usize = 500;

/// The kind of remote error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RemoteErrorKind {
    Unauthorized,
    RateLimited,
    NotFound,
    ServerError,
    NetworkFailure,
    Rejected,
}

impl RemoteErrorKind {
    /// Categorizes an HTTP status code that signalled failure.
    pub fn from_status(status: u16) -> Self {
        match status {
            401 | 403 => RemoteErrorKind::Unauthorized,
            404 => RemoteErrorKind::NotFound,
            429 => RemoteErrorKind::RateLimited,
            500..=599 => RemoteErrorKind::ServerError,
            _ => RemoteErrorKind::Rejected,
        }
    }

    /// Returns true if rerunning the same call later may succeed.
    ///
    /// The engine never retries on its own; this is reported to the operator.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RemoteErrorKind::RateLimited
                | RemoteErrorKind::ServerError
                | RemoteErrorKind::NetworkFailure
        )
    }
}

impl fmt::Display for RemoteErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A categorized remote error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub struct RemoteError {
    pub kind: RemoteErrorKind,
    /// The HTTP status code, if a response was received.
    pub status_code: Option<u16>,
    /// A human-readable description of the error.
    pub message: String,
}

impl fmt::Display for RemoteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status_code {
            Some(code) => write!(f, "{} (HTTP {}): {}", self.kind, code, self.message),
            None => write!(f, "{}: {}", self.kind, self.message),
        }
    }
}

impl RemoteError {
    pub fn new(kind: RemoteErrorKind, message: impl Into<String>) -> Self {
        RemoteError {
            kind,
            status_code: None,
            message: message.into(),
        }
    }

    /// Builds an error from a non-success HTTP response.
    ///
    /// The message is extracted from the service's error envelope when one is
    /// present, otherwise the (truncated) body is quoted.
    pub fn from_response(status: u16, body: &str) -> Self {
        RemoteError {
            kind: RemoteErrorKind::from_status(status),
            status_code: Some(status),
            message: extract_message(body),
        }
    }

    /// Builds an error from a transport failure.
    pub fn from_reqwest(err: &reqwest::Error) -> Self {
        match err.status() {
            Some(status) => RemoteError {
                kind: RemoteErrorKind::from_status(status.as_u16()),
                status_code: Some(status.as_u16()),
                message: err.to_string(),
            },
            None => RemoteError::new(RemoteErrorKind::NetworkFailure, err.to_string()),
        }
    }

    /// A response arrived but did not have the expected shape.
    pub fn malformed(what: impl fmt::Display) -> Self {
        RemoteError::new(
            RemoteErrorKind::NetworkFailure,
            format!("unexpected response: {}", what),
        )
    }

    pub fn is_transient(&self) -> bool {
        self.kind.is_transient()
    }
}

/// Errors from translating a mapping-table token into an account.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    #[error("no account matches '{token}'")]
    NotFound { token: String },

    #[error("'{token}' matches {candidates} accounts and none exactly")]
    Ambiguous { token: String, candidates: usize },

    #[error("lookup failed: {0}")]
    RemoteFailure(#[from] RemoteError),
}

/// Pulls a readable message out of an error body.
///
/// Understands the issue tracker's `errorMessages`/`errors` envelope and the
/// wiki's `errors[].title/detail` and `data.errors[].message.translation`
/// envelopes.
fn extract_message(body: &str) -> String {
    if let Ok(json) = serde_json::from_str::<Value>(body)
        && let Some(message) = message_from_json(&json)
    {
        return message;
    }

    let trimmed = body.trim();
    if trimmed.is_empty() {
        return "empty response body".to_string();
    }
    match trimmed.char_indices().nth(MAX_BODY_IN_MESSAGE) {
        Some((idx, _)) => format!("{}...", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}

fn message_from_json(json: &Value) -> Option<String> {
    let joined = |parts: Vec<String>| (!parts.is_empty()).then(|| parts.join("; "));

    if let Some(messages) = json.get("errorMessages").and_then(Value::as_array) {
        let parts = messages
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect();
        if let Some(message) = joined(parts) {
            return Some(message);
        }
    }

    if let Some(errors) = json
        .get("data")
        .and_then(|d| d.get("errors"))
        .and_then(Value::as_array)
    {
        let parts = errors
            .iter()
            .filter_map(|e| e.get("message")?.get("translation")?.as_str())
            .map(str::to_string)
            .collect();
        if let Some(message) = joined(parts) {
            return Some(message);
        }
    }

    match json.get("errors") {
        Some(Value::Array(errors)) => {
            let parts = errors
                .iter()
                .filter_map(|e| {
                    if let Some(message) = e.get("message").and_then(Value::as_str) {
                        return Some(message.to_string());
                    }
                    let title = e.get("title").and_then(Value::as_str)?;
                    Some(match e.get("detail").and_then(Value::as_str) {
                        Some(detail) => format!("{} - {}", title, detail),
                        None => title.to_string(),
                    })
                })
                .collect();
            joined(parts)
        }
        // Field-level validation errors: {"assignee": "User cannot be assigned"}
        Some(Value::Object(fields)) => {
            let parts = fields
                .iter()
                .filter_map(|(field, msg)| Some(format!("{}: {}", field, msg.as_str()?)))
                .collect();
            joined(parts)
        }
        _ => json
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string),
    }
}
