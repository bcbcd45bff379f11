use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct ConfigError(pub String);

/// Another process held the suite-run lock for the whole wait.
#[derive(Debug, thiserror::Error)]
#[error("another suite run is in progress")]
pub struct RunInProgress;

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("catalog has no prompts")]
    Empty,
    #[error("catalog suite_version must not be empty")]
    MissingVersion,
    #[error("prompt id must not be empty (position {0})")]
    MissingId(usize),
    #[error("duplicate prompt id: {0}")]
    DuplicateId(String),
    #[error("prompt {0}: replicate_count must be >= 1")]
    NoReplicates(String),
    #[error("prompt {id}: invalid scoring spec: {reason}")]
    InvalidScoring { id: String, reason: String },
    #[error("failed to read catalog {path}: {reason}")]
    Io { path: String, reason: String },
    #[error("failed to parse catalog YAML: {0}")]
    Parse(String),
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum SettingsError {
    #[error("unknown setting '{0}'")]
    UnknownKey(String),
    #[error("invalid value for '{key}': {reason}")]
    InvalidValue { key: String, reason: String },
}

impl SettingsError {
    pub fn invalid(key: &str, reason: impl Into<String>) -> Self {
        SettingsError::InvalidValue {
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SubmissionError {
    #[error("invalid submission: {}", join_fields(.0))]
    Invalid(Vec<FieldError>),
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

fn join_fields(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// Failure classes reported by an endpoint client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointErrorKind {
    Timeout,
    RateLimited,
    Overloaded,
    Server,
    Client,
    Transport,
    Stream,
}

impl EndpointErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EndpointErrorKind::Timeout => "timeout",
            EndpointErrorKind::RateLimited => "rate_limited",
            EndpointErrorKind::Overloaded => "overloaded",
            EndpointErrorKind::Server => "server",
            EndpointErrorKind::Client => "client",
            EndpointErrorKind::Transport => "transport",
            EndpointErrorKind::Stream => "stream",
        }
    }

    /// Client errors (bad request, auth) will not change on a retry.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, EndpointErrorKind::Client)
    }

    pub fn from_status(status: u16) -> Self {
        match status {
            429 => EndpointErrorKind::RateLimited,
            529 => EndpointErrorKind::Overloaded,
            500..=599 => EndpointErrorKind::Server,
            _ => EndpointErrorKind::Client,
        }
    }
}

impl fmt::Display for EndpointErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error, Serialize, Deserialize)]
#[error("{kind}: {message}")]
pub struct EndpointError {
    pub kind: EndpointErrorKind,
    pub message: String,
}

impl EndpointError {
    pub fn new(kind: EndpointErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn from_status(status: u16, body: &str) -> Self {
        let body = body.trim();
        let message = if body.is_empty() {
            format!("HTTP {}", status)
        } else {
            format!("HTTP {}: {}", status, truncate(body, 500))
        };
        Self::new(EndpointErrorKind::from_status(status), message)
    }

    pub fn from_transport(err: &reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            EndpointErrorKind::Timeout
        } else {
            EndpointErrorKind::Transport
        };
        Self::new(kind, err.to_string())
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert_eq!(EndpointErrorKind::from_status(429), EndpointErrorKind::RateLimited);
        assert_eq!(EndpointErrorKind::from_status(529), EndpointErrorKind::Overloaded);
        assert_eq!(EndpointErrorKind::from_status(503), EndpointErrorKind::Server);
        assert_eq!(EndpointErrorKind::from_status(401), EndpointErrorKind::Client);
    }

    #[test]
    fn display_includes_kind() {
        let e = EndpointError::from_status(429, "slow down");
        assert_eq!(e.to_string(), "rate_limited: HTTP 429: slow down");
    }
}
