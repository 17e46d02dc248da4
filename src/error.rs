//! Errors returned by collaborator calls.

use thiserror::Error;

/// Failure of a single collaborator call, after the call harness gave up.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CallError {
    /// Connection, timeout or other transport problem
    #[error("transport error: {0}")]
    Transport(String),
    /// Non-success HTTP status
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },
    /// The response body could not be decoded
    #[error("invalid response: {0}")]
    Decode(String),
    /// Anything else reported by a collaborator implementation
    #[error("{0}")]
    Other(String),
}

impl CallError {
    /// Transport failures, 429 and 5xx are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            CallError::Transport(_) => true,
            CallError::Status { status, .. } => *status == 429 || *status >= 500,
            CallError::Decode(_) | CallError::Other(_) => false,
        }
    }
}

impl From<reqwest::Error> for CallError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            CallError::Decode(err.to_string())
        } else if let Some(status) = err.status() {
            CallError::Status {
                status: status.as_u16(),
                body: err.to_string(),
            }
        } else {
            CallError::Transport(err.to_string())
        }
    }
}
