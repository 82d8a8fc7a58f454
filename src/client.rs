//! Core error type shared by the stream parser, the transport, and the gateway.

use reqwest::StatusCode;
use thiserror::Error;

/// Errors that can occur during client operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum ClientError {
    /// No response was obtained (connection refused, reset, timeout...).
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// Transport-level failure raised by a non-reqwest byte source.
    #[error("I/O error: {0}")]
    Io(String),

    /// A response was obtained but its status signals failure.
    #[error("API Error {status}: {body}")]
    Http { status: StatusCode, body: String },

    /// The session could not be refreshed; the caller must re-authenticate.
    #[error("authentication required")]
    AuthExpired,

    /// A stream was required but the response carried no readable body.
    #[error("response has no readable body")]
    StreamUnsupported,

    /// The server answered `204 No Content` where a body was required.
    #[error("expected a response body")]
    EmptyBody,

    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// The operation was abandoned through its cancellation token.
    #[error("request cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(String),
}

impl ClientError {
    /// Status code carried by the error, if a response was obtained.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ClientError::Http { status, .. } => Some(*status),
            ClientError::Transport(e) => e.status(),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ClientError::Cancelled)
    }

    pub fn is_auth_expired(&self) -> bool {
        matches!(self, ClientError::AuthExpired)
    }
}
