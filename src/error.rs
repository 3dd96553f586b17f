use std::time::Duration;

use thiserror::Error;

/// Failure from the cloud provider adapter (network, throttling, auth, ...).
///
/// The adapter itself is out of scope for this crate; callers implementing
/// [`crate::provider::ProviderClient`] construct these from whatever their
/// SDK reports.
#[derive(Error, Debug, Clone)]
#[error("provider error: {message}")]
pub struct ProviderError {
    pub message: String,
}

impl ProviderError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Errors surfaced to callers of the client: session-closing, timeout,
/// provider, protocol/decode, and invariant violation.
#[derive(Error, Debug, Clone)]
pub enum ClientError {
    #[error("session is closing, no further requests are accepted")]
    SessionClosing,

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("failed to decode message: {0}")]
    Decode(String),

    #[error("io error: {0}")]
    Io(String),

    #[error("internal invariant violated: {0}")]
    InvariantViolation(String),
}

impl From<std::io::Error> for ClientError {
    fn from(err: std::io::Error) -> Self {
        ClientError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(err: serde_json::Error) -> Self {
        ClientError::Decode(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
