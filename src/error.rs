// Error handling module
// Typed failures handed to the host process

use thiserror::Error;

/// Envelope code the API gate uses to ask the client to reconnect
pub const RECONNECT_CODE: &str = "010301";

/// Errors produced by the token lifecycle and the request proxy.
///
/// Every variant owns its diagnostics as plain strings so the value can be
/// cloned and replayed to every caller waiting on the same token refresh.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Missing or conflicting configuration (programmer error, not retryable)
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The token endpoint could not be reached
    #[error("Token endpoint unreachable: {0}")]
    AuthTransport(String),

    /// The token endpoint answered but did not issue a token
    #[error("Token request rejected: {status} - {body}")]
    AuthRejected { status: u16, body: String },

    /// Network or HTTP-level failure calling the API gate
    #[error("API transport error{}: {message}", status_suffix(.status))]
    ApiTransport { status: Option<u16>, message: String },

    /// The API gate executed the call but reported a failure in the envelope
    #[error("API error: {code} - {message}")]
    ApiApplication { code: String, message: String },
}

impl Error {
    /// Whether a host may retry the failed operation after backing off
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Configuration(_) => false,
            Error::AuthTransport(_) => true,
            Error::AuthRejected { status, .. } => *status == 429 || (500..=599).contains(status),
            Error::ApiTransport { .. } => true,
            Error::ApiApplication { code, .. } => code == RECONNECT_CODE,
        }
    }

    /// Whether the API asked the host to run its connection sequence again
    pub fn should_reconnect(&self) -> bool {
        matches!(self, Error::ApiApplication { code, .. } if code == RECONNECT_CODE)
    }

    /// Envelope result code, for application errors
    pub fn code(&self) -> Option<&str> {
        match self {
            Error::ApiApplication { code, .. } => Some(code),
            _ => None,
        }
    }
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" ({})", s)).unwrap_or_default()
}

/// Categorize a reqwest failure for diagnostics
pub(crate) fn describe_transport_error(e: &reqwest::Error) -> String {
    let kind = if e.is_timeout() {
        "timeout"
    } else if e.is_connect() {
        "connection_failed"
    } else if e.is_request() {
        "request_error"
    } else if e.is_body() {
        "body_error"
    } else if e.is_decode() {
        "decode_error"
    } else {
        "unknown"
    };

    format!("{} (kind: {})", e, kind)
}

/// Result type alias for session operations
pub type Result<T> = std::result::Result<T, Error>;
