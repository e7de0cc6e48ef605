//! Error types for protocol calls
//!
//! Every call into the chat server resolves to one of these variants. Only
//! `RateLimited` is recoverable; the retry wrapper absorbs it and hands every
//! other variant back unchanged.

use thiserror::Error;

/// Matrix error code for rate limiting
pub const LIMIT_EXCEEDED: &str = "M_LIMIT_EXCEEDED";

/// Errors returned by the protocol client
#[derive(Debug, Clone, Error)]
pub enum ProtocolError {
    /// The server asked us to slow down
    #[error("Rate limited, retry after {retry_after_ms}ms")]
    RateLimited { retry_after_ms: u64 },

    /// The server answered with an error body
    #[error("{errcode} ({status}): {message}")]
    Api {
        errcode: String,
        status: u16,
        message: String,
    },

    /// The request never got an answer
    #[error("Transport error: {0}")]
    Transport(String),

    /// The answer could not be understood
    #[error("Unexpected response: {0}")]
    InvalidResponse(String),

    /// A local precondition failed before anything was sent
    #[error("{0}")]
    Local(String),
}

impl ProtocolError {
    /// Build an API error from a status code and an error body
    pub fn api(status: u16, errcode: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Api {
            errcode: errcode.into(),
            status,
            message: message.into(),
        }
    }
}

impl From<reqwest::Error> for ProtocolError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_decode() {
            Self::InvalidResponse(error.to_string())
        } else {
            Self::Transport(error.to_string())
        }
    }
}

/// Result type for protocol calls
pub type ProtocolResult<T> = Result<T, ProtocolError>;
