//! Error types shared across the crate.
//!
//! Failures are classified along one axis that matters to the session loops:
//! retryable or not. Transport faults and AMI-level protocol errors are both
//! retryable (the server may simply be restarting); configuration problems
//! and cancellation are not.

use thiserror::Error;

/// Result type alias for all fallible operations in this crate.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Network/HTTP layer failure: connection refused, DNS, timeout,
    /// non-2xx status, truncated body.
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// The AMI endpoint answered, but with a malformed response or a
    /// `Response` value other than the expected one.
    #[error("AMI: {message}")]
    Protocol { message: String },

    /// A protocol error raised by the Login action specifically.
    #[error("AMI authentication rejected: {message}")]
    Auth { message: String },

    /// Invalid or missing configuration. Raised at startup only.
    #[error("configuration error: {0}")]
    Config(String),

    /// A worker terminated while the root token was still live.
    #[error("worker for server '{server}' terminated unexpectedly")]
    Worker { server: String },

    /// Unexpected internal failure (e.g. a panicked task).
    #[error("internal error: {0}")]
    Internal(String),

    /// Shutdown was requested while the operation was in flight.
    /// Expected during teardown; never logged as an error.
    #[error("operation cancelled")]
    Cancelled,
}

impl Error {
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol {
            message: message.into(),
        }
    }

    /// `true` if the session loop should log, sleep `retry_interval`, and
    /// try again rather than tear the process down.
    ///
    /// Auth failures retry like any other protocol error: AMI credentials
    /// are fixed config, but the server may be mid-reload.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Transport(_) | Error::Protocol { .. } | Error::Auth { .. }
        )
    }
}
