//! Mail provider error types.

use thiserror::Error;

/// Errors that can occur while talking to the mail provider.
#[derive(Error, Debug)]
pub enum MailError {
    /// Transport-level HTTP failure.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-success response from the provider API. The body is truncated
    /// before it gets here.
    #[error("Mail API error ({status}): {body}")]
    Api { status: u16, body: String },

    /// Provider throttled the request. `retry_after` carries the
    /// server-supplied delay in seconds when present.
    #[error("Rate limited by mail provider")]
    RateLimited { retry_after: Option<u64> },

    /// OAuth2 access-token refresh failed. Always fatal for the run.
    #[error("Token refresh failed: {0}")]
    TokenRefresh(String),

    /// The provider returned a response we could not decode.
    #[error("Failed to parse provider response: {0}")]
    ParseResponse(String),

    /// The mailbox client is missing required configuration.
    #[error("Invalid mail client configuration: {0}")]
    Config(String),
}

/// Result type for mail operations.
pub type Result<T> = std::result::Result<T, MailError>;
