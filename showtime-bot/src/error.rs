//! Error types for the showtime bot.

use thiserror::Error;

/// Result type alias using the bot error type.
pub type BotResult<T> = std::result::Result<T, BotError>;

/// Unified error type for upstream calls, the transport and orchestration.
///
/// Payloads are plain strings so one outcome can be cloned to every caller
/// waiting on a shared fetch.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BotError {
    /// Upstream call exceeded its deadline
    #[error("Operation timed out after {0} ms")]
    Timeout(u64),

    /// Upstream asked us to slow down
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// Upstream unreachable or returned a server error
    #[error("Upstream error: {0}")]
    Upstream(String),

    /// Upstream answered with something we cannot decode
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    /// Credentials rejected (transport pairing or API key)
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Transport connection dropped or could not be established
    #[error("Connection failed: {0}")]
    Connection(String),

    /// No usable messaging session right now
    #[error("Session not ready")]
    NotReady,

    /// Required setting missing or invalid
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl BotError {
    /// Whether a retry may succeed where this attempt failed.
    pub const fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_) | Self::RateLimited(_) | Self::Upstream(_) | Self::Connection(_)
        )
    }

    /// Check if this is an authentication error.
    pub const fn is_auth(&self) -> bool {
        matches!(self, Self::Auth(_))
    }

    /// Map an HTTP error status onto the taxonomy.
    pub fn from_status(status: u16, body: impl Into<String>) -> Self {
        let body = body.into();
        match status {
            401 | 403 => Self::Auth(format!("HTTP {status}: {body}")),
            408 => Self::Timeout(0),
            429 => Self::RateLimited(format!("HTTP {status}: {body}")),
            400..=499 => Self::InvalidPayload(format!("HTTP {status}: {body}")),
            _ => Self::Upstream(format!("HTTP {status}: {body}")),
        }
    }
}

impl From<reqwest::Error> for BotError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout(0)
        } else if e.is_decode() {
            Self::InvalidPayload(e.to_string())
        } else if let Some(status) = e.status() {
            Self::from_status(status.as_u16(), e.to_string())
        } else {
            Self::Upstream(e.to_string())
        }
    }
}

impl From<serde_json::Error> for BotError {
    fn from(e: serde_json::Error) -> Self {
        Self::InvalidPayload(e.to_string())
    }
}
