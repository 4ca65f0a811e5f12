use std::time::Duration;
use thiserror::Error;

/// All errors generated at the gateway boundary.
///
/// The variants partition into the retry taxonomy the enforcement executor
/// relies on: transient network faults are retried with backoff, rate limits
/// honour `retry_after`, auth failures are terminal, everything else fails
/// fast.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("request timed out")]
    Timeout,

    #[error("gateway returned server error status {0}")]
    Server(u16),

    #[error("gateway rate limited the request")]
    RateLimited { retry_after: Option<Duration> },

    #[error("gateway rejected the request with status {0}")]
    Rejected(u16),

    #[error("gateway reported failure: {code:?} {message}")]
    Api { code: Option<i64>, message: String },

    #[error("authentication rejected by gateway")]
    AuthRejected,

    #[error("deserialising gateway payload: {error} for payload: {payload}")]
    Deserialise {
        error: serde_json::Error,
        payload: String,
    },

    #[error("error parsing url: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("error subscribing to gateway hub: {0}")]
    Subscribe(String),

    #[error("gateway hub disconnected: {0}")]
    Disconnected(String),
}

impl GatewayError {
    /// True if retrying the same request may succeed (timeouts, 5xx,
    /// connection resets).
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Timeout | Self::Server(_) | Self::Disconnected(_) => true,
            Self::Http(error) => error.is_timeout() || error.is_connect() || error.is_request(),
            Self::RateLimited { .. } => true,
            _ => false,
        }
    }

    /// Server-advertised delay before the next attempt, if any.
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::RateLimited { retry_after } => *retry_after,
            _ => None,
        }
    }

    /// Auth failures stop reconnect loops entirely.
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::AuthRejected)
    }
}
