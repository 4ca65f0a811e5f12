use thiserror::Error;
use vigil_gateway::error::GatewayError;
use vigil_store::StoreError;

/// Top-level daemon errors.
///
/// Config and store-integrity errors are fatal: the daemon refuses to start
/// (or aborts) rather than run with questionable state. Gateway errors are
/// fatal only when raised from startup paths; at runtime they are recovered
/// locally by the component that hit them.
#[derive(Debug, Error)]
pub enum VigilError {
    #[error("invalid config at `{path}`: {reason}")]
    Config { path: String, reason: String },

    #[error("store: {0}")]
    Store(#[from] StoreError),

    #[error("gateway: {0}")]
    Gateway(#[from] GatewayError),

    #[error("hub failed to reach connected state within {timeout_secs}s")]
    ConnectTimeout { timeout_secs: u64 },

    #[error("system already stopped")]
    AlreadyStopped,

    #[error("JoinError: {0}")]
    JoinError(String),
}

impl VigilError {
    pub fn config<P, R>(path: P, reason: R) -> Self
    where
        P: Into<String>,
        R: Into<String>,
    {
        Self::Config {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

impl From<tokio::task::JoinError> for VigilError {
    fn from(value: tokio::task::JoinError) -> Self {
        Self::JoinError(format!("{value:?}"))
    }
}
