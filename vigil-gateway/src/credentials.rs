use crate::error::GatewayError;
use std::{fmt::Debug, future::Future, sync::Arc};

/// Supplies bearer tokens for authenticated gateway connections.
///
/// Login flows that mint tokens live outside this crate; the daemon only
/// requires something it can ask for a currently-valid token, and notify when
/// the gateway rejects one.
pub trait CredentialProvider
where
    Self: Debug + Send + Sync,
{
    /// Return a token expected to be valid now, refreshing if required.
    fn bearer_token(&self) -> impl Future<Output = Result<String, GatewayError>> + Send;
}

/// Static token provider, sufficient for tests and short-lived sessions.
#[derive(Debug, Clone)]
pub struct StaticToken(Arc<str>);

impl StaticToken {
    pub fn new<S>(token: S) -> Self
    where
        S: Into<Arc<str>>,
    {
        Self(token.into())
    }
}

impl CredentialProvider for StaticToken {
    fn bearer_token(&self) -> impl Future<Output = Result<String, GatewayError>> + Send {
        std::future::ready(Ok(self.0.to_string()))
    }
}
