use async_trait::async_trait;
use secrecy::SecretString;

/// Supplies bearer tokens to the transport.
///
/// Implemented by the session's token manager. The transport asks for the
/// current token before each authorized call and, on a 401, asks for exactly
/// one forced refresh before retrying.
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// The current bearer token, refreshing it first if the cache is stale.
    /// `None` when no token can be obtained.
    async fn bearer(&self) -> Option<SecretString>;

    /// Discard the cached token and exchange for a new one.
    async fn force_refresh(&self) -> Option<SecretString>;
}

/// A fixed token, for one-shot tools and tests.
#[derive(Debug, Clone)]
pub struct StaticToken(pub SecretString);

#[async_trait]
impl TokenSource for StaticToken {
    async fn bearer(&self) -> Option<SecretString> {
        Some(self.0.clone())
    }

    async fn force_refresh(&self) -> Option<SecretString> {
        Some(self.0.clone())
    }
}
