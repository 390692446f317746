use async_trait::async_trait;

use crate::error::Result;
use crate::tweet::Tweet;

/// The lightweight, API-driven backend tried first for every account.
///
/// The orchestrator drives it as `validate_environment` → `initialize` →
/// `collect_tweets`, and always calls `logout` afterwards when a session exists.
#[async_trait]
pub trait PrimaryBackend: Send + Sync {
    type Session: Send;

    /// Fails with [`ScrapeError::Configuration`](crate::ScrapeError::Configuration)
    /// when required settings are absent.
    fn validate_environment(&self) -> Result<()>;

    /// Open a session for `handle`. `Ok(None)` means the backend is not ready.
    async fn initialize(&self, handle: &str) -> Result<Option<Self::Session>>;

    /// Collect the account's tweets in discovery order.
    async fn collect_tweets(&self, session: &mut Self::Session) -> Result<Vec<Tweet>>;

    /// Best-effort teardown.
    async fn logout(&self, session: Self::Session) -> Result<()>;
}
