//! Bearer-token cache with single-flight refresh.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::error::UploadError;

/// Default refresh margin before a token's expiry.
pub const DEFAULT_REFRESH_MARGIN: Duration = Duration::from_secs(5 * 60);

/// An opaque bearer token and its expiry.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken {
    secret: String,
    expires_at: DateTime<Utc>,
}

impl std::fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccessToken")
            .field("secret", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl AccessToken {
    pub fn new(secret: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            secret: secret.into(),
            expires_at,
        }
    }

    /// Token value for the `Authorization: Bearer` header.
    pub fn secret(&self) -> &str {
        &self.secret
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// True while `now` is more than `margin` away from expiry.
    pub fn is_fresh(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        let margin = chrono::Duration::from_std(margin).unwrap_or(chrono::Duration::zero());
        now + margin < self.expires_at
    }
}

/// Exchanges credentials for a new token.
///
/// Implemented by the Graph crate on top of the identity provider's token
/// endpoint; kept as a trait so the cache is testable with mocks.
pub trait TokenFetcher: Send + Sync {
    fn fetch(&self) -> Pin<Box<dyn Future<Output = Result<AccessToken, UploadError>> + Send + '_>>;
}

/// Hands out valid tokens to uploaders.
pub trait TokenSource: Send + Sync {
    fn get_token(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<AccessToken, UploadError>> + Send + '_>>;
}

/// Caches one token and refreshes it near expiry.
///
/// The cache lock is held across the refresh, so callers arriving while a
/// refresh is in flight wait for its result instead of starting another.
pub struct TokenProvider {
    fetcher: Arc<dyn TokenFetcher>,
    cached: Mutex<Option<AccessToken>>,
    margin: Duration,
}

impl TokenProvider {
    pub fn new(fetcher: Arc<dyn TokenFetcher>) -> Self {
        Self::with_margin(fetcher, DEFAULT_REFRESH_MARGIN)
    }

    pub fn with_margin(fetcher: Arc<dyn TokenFetcher>, margin: Duration) -> Self {
        Self {
            fetcher,
            cached: Mutex::new(None),
            margin,
        }
    }

    async fn get_or_refresh(&self) -> Result<AccessToken, UploadError> {
        let mut cached = self.cached.lock().await;

        if let Some(token) = cached.as_ref()
            && token.is_fresh(Utc::now(), self.margin)
        {
            return Ok(token.clone());
        }

        debug!(had_token = cached.is_some(), "refreshing access token");
        let token = match self.fetcher.fetch().await {
            Ok(token) => token,
            Err(UploadError::Auth(msg)) => return Err(UploadError::Auth(msg)),
            Err(other) => return Err(UploadError::Auth(other.to_string())),
        };
        info!(expires_at = %token.expires_at(), "acquired access token");

        *cached = Some(token.clone());
        Ok(token)
    }
}

impl TokenSource for TokenProvider {
    fn get_token(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<AccessToken, UploadError>> + Send + '_>> {
        Box::pin(self.get_or_refresh())
    }
}
