//! Client-credentials token exchange.

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use chrono::Utc;
use docpush_upload::{AccessToken, Credentials, TokenFetcher, UploadError};
use tracing::debug;

use crate::error::GraphError;
use crate::types::{TokenErrorResponse, TokenResponse};

pub const DEFAULT_AUTHORITY: &str = "https://login.microsoftonline.com";
pub const GRAPH_SCOPE: &str = "https://graph.microsoft.com/.default";

/// Lifetime assumed when the token endpoint omits `expires_in`.
const DEFAULT_EXPIRES_IN: i64 = 3600;

/// Exchanges an app registration's id and secret for a Graph token.
pub struct ClientCredentials {
    http: reqwest::Client,
    authority: String,
    credentials: Credentials,
}

impl ClientCredentials {
    pub fn new(credentials: Credentials, timeout: Duration) -> Result<Self, GraphError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            authority: DEFAULT_AUTHORITY.to_string(),
            credentials,
        })
    }

    /// Points the exchange at another authority (sovereign clouds, tests).
    pub fn with_authority(mut self, authority: impl Into<String>) -> Self {
        self.authority = authority.into().trim_end_matches('/').to_string();
        self
    }

    fn token_url(&self) -> String {
        format!(
            "{}/{}/oauth2/v2.0/token",
            self.authority, self.credentials.tenant_id
        )
    }

    async fn exchange(&self) -> Result<AccessToken, GraphError> {
        let url = self.token_url();
        debug!(%url, client_id = %self.credentials.client_id, "requesting token");

        let form = [
            ("grant_type", "client_credentials"),
            ("client_id", self.credentials.client_id.as_str()),
            ("client_secret", self.credentials.client_secret.as_str()),
            ("scope", GRAPH_SCOPE),
        ];
        let resp = self.http.post(&url).form(&form).send().await?;
        let status = resp.status();
        let body = resp.text().await?;

        if !status.is_success() {
            let reason = serde_json::from_str::<TokenErrorResponse>(&body)
                .map(|e| match e.error_description {
                    Some(desc) => format!("{}: {desc}", e.error),
                    None => e.error,
                })
                .unwrap_or_else(|_| format!("token endpoint returned {status}"));
            return Err(GraphError::Auth(reason));
        }

        let token: TokenResponse = serde_json::from_str(&body)?;
        let expires_in = token.expires_in.unwrap_or(DEFAULT_EXPIRES_IN).max(0);
        Ok(AccessToken::new(
            token.access_token,
            Utc::now() + chrono::Duration::seconds(expires_in),
        ))
    }
}

impl TokenFetcher for ClientCredentials {
    fn fetch(&self) -> Pin<Box<dyn Future<Output = Result<AccessToken, UploadError>> + Send + '_>> {
        Box::pin(async move {
            self.exchange()
                .await
                .map_err(|e| UploadError::Auth(e.to_string()))
        })
    }
}
