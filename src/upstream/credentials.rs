//! Upstream app-credential acquisition.
//!
//! Client-credentials flow against the tenant token endpoint. The rest of the
//! crate treats this as an opaque source of bearer strings; tokens are cached
//! and refreshed with a safety margin before their reported expiry.

use std::time::{Duration, Instant};

use parking_lot::RwLock;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::config::GraphConfig;
use crate::{Error, Result};

/// Refresh this long before the reported expiry.
const REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// Cached app token provider.
pub struct AppCredentials {
    http: Client,
    token_url: String,
    client_id: String,
    client_secret: String,
    scope: String,
    cached: RwLock<Option<CachedToken>>,
}

struct CachedToken {
    bearer: String,
    expires_at: Instant,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

impl AppCredentials {
    /// Create a provider for the configured tenant.
    pub fn new(config: &GraphConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| Error::Config(format!("HTTP client: {e}")))?;

        let token_url = format!(
            "{}/{}/oauth2/v2.0/token",
            config.login_base_url.trim_end_matches('/'),
            config.tenant_id
        );
        let scope = format!("{}/.default", config.base_url.trim_end_matches('/'));

        Ok(Self {
            http,
            token_url,
            client_id: config.client_id.clone(),
            client_secret: config.resolve_client_secret(),
            scope,
            cached: RwLock::new(None),
        })
    }

    /// Return a usable bearer string, fetching or refreshing as needed.
    pub async fn bearer(&self) -> Result<String> {
        if let Some(token) = self.cached.read().as_ref() {
            if token.expires_at > Instant::now() + REFRESH_MARGIN {
                return Ok(token.bearer.clone());
            }
        }
        self.fetch().await
    }

    async fn fetch(&self) -> Result<String> {
        let params = [
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("scope", self.scope.as_str()),
            ("grant_type", "client_credentials"),
        ];

        let response = self
            .http
            .post(&self.token_url)
            .form(&params)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::UpstreamTimeout("token endpoint".to_string())
                } else {
                    Error::UpstreamUnavailable(format!("token endpoint: {e}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::UpstreamUnavailable(format!(
                "token endpoint returned {status}"
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| Error::UpstreamUnavailable(format!("token response: {e}")))?;

        let ttl = Duration::from_secs(token.expires_in.unwrap_or(300));
        debug!(ttl = ?ttl, "Acquired upstream app credential");

        *self.cached.write() = Some(CachedToken {
            bearer: token.access_token.clone(),
            expires_at: Instant::now() + ttl,
        });

        Ok(token.access_token)
    }
}
