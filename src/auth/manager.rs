use reqwest::Client;
use std::sync::Arc;

use super::login;
use super::types::{CachedToken, CredentialSet};
use crate::cache::TokenCache;
use crate::error::{ExportError, Result};
use crate::timing::Clock;

/// Authenticator
/// Hands out access tokens, reusing a cached token while it is still valid
pub struct Authenticator {
    /// HTTP client for login requests
    client: Client,

    /// Preservica host, e.g. https://nypl.preservica.com
    base_url: String,

    /// Where minted tokens are kept between runs
    cache: Arc<dyn TokenCache>,

    /// Time source for issue timestamps and validity checks
    clock: Arc<dyn Clock>,

    /// Fail on `success: false` instead of using the returned token
    strict: bool,
}

impl Authenticator {
    /// Create a new Authenticator sharing an existing HTTP client
    pub fn new(
        client: Client,
        base_url: impl Into<String>,
        cache: Arc<dyn TokenCache>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            cache,
            clock,
            strict: false,
        }
    }

    /// Treat `success: false` from the login endpoint as fatal
    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    /// Get a usable access token, logging in if the cached one is missing or stale
    pub async fn get_token(&self, creds: &CredentialSet) -> Result<String> {
        if let Some(token) = self.cache.load(creds) {
            let now = self.clock.now();
            if self.cache.is_valid(&token, now) {
                tracing::debug!(
                    "Using cached token for {} (age {:.1}s)",
                    creds.partition_key(),
                    now - token.issued_at
                );
                return Ok(token.value);
            }
            tracing::debug!("Cached token for {} has expired", creds.partition_key());
        }

        self.create_token(creds).await
    }

    /// Log in, cache the new token and return it
    async fn create_token(&self, creds: &CredentialSet) -> Result<String> {
        let data = login::login(&self.client, &self.base_url, creds)
            .await
            .map_err(ExportError::Login)?;

        if !data.success {
            tracing::error!("Token did not generate successfully");
            if self.strict {
                return Err(ExportError::AuthFailure(
                    "Token did not generate successfully".to_string(),
                ));
            }
        }

        let token = CachedToken::new(self.clock.now(), data.token);

        // A token that cannot be cached is still good for this run
        if let Err(e) = self.cache.store(creds, &token) {
            tracing::warn!("Failed to cache access token: {:#}", e);
        }

        tracing::info!("✅ Access token generated for {}", creds.partition_key());
        Ok(token.value)
    }
}
