//! Refresh-token exchange against each platform's OAuth token endpoint

use async_trait::async_trait;
use reqwest::Client;
use std::collections::HashMap;
use tracing::debug;

use spreadify_core::{
    config::{PlatformApiConfig, RelayConfig},
    models::{Platform, TokenGrant},
    repository::TokenRefresher,
    Error, Result,
};

use super::destination::{check_status, read_json, transport_error};

pub struct OAuthRefresher {
    http: Client,
    clients: HashMap<Platform, PlatformApiConfig>,
}

impl OAuthRefresher {
    #[must_use]
    pub fn new(http: Client, config: &RelayConfig) -> Self {
        let clients = HashMap::from([
            (Platform::YouTube, config.youtube.clone()),
            (Platform::Twitch, config.twitch.clone()),
            (Platform::Facebook, config.facebook.clone()),
            (Platform::LinkedIn, config.linkedin.clone()),
        ]);
        Self { http, clients }
    }
}

#[async_trait]
impl TokenRefresher for OAuthRefresher {
    async fn refresh(&self, platform: Platform, refresh_token: &str) -> Result<TokenGrant> {
        let client = self.clients.get(&platform).ok_or_else(|| {
            Error::Internal(format!("No OAuth client configured for {platform}"))
        })?;

        let response = self
            .http
            .post(&client.token_url)
            .form(&[
                ("grant_type", "refresh_token"),
                ("client_id", client.client_id.as_str()),
                ("client_secret", client.client_secret.as_str()),
                ("refresh_token", refresh_token),
            ])
            .send()
            .await
            .map_err(|e| transport_error(platform, &e))?;

        let grant: TokenGrant = read_json(platform, check_status(platform, response).await?).await?;
        debug!(platform = %platform, expires_in = ?grant.expires_in, "Access token refreshed");
        Ok(grant)
    }
}
