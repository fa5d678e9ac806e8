use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use secrecy::{ExposeSecret, Secret};
use serde::Deserialize;

use crate::config::Settings;
use crate::errors::AppError;
use crate::store::{AppToken, RecordStore, TokenGrant};

use super::cache::TtlCache;

const APP_TOKEN_KEY: &str = "app";

/// Supplies access tokens for Helix requests.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// User access token of the integration linked to `channel_id`.
    async fn access_token(&self, channel_id: &str) -> Result<Secret<String>, AppError>;

    /// Exchanges the stored refresh token for a new user access token.
    async fn refresh_access_token(&self, channel_id: &str) -> Result<Secret<String>, AppError>;

    /// App access token, renewed with the client-credentials grant once expired.
    async fn app_access_token(&self) -> Result<Secret<String>, AppError>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    expires_in: i64,
}

pub struct StoreTokenProvider {
    store: Arc<dyn RecordStore>,
    http_client: Client,
    token_url: String,
    client_id: String,
    client_secret: Secret<String>,
    cache: Option<Arc<TtlCache<String, Secret<String>>>>,
}

fn channel_key(channel_id: &str) -> String {
    format!("channel:{}", channel_id)
}

impl StoreTokenProvider {
    pub fn new(
        store: Arc<dyn RecordStore>,
        http_client: Client,
        token_url: String,
        client_id: String,
        client_secret: Secret<String>,
    ) -> Self {
        Self {
            store,
            http_client,
            token_url,
            client_id,
            client_secret,
            cache: None,
        }
    }

    pub fn from_settings(store: Arc<dyn RecordStore>, http_client: Client, settings: &Settings) -> Self {
        Self::new(
            store,
            http_client,
            settings.token_url.clone(),
            settings.twitch_client_id.clone(),
            settings.twitch_client_secret.clone(),
        )
    }

    pub fn with_cache(mut self, cache: Arc<TtlCache<String, Secret<String>>>) -> Self {
        self.cache = Some(cache);
        self
    }

    async fn cached(&self, key: &String) -> Option<Secret<String>> {
        match &self.cache {
            Some(cache) => cache.get(key).await,
            None => None,
        }
    }

    async fn remember(&self, key: String, token: &Secret<String>) {
        if let Some(cache) = &self.cache {
            cache.put(key, token.clone()).await;
        }
    }

    async fn request_token(&self, params: &[(&str, &str)]) -> Result<TokenResponse, AppError> {
        let response = self
            .http_client
            .post(&self.token_url)
            .query(params)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, "Twitch token endpoint error: {}", error_text);
            return Err(AppError::ExternalService(anyhow::anyhow!(
                "Twitch token endpoint returned {}: {}",
                status,
                error_text
            )));
        }

        response.json::<TokenResponse>().await.map_err(|e| {
            tracing::error!("Failed to parse token response: {:?}", e);
            AppError::from(e)
        })
    }
}

#[async_trait]
impl TokenProvider for StoreTokenProvider {
    #[tracing::instrument(name = "Resolve channel access token", skip(self))]
    async fn access_token(&self, channel_id: &str) -> Result<Secret<String>, AppError> {
        let key = channel_key(channel_id);
        if let Some(token) = self.cached(&key).await {
            return Ok(token);
        }

        let token = self
            .store
            .find_integration_by_channel(channel_id)
            .await?
            .and_then(|integration| integration.access_token)
            .filter(|token| !token.expose_secret().is_empty())
            .ok_or_else(|| {
                AppError::IntegrationNotFound(format!("no access token for channel {}", channel_id))
            })?;

        self.remember(key, &token).await;
        Ok(token)
    }

    #[tracing::instrument(name = "Refresh channel access token", skip(self))]
    async fn refresh_access_token(&self, channel_id: &str) -> Result<Secret<String>, AppError> {
        let key = channel_key(channel_id);
        if let Some(cache) = &self.cache {
            cache.invalidate(&key).await;
        }

        let refresh_token = self
            .store
            .find_integration_by_channel(channel_id)
            .await?
            .and_then(|integration| integration.refresh_token)
            .filter(|token| !token.expose_secret().is_empty())
            .ok_or_else(|| {
                AppError::IntegrationNotFound(format!("no refresh token for channel {}", channel_id))
            })?;

        tracing::debug!("Exchanging refresh token for new access token");
        let response = self
            .request_token(&[
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token.expose_secret().as_str()),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.expose_secret().as_str()),
            ])
            .await?;

        let grant = TokenGrant {
            access_token: Secret::new(response.access_token),
            refresh_token: response.refresh_token.map(Secret::new),
            expires_at: Utc::now() + chrono::Duration::seconds(response.expires_in),
        };
        self.store.update_integration_tokens(channel_id, &grant).await?;

        tracing::info!("Refreshed access token for channel {}", channel_id);
        self.remember(key, &grant.access_token).await;
        Ok(grant.access_token)
    }

    #[tracing::instrument(name = "Resolve app access token", skip(self))]
    async fn app_access_token(&self) -> Result<Secret<String>, AppError> {
        let key = APP_TOKEN_KEY.to_string();
        if let Some(token) = self.cached(&key).await {
            return Ok(token);
        }

        let now = Utc::now();
        let stored = self.store.find_app_token().await?;
        let token = match stored {
            Some(token) if !token.is_expired(now) => token,
            _ => {
                tracing::info!("App access token missing or expired, requesting a new one");
                let response = self
                    .request_token(&[
                        ("client_id", self.client_id.as_str()),
                        ("client_secret", self.client_secret.expose_secret().as_str()),
                        ("grant_type", "client_credentials"),
                    ])
                    .await?;

                let token = AppToken {
                    access_token: Secret::new(response.access_token),
                    expires_in: response.expires_in,
                    updated_at: now,
                };
                self.store.save_app_token(&token).await?;
                token
            }
        };

        // Only cache when the token outlives the cache entry.
        if let Some(cache) = &self.cache {
            let ttl = chrono::Duration::from_std(cache.ttl()).unwrap_or(chrono::Duration::zero());
            if !token.is_expired(now + ttl) {
                cache.put(key, token.access_token.clone()).await;
            }
        }

        Ok(token.access_token)
    }
}
