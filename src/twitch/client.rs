use std::sync::Arc;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, Secret};
use serde::de::DeserializeOwned;
use url::Url;

use crate::config::Settings;
use crate::errors::AppError;

use super::tokens::TokenProvider;
use super::types::{Clip, ClipPage, HelixResponse, Stream};

/// Largest page Helix serves for `GET /clips`.
pub const MAX_CLIPS_PER_PAGE: usize = 100;

/// Read access to the Twitch Helix API.
#[async_trait]
pub trait TwitchApi: Send + Sync {
    /// One page of the broadcaster's clips, `first` clamped to 1..=100.
    async fn get_clips(
        &self,
        broadcaster_id: &str,
        first: usize,
        after: Option<&str>,
    ) -> Result<ClipPage, AppError>;

    /// The broadcaster's current live stream, if any.
    async fn get_live_stream(&self, broadcaster_id: &str) -> Result<Option<Stream>, AppError>;
}

#[derive(Debug, Clone, Copy)]
enum Credential<'a> {
    Channel(&'a str),
    App,
}

pub struct HelixClient {
    http_client: Client,
    base_url: String,
    client_id: String,
    tokens: Arc<dyn TokenProvider>,
}

impl HelixClient {
    pub fn new(
        http_client: Client,
        base_url: String,
        client_id: String,
        tokens: Arc<dyn TokenProvider>,
    ) -> Self {
        Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
            client_id,
            tokens,
        }
    }

    pub fn from_settings(
        http_client: Client,
        settings: &Settings,
        tokens: Arc<dyn TokenProvider>,
    ) -> Self {
        Self::new(
            http_client,
            settings.helix_base_url.clone(),
            settings.twitch_client_id.clone(),
            tokens,
        )
    }

    fn endpoint(&self, path: &str, query: &[(&str, String)]) -> Result<Url, AppError> {
        Url::parse_with_params(&format!("{}/{}", self.base_url, path), query).map_err(|e| {
            tracing::error!("Invalid Helix URL for {}: {:?}", path, e);
            AppError::Unexpected(anyhow::Error::new(e).context("Failed to build Helix URL"))
        })
    }

    async fn send(&self, url: &Url, token: &Secret<String>) -> Result<reqwest::Response, AppError> {
        let response = self
            .http_client
            .get(url.clone())
            .header("Client-Id", &self.client_id)
            .bearer_auth(token.expose_secret())
            .send()
            .await?;
        Ok(response)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        url: Url,
        credential: Credential<'_>,
    ) -> Result<T, AppError> {
        let token = match credential {
            Credential::Channel(channel_id) => self.tokens.access_token(channel_id).await?,
            Credential::App => self.tokens.app_access_token().await?,
        };

        let mut response = self.send(&url, &token).await?;

        if response.status() == StatusCode::UNAUTHORIZED {
            if let Credential::Channel(channel_id) = credential {
                tracing::warn!("Helix rejected channel token for {}, refreshing", channel_id);
                let token = self.tokens.refresh_access_token(channel_id).await?;
                response = self.send(&url, &token).await?;
            }
        }

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            tracing::error!(status = %status, path = url.path(), "Twitch API error: {}", error_text);
            return Err(AppError::ExternalService(anyhow::anyhow!(
                "Twitch API error {}: {}",
                status,
                error_text
            )));
        }

        response.json::<T>().await.map_err(|e| {
            tracing::error!("Failed to parse Helix response: {:?}", e);
            AppError::from(e)
        })
    }
}

#[async_trait]
impl TwitchApi for HelixClient {
    #[tracing::instrument(name = "Fetch Twitch clips page", skip(self))]
    async fn get_clips(
        &self,
        broadcaster_id: &str,
        first: usize,
        after: Option<&str>,
    ) -> Result<ClipPage, AppError> {
        let mut query = vec![
            ("broadcaster_id", broadcaster_id.to_string()),
            ("first", first.clamp(1, MAX_CLIPS_PER_PAGE).to_string()),
        ];
        if let Some(cursor) = after {
            query.push(("after", cursor.to_string()));
        }

        let url = self.endpoint("clips", &query)?;
        let response: HelixResponse<Clip> = self
            .get_json(url, Credential::Channel(broadcaster_id))
            .await?;

        Ok(ClipPage::from(response))
    }

    #[tracing::instrument(name = "Fetch Twitch stream", skip(self))]
    async fn get_live_stream(&self, broadcaster_id: &str) -> Result<Option<Stream>, AppError> {
        let url = self.endpoint(
            "streams",
            &[
                ("user_id", broadcaster_id.to_string()),
                ("type", "live".to_string()),
            ],
        )?;
        let response: HelixResponse<Stream> = self.get_json(url, Credential::App).await?;

        Ok(response.data.into_iter().next())
    }
}
