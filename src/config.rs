use secrecy::Secret;

use crate::errors::AppError;

const DEFAULT_PORT: u16 = 8000;
const DEFAULT_HELIX_BASE_URL: &str = "https://api.twitch.tv/helix";
const DEFAULT_TOKEN_URL: &str = "https://id.twitch.tv/oauth2/token";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
}

impl Environment {
    pub fn parse(value: &str) -> Result<Self, AppError> {
        match value.trim().to_lowercase().as_str() {
            "development" => Ok(Environment::Development),
            "production" => Ok(Environment::Production),
            other => Err(AppError::Validation(format!(
                "ENVIRONMENT must be 'development' or 'production', got '{}'",
                other
            ))),
        }
    }

    pub fn is_production(&self) -> bool {
        matches!(self, Environment::Production)
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub database_url: Secret<String>,
    pub twitch_client_id: String,
    pub twitch_client_secret: Secret<String>,
    /// Shared secret the EventSub subscriptions were created with.
    pub twitch_webhook_secret: Secret<String>,
    pub environment: Environment,
    pub port: u16,
    pub helix_base_url: String,
    pub token_url: String,
}

impl Settings {
    /// Reads settings from the process environment. Call `dotenv::dotenv()` first
    /// if a `.env` file should be honoured.
    #[tracing::instrument(name = "Load settings")]
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| {
            lookup(key)
                .filter(|v| !v.is_empty())
                .ok_or_else(|| AppError::Validation(format!("{} must be set", key)))
        };

        let environment = match lookup("ENVIRONMENT") {
            Some(value) => Environment::parse(&value)?,
            None => Environment::Production,
        };

        let port = match lookup("PORT") {
            Some(value) => value
                .parse::<u16>()
                .map_err(|e| AppError::Validation(format!("Invalid PORT '{}': {}", value, e)))?,
            None => DEFAULT_PORT,
        };

        let settings = Settings {
            database_url: Secret::new(required("DATABASE_URL")?),
            twitch_client_id: required("TWITCH_CLIENT_ID")?,
            twitch_client_secret: Secret::new(required("TWITCH_CLIENT_SECRET")?),
            twitch_webhook_secret: Secret::new(required("TWITCH_WEBHOOK_SECRET")?),
            environment,
            port,
            helix_base_url: lookup("HELIX_BASE_URL")
                .unwrap_or_else(|| DEFAULT_HELIX_BASE_URL.to_string()),
            token_url: lookup("TWITCH_TOKEN_URL").unwrap_or_else(|| DEFAULT_TOKEN_URL.to_string()),
        };

        tracing::info!(
            environment = ?settings.environment,
            port = settings.port,
            helix_base_url = %settings.helix_base_url,
            "Settings loaded"
        );

        Ok(settings)
    }
}
