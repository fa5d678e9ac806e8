use secrecy::ExposeSecret;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

use crate::config::Settings;
use crate::errors::AppError;

const MAX_CONNECTIONS: u32 = 10;

/// Connects to Postgres and applies pending migrations.
#[tracing::instrument(name = "Initialize database", skip(settings))]
pub async fn init_db(settings: &Settings) -> Result<PgPool, AppError> {
    let pool = PgPoolOptions::new()
        .max_connections(MAX_CONNECTIONS)
        .connect(settings.database_url.expose_secret())
        .await
        .map_err(|e| {
            tracing::error!("Failed to connect to database: {:?}", e);
            AppError::Database(anyhow::Error::new(e).context("Failed to connect to database"))
        })?;

    sqlx::migrate!("./migrations").run(&pool).await.map_err(|e| {
        tracing::error!("Failed to run migrations: {:?}", e);
        AppError::Database(anyhow::Error::new(e).context("Failed to run migrations"))
    })?;

    tracing::info!("Database ready");
    Ok(pool)
}
