//! Record store
//!
//! Row-level persistence for integrations, preferences, sync state, clips and
//! live status. Handlers and services only see the `RecordStore` trait so that
//! the Postgres implementation can be swapped for an in-memory one in tests.

#[cfg(test)]
pub mod memory;
pub mod models;
pub mod postgres;

use async_trait::async_trait;

use crate::errors::AppError;

pub use models::{
    AppToken, ClipRow, Integration, LiveStatus, SyncPreference, SyncState, SyncStateUpdate,
    SyncStatus, TokenGrant,
};
pub use postgres::PgStore;

#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn find_integration_by_user(&self, user_id: &str)
        -> Result<Option<Integration>, AppError>;

    async fn find_integration_by_channel(
        &self,
        channel_id: &str,
    ) -> Result<Option<Integration>, AppError>;

    async fn update_integration_tokens(
        &self,
        channel_id: &str,
        grant: &TokenGrant,
    ) -> Result<(), AppError>;

    async fn find_sync_preference(&self, user_id: &str)
        -> Result<Option<SyncPreference>, AppError>;

    async fn find_sync_state(&self, user_id: &str) -> Result<Option<SyncState>, AppError>;

    async fn insert_sync_state(&self, state: &SyncState) -> Result<(), AppError>;

    /// Applies `update` to the row keyed by `user_id`. Fields left as `None` are untouched.
    async fn update_sync_state(&self, user_id: &str, update: &SyncStateUpdate)
        -> Result<(), AppError>;

    /// Inserts or fully overwrites clips keyed by `twitch_clip_id`.
    async fn upsert_clips(&self, clips: &[ClipRow]) -> Result<(), AppError>;

    /// Inserts or fully overwrites the live status keyed by `broadcaster_id`.
    async fn upsert_live_status(&self, status: &LiveStatus) -> Result<(), AppError>;

    async fn find_app_token(&self) -> Result<Option<AppToken>, AppError>;

    async fn save_app_token(&self, token: &AppToken) -> Result<(), AppError>;
}
