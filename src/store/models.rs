use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use secrecy::Secret;
use serde::{Deserialize, Serialize};

use crate::errors::AppError;

/// Link between an internal user and a Twitch broadcaster account.
#[derive(Debug, Clone)]
pub struct Integration {
    pub user_id: String,
    pub channel_id: String,
    pub access_token: Option<Secret<String>>,
    pub refresh_token: Option<Secret<String>>,
    pub token_expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct TokenGrant {
    pub access_token: Secret<String>,
    pub refresh_token: Option<Secret<String>>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct AppToken {
    pub access_token: Secret<String>,
    /// Lifetime in seconds, counted from `updated_at`.
    pub expires_in: i64,
    pub updated_at: DateTime<Utc>,
}

impl AppToken {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now > self.updated_at + chrono::Duration::seconds(self.expires_in)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct SyncPreference {
    pub user_id: String,
    pub sync_clips_on_end: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncStatus {
    Idle,
    Syncing,
    Completed,
    Failed,
}

impl SyncStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncStatus::Idle => "idle",
            SyncStatus::Syncing => "syncing",
            SyncStatus::Completed => "completed",
            SyncStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SyncStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "idle" => Ok(SyncStatus::Idle),
            "syncing" => Ok(SyncStatus::Syncing),
            "completed" => Ok(SyncStatus::Completed),
            "failed" => Ok(SyncStatus::Failed),
            other => Err(AppError::Database(anyhow::anyhow!(
                "Unknown sync status '{}'",
                other
            ))),
        }
    }
}

/// One row per user in `twitch_clip_syncs`.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncState {
    pub user_id: String,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub status: SyncStatus,
    pub clip_count: i64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncStateUpdate {
    pub status: Option<SyncStatus>,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub clip_count: Option<i64>,
}

/// Storage shape of a clip in the `clips` table.
#[derive(Debug, Clone, PartialEq)]
pub struct ClipRow {
    pub twitch_clip_id: String,
    pub url: String,
    pub embed_url: String,
    pub broadcaster_id: String,
    pub broadcaster_name: String,
    pub creator_id: String,
    pub creator_name: String,
    pub video_id: Option<String>,
    pub game_id: String,
    pub language: String,
    pub title: String,
    pub view_count: i64,
    pub created_at_twitch: String,
    pub thumbnail_url: String,
    pub duration: f64,
    pub vod_offset: Option<i64>,
    pub is_featured: bool,
    pub user_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LiveStatus {
    pub broadcaster_id: String,
    pub broadcaster_name: String,
    pub is_live: bool,
    pub stream_started_at: Option<String>,
    pub title: Option<String>,
    pub stream_id: Option<String>,
    pub category_id: Option<String>,
    pub category_name: Option<String>,
}

impl LiveStatus {
    pub fn offline(broadcaster_id: &str, broadcaster_name: &str) -> Self {
        Self {
            broadcaster_id: broadcaster_id.to_string(),
            broadcaster_name: broadcaster_name.to_string(),
            is_live: false,
            stream_started_at: None,
            title: None,
            stream_id: None,
            category_id: None,
            category_name: None,
        }
    }
}
