use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, Secret};
use sqlx::{PgPool, Postgres, QueryBuilder};

use crate::errors::AppError;

use super::models::{
    AppToken, ClipRow, Integration, LiveStatus, SyncPreference, SyncState, SyncStateUpdate,
    TokenGrant,
};
use super::RecordStore;

#[derive(Clone, Debug)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct IntegrationRow {
    user_id: String,
    twitch_user_id: String,
    access_token: Option<String>,
    refresh_token: Option<String>,
    token_expires_at: Option<DateTime<Utc>>,
}

impl From<IntegrationRow> for Integration {
    fn from(row: IntegrationRow) -> Self {
        Integration {
            user_id: row.user_id,
            channel_id: row.twitch_user_id,
            access_token: row.access_token.map(Secret::new),
            refresh_token: row.refresh_token.map(Secret::new),
            token_expires_at: row.token_expires_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct SyncStateRow {
    user_id: String,
    last_sync: Option<DateTime<Utc>>,
    sync_status: String,
    clip_count: i64,
}

impl TryFrom<SyncStateRow> for SyncState {
    type Error = AppError;

    fn try_from(row: SyncStateRow) -> Result<Self, Self::Error> {
        Ok(SyncState {
            user_id: row.user_id,
            last_sync_at: row.last_sync,
            status: row.sync_status.parse()?,
            clip_count: row.clip_count,
        })
    }
}

#[derive(sqlx::FromRow)]
struct AppTokenRow {
    access_token: String,
    expires_in: i64,
    updated_at: DateTime<Utc>,
}

fn db_error(context: &'static str) -> impl Fn(sqlx::Error) -> AppError {
    move |e| {
        tracing::error!("{}: {:?}", context, e);
        AppError::Database(anyhow::Error::from(e).context(context))
    }
}

const INTEGRATION_COLUMNS: &str =
    "user_id, twitch_user_id, access_token, refresh_token, token_expires_at";

#[async_trait]
impl RecordStore for PgStore {
    #[tracing::instrument(name = "Find integration by user", skip(self))]
    async fn find_integration_by_user(
        &self,
        user_id: &str,
    ) -> Result<Option<Integration>, AppError> {
        let row = sqlx::query_as::<_, IntegrationRow>(&format!(
            "SELECT {} FROM integrations_twitch WHERE user_id = $1 LIMIT 1",
            INTEGRATION_COLUMNS
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("Failed to fetch Twitch integration by user"))?;

        Ok(row.map(Integration::from))
    }

    #[tracing::instrument(name = "Find integration by channel", skip(self))]
    async fn find_integration_by_channel(
        &self,
        channel_id: &str,
    ) -> Result<Option<Integration>, AppError> {
        let row = sqlx::query_as::<_, IntegrationRow>(&format!(
            "SELECT {} FROM integrations_twitch WHERE twitch_user_id = $1 LIMIT 1",
            INTEGRATION_COLUMNS
        ))
        .bind(channel_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("Failed to fetch Twitch integration by channel"))?;

        Ok(row.map(Integration::from))
    }

    #[tracing::instrument(name = "Update integration tokens", skip(self, grant))]
    async fn update_integration_tokens(
        &self,
        channel_id: &str,
        grant: &TokenGrant,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"UPDATE integrations_twitch
               SET access_token = $1,
                   refresh_token = COALESCE($2, refresh_token),
                   token_expires_at = $3
               WHERE twitch_user_id = $4"#,
        )
        .bind(grant.access_token.expose_secret())
        .bind(grant.refresh_token.as_ref().map(|t| t.expose_secret().clone()))
        .bind(grant.expires_at)
        .bind(channel_id)
        .execute(&self.pool)
        .await
        .map_err(db_error("Failed to update Twitch integration tokens"))?;

        Ok(())
    }

    #[tracing::instrument(name = "Find sync preference", skip(self))]
    async fn find_sync_preference(
        &self,
        user_id: &str,
    ) -> Result<Option<SyncPreference>, AppError> {
        sqlx::query_as::<_, SyncPreference>(
            "SELECT user_id, sync_clips_on_end FROM user_preferences WHERE user_id = $1 LIMIT 1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("Failed to fetch user preferences"))
    }

    #[tracing::instrument(name = "Find sync state", skip(self))]
    async fn find_sync_state(&self, user_id: &str) -> Result<Option<SyncState>, AppError> {
        let row = sqlx::query_as::<_, SyncStateRow>(
            r#"SELECT user_id, last_sync, sync_status, clip_count
               FROM twitch_clip_syncs
               WHERE user_id = $1
               LIMIT 1"#,
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("Failed to fetch clip sync state"))?;

        row.map(SyncState::try_from).transpose()
    }

    #[tracing::instrument(name = "Insert sync state", skip(self, state), fields(user_id = %state.user_id))]
    async fn insert_sync_state(&self, state: &SyncState) -> Result<(), AppError> {
        sqlx::query(
            r#"INSERT INTO twitch_clip_syncs (user_id, last_sync, sync_status, clip_count)
               VALUES ($1, $2, $3, $4)"#,
        )
        .bind(&state.user_id)
        .bind(state.last_sync_at)
        .bind(state.status.as_str())
        .bind(state.clip_count)
        .execute(&self.pool)
        .await
        .map_err(db_error("Failed to insert clip sync state"))?;

        Ok(())
    }

    #[tracing::instrument(name = "Update sync state", skip(self))]
    async fn update_sync_state(
        &self,
        user_id: &str,
        update: &SyncStateUpdate,
    ) -> Result<(), AppError> {
        sqlx::query(
            r#"UPDATE twitch_clip_syncs
               SET sync_status = COALESCE($1, sync_status),
                   last_sync = COALESCE($2, last_sync),
                   clip_count = COALESCE($3, clip_count)
               WHERE user_id = $4"#,
        )
        .bind(update.status.map(|s| s.as_str()))
        .bind(update.last_sync_at)
        .bind(update.clip_count)
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(db_error("Failed to update clip sync state"))?;

        Ok(())
    }

    #[tracing::instrument(name = "Upsert clips", skip(self, clips), fields(count = clips.len()))]
    async fn upsert_clips(&self, clips: &[ClipRow]) -> Result<(), AppError> {
        if clips.is_empty() {
            return Ok(());
        }

        let mut builder: QueryBuilder<Postgres> = QueryBuilder::new(
            r#"INSERT INTO clips (
                twitch_clip_id, url, embed_url, broadcaster_id, broadcaster_name,
                creator_id, creator_name, video_id, game_id, language, title,
                view_count, created_at_twitch, thumbnail_url, duration, vod_offset,
                is_featured, user_id
            ) "#,
        );

        builder.push_values(clips, |mut b, clip| {
            b.push_bind(&clip.twitch_clip_id)
                .push_bind(&clip.url)
                .push_bind(&clip.embed_url)
                .push_bind(&clip.broadcaster_id)
                .push_bind(&clip.broadcaster_name)
                .push_bind(&clip.creator_id)
                .push_bind(&clip.creator_name)
                .push_bind(&clip.video_id)
                .push_bind(&clip.game_id)
                .push_bind(&clip.language)
                .push_bind(&clip.title)
                .push_bind(clip.view_count)
                .push_bind(&clip.created_at_twitch)
                .push_bind(&clip.thumbnail_url)
                .push_bind(clip.duration)
                .push_bind(clip.vod_offset)
                .push_bind(clip.is_featured)
                .push_bind(&clip.user_id);
        });

        builder.push(
            r#" ON CONFLICT (twitch_clip_id) DO UPDATE SET
                url = EXCLUDED.url,
                embed_url = EXCLUDED.embed_url,
                broadcaster_id = EXCLUDED.broadcaster_id,
                broadcaster_name = EXCLUDED.broadcaster_name,
                creator_id = EXCLUDED.creator_id,
                creator_name = EXCLUDED.creator_name,
                video_id = EXCLUDED.video_id,
                game_id = EXCLUDED.game_id,
                language = EXCLUDED.language,
                title = EXCLUDED.title,
                view_count = EXCLUDED.view_count,
                created_at_twitch = EXCLUDED.created_at_twitch,
                thumbnail_url = EXCLUDED.thumbnail_url,
                duration = EXCLUDED.duration,
                vod_offset = EXCLUDED.vod_offset,
                is_featured = EXCLUDED.is_featured,
                user_id = EXCLUDED.user_id"#,
        );

        let result = builder
            .build()
            .execute(&self.pool)
            .await
            .map_err(db_error("Failed to upsert clips"))?;

        tracing::debug!("Upserted clips: {} rows affected", result.rows_affected());
        Ok(())
    }

    #[tracing::instrument(name = "Upsert live status", skip(self, status), fields(broadcaster_id = %status.broadcaster_id, is_live = status.is_live))]
    async fn upsert_live_status(&self, status: &LiveStatus) -> Result<(), AppError> {
        sqlx::query(
            r#"INSERT INTO broadcaster_live_status (
                   broadcaster_id, broadcaster_name, is_live, stream_started_at,
                   title, stream_id, category_id, category_name
               )
               VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
               ON CONFLICT (broadcaster_id) DO UPDATE SET
                   broadcaster_name = EXCLUDED.broadcaster_name,
                   is_live = EXCLUDED.is_live,
                   stream_started_at = EXCLUDED.stream_started_at,
                   title = EXCLUDED.title,
                   stream_id = EXCLUDED.stream_id,
                   category_id = EXCLUDED.category_id,
                   category_name = EXCLUDED.category_name"#,
        )
        .bind(&status.broadcaster_id)
        .bind(&status.broadcaster_name)
        .bind(status.is_live)
        .bind(&status.stream_started_at)
        .bind(&status.title)
        .bind(&status.stream_id)
        .bind(&status.category_id)
        .bind(&status.category_name)
        .execute(&self.pool)
        .await
        .map_err(db_error("Failed to upsert broadcaster live status"))?;

        Ok(())
    }

    #[tracing::instrument(name = "Find app token", skip(self))]
    async fn find_app_token(&self) -> Result<Option<AppToken>, AppError> {
        let row = sqlx::query_as::<_, AppTokenRow>(
            "SELECT access_token, expires_in, updated_at FROM twitch_app_token WHERE id = 1",
        )
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("Failed to fetch Twitch app token"))?;

        Ok(row.map(|r| AppToken {
            access_token: Secret::new(r.access_token),
            expires_in: r.expires_in,
            updated_at: r.updated_at,
        }))
    }

    #[tracing::instrument(name = "Save app token", skip(self, token))]
    async fn save_app_token(&self, token: &AppToken) -> Result<(), AppError> {
        sqlx::query(
            r#"INSERT INTO twitch_app_token (id, access_token, expires_in, updated_at)
               VALUES (1, $1, $2, $3)
               ON CONFLICT (id) DO UPDATE SET
                   access_token = EXCLUDED.access_token,
                   expires_in = EXCLUDED.expires_in,
                   updated_at = EXCLUDED.updated_at"#,
        )
        .bind(token.access_token.expose_secret())
        .bind(token.expires_in)
        .bind(token.updated_at)
        .execute(&self.pool)
        .await
        .map_err(db_error("Failed to save Twitch app token"))?;

        Ok(())
    }
}

// Run against a disposable database: `DATABASE_URL=postgres://... cargo test -- --ignored`.
// `sqlx::test` creates a fresh database per test and applies ./migrations.
#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SyncStatus;
    use crate::sync::clips::clip_row;
    use crate::sync::testing::{clip, ScriptedApi};
    use crate::sync::ClipSyncEngine;
    use crate::twitch::ClipPage;
    use std::sync::Arc;

    async fn link(pool: &PgPool, user_id: &str, channel_id: &str) {
        sqlx::query(
            "INSERT INTO integrations_twitch (user_id, twitch_user_id, access_token) VALUES ($1, $2, 'token')",
        )
        .bind(user_id)
        .bind(channel_id)
        .execute(pool)
        .await
        .unwrap();
    }

    async fn stored_clip(pool: &PgPool, clip_id: &str) -> (String, i64, Option<String>, bool, f64) {
        sqlx::query_as(
            "SELECT title, view_count, video_id, is_featured, duration FROM clips WHERE twitch_clip_id = $1",
        )
        .bind(clip_id)
        .fetch_one(pool)
        .await
        .unwrap()
    }

    async fn clip_rows(pool: &PgPool) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM clips")
            .fetch_one(pool)
            .await
            .unwrap()
    }

    #[sqlx::test]
    #[ignore = "requires a Postgres DATABASE_URL"]
    async fn partial_sync_state_update_keeps_unset_columns(pool: PgPool) {
        let store = PgStore::new(pool);
        let last_sync = DateTime::parse_from_rfc3339("2024-05-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        store
            .insert_sync_state(&SyncState {
                user_id: "user-1".to_string(),
                last_sync_at: Some(last_sync),
                status: SyncStatus::Completed,
                clip_count: 42,
            })
            .await
            .unwrap();

        store
            .update_sync_state(
                "user-1",
                &SyncStateUpdate {
                    status: Some(SyncStatus::Syncing),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let state = store.find_sync_state("user-1").await.unwrap().unwrap();
        assert_eq!(state.status, SyncStatus::Syncing);
        assert_eq!(state.last_sync_at, Some(last_sync));
        assert_eq!(state.clip_count, 42);

        store
            .update_sync_state(
                "user-1",
                &SyncStateUpdate {
                    status: Some(SyncStatus::Failed),
                    clip_count: Some(7),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let state = store.find_sync_state("user-1").await.unwrap().unwrap();
        assert_eq!(state.status, SyncStatus::Failed);
        assert_eq!(state.last_sync_at, Some(last_sync));
        assert_eq!(state.clip_count, 7);
    }

    #[sqlx::test]
    #[ignore = "requires a Postgres DATABASE_URL"]
    async fn clip_upsert_overwrites_every_column(pool: PgPool) {
        let store = PgStore::new(pool.clone());
        let mut first = clip_row(&clip("a"), "user-1");
        first.video_id = Some("v1".to_string());
        first.is_featured = true;
        store.upsert_clips(&[first]).await.unwrap();

        let mut second = clip_row(&clip("a"), "user-1");
        second.title = "renamed".to_string();
        second.view_count = 999;
        second.video_id = None;
        second.is_featured = false;
        second.duration = 12.0;
        store
            .upsert_clips(&[second, clip_row(&clip("b"), "user-1")])
            .await
            .unwrap();

        assert_eq!(clip_rows(&pool).await, 2);
        assert_eq!(
            stored_clip(&pool, "a").await,
            ("renamed".to_string(), 999, None, false, 12.0)
        );
    }

    #[sqlx::test]
    #[ignore = "requires a Postgres DATABASE_URL"]
    async fn repeated_clip_id_in_one_batch_is_rejected(pool: PgPool) {
        let store = PgStore::new(pool.clone());
        let row = clip_row(&clip("a"), "user-1");

        let err = store.upsert_clips(&[row.clone(), row]).await.unwrap_err();

        assert!(matches!(err, AppError::Database(_)));
        assert_eq!(clip_rows(&pool).await, 0);
    }

    #[sqlx::test]
    #[ignore = "requires a Postgres DATABASE_URL"]
    async fn sync_of_page_with_repeated_clip_ids_succeeds(pool: PgPool) {
        link(&pool, "user-1", "1234").await;
        let mut latest = clip("a");
        latest.view_count = 77;
        let api = Arc::new(ScriptedApi::pages(vec![(
            None,
            ClipPage {
                clips: vec![clip("a"), clip("b"), latest],
                cursor: None,
            },
        )]));
        let engine = ClipSyncEngine::new(Arc::new(PgStore::new(pool.clone())), api);

        let total = engine.sync("user-1").await.unwrap();

        assert_eq!(total, 2);
        assert_eq!(clip_rows(&pool).await, 2);
        assert_eq!(stored_clip(&pool, "a").await.1, 77);
    }

    #[sqlx::test]
    #[ignore = "requires a Postgres DATABASE_URL"]
    async fn live_status_upsert_replaces_previous_values(pool: PgPool) {
        let store = PgStore::new(pool.clone());
        store
            .upsert_live_status(&LiveStatus {
                broadcaster_id: "1234".to_string(),
                broadcaster_name: "Streamer".to_string(),
                is_live: true,
                stream_started_at: Some("2024-05-01T12:00:00Z".to_string()),
                title: Some("hello chat".to_string()),
                stream_id: Some("40952121085".to_string()),
                category_id: Some("509658".to_string()),
                category_name: Some("Just Chatting".to_string()),
            })
            .await
            .unwrap();

        store
            .upsert_live_status(&LiveStatus::offline("1234", "Streamer"))
            .await
            .unwrap();

        let (is_live, title, stream_id, category_name): (
            bool,
            Option<String>,
            Option<String>,
            Option<String>,
        ) = sqlx::query_as(
            "SELECT is_live, title, stream_id, category_name FROM broadcaster_live_status WHERE broadcaster_id = '1234'",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        assert!(!is_live);
        assert_eq!((title, stream_id, category_name), (None, None, None));
    }

    #[sqlx::test]
    #[ignore = "requires a Postgres DATABASE_URL"]
    async fn token_update_keeps_refresh_token_when_none_returned(pool: PgPool) {
        link(&pool, "user-1", "1234").await;
        sqlx::query("UPDATE integrations_twitch SET refresh_token = 'r-1' WHERE user_id = 'user-1'")
            .execute(&pool)
            .await
            .unwrap();
        let store = PgStore::new(pool);
        let expires_at = DateTime::parse_from_rfc3339("2030-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);

        store
            .update_integration_tokens(
                "1234",
                &TokenGrant {
                    access_token: Secret::new("fresh".to_string()),
                    refresh_token: None,
                    expires_at,
                },
            )
            .await
            .unwrap();

        let integration = store.find_integration_by_channel("1234").await.unwrap().unwrap();
        assert_eq!(integration.access_token.unwrap().expose_secret(), "fresh");
        assert_eq!(integration.refresh_token.unwrap().expose_secret(), "r-1");
        assert_eq!(integration.token_expires_at, Some(expires_at));
    }
}
