use std::sync::Arc;

use chrono::{Duration, Utc};

use crate::store::{RecordStore, SyncState, SyncStateUpdate, SyncStatus};

/// Minimum gap between two completed syncs for the same user.
pub const SYNC_COOLDOWN_SECS: i64 = 60 * 60;

/// Lifecycle of the per-user `twitch_clip_syncs` record:
/// `idle -> syncing -> completed | failed`.
///
/// Write failures never reach the caller. `begin` reports them by returning
/// `false`; `complete` and `fail` only log them. A process crash between
/// `begin` and `fail` leaves the record in `syncing`; nothing heals it.
pub struct SyncStateManager {
    store: Arc<dyn RecordStore>,
    enforce_cooldown: bool,
    cooldown: Duration,
}

impl SyncStateManager {
    pub fn new(store: Arc<dyn RecordStore>, enforce_cooldown: bool) -> Self {
        Self {
            store,
            enforce_cooldown,
            cooldown: Duration::seconds(SYNC_COOLDOWN_SECS),
        }
    }

    /// True when the last sync completed less than an hour ago. Only applies
    /// when the cooldown is enforced (production).
    #[tracing::instrument(name = "Check sync cooldown", skip(self))]
    pub async fn should_skip(&self, user_id: &str) -> bool {
        if !self.enforce_cooldown {
            return false;
        }

        let state = match self.store.find_sync_state(user_id).await {
            Ok(state) => state,
            Err(e) => {
                tracing::error!("Failed to read sync state, not skipping: {:?}", e);
                return false;
            }
        };

        match state {
            Some(SyncState {
                status: SyncStatus::Completed,
                last_sync_at: Some(last_sync_at),
                ..
            }) => {
                let elapsed = (Utc::now() - last_sync_at).abs();
                if elapsed < self.cooldown {
                    tracing::info!(
                        "Last sync was {} minutes ago, skipping sync",
                        elapsed.num_minutes()
                    );
                    return true;
                }
                false
            }
            _ => false,
        }
    }

    /// Marks the user's sync as running. Returns `false` when the record
    /// could not be written; the caller must then abandon the attempt.
    #[tracing::instrument(name = "Begin clip sync", skip(self))]
    pub async fn begin(&self, user_id: &str) -> bool {
        let now = Utc::now();

        let existing = match self.store.find_sync_state(user_id).await {
            Ok(existing) => existing,
            Err(e) => {
                tracing::error!("Failed to start sync: {:?}", e);
                return false;
            }
        };

        let result = match existing {
            Some(_) => {
                self.store
                    .update_sync_state(
                        user_id,
                        &SyncStateUpdate {
                            status: Some(SyncStatus::Syncing),
                            last_sync_at: Some(now),
                            clip_count: None,
                        },
                    )
                    .await
            }
            None => {
                self.store
                    .insert_sync_state(&SyncState {
                        user_id: user_id.to_string(),
                        last_sync_at: Some(now),
                        status: SyncStatus::Syncing,
                        clip_count: 0,
                    })
                    .await
            }
        };

        match result {
            Ok(()) => true,
            Err(e) => {
                tracing::error!("Failed to start sync: {:?}", e);
                false
            }
        }
    }

    #[tracing::instrument(name = "Complete clip sync", skip(self))]
    pub async fn complete(&self, user_id: &str, clip_count: u64) {
        let update = SyncStateUpdate {
            status: Some(SyncStatus::Completed),
            last_sync_at: None,
            clip_count: Some(i64::try_from(clip_count).unwrap_or(i64::MAX)),
        };

        if let Err(e) = self.store.update_sync_state(user_id, &update).await {
            tracing::error!("Failed to mark sync completed: {:?}", e);
        }
    }

    #[tracing::instrument(name = "Fail clip sync", skip(self))]
    pub async fn fail(&self, user_id: &str) {
        let update = SyncStateUpdate {
            status: Some(SyncStatus::Failed),
            ..Default::default()
        };

        if let Err(e) = self.store.update_sync_state(user_id, &update).await {
            tracing::error!("Failed to mark sync failed: {:?}", e);
        }
    }
}
