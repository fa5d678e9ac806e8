use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::errors::AppError;
use crate::store::{LiveStatus, RecordStore};
use crate::sync::ClipSyncService;
use crate::twitch::eventsub::StreamOfflineEvent;

use super::{parse_event, EventHandler};

/// Marks the broadcaster offline and, when the owner opted in, pulls the
/// channel's clips in a background task.
///
/// Twitch expects a 2xx within a few seconds, so the handler returns once the
/// live status is written and the sync is started. A broadcaster with no
/// linked user is still reported to the caller.
pub struct StreamOfflineHandler {
    store: Arc<dyn RecordStore>,
    sync: Arc<ClipSyncService>,
}

impl StreamOfflineHandler {
    pub fn new(store: Arc<dyn RecordStore>, sync: Arc<ClipSyncService>) -> Self {
        Self { store, sync }
    }
}

#[async_trait]
impl EventHandler for StreamOfflineHandler {
    #[tracing::instrument(name = "Handle stream.offline", skip(self, event))]
    async fn handle(&self, event: Value) -> Result<(), AppError> {
        let event: StreamOfflineEvent = parse_event(event)?;

        self.store
            .upsert_live_status(&LiveStatus::offline(
                &event.broadcaster_user_id,
                &event.broadcaster_user_name,
            ))
            .await?;

        let integration = self
            .store
            .find_integration_by_channel(&event.broadcaster_user_id)
            .await?
            .ok_or_else(|| {
                tracing::error!(
                    "No user linked to broadcaster {}",
                    event.broadcaster_user_id
                );
                AppError::UserNotFound(format!("broadcaster {}", event.broadcaster_user_id))
            })?;

        let enabled = self
            .store
            .find_sync_preference(&integration.user_id)
            .await?
            .map(|p| p.sync_clips_on_end)
            .unwrap_or(false);

        if !enabled {
            tracing::debug!("Clip sync on stream end disabled for {}", integration.user_id);
            return Ok(());
        }

        let sync = self.sync.clone();
        let user_id = integration.user_id;
        tokio::spawn(async move {
            let outcome = sync.run(&user_id).await;
            tracing::info!("Clip sync for {}: {:?}", user_id, outcome);
        });

        Ok(())
    }
}
