use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::errors::AppError;
use crate::store::{LiveStatus, RecordStore};
use crate::twitch::eventsub::StreamOnlineEvent;
use crate::twitch::TwitchApi;

use super::{parse_event, EventHandler};

/// Records a broadcaster going live with the stream's current metadata.
pub struct StreamOnlineHandler {
    store: Arc<dyn RecordStore>,
    api: Arc<dyn TwitchApi>,
}

impl StreamOnlineHandler {
    pub fn new(store: Arc<dyn RecordStore>, api: Arc<dyn TwitchApi>) -> Self {
        Self { store, api }
    }
}

#[async_trait]
impl EventHandler for StreamOnlineHandler {
    #[tracing::instrument(name = "Handle stream.online", skip(self, event))]
    async fn handle(&self, event: Value) -> Result<(), AppError> {
        let event: StreamOnlineEvent = parse_event(event)?;

        // playlist, watch_party, premiere and rerun also arrive as stream.online
        if event.stream_type != "live" {
            tracing::debug!(
                "Ignoring {} stream for {}",
                event.stream_type,
                event.broadcaster_user_id
            );
            return Ok(());
        }

        let stream = match self
            .api
            .get_live_stream(&event.broadcaster_user_id)
            .await?
        {
            Some(stream) => stream,
            None => {
                tracing::info!(
                    "No live stream found for broadcaster {}",
                    event.broadcaster_user_id
                );
                return Ok(());
            }
        };

        let status = LiveStatus {
            broadcaster_id: event.broadcaster_user_id,
            broadcaster_name: event.broadcaster_user_name,
            is_live: true,
            stream_started_at: Some(event.started_at),
            title: Some(stream.title),
            stream_id: Some(stream.id),
            category_id: Some(stream.game_id),
            category_name: Some(stream.game_name),
        };

        self.store.upsert_live_status(&status).await?;
        tracing::info!("Broadcaster {} is live", status.broadcaster_id);

        Ok(())
    }
}
