//! EventSub notification routing
//!
//! Handlers are registered per subscription type. A notification whose type
//! has no handler is dropped without error, since Twitch can start sending
//! types this service does not know about.

pub mod stream_offline;
pub mod stream_online;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::errors::AppError;
use crate::store::RecordStore;
use crate::sync::ClipSyncService;
use crate::twitch::eventsub::{STREAM_OFFLINE, STREAM_ONLINE};
use crate::twitch::TwitchApi;

pub use stream_offline::StreamOfflineHandler;
pub use stream_online::StreamOnlineHandler;

#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: Value) -> Result<(), AppError>;
}

/// Deserializes a notification's `event` object into its typed payload.
pub(crate) fn parse_event<T: DeserializeOwned>(event: Value) -> Result<T, AppError> {
    serde_json::from_value(event).map_err(|e| {
        tracing::error!("Malformed event payload: {:?}", e);
        AppError::Validation(format!("Malformed event payload: {}", e))
    })
}

#[derive(Default)]
pub struct EventDispatcher {
    handlers: HashMap<String, Arc<dyn EventHandler>>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Dispatcher wired with the stream lifecycle handlers.
    pub fn twitch(
        store: Arc<dyn RecordStore>,
        api: Arc<dyn TwitchApi>,
        sync: Arc<ClipSyncService>,
    ) -> Self {
        let mut dispatcher = Self::new();
        dispatcher.register(
            STREAM_ONLINE,
            Arc::new(StreamOnlineHandler::new(store.clone(), api)),
        );
        dispatcher.register(
            STREAM_OFFLINE,
            Arc::new(StreamOfflineHandler::new(store, sync)),
        );
        dispatcher
    }

    pub fn register(&mut self, subscription_type: &str, handler: Arc<dyn EventHandler>) {
        self.handlers
            .insert(subscription_type.to_string(), handler);
    }

    #[tracing::instrument(name = "Dispatch EventSub notification", skip(self, event))]
    pub async fn dispatch(&self, subscription_type: &str, event: Value) -> Result<(), AppError> {
        match self.handlers.get(subscription_type) {
            Some(handler) => handler.handle(event).await,
            None => {
                tracing::debug!("No handler for event type {}", subscription_type);
                Ok(())
            }
        }
    }
}
