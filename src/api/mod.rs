//! HTTP surface of the service.

pub mod common;
pub mod webhooks;

use axum::{routing::post, Router};

use crate::system::create_system_router;
use crate::InnerState;

#[tracing::instrument(name = "create_router", skip(state))]
pub fn create_router(state: InnerState) -> Router {
    tracing::info!("Creating router");

    Router::new()
        .merge(create_system_router())
        .route("/webhooks/twitch/eventsub", post(webhooks::eventsub))
        .with_state(state)
}
