//! Service identity and liveness routes

pub mod health_check;

use axum::{routing::get, Router};

use crate::InnerState;

#[tracing::instrument(name = "create_system_router")]
pub fn create_system_router() -> Router<InnerState> {
    Router::new()
        .route("/", get(health_check::root))
        .route("/health", get(health_check::health_check))
}
