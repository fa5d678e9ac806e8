mod api;
mod config;
mod db;
mod errors;
mod events;
mod store;
mod sync;
mod system;
mod twitch;

use std::error::Error;
use std::sync::Arc;

use axum::routing::get;
use axum_prometheus::PrometheusMetricLayer;
use secrecy::Secret;
use tower_http::trace::TraceLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use crate::api::common::tracing::{
    make_custom_span, on_custom_failure, on_custom_request, on_custom_response,
};
use crate::api::create_router;
use crate::config::Settings;
use crate::db::init_db;
use crate::events::EventDispatcher;
use crate::store::{PgStore, RecordStore};
use crate::sync::{ClipSyncEngine, ClipSyncService, SyncStateManager};
use crate::twitch::{HelixClient, StoreTokenProvider, TtlCache, TwitchApi, TOKEN_CACHE_TTL};

#[derive(Clone)]
pub struct InnerState {
    pub dispatcher: Arc<EventDispatcher>,
    pub webhook_secret: Secret<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    dotenv::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "clip_sync_api=debug,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = Settings::from_env()?;

    let db = init_db(&settings).await?;
    let store: Arc<dyn RecordStore> = Arc::new(PgStore::new(db));

    let http_client = reqwest::Client::new();
    let tokens = StoreTokenProvider::from_settings(store.clone(), http_client.clone(), &settings)
        .with_cache(Arc::new(TtlCache::new(TOKEN_CACHE_TTL)));
    let api: Arc<dyn TwitchApi> = Arc::new(HelixClient::from_settings(
        http_client,
        &settings,
        Arc::new(tokens),
    ));

    let sync = Arc::new(ClipSyncService::new(
        SyncStateManager::new(store.clone(), settings.environment.is_production()),
        ClipSyncEngine::new(store.clone(), api.clone()),
    ));

    let app_state = InnerState {
        dispatcher: Arc::new(EventDispatcher::twitch(store, api, sync)),
        webhook_secret: settings.twitch_webhook_secret.clone(),
    };

    let (prometheus_layer, metric_handle) = PrometheusMetricLayer::pair();

    let app = create_router(app_state)
        .route("/metrics", get(|| async move { metric_handle.render() }))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(make_custom_span)
                .on_request(on_custom_request)
                .on_response(on_custom_response)
                .on_failure(on_custom_failure),
        )
        .layer(prometheus_layer);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", settings.port)).await?;

    tracing::info!("listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;

    Ok(())
}
