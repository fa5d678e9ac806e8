use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

pub async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, "OK")
}

pub async fn root() -> impl IntoResponse {
    Json(json!({
        "message": "StreamWizard API",
        "version": env!("CARGO_PKG_VERSION")
    }))
}
