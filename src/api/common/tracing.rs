//! Request/response logging hooks for `tower_http::trace::TraceLayer`.
//!
//! EventSub deliveries are tagged with their message id and type so a
//! redelivered notification can be matched to its first attempt.

use axum::body::Body;
use axum::http::{HeaderMap, Request, Response};
use std::collections::HashMap;
use std::time::Duration;
use tower_http::classify::ServerErrorsFailureClass;
use tracing::{info_span, Span};

use crate::twitch::eventsub::{MESSAGE_ID_HEADER, MESSAGE_SIGNATURE_HEADER, MESSAGE_TYPE_HEADER};

fn header<'a>(headers: &'a HeaderMap, name: &str) -> &'a str {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("-")
}

fn is_sensitive(name: &str) -> bool {
    let name = name.to_lowercase();
    name.contains("authorization")
        || name.contains("cookie")
        || name.contains("token")
        || name == MESSAGE_SIGNATURE_HEADER
}

/// Header map safe to log: credentials and webhook signatures are replaced.
fn loggable_headers(headers: &HeaderMap) -> HashMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            if is_sensitive(name.as_str()) {
                Some((name.to_string(), "[REDACTED]".to_string()))
            } else {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.to_string(), v.to_string()))
            }
        })
        .collect()
}

pub fn make_custom_span(request: &Request<Body>) -> Span {
    let headers = request.headers();

    info_span!(
        "http_request",
        method = %request.method(),
        uri = %request.uri().path(),
        version = ?request.version(),
        eventsub_message_id = header(headers, MESSAGE_ID_HEADER),
        eventsub_message_type = header(headers, MESSAGE_TYPE_HEADER),
        user_agent = header(headers, "user-agent"),
    )
}

pub fn on_custom_request(request: &Request<Body>, _span: &Span) {
    tracing::info!(
        method = %request.method(),
        uri = %request.uri(),
        headers = ?loggable_headers(request.headers()),
        "Incoming HTTP request"
    );
}

pub fn on_custom_response(response: &Response<Body>, latency: Duration, _span: &Span) {
    let status = response.status();
    let latency_ms = latency.as_millis();

    if status.is_server_error() {
        tracing::error!(status = %status, latency_ms, "HTTP request completed with server error");
    } else if status.is_client_error() {
        tracing::warn!(status = %status, latency_ms, "HTTP request completed with client error");
    } else {
        tracing::info!(status = %status, latency_ms, "HTTP request completed");
    }
}

pub fn on_custom_failure(error: ServerErrorsFailureClass, latency: Duration, _span: &Span) {
    let error_type = match &error {
        ServerErrorsFailureClass::StatusCode(code) => format!("HTTP {}", code.as_u16()),
        ServerErrorsFailureClass::Error(_) => "Internal Error".to_string(),
    };

    tracing::error!(
        error = ?error,
        latency_ms = latency.as_millis(),
        error_type = error_type,
        "HTTP request failed"
    );
}
