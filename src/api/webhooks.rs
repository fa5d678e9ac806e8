use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
};
use chrono::Utc;

use crate::errors::AppError;
use crate::twitch::eventsub::{EventSubMessage, MessageType, MESSAGE_TYPE_HEADER};
use crate::twitch::signature;
use crate::InnerState;

/// `POST /webhooks/twitch/eventsub`
///
/// The body is read raw so the signature is checked over the exact bytes
/// Twitch signed; it is only parsed once verified.
#[tracing::instrument(name = "Receive EventSub delivery", skip(inner, headers, body))]
pub async fn eventsub(
    State(inner): State<InnerState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    let InnerState {
        dispatcher,
        webhook_secret,
    } = inner;

    signature::verify(&webhook_secret, &headers, &body, Utc::now())?;

    let message: EventSubMessage = serde_json::from_slice(&body).map_err(|e| {
        tracing::error!("Malformed EventSub body: {:?}", e);
        AppError::Validation(format!("Malformed EventSub body: {}", e))
    })?;

    let raw_type = headers
        .get(MESSAGE_TYPE_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    let message_type = MessageType::parse(raw_type).ok_or_else(|| {
        AppError::Validation(format!("Unsupported EventSub message type '{}'", raw_type))
    })?;

    let subscription = &message.subscription;

    match message_type {
        MessageType::Verification => {
            let challenge = message.challenge.ok_or_else(|| {
                AppError::Validation("Verification request without challenge".to_string())
            })?;
            tracing::info!(
                "Verified EventSub subscription {} ({})",
                subscription.id,
                subscription.subscription_type
            );
            Ok((
                StatusCode::OK,
                [(header::CONTENT_TYPE, "text/plain")],
                challenge,
            )
                .into_response())
        }
        MessageType::Revocation => {
            tracing::warn!(
                "EventSub subscription {} ({}) revoked: {}",
                subscription.id,
                subscription.subscription_type,
                subscription.status
            );
            Ok(StatusCode::NO_CONTENT.into_response())
        }
        MessageType::Notification => {
            let event = message.event.ok_or_else(|| {
                AppError::Validation("Notification without event payload".to_string())
            })?;
            dispatcher
                .dispatch(&subscription.subscription_type, event)
                .await?;
            Ok(StatusCode::NO_CONTENT.into_response())
        }
    }
}
