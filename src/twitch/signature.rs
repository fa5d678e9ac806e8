//! EventSub message signatures.
//!
//! Twitch signs every delivery with HMAC-SHA256 over
//! `message_id || timestamp || raw body`, keyed by the subscription secret,
//! and sends it as `sha256=<hex>`.

use axum::http::HeaderMap;
use chrono::{DateTime, Duration, Utc};
use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, Secret};
use sha2::Sha256;

use crate::errors::AppError;

use super::eventsub::{MESSAGE_ID_HEADER, MESSAGE_SIGNATURE_HEADER, MESSAGE_TIMESTAMP_HEADER};

type HmacSha256 = Hmac<Sha256>;

const SIGNATURE_PREFIX: &str = "sha256=";

/// Deliveries older than this are treated as replays.
pub const MAX_MESSAGE_AGE_SECS: i64 = 10 * 60;

fn mac(
    secret: &Secret<String>,
    message_id: &str,
    timestamp: &str,
    body: &[u8],
) -> Result<HmacSha256, AppError> {
    let mut mac = HmacSha256::new_from_slice(secret.expose_secret().as_bytes()).map_err(|e| {
        AppError::Unexpected(anyhow::anyhow!("Invalid webhook secret: {}", e))
    })?;
    mac.update(message_id.as_bytes());
    mac.update(timestamp.as_bytes());
    mac.update(body);
    Ok(mac)
}

/// `sha256=<hex>` signature for a delivery.
pub fn sign(
    secret: &Secret<String>,
    message_id: &str,
    timestamp: &str,
    body: &[u8],
) -> Result<String, AppError> {
    let digest = mac(secret, message_id, timestamp, body)?.finalize().into_bytes();
    Ok(format!("{}{}", SIGNATURE_PREFIX, hex::encode(digest)))
}

fn required<'a>(headers: &'a HeaderMap, name: &str) -> Result<&'a str, AppError> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| {
            tracing::warn!("EventSub delivery without {}", name);
            AppError::Forbidden(format!("Missing {} header", name))
        })
}

/// Checks a delivery's signature and freshness against `now`.
#[tracing::instrument(name = "Verify EventSub signature", skip_all)]
pub fn verify(
    secret: &Secret<String>,
    headers: &HeaderMap,
    body: &[u8],
    now: DateTime<Utc>,
) -> Result<(), AppError> {
    let message_id = required(headers, MESSAGE_ID_HEADER)?;
    let timestamp = required(headers, MESSAGE_TIMESTAMP_HEADER)?;
    let signature = required(headers, MESSAGE_SIGNATURE_HEADER)?;

    let sent_at = DateTime::parse_from_rfc3339(timestamp).map_err(|e| {
        tracing::warn!("Unparseable EventSub timestamp {}: {:?}", timestamp, e);
        AppError::Forbidden("Invalid message timestamp".to_string())
    })?;
    if now.signed_duration_since(sent_at) > Duration::seconds(MAX_MESSAGE_AGE_SECS) {
        tracing::warn!("Rejecting stale EventSub message {} sent at {}", message_id, timestamp);
        return Err(AppError::Forbidden("Message timestamp too old".to_string()));
    }

    let expected = signature
        .strip_prefix(SIGNATURE_PREFIX)
        .and_then(|hex_digest| hex::decode(hex_digest).ok())
        .ok_or_else(|| AppError::Forbidden("Malformed message signature".to_string()))?;

    mac(secret, message_id, timestamp, body)?
        .verify_slice(&expected)
        .map_err(|_| {
            tracing::warn!("EventSub signature mismatch for message {}", message_id);
            AppError::Forbidden("Invalid message signature".to_string())
        })
}
