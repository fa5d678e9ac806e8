//! EventSub webhook payloads.

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const MESSAGE_TYPE_HEADER: &str = "twitch-eventsub-message-type";
pub const MESSAGE_ID_HEADER: &str = "twitch-eventsub-message-id";
pub const MESSAGE_SIGNATURE_HEADER: &str = "twitch-eventsub-message-signature";
pub const MESSAGE_TIMESTAMP_HEADER: &str = "twitch-eventsub-message-timestamp";

pub const STREAM_ONLINE: &str = "stream.online";
pub const STREAM_OFFLINE: &str = "stream.offline";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    Notification,
    Verification,
    Revocation,
}

impl MessageType {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "notification" => Some(MessageType::Notification),
            "webhook_callback_verification" => Some(MessageType::Verification),
            "revocation" => Some(MessageType::Revocation),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transport {
    pub method: String,
    #[serde(default)]
    pub callback: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Subscription {
    pub id: String,
    pub status: String,
    #[serde(rename = "type")]
    pub subscription_type: String,
    pub version: String,
    #[serde(default)]
    pub cost: i64,
    #[serde(default)]
    pub condition: Value,
    pub transport: Transport,
    pub created_at: String,
}

/// Body of every EventSub webhook delivery. `event` is set on notifications,
/// `challenge` on callback verification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventSubMessage {
    pub subscription: Subscription,
    #[serde(default)]
    pub event: Option<Value>,
    #[serde(default)]
    pub challenge: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamOnlineEvent {
    pub id: String,
    pub broadcaster_user_id: String,
    pub broadcaster_user_login: String,
    pub broadcaster_user_name: String,
    #[serde(rename = "type")]
    pub stream_type: String,
    pub started_at: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamOfflineEvent {
    pub broadcaster_user_id: String,
    pub broadcaster_user_login: String,
    pub broadcaster_user_name: String,
}
