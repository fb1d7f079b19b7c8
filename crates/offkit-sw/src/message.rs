//! Wire messages exchanged with client contexts.
//!
//! Control messages arrive from clients; client messages are broadcast to
//! every open client context. All of them are externally tagged by a
//! `type` field so the hosting runtime can route them without schema
//! knowledge.

use serde::{Deserialize, Serialize};

/// Inbound control messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ControlMessage {
    /// Activate the waiting version immediately.
    #[serde(rename = "SKIP_WAITING")]
    SkipWaiting,

    /// Ask for the active cache-generation identifier; answered over the
    /// event's reply channel.
    #[serde(rename = "GET_VERSION")]
    GetVersion,
}

/// Reply to [`ControlMessage::GetVersion`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionInfo {
    /// Active cache-generation identifier, e.g. `app-v2.0.0`.
    pub version: String,
    /// Reply time, ms since epoch.
    pub timestamp: u64,
}

/// Outbound messages broadcast to client contexts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// Background data sync finished; clients should refresh.
    #[serde(rename = "SYNC_DEVICE_INFO")]
    SyncDeviceInfo { timestamp: u64 },

    /// A push event arrived; clients may surface the notification.
    #[serde(rename = "NOTIFY")]
    Notify { notification: Notification },
}

/// Description of a notification to surface. The engine only describes it;
/// presenting (and click routing) belongs to the hosting runtime.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub title: String,
    pub body: String,
    pub icon: String,
    pub badge: String,
    pub tag: String,
    pub renotify: bool,
    pub require_interaction: bool,
    pub actions: Vec<NotificationAction>,
}

/// An action button on a notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationAction {
    pub action: String,
    pub title: String,
    pub icon: String,
}

impl Notification {
    /// The device-info notification, with the push payload as body when
    /// one was carried.
    pub fn device_info(body: Option<String>) -> Self {
        Self {
            title: "Device Info App".to_string(),
            body: body.unwrap_or_else(|| "New device information available".to_string()),
            icon: "/icons/icon-192x192.png".to_string(),
            badge: "/icons/icon-96x96.png".to_string(),
            tag: "device-info-notification".to_string(),
            renotify: true,
            require_interaction: false,
            actions: vec![
                NotificationAction {
                    action: "view".to_string(),
                    title: "View Details".to_string(),
                    icon: "/icons/icon-96x96.png".to_string(),
                },
                NotificationAction {
                    action: "dismiss".to_string(),
                    title: "Dismiss".to_string(),
                    icon: "/icons/icon-96x96.png".to_string(),
                },
            ],
        }
    }
}
