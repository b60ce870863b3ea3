// src/types/notification.rs
use serde::{Deserialize, Deserializer, Serialize};

/// Category tag driving routing-on-click in the consuming view.
/// Tags match the backend's notification model; unknown tags fall
/// back to `Other` instead of failing the whole page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationType {
    JobMatch,
    ApplicationUpdate,
    Subscription,
    CvAnalysis,
    System,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: u64,
    pub notification_type: NotificationType,
    pub title: String,
    pub message: String,
    /// RFC 3339 timestamp, used by views for relative-time display.
    pub created_at: String,
    pub is_read: bool,
}

/// One page of the notification list endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationPage {
    #[serde(default)]
    pub results: Vec<Notification>,
    /// Continuation signal. The backend sends either a boolean or a
    /// next-page URL (null when exhausted); both are accepted.
    #[serde(default, deserialize_with = "truthy")]
    pub next: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnreadCountResponse {
    pub count: u64,
}

fn truthy<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    Ok(match value {
        serde_json::Value::Bool(b) => b,
        serde_json::Value::Null => false,
        serde_json::Value::String(s) => !s.is_empty(),
        serde_json::Value::Number(n) => n.as_f64().unwrap_or(0.0) != 0.0,
        _ => true,
    })
}
