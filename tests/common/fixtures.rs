//! Test data builders

use super::constants::*;
use chrono::{DateTime, TimeZone, Utc};
use planner_notify::config::ConnectionSettings;
use planner_notify::notifications::{
    DeliveryChannel, NotificationRecord, NotificationStatus, NotificationType,
};
use std::time::Duration;

/// Fixed base time so orderings are deterministic.
pub fn minutes(offset: i64) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap() + chrono::Duration::minutes(offset)
}

/// A server-side notification as the REST snapshot returns it.
pub fn notification(
    id: &str,
    notification_type: &str,
    status: NotificationStatus,
    sent_minutes: i64,
) -> NotificationRecord {
    NotificationRecord {
        id: id.to_string(),
        user_id: TEST_USER_ID.to_string(),
        notification_type: NotificationType::from(notification_type.to_string()),
        title: format!("Notification {}", id),
        message: format!("Body of {}", id),
        target_type: None,
        target_id: None,
        channel: DeliveryChannel::Polling,
        status,
        sent_at: minutes(sent_minutes),
        read_at: None,
    }
}

/// JSON body of a pushed notification.
pub fn push_payload(id: &str, notification_type: &str, sent_minutes: i64) -> String {
    serde_json::json!({
        "notificationId": id,
        "type": notification_type,
        "title": format!("Push {}", id),
        "message": "Starts in 10 minutes",
        "targetType": "TASK",
        "targetId": "task-1",
        "timestamp": minutes(sent_minutes).to_rfc3339(),
    })
    .to_string()
}

/// Connection settings scaled down for tests.
pub fn fast_connection_settings() -> ConnectionSettings {
    ConnectionSettings {
        heartbeat_interval: Duration::from_millis(CLIENT_HEARTBEAT_MS),
        heartbeat_timeout_factor: 3,
        connect_timeout: Duration::from_secs(2),
        max_reconnect_attempts: 3,
        initial_backoff: Duration::from_millis(50),
        max_backoff: Duration::from_millis(200),
        backoff_multiplier: 2.0,
        backoff_jitter: Duration::ZERO,
        ..Default::default()
    }
}
