//! Notification data models

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Notification kind emitted by the planner backend.
///
/// Kinds this client does not know about are kept verbatim in `Other`
/// so that newer servers keep working against older clients.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum NotificationType {
    TaskReminder,
    ActivityReminder,
    OverdueAlert,
    MorningDigest,
    Other(String),
}

impl NotificationType {
    pub fn as_str(&self) -> &str {
        match self {
            Self::TaskReminder => "TASK_REMINDER",
            Self::ActivityReminder => "ACTIVITY_REMINDER",
            Self::OverdueAlert => "OVERDUE_ALERT",
            Self::MorningDigest => "MORNING_DIGEST",
            Self::Other(raw) => raw,
        }
    }
}

impl From<String> for NotificationType {
    fn from(value: String) -> Self {
        match value.as_str() {
            "TASK_REMINDER" => Self::TaskReminder,
            "ACTIVITY_REMINDER" => Self::ActivityReminder,
            "OVERDUE_ALERT" => Self::OverdueAlert,
            "MORNING_DIGEST" => Self::MorningDigest,
            _ => Self::Other(value),
        }
    }
}

impl From<NotificationType> for String {
    fn from(value: NotificationType) -> Self {
        match value {
            NotificationType::Other(raw) => raw,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for NotificationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read state of a notification. There is no deleted state: deletion
/// removes the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationStatus {
    /// Delivered but not yet acknowledged by the user.
    Sent,
    Read,
}

/// How a notification reached this client.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryChannel {
    Websocket,
    #[default]
    Polling,
    #[serde(other)]
    Other,
}

/// Domain object a notification points at, used for deep links.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TargetType {
    Task,
    Activity,
    #[serde(other)]
    Other,
}

/// A notification as held by the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRecord {
    #[serde(deserialize_with = "opaque_id")]
    pub id: String,
    #[serde(default, deserialize_with = "opaque_id_or_empty")]
    pub user_id: String,
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    pub title: String,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_type: Option<TargetType>,
    #[serde(
        default,
        deserialize_with = "optional_opaque_id",
        skip_serializing_if = "Option::is_none"
    )]
    pub target_id: Option<String>,
    #[serde(default)]
    pub channel: DeliveryChannel,
    pub status: NotificationStatus,
    #[serde(with = "timestamp")]
    pub sent_at: DateTime<Utc>,
    #[serde(
        default,
        with = "timestamp::option",
        skip_serializing_if = "Option::is_none"
    )]
    pub read_at: Option<DateTime<Utc>>,
}

impl NotificationRecord {
    pub fn is_unread(&self) -> bool {
        self.status == NotificationStatus::Sent
    }

    /// Flip SENT to READ. Returns false if the record was already read;
    /// a read record is never moved back to SENT.
    pub fn mark_read(&mut self, now: DateTime<Utc>) -> bool {
        if self.status == NotificationStatus::Read {
            return false;
        }
        self.status = NotificationStatus::Read;
        if self.read_at.is_none() {
            self.read_at = Some(now);
        }
        true
    }
}

/// Payload of a pushed notification as it arrives on the user's private
/// destination.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PushPayload {
    #[serde(deserialize_with = "opaque_id")]
    pub notification_id: String,
    #[serde(rename = "type")]
    pub notification_type: NotificationType,
    pub title: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub target_type: Option<TargetType>,
    #[serde(default, deserialize_with = "optional_opaque_id")]
    pub target_id: Option<String>,
    /// Missing timestamps fall back to the local receive time.
    #[serde(default = "Utc::now", with = "timestamp")]
    pub timestamp: DateTime<Utc>,
}

impl PushPayload {
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    /// Build the store record for this push. Pushed records are always
    /// unread and always arrive over the websocket channel.
    pub fn into_record(self, user_id: &str) -> NotificationRecord {
        NotificationRecord {
            id: self.notification_id,
            user_id: user_id.to_string(),
            notification_type: self.notification_type,
            title: self.title,
            message: self.message,
            target_type: self.target_type,
            target_id: self.target_id,
            channel: DeliveryChannel::Websocket,
            status: NotificationStatus::Sent,
            sent_at: self.timestamp,
            read_at: None,
        }
    }
}

/// Server ids may be JSON strings or numbers; both are held as strings.
#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Text(String),
    Number(serde_json::Number),
}

impl From<RawId> for String {
    fn from(raw: RawId) -> Self {
        match raw {
            RawId::Text(text) => text,
            RawId::Number(number) => number.to_string(),
        }
    }
}

fn opaque_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    RawId::deserialize(deserializer).map(String::from)
}

fn optional_opaque_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<RawId>::deserialize(deserializer)?.map(String::from))
}

fn opaque_id_or_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(optional_opaque_id(deserializer)?.unwrap_or_default())
}

/// Lenient timestamp handling: RFC 3339, naive ISO-8601 (taken as UTC) or
/// integer epoch milliseconds. Always written back as RFC 3339.
pub(crate) mod timestamp {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawTimestamp {
        Millis(i64),
        Text(String),
    }

    fn resolve(raw: RawTimestamp) -> Result<DateTime<Utc>, String> {
        match raw {
            RawTimestamp::Millis(millis) => DateTime::from_timestamp_millis(millis)
                .ok_or_else(|| format!("timestamp out of range: {}", millis)),
            RawTimestamp::Text(text) => parse(&text),
        }
    }

    pub fn parse(text: &str) -> Result<DateTime<Utc>, String> {
        if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
            return Ok(parsed.with_timezone(&Utc));
        }
        NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
            .map(|naive| naive.and_utc())
            .map_err(|e| format!("invalid timestamp '{}': {}", text, e))
    }

    pub fn serialize<S>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&value.to_rfc3339())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        resolve(RawTimestamp::deserialize(deserializer)?).map_err(D::Error::custom)
    }

    pub mod option {
        use super::*;

        pub fn serialize<S>(value: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            match value {
                Some(value) => super::serialize(value, serializer),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
        where
            D: Deserializer<'de>,
        {
            Option::<RawTimestamp>::deserialize(deserializer)?
                .map(resolve)
                .transpose()
                .map_err(D::Error::custom)
        }
    }
}
