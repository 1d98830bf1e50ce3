//! Wire payloads of the notification and project-progress streams.
//!
//! Frames are decoded once, at the boundary, into the types below. Consumers
//! never branch on the raw JSON shape.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use tracing::warn;
use uuid::Uuid;

/// A frame's data after decoding: JSON when it parses, the raw text otherwise.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamPayload {
    Json(Value),
    Text(String),
}

impl StreamPayload {
    /// Decodes `data` as JSON, falling back to the raw string.
    pub fn decode(data: &str) -> Self {
        match serde_json::from_str(data) {
            Ok(value) => StreamPayload::Json(value),
            Err(_) => StreamPayload::Text(data.to_string()),
        }
    }

    pub fn as_json(&self) -> Option<&Value> {
        match self {
            StreamPayload::Json(value) => Some(value),
            StreamPayload::Text(_) => None,
        }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            StreamPayload::Text(text) => Some(text),
            StreamPayload::Json(_) => None,
        }
    }
}

/// A decoded frame from a user's notification stream.
#[derive(Debug, Clone, PartialEq)]
pub struct NotificationEnvelope {
    /// The SSE event type the frame arrived on, e.g. `notification` or `reminder`.
    pub channel: String,
    pub payload: StreamPayload,
}

/// One notification as the dashboards list it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationRecord {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(rename = "type")]
    pub kind: String,
    pub message: String,
    #[serde(default)]
    pub read: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl NotificationRecord {
    /// Whether `other` is the same notification: either id field matches.
    pub fn same_as(&self, other: &NotificationRecord) -> bool {
        self.id == other.id
            || matches!(
                (&self.message_id, &other.message_id),
                (Some(a), Some(b)) if a == b
            )
    }
}

/// What a notification frame turned out to be.
#[derive(Debug, Clone, PartialEq)]
pub enum NotificationEvent {
    /// Heartbeat or keep-alive signal. Carries no content.
    Heartbeat,
    Record(NotificationRecord),
    /// Neither a heartbeat nor a usable notification.
    Unrecognized(StreamPayload),
}

impl NotificationEvent {
    /// Normalizes a decoded frame.
    ///
    /// JSON objects are accepted with `type` or `eventType` for the category
    /// and `message` or `title` for the text. Plain-text frames become a
    /// record of the channel's category with a generated id.
    pub fn from_envelope(envelope: &NotificationEnvelope) -> Self {
        match &envelope.payload {
            StreamPayload::Json(Value::Object(fields)) => {
                Self::from_object(&envelope.channel, fields, &envelope.payload)
            }
            StreamPayload::Json(_) => NotificationEvent::Unrecognized(envelope.payload.clone()),
            StreamPayload::Text(text) => {
                if is_keepalive(text) {
                    return NotificationEvent::Heartbeat;
                }
                if text.trim().is_empty() {
                    return NotificationEvent::Unrecognized(envelope.payload.clone());
                }
                NotificationEvent::Record(NotificationRecord {
                    id: Uuid::new_v4().to_string(),
                    message_id: None,
                    kind: envelope.channel.clone(),
                    message: text.clone(),
                    read: false,
                    created_at: Some(Utc::now()),
                })
            }
        }
    }

    fn from_object(channel: &str, fields: &Map<String, Value>, payload: &StreamPayload) -> Self {
        let raw: RawNotification = match serde_json::from_value(Value::Object(fields.clone())) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(%channel, "Notification payload has an unexpected shape: {}", e);
                return NotificationEvent::Unrecognized(payload.clone());
            }
        };

        let heartbeat = [raw.event_type.as_deref(), raw.kind.as_deref()]
            .into_iter()
            .flatten()
            .any(|k| k.eq_ignore_ascii_case("heartbeat"));
        if heartbeat {
            return NotificationEvent::Heartbeat;
        }
        let kind = raw.event_type.or(raw.kind);
        let message = raw.message.or(raw.title);
        if message.as_deref().is_some_and(is_keepalive) {
            return NotificationEvent::Heartbeat;
        }

        let Some(id) = raw.id.or_else(|| raw.message_id.clone()) else {
            return NotificationEvent::Unrecognized(payload.clone());
        };

        NotificationEvent::Record(NotificationRecord {
            id,
            message_id: raw.message_id,
            kind: kind.unwrap_or_else(|| channel.to_string()),
            message: message.unwrap_or_default(),
            read: raw.read.unwrap_or(false),
            created_at: raw.created_at,
        })
    }

    pub fn is_heartbeat(&self) -> bool {
        matches!(self, NotificationEvent::Heartbeat)
    }
}

fn is_keepalive(text: &str) -> bool {
    text.trim().eq_ignore_ascii_case("keepalive")
}

/// Every field the backend has been seen to send, all optional.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawNotification {
    #[serde(default, deserialize_with = "string_or_number")]
    id: Option<String>,
    #[serde(default, deserialize_with = "string_or_number")]
    message_id: Option<String>,
    #[serde(default, rename = "type")]
    kind: Option<String>,
    #[serde(default)]
    event_type: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    read: Option<bool>,
    #[serde(default, deserialize_with = "lenient_timestamp")]
    created_at: Option<DateTime<Utc>>,
}

/// Accepts ids sent as strings or as numbers.
fn string_or_number<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(s)) if !s.is_empty() => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

/// Accepts RFC 3339 strings, zone-less local timestamps (read as UTC) and
/// epoch milliseconds. Anything else is treated as missing.
fn lenient_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        Some(Value::String(raw)) => parse_timestamp(&raw),
        Some(Value::Number(n)) => n.as_i64().and_then(DateTime::<Utc>::from_timestamp_millis),
        _ => None,
    })
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

/// A progress snapshot for one project, as pushed on the progress stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressUpdate {
    #[serde(default, deserialize_with = "string_or_number_required")]
    pub project_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress_percentage: Option<f64>,
    #[serde(default, deserialize_with = "null_as_default")]
    pub messages: Vec<ProgressMessage>,
    /// Fields this crate does not model, passed through untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ProgressUpdate {
    /// Wraps a plain-text status line into an update with one message.
    pub fn from_text(project_id: &str, content: &str) -> Self {
        Self {
            project_id: project_id.to_string(),
            status: None,
            progress_percentage: None,
            messages: vec![ProgressMessage {
                id: Uuid::new_v4().to_string(),
                content: content.to_string(),
                timestamp: Some(Utc::now()),
                extra: Map::new(),
            }],
            extra: Map::new(),
        }
    }
}

/// One line of a project's progress log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressMessage {
    #[serde(default, deserialize_with = "string_or_number_required")]
    pub id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub content: String,
    #[serde(default, deserialize_with = "lenient_timestamp", skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn string_or_number_required<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(string_or_number(deserializer)?.unwrap_or_default())
}

/// Reads an explicit `null` like a missing field.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn envelope(channel: &str, data: &str) -> NotificationEnvelope {
        NotificationEnvelope {
            channel: channel.to_string(),
            payload: StreamPayload::decode(data),
        }
    }

    #[test]
    fn decode_falls_back_to_text() {
        assert_eq!(StreamPayload::decode(r#"{"a":1}"#).as_json(), Some(&json!({"a": 1})));
        assert_eq!(StreamPayload::decode("not json").as_text(), Some("not json"));
    }

    #[test]
    fn normalizes_either_field_spelling() {
        let event = NotificationEvent::from_envelope(&envelope(
            "notification",
            r#"{"id": 7, "eventType": "APPOINTMENT", "title": "Car ready", "createdAt": "2024-05-01T09:30:00"}"#,
        ));
        let NotificationEvent::Record(record) = event else {
            panic!("expected a record, got {event:?}");
        };
        assert_eq!(record.id, "7");
        assert_eq!(record.kind, "APPOINTMENT");
        assert_eq!(record.message, "Car ready");
        assert!(!record.read);
        assert_eq!(
            record.created_at.unwrap().to_rfc3339(),
            "2024-05-01T09:30:00+00:00"
        );
    }

    #[test]
    fn recognizes_heartbeats_and_keepalives() {
        for data in [
            r#"{"eventType": "heartbeat"}"#,
            r#"{"type": "HEARTBEAT", "id": "1"}"#,
            r#"{"eventType": "NOTIFICATION", "type": "heartbeat", "id": "2"}"#,
            r#"{"message": "KeepAlive"}"#,
            "keepalive",
        ] {
            let event = NotificationEvent::from_envelope(&envelope("message", data));
            assert!(event.is_heartbeat(), "{data} should be a heartbeat");
        }
    }

    #[test]
    fn plain_text_becomes_a_record_of_the_channel() {
        let event = NotificationEvent::from_envelope(&envelope("system", "Maintenance at 6pm"));
        let NotificationEvent::Record(record) = event else {
            panic!("expected a record");
        };
        assert_eq!(record.kind, "system");
        assert_eq!(record.message, "Maintenance at 6pm");
        assert!(!record.id.is_empty());
    }

    #[test]
    fn records_without_any_id_are_unrecognized() {
        let event =
            NotificationEvent::from_envelope(&envelope("notification", r#"{"message": "hi"}"#));
        assert!(matches!(event, NotificationEvent::Unrecognized(_)));
        let event = NotificationEvent::from_envelope(&envelope("notification", "[1,2]"));
        assert!(matches!(event, NotificationEvent::Unrecognized(_)));
    }

    #[test]
    fn same_as_matches_on_either_id() {
        let record = |id: &str, message_id: Option<&str>| NotificationRecord {
            id: id.to_string(),
            message_id: message_id.map(str::to_string),
            kind: "INFO".to_string(),
            message: String::new(),
            read: false,
            created_at: None,
        };
        let existing = record("a", Some("m1"));
        assert!(existing.same_as(&record("b", Some("m1"))));
        assert!(existing.same_as(&record("a", Some("m2"))));
        assert!(!existing.same_as(&record("b", Some("m2"))));
        assert!(!record("a", None).same_as(&record("b", None)));
    }

    #[test]
    fn progress_update_keeps_unknown_fields() {
        let update: ProgressUpdate = serde_json::from_value(json!({
            "projectId": 12,
            "status": "IN_PROGRESS",
            "progressPercentage": 40.0,
            "messages": [{"id": "m", "content": "Brakes done", "author": "sam"}],
            "estimatedCompletion": "tomorrow"
        }))
        .unwrap();
        assert_eq!(update.project_id, "12");
        assert_eq!(update.progress_percentage, Some(40.0));
        assert_eq!(update.messages[0].extra["author"], "sam");
        assert_eq!(update.extra["estimatedCompletion"], "tomorrow");
    }

    #[test]
    fn progress_update_reads_nulls_as_empty() {
        let update: ProgressUpdate = serde_json::from_value(json!({
            "projectId": 12,
            "status": null,
            "progressPercentage": null,
            "messages": null
        }))
        .unwrap();
        assert!(update.messages.is_empty());
        assert_eq!(update.status, None);

        let update: ProgressUpdate = serde_json::from_value(json!({
            "projectId": 12,
            "messages": [{"id": 1, "content": null}]
        }))
        .unwrap();
        assert_eq!(update.messages[0].id, "1");
        assert_eq!(update.messages[0].content, "");
    }

    #[test]
    fn from_text_synthesizes_a_single_message() {
        let update = ProgressUpdate::from_text("p1", "hello");
        assert_eq!(update.project_id, "p1");
        assert_eq!(update.messages.len(), 1);
        assert_eq!(update.messages[0].content, "hello");
        assert!(update.messages[0].timestamp.is_some());
    }
}
