//! Client-side list of a user's notifications, reconciled with the live stream.

use crate::event::{NotificationEnvelope, NotificationEvent, NotificationRecord};
use tracing::debug;

/// A user's notifications, newest first.
///
/// Live events are prepended, never replacing the list: heartbeats are
/// ignored, and a record whose `id` or `messageId` matches an existing one is
/// dropped as a duplicate.
#[derive(Debug, Clone, Default)]
pub struct NotificationCache {
    records: Vec<NotificationRecord>,
}

impl NotificationCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a cache from a REST snapshot, newest first.
    pub fn from_records(records: impl IntoIterator<Item = NotificationRecord>) -> Self {
        let mut cache = Self::new();
        cache.replace_all(records);
        cache
    }

    /// Applies a normalized stream event. Returns whether the list changed.
    pub fn merge(&mut self, event: NotificationEvent) -> bool {
        match event {
            NotificationEvent::Record(record) => self.insert(record),
            NotificationEvent::Heartbeat => false,
            NotificationEvent::Unrecognized(payload) => {
                debug!(?payload, "Ignoring unrecognized notification payload.");
                false
            }
        }
    }

    /// Normalizes and applies a frame from the notification stream.
    pub fn merge_envelope(&mut self, envelope: &NotificationEnvelope) -> bool {
        self.merge(NotificationEvent::from_envelope(envelope))
    }

    /// Prepends `record` unless it is already present.
    pub fn insert(&mut self, record: NotificationRecord) -> bool {
        if self.contains(&record) {
            debug!(id = %record.id, "Skipping duplicate notification.");
            return false;
        }
        self.records.insert(0, record);
        true
    }

    /// Replaces the list with a fresh snapshot, dropping duplicates within it.
    pub fn replace_all(&mut self, records: impl IntoIterator<Item = NotificationRecord>) {
        self.records.clear();
        for record in records {
            if !self.contains(&record) {
                self.records.push(record);
            }
        }
    }

    /// Whether a record with the same `id` or `messageId` is present.
    pub fn contains(&self, record: &NotificationRecord) -> bool {
        self.records.iter().any(|existing| existing.same_as(record))
    }

    /// Marks the notification with this `id` (or `messageId`) read.
    /// Returns `false` if it is unknown or already read.
    pub fn mark_read(&mut self, id: &str) -> bool {
        let found = self
            .records
            .iter_mut()
            .find(|r| r.id == id || r.message_id.as_deref() == Some(id));
        match found {
            Some(record) if !record.read => {
                record.read = true;
                true
            }
            _ => false,
        }
    }

    /// Marks everything read. Returns how many records changed.
    pub fn mark_all_read(&mut self) -> usize {
        let mut changed = 0;
        for record in self.records.iter_mut().filter(|r| !r.read) {
            record.read = true;
            changed += 1;
        }
        changed
    }

    pub fn unread_count(&self) -> usize {
        self.records.iter().filter(|r| !r.read).count()
    }

    pub fn records(&self) -> &[NotificationRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::StreamPayload;

    fn record(id: &str, message_id: Option<&str>) -> NotificationRecord {
        NotificationRecord {
            id: id.to_string(),
            message_id: message_id.map(str::to_string),
            kind: "APPOINTMENT".to_string(),
            message: format!("notification {id}"),
            read: false,
            created_at: None,
        }
    }

    fn envelope(data: &str) -> NotificationEnvelope {
        NotificationEnvelope {
            channel: "notification".to_string(),
            payload: StreamPayload::decode(data),
        }
    }

    #[test]
    fn duplicates_by_either_id_are_skipped() {
        let mut cache = NotificationCache::from_records([record("a", Some("m1"))]);

        assert!(!cache.insert(record("b", Some("m1"))));
        assert!(!cache.insert(record("a", Some("m2"))));
        assert!(cache.insert(record("c", Some("m3"))));

        let ids: Vec<_> = cache.records().iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["c", "a"]);
    }

    #[test]
    fn heartbeats_never_reach_the_list() {
        let mut cache = NotificationCache::new();

        assert!(!cache.merge_envelope(&envelope(r#"{"eventType": "heartbeat"}"#)));
        assert!(cache.merge_envelope(&envelope(
            r#"{"id": "n1", "type": "INVOICE", "message": "Invoice ready", "createdAt": "2024-03-02T10:00:00Z"}"#
        )));
        assert!(!cache.merge_envelope(&envelope(r#"{"message": "KeepAlive"}"#)));

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.records()[0].message, "Invoice ready");
    }

    #[test]
    fn snapshot_replaces_and_dedups() {
        let mut cache = NotificationCache::from_records([record("old", None)]);
        cache.replace_all([record("a", Some("m")), record("b", Some("m")), record("c", None)]);

        let ids: Vec<_> = cache.records().iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
    }

    #[test]
    fn read_tracking() {
        let mut cache = NotificationCache::from_records([
            record("a", Some("m1")),
            record("b", None),
            record("c", None),
        ]);
        assert_eq!(cache.unread_count(), 3);

        assert!(cache.mark_read("m1"));
        assert!(!cache.mark_read("a"));
        assert!(!cache.mark_read("missing"));
        assert_eq!(cache.unread_count(), 2);

        assert_eq!(cache.mark_all_read(), 2);
        assert_eq!(cache.unread_count(), 0);
        assert!(!cache.is_empty());
    }
}
