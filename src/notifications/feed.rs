use crate::error::StreamError;
use crate::event::NotificationRecord;
use crate::notifications::cache::NotificationCache;
use crate::notifications::manager::NotificationStreamManager;
use crate::subscription::Subscription;
use crate::transport::types::lock;
use std::sync::{Arc, Mutex};

/// A user's live notification list: a [`NotificationCache`] fed by a
/// notification stream subscription.
#[derive(Debug)]
pub struct NotificationFeed {
    user_id: String,
    cache: Arc<Mutex<NotificationCache>>,
    subscription: Subscription,
}

impl NotificationFeed {
    /// Starts an empty feed for `user_id`.
    pub fn start(manager: &NotificationStreamManager, user_id: &str) -> Result<Self, StreamError> {
        Self::start_with(manager, user_id, Vec::new())
    }

    /// Starts a feed seeded with a snapshot fetched over REST.
    pub fn start_with(
        manager: &NotificationStreamManager,
        user_id: &str,
        snapshot: Vec<NotificationRecord>,
    ) -> Result<Self, StreamError> {
        let cache = Arc::new(Mutex::new(NotificationCache::from_records(snapshot)));
        let sink = Arc::clone(&cache);
        let subscription = manager.subscribe(
            user_id,
            move |envelope| {
                lock(&sink).merge_envelope(envelope);
            },
            None,
        )?;

        Ok(Self {
            user_id: user_id.to_string(),
            cache,
            subscription,
        })
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// The current list, newest first.
    pub fn snapshot(&self) -> Vec<NotificationRecord> {
        lock(&self.cache).records().to_vec()
    }

    pub fn unread_count(&self) -> usize {
        lock(&self.cache).unread_count()
    }

    /// Marks a notification read locally, e.g. after the REST call succeeded.
    pub fn mark_read(&self, id: &str) -> bool {
        lock(&self.cache).mark_read(id)
    }

    pub fn mark_all_read(&self) -> usize {
        lock(&self.cache).mark_all_read()
    }

    /// Closes the stream. The list stays readable.
    pub fn stop(&self) {
        self.subscription.unsubscribe();
    }

    pub fn is_live(&self) -> bool {
        self.subscription.is_active()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::NoToken;
    use crate::config::StreamConfig;
    use crate::transport::memory::MemoryConnector;

    #[test]
    fn merges_live_events_into_the_seeded_list() {
        let connector = Arc::new(MemoryConnector::new());
        let manager = NotificationStreamManager::new(
            connector.clone(),
            Arc::new(NoToken),
            StreamConfig::default(),
        );
        let seed = NotificationRecord {
            id: "1".to_string(),
            message_id: Some("m1".to_string()),
            kind: "APPOINTMENT".to_string(),
            message: "Booked".to_string(),
            read: true,
            created_at: None,
        };
        let feed = NotificationFeed::start_with(&manager, "u1", vec![seed]).unwrap();
        let source = connector.latest().unwrap();

        source.emit("notification", r#"{"id": 2, "type": "TASK", "message": "Task assigned"}"#);
        source.emit("notification", r#"{"id": 3, "messageId": "m1", "message": "Booked again"}"#);
        source.emit("status", r#"{"eventType": "heartbeat"}"#);
        source.emit("system", "keepalive");

        let ids: Vec<_> = feed.snapshot().into_iter().map(|r| r.id).collect();
        assert_eq!(ids, vec!["2", "1"]);
        assert_eq!(feed.unread_count(), 1);

        feed.stop();
        assert!(!feed.is_live());
        assert!(source.is_closed());
        assert_eq!(feed.snapshot().len(), 2);
    }
}
