//! The `NotificationStreamManager`: a live notification feed per user.

use crate::auth::{TokenProvider, attach_token};
use crate::config::StreamConfig;
use crate::error::{StreamError, TransportError};
use crate::event::{NotificationEnvelope, StreamPayload};
use crate::subscription::Subscription;
use crate::transport::{Connector, DEFAULT_EVENT_TYPE, EventListeners, MessageEvent};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// Event types listened to when the caller does not pick any.
pub const DEFAULT_NOTIFICATION_EVENTS: [&str; 5] =
    ["message", "notification", "status", "reminder", "system"];

/// Receives every decoded frame of a user's notification stream.
pub type NotificationCallback = Arc<dyn Fn(&NotificationEnvelope) + Send + Sync>;

/// Opens notification streams.
///
/// Unlike the progress manager this keeps no registry: every `subscribe`
/// opens its own transport and its `Subscription` closes it.
pub struct NotificationStreamManager {
    connector: Arc<dyn Connector>,
    tokens: Arc<dyn TokenProvider>,
    config: StreamConfig,
}

impl NotificationStreamManager {
    pub fn new(
        connector: Arc<dyn Connector>,
        tokens: Arc<dyn TokenProvider>,
        config: StreamConfig,
    ) -> Self {
        Self {
            connector,
            tokens,
            config,
        }
    }

    /// Opens `user_id`'s notification stream and delivers its frames to
    /// `on_message`.
    ///
    /// `event_types` selects the named events to listen to, defaulting to
    /// [`DEFAULT_NOTIFICATION_EVENTS`]. Unnamed frames are always delivered,
    /// whether or not `message` is in the list. Frames whose data is not JSON
    /// are delivered as [`StreamPayload::Text`].
    ///
    /// Transport errors are logged and otherwise not reported; the transport
    /// itself decides whether to reconnect.
    #[instrument(skip(self, on_message))]
    pub fn subscribe<F>(
        &self,
        user_id: &str,
        on_message: F,
        event_types: Option<&[&str]>,
    ) -> Result<Subscription, StreamError>
    where
        F: Fn(&NotificationEnvelope) + Send + Sync + 'static,
    {
        if user_id.trim().is_empty() {
            return Err(StreamError::EmptyStreamKey { kind: "user id" });
        }
        let event_types = unique_event_types(event_types.unwrap_or(&DEFAULT_NOTIFICATION_EVENTS));
        let on_message: NotificationCallback = Arc::new(on_message);
        let listeners = Arc::new(EventListeners::new());

        let registered: Vec<_> = event_types
            .iter()
            .map(|event_type| {
                let callback = Arc::clone(&on_message);
                let id = listeners
                    .add_event_listener(event_type, move |event| deliver(&callback, event));
                (event_type.clone(), id)
            })
            .collect();

        // A `message` listener already receives unnamed frames.
        if !event_types.iter().any(|t| t == DEFAULT_EVENT_TYPE) {
            let callback = Arc::clone(&on_message);
            listeners.set_onmessage(Some(Arc::new(move |event: &MessageEvent| {
                deliver(&callback, event)
            })));
        }

        let error_user = user_id.to_string();
        listeners.set_onerror(Some(Arc::new(move |error: &TransportError| {
            warn!(user_id = %error_user, %error, "Notification stream error.");
        })));
        let open_user = user_id.to_string();
        listeners.set_onopen(Some(Arc::new(move || {
            debug!(user_id = %open_user, "Notification stream connected.");
        })));

        let mut url = self.config.notification_stream_url(user_id);
        attach_token(
            &mut url,
            self.config.token_param(),
            self.tokens.access_token().as_deref(),
        );
        let source = self.connector.connect(url, listeners);
        info!(event_types = ?event_types, "Opened notification stream.");

        let user_id = user_id.to_string();
        Ok(Subscription::new(move || {
            for (event_type, id) in &registered {
                source.listeners().remove_event_listener(event_type, *id);
            }
            source.listeners().set_onmessage(None);
            source.close();
            info!(%user_id, "Closed notification stream.");
        }))
    }
}

impl fmt::Debug for NotificationStreamManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotificationStreamManager")
            .field("config", &self.config)
            .finish()
    }
}

fn deliver(callback: &NotificationCallback, event: &MessageEvent) {
    let payload = StreamPayload::decode(&event.data);
    if let StreamPayload::Text(_) = payload {
        debug!(event_type = %event.event_type, "Notification frame is not JSON; delivering raw text.");
    }
    callback(&NotificationEnvelope {
        channel: event.event_type.clone(),
        payload,
    });
}

fn unique_event_types(event_types: &[&str]) -> Vec<String> {
    let mut unique: Vec<String> = Vec::with_capacity(event_types.len());
    for event_type in event_types {
        if !event_type.is_empty() && !unique.iter().any(|t| t == event_type) {
            unique.push(event_type.to_string());
        }
    }
    unique
}
