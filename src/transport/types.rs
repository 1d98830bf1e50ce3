// autoshop-realtime/src/transport/types.rs

//! Listener bookkeeping shared by every transport implementation.

use crate::error::TransportError;
use dashmap::DashMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use uuid::Uuid;

/// Identifies one listener registered with [`EventListeners::add_event_listener`].
pub type ListenerId = Uuid;

/// The event type of frames that carry no `event:` field.
pub const DEFAULT_EVENT_TYPE: &str = "message";

/// Handler for message frames, named or default.
pub type MessageHandler = Arc<dyn Fn(&MessageEvent) + Send + Sync>;
/// Handler fired every time the transport (re)connects.
pub type OpenHandler = Arc<dyn Fn() + Send + Sync>;
/// Handler fired on connection failure or server close.
pub type ErrorHandler = Arc<dyn Fn(&TransportError) + Send + Sync>;

/// One frame received from the push stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageEvent {
    /// The `event:` field, or [`DEFAULT_EVENT_TYPE`] when absent.
    pub event_type: String,
    /// The raw, undecoded `data:` payload.
    pub data: String,
    /// The most recent `id:` seen on the stream.
    pub last_event_id: Option<String>,
}

impl MessageEvent {
    pub fn new(event_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            data: data.into(),
            last_event_id: None,
        }
    }

    /// A frame on the default, unnamed channel.
    pub fn message(data: impl Into<String>) -> Self {
        Self::new(DEFAULT_EVENT_TYPE, data)
    }

    pub fn is_default(&self) -> bool {
        self.event_type == DEFAULT_EVENT_TYPE
    }
}

/// Connection state of a transport, mirroring the platform primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    /// Connecting for the first time or waiting to reconnect.
    Connecting,
    Open,
    /// Closed by the owner or failed permanently. Nothing is dispatched any more.
    Closed,
}

/// Named listeners plus the `onmessage` / `onopen` / `onerror` slots of one transport.
///
/// Dispatch always works on a snapshot of the registered handlers, so a
/// handler may add or remove listeners (or close the transport) while it runs.
#[derive(Default)]
pub struct EventListeners {
    named: DashMap<String, Vec<(ListenerId, MessageHandler)>>,
    on_message: Mutex<Option<MessageHandler>>,
    on_open: Mutex<Option<OpenHandler>>,
    on_error: Mutex<Option<ErrorHandler>>,
}

impl EventListeners {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` for frames whose event type is `event_type`.
    ///
    /// Listeners for [`DEFAULT_EVENT_TYPE`] also receive unnamed frames.
    pub fn add_event_listener<F>(&self, event_type: &str, handler: F) -> ListenerId
    where
        F: Fn(&MessageEvent) + Send + Sync + 'static,
    {
        let id = ListenerId::new_v4();
        self.named
            .entry(event_type.to_string())
            .or_default()
            .push((id, Arc::new(handler)));
        id
    }

    /// Removes one listener. Returns `false` if it was not registered.
    pub fn remove_event_listener(&self, event_type: &str, id: ListenerId) -> bool {
        let removed = match self.named.get_mut(event_type) {
            Some(mut listeners) => {
                let before = listeners.len();
                listeners.retain(|(listener_id, _)| *listener_id != id);
                listeners.len() != before
            }
            None => false,
        };
        self.named
            .remove_if(event_type, |_, listeners| listeners.is_empty());
        removed
    }

    pub fn set_onmessage(&self, handler: Option<MessageHandler>) {
        *lock(&self.on_message) = handler;
    }

    pub fn set_onopen(&self, handler: Option<OpenHandler>) {
        *lock(&self.on_open) = handler;
    }

    pub fn set_onerror(&self, handler: Option<ErrorHandler>) {
        *lock(&self.on_error) = handler;
    }

    /// Number of named listeners for `event_type`.
    pub fn listener_count(&self, event_type: &str) -> usize {
        self.named.get(event_type).map_or(0, |l| l.len())
    }

    pub fn has_onmessage(&self) -> bool {
        lock(&self.on_message).is_some()
    }

    /// Drops every listener and handler.
    pub fn clear(&self) {
        self.named.clear();
        self.set_onmessage(None);
        self.set_onopen(None);
        self.set_onerror(None);
    }

    /// Delivers a frame to the named listeners for its type and, for
    /// unnamed frames, to `onmessage`.
    pub fn dispatch_message(&self, event: &MessageEvent) {
        let default_handler = if event.is_default() {
            lock(&self.on_message).clone()
        } else {
            None
        };
        let named: Vec<MessageHandler> = self
            .named
            .get(&event.event_type)
            .map(|listeners| listeners.iter().map(|(_, h)| Arc::clone(h)).collect())
            .unwrap_or_default();

        if let Some(handler) = default_handler {
            handler(event);
        }
        for handler in named {
            handler(event);
        }
    }

    pub fn dispatch_open(&self) {
        let handler = lock(&self.on_open).clone();
        if let Some(handler) = handler {
            handler();
        }
    }

    pub fn dispatch_error(&self, error: &TransportError) {
        let handler = lock(&self.on_error).clone();
        if let Some(handler) = handler {
            handler(error);
        }
    }
}

impl fmt::Debug for EventListeners {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventListeners")
            .field("named_event_types", &self.named.len())
            .field("has_onmessage", &self.has_onmessage())
            .finish()
    }
}

/// Locks a mutex, recovering the data if a handler panicked while holding it.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
