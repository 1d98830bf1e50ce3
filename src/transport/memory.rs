//! An in-process transport whose traffic is driven by the caller.
//!
//! Every `connect` is recorded, so tests can count connections, find the
//! source for a stream and push frames, opens and errors into it.

use crate::error::TransportError;
use crate::transport::types::lock;
use crate::transport::{Connector, EventListeners, EventSource, MessageEvent, ReadyState};
use reqwest::Url;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Records every source it opens.
#[derive(Debug, Default)]
pub struct MemoryConnector {
    sources: Mutex<Vec<Arc<MemoryEventSource>>>,
}

impl MemoryConnector {
    pub fn new() -> Self {
        Self::default()
    }

    /// How many times `connect` was called.
    pub fn connect_count(&self) -> usize {
        lock(&self.sources).len()
    }

    /// Every source opened so far, oldest first.
    pub fn sources(&self) -> Vec<Arc<MemoryEventSource>> {
        lock(&self.sources).clone()
    }

    /// Sources that have not been closed.
    pub fn open_sources(&self) -> Vec<Arc<MemoryEventSource>> {
        lock(&self.sources)
            .iter()
            .filter(|s| !s.is_closed())
            .cloned()
            .collect()
    }

    /// The most recently opened source whose URL path equals `path`.
    pub fn latest_for_path(&self, path: &str) -> Option<Arc<MemoryEventSource>> {
        lock(&self.sources)
            .iter()
            .rev()
            .find(|s| s.url.path() == path)
            .cloned()
    }

    /// The most recently opened source.
    pub fn latest(&self) -> Option<Arc<MemoryEventSource>> {
        lock(&self.sources).last().cloned()
    }
}

impl Connector for MemoryConnector {
    fn connect(&self, url: Url, listeners: Arc<EventListeners>) -> Arc<dyn EventSource> {
        debug!(path = %url.path(), "Opening in-memory event source");
        let source = Arc::new(MemoryEventSource {
            url,
            listeners,
            state: Mutex::new(ReadyState::Connecting),
            close_calls: AtomicUsize::new(0),
        });
        lock(&self.sources).push(Arc::clone(&source));
        source
    }
}

/// A source that dispatches whatever the caller emits, until closed.
#[derive(Debug)]
pub struct MemoryEventSource {
    url: Url,
    listeners: Arc<EventListeners>,
    state: Mutex<ReadyState>,
    close_calls: AtomicUsize,
}

impl MemoryEventSource {
    /// Marks the source open and fires `onopen`.
    pub fn emit_open(&self) {
        if self.set_state(ReadyState::Open) {
            self.listeners.dispatch_open();
        }
    }

    /// Delivers a frame on the default channel.
    pub fn emit_message(&self, data: &str) {
        self.emit_event(MessageEvent::message(data));
    }

    /// Delivers a frame with an explicit event type.
    pub fn emit(&self, event_type: &str, data: &str) {
        self.emit_event(MessageEvent::new(event_type, data));
    }

    pub fn emit_event(&self, event: MessageEvent) {
        if !self.is_closed() {
            self.listeners.dispatch_message(&event);
        }
    }

    /// Fires `onerror`. Retryable errors leave the source reconnecting,
    /// others close it like the platform primitive does.
    pub fn emit_error(&self, error: TransportError) {
        let next = if error.is_retryable() {
            ReadyState::Connecting
        } else {
            ReadyState::Closed
        };
        if self.set_state(next) {
            self.listeners.dispatch_error(&error);
        }
    }

    pub fn is_closed(&self) -> bool {
        *lock(&self.state) == ReadyState::Closed
    }

    /// How many times `close` was called.
    pub fn close_count(&self) -> usize {
        self.close_calls.load(Ordering::SeqCst)
    }

    /// Moves to `next` unless already closed. Returns whether it moved.
    fn set_state(&self, next: ReadyState) -> bool {
        let mut state = lock(&self.state);
        if *state == ReadyState::Closed {
            return false;
        }
        *state = next;
        true
    }
}

impl EventSource for MemoryEventSource {
    fn url(&self) -> &Url {
        &self.url
    }

    fn listeners(&self) -> &EventListeners {
        &self.listeners
    }

    fn ready_state(&self) -> ReadyState {
        *lock(&self.state)
    }

    fn close(&self) {
        self.close_calls.fetch_add(1, Ordering::SeqCst);
        *lock(&self.state) = ReadyState::Closed;
    }
}
