//! Server-Sent Events over HTTP, with the platform's reconnect behaviour.
//!
//! Each source runs one background task that
//!
//! 1. issues `GET url` with `Accept: text/event-stream` (plus `Last-Event-ID`
//!    after the first frame id was seen),
//! 2. fires `onopen` once a `200 text/event-stream` response arrives,
//! 3. parses frames and dispatches them to the listeners,
//! 4. on a broken or finished stream fires `onerror`, waits for the retry
//!    delay (server `retry:` field, else the configured default) and goes
//!    back to 1.
//!
//! A non-200 status or a wrong content type fires `onerror` and closes the
//! source for good. Nothing is dispatched after [`EventSource::close`].

use crate::config::StreamConfig;
use crate::error::{StreamError, TransportError};
use crate::transport::types::lock;
use crate::transport::{
    Connector, DEFAULT_EVENT_TYPE, EventListeners, EventSource, MessageEvent, ReadyState,
};
use eventsource_stream::Eventsource;
use futures_util::StreamExt;
use reqwest::header::{ACCEPT, CACHE_CONTROL, CONTENT_TYPE};
use reqwest::{Client, StatusCode, Url};
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

const EVENT_STREAM_MIME: &str = "text/event-stream";

/// Opens [`SseEventSource`]s on a tokio runtime.
#[derive(Clone)]
pub struct SseConnector {
    client: Client,
    runtime: Handle,
    retry_delay: Duration,
}

impl SseConnector {
    /// Creates a connector on the current tokio runtime.
    ///
    /// Fails with [`StreamError::NoRuntime`] outside of a runtime.
    pub fn new(config: &StreamConfig) -> Result<Self, StreamError> {
        let runtime = Handle::try_current().map_err(|_| StreamError::NoRuntime)?;
        // No request timeout: the response body is the long-lived stream.
        let client = Client::builder().build()?;
        Ok(Self::with_client(client, runtime, config.retry_delay()))
    }

    /// Creates a connector from an existing client and runtime handle.
    pub fn with_client(client: Client, runtime: Handle, retry_delay: Duration) -> Self {
        Self {
            client,
            runtime,
            retry_delay,
        }
    }
}

impl fmt::Debug for SseConnector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SseConnector")
            .field("retry_delay", &self.retry_delay)
            .finish()
    }
}

impl Connector for SseConnector {
    fn connect(&self, url: Url, listeners: Arc<EventListeners>) -> Arc<dyn EventSource> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let shared = Arc::new(SourceState {
            url,
            listeners,
            state: Mutex::new(ReadyState::Connecting),
            shutdown: shutdown_tx,
        });

        let task_state = Arc::clone(&shared);
        let client = self.client.clone();
        let retry_delay = self.retry_delay;
        self.runtime.spawn(async move {
            run_event_stream(task_state, client, retry_delay, shutdown_rx).await;
        });

        Arc::new(SseEventSource { shared })
    }
}

/// A live SSE connection. Closing it stops the background task.
pub struct SseEventSource {
    shared: Arc<SourceState>,
}

struct SourceState {
    url: Url,
    listeners: Arc<EventListeners>,
    state: Mutex<ReadyState>,
    shutdown: watch::Sender<bool>,
}

impl SourceState {
    fn is_closed(&self) -> bool {
        *lock(&self.state) == ReadyState::Closed
    }

    /// Moves to `next` unless closed. Returns whether it moved.
    fn transition(&self, next: ReadyState) -> bool {
        let mut state = lock(&self.state);
        if *state == ReadyState::Closed {
            return false;
        }
        *state = next;
        true
    }
}

impl fmt::Debug for SseEventSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // The query string carries the access token.
        f.debug_struct("SseEventSource")
            .field("path", &self.shared.url.path())
            .field("ready_state", &self.ready_state())
            .finish()
    }
}

impl EventSource for SseEventSource {
    fn url(&self) -> &Url {
        &self.shared.url
    }

    fn listeners(&self) -> &EventListeners {
        &self.shared.listeners
    }

    fn ready_state(&self) -> ReadyState {
        *lock(&self.shared.state)
    }

    fn close(&self) {
        *lock(&self.shared.state) = ReadyState::Closed;
        self.shared.shutdown.send_replace(true);
    }
}

/// The reconnect loop behind one [`SseEventSource`].
#[instrument(skip_all, fields(path = %source.url.path()))]
async fn run_event_stream(
    source: Arc<SourceState>,
    client: Client,
    default_retry: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut session = StreamSession {
        retry_delay: default_retry,
        last_event_id: None,
    };

    loop {
        if source.is_closed() {
            break;
        }

        let error = tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            error = session.read(&source, &client) => error,
        };

        let next = if error.is_retryable() {
            ReadyState::Connecting
        } else {
            ReadyState::Closed
        };
        if !source.transition(next) {
            break;
        }
        source.listeners.dispatch_error(&error);

        if next == ReadyState::Closed {
            warn!(%error, "Event stream failed permanently.");
            break;
        }

        debug!(%error, delay = ?session.retry_delay, "Event stream interrupted. Reconnecting.");
        tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            _ = tokio::time::sleep(session.retry_delay) => {}
        }
    }

    debug!("Event stream task finished.");
}

/// Reconnect state carried across attempts.
struct StreamSession {
    retry_delay: Duration,
    last_event_id: Option<String>,
}

impl StreamSession {
    /// Runs one connection attempt until it fails or the server ends it.
    async fn read(&mut self, source: &SourceState, client: &Client) -> TransportError {
        let mut request = client
            .get(source.url.clone())
            .header(ACCEPT, EVENT_STREAM_MIME)
            .header(CACHE_CONTROL, "no-cache");
        if let Some(id) = self.last_event_id.as_deref() {
            request = request.header("Last-Event-ID", id);
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => return TransportError::Network(e.to_string()),
        };

        if response.status() != StatusCode::OK {
            return TransportError::Status(response.status().as_u16());
        }
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        if !content_type.starts_with(EVENT_STREAM_MIME) {
            return TransportError::ContentType(content_type);
        }

        if !source.transition(ReadyState::Open) {
            return TransportError::Ended;
        }
        info!("Event stream connected.");
        source.listeners.dispatch_open();

        let mut frames = response.bytes_stream().eventsource();
        while let Some(frame) = frames.next().await {
            let frame = match frame {
                Ok(frame) => frame,
                Err(e) => return TransportError::Network(e.to_string()),
            };

            if let Some(retry) = frame.retry {
                self.retry_delay = retry;
            }
            if !frame.id.is_empty() {
                self.last_event_id = Some(frame.id.clone());
            }
            // Frames without data are not dispatched.
            if frame.data.is_empty() {
                continue;
            }
            if source.is_closed() {
                return TransportError::Ended;
            }

            let event_type = if frame.event.is_empty() {
                DEFAULT_EVENT_TYPE.to_string()
            } else {
                frame.event
            };
            source.listeners.dispatch_message(&MessageEvent {
                event_type,
                data: frame.data,
                last_event_id: self.last_event_id.clone(),
            });
        }

        TransportError::Ended
    }
}
