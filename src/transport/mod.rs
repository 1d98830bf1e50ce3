//! The push-stream primitive the managers are built on.
//!
//! A transport is a long-lived, one-way event stream opened against a URL. It
//! delivers frames to named listeners and to an `onmessage` default handler,
//! reports connects through `onopen` and failures through `onerror`, and
//! stops for good once [`EventSource::close`] is called. Whether and how it
//! reconnects after a failure is the transport's own business.
//!
//! Two implementations ship with the crate:
//!
//! - [`sse::SseConnector`]: real Server-Sent Events over HTTP.
//! - [`memory::MemoryConnector`]: an in-process transport driven by the caller,
//!   used for tests and UI development.

pub mod memory;
pub mod sse;
pub mod types;

pub use types::{
    DEFAULT_EVENT_TYPE, ErrorHandler, EventListeners, ListenerId, MessageEvent, MessageHandler,
    OpenHandler, ReadyState,
};

use reqwest::Url;
use std::fmt::Debug;
use std::sync::Arc;

/// One live transport instance.
pub trait EventSource: Send + Sync + Debug {
    /// The URL the transport was opened against, token included.
    fn url(&self) -> &Url;

    /// The listener set this transport dispatches to.
    fn listeners(&self) -> &EventListeners;

    fn ready_state(&self) -> ReadyState;

    /// Stops the stream. Idempotent; nothing is dispatched afterwards.
    fn close(&self);
}

/// Opens transports. The managers hold one of these instead of constructing
/// transports themselves.
pub trait Connector: Send + Sync {
    /// Opens a stream to `url` that dispatches to `listeners`.
    ///
    /// Implementations must not dispatch anything before this call returns
    /// on the calling thread's view of `listeners`; callers attach their
    /// handlers to `listeners` before connecting.
    fn connect(&self, url: Url, listeners: Arc<EventListeners>) -> Arc<dyn EventSource>;
}
