//! # Autoshop Realtime
//!
//! The live-update layer of the service shop dashboards: Server-Sent-Events
//! streams that push notifications and project progress into the UI, with
//! one connection per stream shared by any number of subscribers.
//!
//! ## Core Features
//!
//! - **`NotificationStreamManager`**: a per-user notification stream, decoded
//!   frame by frame, with a ready-made `NotificationFeed` that keeps a
//!   deduplicated list of notifications.
//! - **`ProgressStreamManager`**: at most one connection per project, fan-out
//!   to every subscriber, and a `ConnectionStatus` any view can watch.
//! - **Pluggable transport**: the `Connector` trait; `SseConnector` speaks real
//!   SSE with reconnects, `MemoryConnector` is driven by hand in tests.
//! - **Injected credentials**: a `TokenProvider` supplies the access token,
//!   which travels as a query parameter.
//!
//! ## Getting Started
//!
//! ```rust,no_run
//! use autoshop_realtime::prelude::*;
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = StreamConfig::from_env()?;
//! let connector = Arc::new(SseConnector::new(&config)?);
//! let tokens: Arc<dyn TokenProvider> = Arc::new(|| std::env::var("SHOP_TOKEN").ok());
//!
//! let progress = ProgressStreamManager::new(connector, tokens, config);
//! let _updates = progress.subscribe_to_project_progress("42", |update| {
//!     println!("{}% done", update.progress_percentage.unwrap_or_default());
//! })?;
//! let _status = progress.subscribe_to_connection_status("42", |status| {
//!     println!("stream is {status}");
//! })?;
//! # Ok(())
//! # }
//! ```
//!
//! ---

pub mod auth;
pub mod config;
pub mod error;
pub mod event;
pub mod notifications;
pub mod progress;
pub mod subscription;
pub mod transport;

/// Public prelude for convenience.
///
/// This allows users to import the most common types with a single `use` statement:
/// `use autoshop_realtime::prelude::*;`
pub mod prelude {
    pub use crate::auth::{NoToken, StaticToken, TokenProvider};
    pub use crate::config::StreamConfig;
    pub use crate::error::{StreamError, TransportError};
    pub use crate::event::{
        NotificationEnvelope, NotificationEvent, NotificationRecord, ProgressMessage,
        ProgressUpdate, StreamPayload,
    };
    pub use crate::notifications::{NotificationCache, NotificationFeed, NotificationStreamManager};
    pub use crate::progress::{ConnectionStatus, ProgressStreamManager};
    pub use crate::subscription::Subscription;
    pub use crate::transport::{
        Connector, EventSource, memory::MemoryConnector, sse::SseConnector,
    };
}
