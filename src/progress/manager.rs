// autoshop-realtime/src/progress/manager.rs

//! The `ProgressStreamManager`: one transport per project, any number of
//! subscribers per project, and a connection status anyone can watch.

use crate::auth::{TokenProvider, attach_token};
use crate::config::StreamConfig;
use crate::error::{StreamError, TransportError};
use crate::event::ProgressUpdate;
use crate::progress::status::ConnectionStatus;
use crate::subscription::Subscription;
use crate::transport::{Connector, EventListeners, EventSource, MessageEvent};
use dashmap::DashMap;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Named event carrying a structured [`ProgressUpdate`].
pub const PROJECT_UPDATE_EVENT: &str = "project.update";
/// Named event carrying a plain-text status line.
pub const PROJECT_MESSAGE_EVENT: &str = "project.message";

/// Receives every update pushed for a project.
pub type UpdateCallback = Arc<dyn Fn(&ProgressUpdate) + Send + Sync>;
/// Receives transport errors for a project.
pub type ErrorCallback = Arc<dyn Fn(&TransportError) + Send + Sync>;
/// Receives the connection status of a project.
pub type StatusCallback = Arc<dyn Fn(ConnectionStatus) + Send + Sync>;

type SubscriberId = Uuid;
type ConnectionId = Uuid;

#[derive(Clone)]
struct DataSubscriber {
    on_update: UpdateCallback,
    on_error: Option<ErrorCallback>,
}

/// The live transport of a project and the callbacks fed by it.
struct ProjectConnection {
    id: ConnectionId,
    /// `None` while the transport is being connected.
    source: Option<Arc<dyn EventSource>>,
    subscribers: HashMap<SubscriberId, DataSubscriber>,
}

/// Everything known about one project. Status and connection share an entry
/// so that teardown and re-subscribe cannot interleave on the status.
#[derive(Default)]
struct ProjectEntry {
    status: ConnectionStatus,
    status_watchers: HashMap<SubscriberId, StatusCallback>,
    connection: Option<ProjectConnection>,
}

impl ProjectEntry {
    fn current(&self, connection_id: ConnectionId) -> Option<&ProjectConnection> {
        self.connection.as_ref().filter(|c| c.id == connection_id)
    }

    fn is_unused(&self) -> bool {
        self.connection.is_none() && self.status_watchers.is_empty()
    }
}

/// Registry of project progress streams.
///
/// At most one transport is open per project, no matter how many views
/// subscribe. Updates and status changes are fanned out to every registered
/// callback. Callbacks, the [`TokenProvider`] and the [`Connector`] run
/// without any registry lock held, so they may call back into the manager,
/// including subscribing or unsubscribing themselves.
///
/// The access token is read from the [`TokenProvider`] when a project's
/// transport is created. Reconnects performed by the transport reuse that URL,
/// so a token refreshed afterwards is only picked up once the last subscriber
/// has left and a new connection is made.
pub struct ProgressStreamManager {
    connector: Arc<dyn Connector>,
    tokens: Arc<dyn TokenProvider>,
    config: StreamConfig,
    projects: DashMap<String, ProjectEntry>,
    this: Weak<Self>,
}

impl ProgressStreamManager {
    /// Creates a manager. Share the returned `Arc` with every view that needs it.
    pub fn new(
        connector: Arc<dyn Connector>,
        tokens: Arc<dyn TokenProvider>,
        config: StreamConfig,
    ) -> Arc<Self> {
        Arc::new_cyclic(|this| Self {
            connector,
            tokens,
            config,
            projects: DashMap::new(),
            this: this.clone(),
        })
    }

    /// Subscribes `on_update` to a project's progress, opening the project's
    /// transport if this is its first subscriber.
    pub fn subscribe_to_project_progress<F>(
        &self,
        project_id: &str,
        on_update: F,
    ) -> Result<Subscription, StreamError>
    where
        F: Fn(&ProgressUpdate) + Send + Sync + 'static,
    {
        self.register(
            project_id,
            DataSubscriber {
                on_update: Arc::new(on_update),
                on_error: None,
            },
        )
    }

    /// Like [`subscribe_to_project_progress`](Self::subscribe_to_project_progress),
    /// and `on_error` receives every transport error for the project.
    pub fn subscribe_to_project_progress_with_error<F, E>(
        &self,
        project_id: &str,
        on_update: F,
        on_error: E,
    ) -> Result<Subscription, StreamError>
    where
        F: Fn(&ProgressUpdate) + Send + Sync + 'static,
        E: Fn(&TransportError) + Send + Sync + 'static,
    {
        self.register(
            project_id,
            DataSubscriber {
                on_update: Arc::new(on_update),
                on_error: Some(Arc::new(on_error)),
            },
        )
    }

    /// Watches a project's connection status.
    ///
    /// `callback` is invoked once, before this returns, with the current
    /// status, then on every change. Watching does not open or keep open a
    /// transport.
    #[instrument(skip(self, callback))]
    pub fn subscribe_to_connection_status<F>(
        &self,
        project_id: &str,
        callback: F,
    ) -> Result<Subscription, StreamError>
    where
        F: Fn(ConnectionStatus) + Send + Sync + 'static,
    {
        let key = validate_key(project_id)?;
        let watcher_id = SubscriberId::new_v4();
        let callback: StatusCallback = Arc::new(callback);

        let current = {
            let mut entry = self.projects.entry(key.clone()).or_default();
            entry.status_watchers.insert(watcher_id, Arc::clone(&callback));
            entry.status
        };
        debug!(status = %current, "Status watcher registered.");
        callback(current);

        let this = self.this.clone();
        Ok(Subscription::new(move || {
            if let Some(manager) = this.upgrade() {
                manager.remove_status_watcher(&key, watcher_id);
            }
        }))
    }

    /// The current status of a project; `Disconnected` if unknown.
    pub fn connection_status(&self, project_id: &str) -> ConnectionStatus {
        self.projects
            .get(project_id)
            .map_or(ConnectionStatus::Disconnected, |entry| entry.status)
    }

    /// Number of projects with an open transport.
    pub fn active_connections(&self) -> usize {
        self.projects
            .iter()
            .filter(|entry| entry.connection.is_some())
            .count()
    }

    /// Number of data subscribers of a project.
    pub fn subscriber_count(&self, project_id: &str) -> usize {
        self.projects
            .get(project_id)
            .and_then(|entry| entry.connection.as_ref().map(|c| c.subscribers.len()))
            .unwrap_or(0)
    }

    #[instrument(skip(self, subscriber))]
    fn register(
        &self,
        project_id: &str,
        subscriber: DataSubscriber,
    ) -> Result<Subscription, StreamError> {
        let key = validate_key(project_id)?;
        let subscriber_id = SubscriberId::new_v4();

        let joined = self.projects.get_mut(&key).and_then(|mut entry| {
            let connection = entry.connection.as_mut()?;
            connection.subscribers.insert(subscriber_id, subscriber.clone());
            Some(connection.subscribers.len())
        });
        match joined {
            Some(count) => debug!(subscribers = count, "Joined existing progress stream."),
            None => self.connect_project(&key, subscriber_id, subscriber),
        }

        let this = self.this.clone();
        Ok(Subscription::new(move || {
            if let Some(manager) = this.upgrade() {
                manager.remove_subscriber(&key, subscriber_id);
            }
        }))
    }

    /// Registers the first subscriber of a project and connects its transport,
    /// or joins a connection another thread set up in the meantime.
    fn connect_project(&self, key: &str, subscriber_id: SubscriberId, subscriber: DataSubscriber) {
        let mut url = self.config.progress_stream_url(key);
        attach_token(
            &mut url,
            self.config.token_param(),
            self.tokens.access_token().as_deref(),
        );
        let connection_id = ConnectionId::new_v4();

        let created = {
            let mut entry = self.projects.entry(key.to_string()).or_default();
            let created = entry.connection.is_none();
            if created {
                entry.status = ConnectionStatus::Connecting;
                entry.connection = Some(ProjectConnection {
                    id: connection_id,
                    source: None,
                    subscribers: HashMap::new(),
                });
            }
            if let Some(connection) = entry.connection.as_mut() {
                connection.subscribers.insert(subscriber_id, subscriber);
            }
            created
        };
        if !created {
            debug!("Joined a progress stream opened concurrently.");
            return;
        }

        info!("First subscriber for project. Opening progress stream.");
        self.broadcast_status(key, ConnectionStatus::Connecting);
        let source = self
            .connector
            .connect(url, self.build_listeners(key, connection_id));
        self.attach_source(key, connection_id, source);
    }

    /// Hands a freshly connected transport to its connection. Closes it if the
    /// project was torn down while connecting.
    fn attach_source(&self, key: &str, connection_id: ConnectionId, source: Arc<dyn EventSource>) {
        let orphaned = match self.projects.get_mut(key) {
            Some(mut entry) => match entry.connection.as_mut().filter(|c| c.id == connection_id) {
                Some(connection) => {
                    connection.source = Some(source);
                    None
                }
                None => Some(source),
            },
            None => Some(source),
        };
        if let Some(source) = orphaned {
            debug!(project_id = %key, "Project torn down while connecting. Closing stream.");
            source.close();
        }
    }

    /// Builds the listeners a project's transport dispatches to.
    fn build_listeners(&self, key: &str, id: ConnectionId) -> Arc<EventListeners> {
        let listeners = Arc::new(EventListeners::new());

        listeners.set_onmessage(Some(self.bind(key, id, Self::on_structured_update)));
        let structured = self.bind(key, id, Self::on_structured_update);
        listeners.add_event_listener(PROJECT_UPDATE_EVENT, move |event| structured(event));
        let text = self.bind(key, id, Self::on_text_update);
        listeners.add_event_listener(PROJECT_MESSAGE_EVENT, move |event| text(event));

        let (this, open_key) = (self.this.clone(), key.to_string());
        listeners.set_onopen(Some(Arc::new(move || {
            if let Some(manager) = this.upgrade() {
                manager.on_open(&open_key, id);
            }
        })));
        let (this, error_key) = (self.this.clone(), key.to_string());
        listeners.set_onerror(Some(Arc::new(move |error: &TransportError| {
            if let Some(manager) = this.upgrade() {
                manager.on_error(&error_key, id, error);
            }
        })));

        listeners
    }

    /// Wraps a frame handler so it reaches this manager without keeping it alive.
    fn bind(
        &self,
        key: &str,
        connection_id: ConnectionId,
        handler: fn(&Self, &str, ConnectionId, &MessageEvent),
    ) -> Arc<dyn Fn(&MessageEvent) + Send + Sync> {
        let this = self.this.clone();
        let key = key.to_string();
        Arc::new(move |event: &MessageEvent| {
            if let Some(manager) = this.upgrade() {
                handler(&manager, &key, connection_id, event);
            }
        })
    }

    fn on_structured_update(&self, key: &str, connection_id: ConnectionId, event: &MessageEvent) {
        match serde_json::from_str::<ProgressUpdate>(&event.data) {
            Ok(mut update) => {
                if update.project_id.is_empty() {
                    update.project_id = key.to_string();
                }
                self.fan_out(key, connection_id, &update);
            }
            Err(e) => {
                warn!(
                    project_id = %key,
                    event_type = %event.event_type,
                    "Dropping malformed progress update: {}",
                    e
                );
            }
        }
    }

    fn on_text_update(&self, key: &str, connection_id: ConnectionId, event: &MessageEvent) {
        let update = ProgressUpdate::from_text(key, &event.data);
        self.fan_out(key, connection_id, &update);
    }

    fn fan_out(&self, key: &str, connection_id: ConnectionId, update: &ProgressUpdate) {
        let callbacks: Vec<(SubscriberId, UpdateCallback)> = match self.projects.get(key) {
            Some(entry) => match entry.current(connection_id) {
                Some(connection) => connection
                    .subscribers
                    .iter()
                    .map(|(id, s)| (*id, Arc::clone(&s.on_update)))
                    .collect(),
                None => return,
            },
            None => return,
        };

        debug!(project_id = %key, count = callbacks.len(), "Fanning out progress update.");
        for (subscriber_id, callback) in callbacks {
            // A callback earlier in this round may have removed this one.
            if self.is_subscribed(key, subscriber_id) {
                callback(update);
            }
        }
    }

    fn on_open(&self, key: &str, connection_id: ConnectionId) {
        if self.set_status_for(key, connection_id, ConnectionStatus::Connected) {
            info!(project_id = %key, "Progress stream connected.");
            self.broadcast_status(key, ConnectionStatus::Connected);
        }
    }

    fn on_error(&self, key: &str, connection_id: ConnectionId, error: &TransportError) {
        if !self.set_status_for(key, connection_id, ConnectionStatus::Error) {
            return;
        }
        warn!(project_id = %key, %error, "Progress stream error.");

        let handlers: Vec<(SubscriberId, ErrorCallback)> = match self.projects.get(key) {
            Some(entry) => entry
                .current(connection_id)
                .map(|connection| {
                    connection
                        .subscribers
                        .iter()
                        .filter_map(|(id, s)| s.on_error.clone().map(|h| (*id, h)))
                        .collect()
                })
                .unwrap_or_default(),
            None => Vec::new(),
        };

        self.broadcast_status(key, ConnectionStatus::Error);
        for (subscriber_id, handler) in handlers {
            if self.is_subscribed(key, subscriber_id) {
                handler(error);
            }
        }
    }

    /// Sets the status if `connection_id` is still the project's connection.
    fn set_status_for(
        &self,
        key: &str,
        connection_id: ConnectionId,
        status: ConnectionStatus,
    ) -> bool {
        match self.projects.get_mut(key) {
            Some(mut entry) if entry.current(connection_id).is_some() => {
                entry.status = status;
                true
            }
            _ => false,
        }
    }

    /// Sends `status` to every watcher of the project.
    fn broadcast_status(&self, key: &str, status: ConnectionStatus) {
        let watchers: Vec<(SubscriberId, StatusCallback)> = match self.projects.get(key) {
            Some(entry) => entry
                .status_watchers
                .iter()
                .map(|(id, cb)| (*id, Arc::clone(cb)))
                .collect(),
            None => return,
        };

        for (watcher_id, callback) in watchers {
            let still_watching = self
                .projects
                .get(key)
                .is_some_and(|entry| entry.status_watchers.contains_key(&watcher_id));
            if still_watching {
                callback(status);
            }
        }
    }

    fn is_subscribed(&self, key: &str, subscriber_id: SubscriberId) -> bool {
        self.projects.get(key).is_some_and(|entry| {
            entry
                .connection
                .as_ref()
                .is_some_and(|c| c.subscribers.contains_key(&subscriber_id))
        })
    }

    fn remove_subscriber(&self, key: &str, subscriber_id: SubscriberId) {
        let closed = {
            let Some(mut entry) = self.projects.get_mut(key) else {
                return;
            };
            let Some(connection) = entry.connection.as_mut() else {
                return;
            };
            if connection.subscribers.remove(&subscriber_id).is_none() {
                return;
            }
            if !connection.subscribers.is_empty() {
                debug!(
                    project_id = %key,
                    remaining = connection.subscribers.len(),
                    "Progress subscriber left."
                );
                return;
            }
            entry.status = ConnectionStatus::Disconnected;
            entry.connection.take()
        };

        if let Some(connection) = closed {
            if let Some(source) = connection.source {
                source.close();
            }
            info!(project_id = %key, "Last subscriber left. Closed progress stream.");
            self.broadcast_status(key, ConnectionStatus::Disconnected);
            self.prune(key);
        }
    }

    fn remove_status_watcher(&self, key: &str, watcher_id: SubscriberId) {
        if let Some(mut entry) = self.projects.get_mut(key) {
            entry.status_watchers.remove(&watcher_id);
        }
        self.prune(key);
    }

    /// Forgets a project that has neither a connection nor status watchers.
    fn prune(&self, key: &str) {
        self.projects.remove_if(key, |_, entry| entry.is_unused());
    }
}

impl Drop for ProgressStreamManager {
    fn drop(&mut self) {
        for mut entry in self.projects.iter_mut() {
            if let Some(source) = entry.connection.take().and_then(|c| c.source) {
                source.close();
            }
        }
    }
}

impl fmt::Debug for ProgressStreamManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressStreamManager")
            .field("projects", &self.projects.len())
            .field("active_connections", &self.active_connections())
            .finish()
    }
}

fn validate_key(project_id: &str) -> Result<String, StreamError> {
    if project_id.trim().is_empty() {
        return Err(StreamError::EmptyStreamKey { kind: "project id" });
    }
    Ok(project_id.to_string())
}
