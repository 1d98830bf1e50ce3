use autoshop_realtime::prelude::*;
use autoshop_realtime::progress::{PROJECT_MESSAGE_EVENT, PROJECT_UPDATE_EVENT};
use axum::Router;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, Sse};
use axum::routing::get;
use futures_util::Stream;
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};

// Ensure tracing subscriber is initialized only once for tests
static TRACING: Lazy<()> = Lazy::new(|| {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .init();
});

const WAIT: Duration = Duration::from_secs(5);

/// What the fake shop backend saw.
#[derive(Clone, Default)]
struct Backend {
    requests: Arc<Mutex<Vec<SeenRequest>>>,
}

#[derive(Debug, Clone)]
struct SeenRequest {
    path_id: String,
    token: Option<String>,
    last_event_id: Option<String>,
}

impl Backend {
    fn record(&self, path_id: String, params: &HashMap<String, String>, headers: &HeaderMap) {
        self.requests.lock().unwrap().push(SeenRequest {
            path_id,
            token: params.get("token").cloned(),
            last_event_id: headers
                .get("last-event-id")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
        });
    }

    fn requests(&self) -> Vec<SeenRequest> {
        self.requests.lock().unwrap().clone()
    }
}

async fn progress_stream(
    State(backend): State<Backend>,
    Path(project_id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, StatusCode> {
    backend.record(project_id.clone(), &params, &headers);
    if params.get("token").map(String::as_str) == Some("expired") {
        return Err(StatusCode::UNAUTHORIZED);
    }

    let events = vec![
        Event::default()
            .event(PROJECT_UPDATE_EVENT)
            .id("1")
            .retry(Duration::from_millis(50))
            .data(format!(
                r#"{{"projectId": {project_id}, "status": "IN_PROGRESS", "progressPercentage": 25}}"#
            )),
        Event::default()
            .event(PROJECT_MESSAGE_EVENT)
            .id("2")
            .data("Parts ordered"),
        Event::default().id("3").data(r#"{"progressPercentage": 50}"#),
    ];
    Ok(Sse::new(tokio_stream::iter(events.into_iter().map(Ok))))
}

async fn notification_stream(
    State(backend): State<Backend>,
    Path(user_id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    headers: HeaderMap,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    backend.record(user_id, &params, &headers);
    let events = vec![
        Event::default().event("status").data(r#"{"eventType": "heartbeat"}"#),
        Event::default()
            .event("notification")
            .data(r#"{"id": 41, "messageId": "m-41", "type": "APPOINTMENT", "message": "Appointment confirmed"}"#),
        Event::default().event("system").data("keepalive"),
        Event::default().data("Your car is ready for pickup"),
    ];
    Sse::new(tokio_stream::iter(events.into_iter().map(Ok)))
}

async fn not_a_stream() -> &'static str {
    "plain text"
}

async fn spawn_backend() -> (StreamConfig, Backend) {
    Lazy::force(&TRACING);
    let backend = Backend::default();
    let app = Router::new()
        .route("/api/projects/{id}/progress/stream", get(progress_stream))
        .route("/api/notifications/stream/{id}", get(notification_stream))
        .route("/api/plain", get(not_a_stream))
        .with_state(backend.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let config = StreamConfig::new(&format!("http://{addr}/api"))
        .unwrap()
        .with_retry_delay(Duration::from_secs(60));
    (config, backend)
}

async fn eventually(mut condition: impl FnMut() -> bool) {
    timeout(WAIT, async {
        while !condition() {
            sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not met in time");
}

#[tokio::test]
async fn progress_frames_reach_subscribers_over_http() {
    let (config, backend) = spawn_backend().await;
    let connector = Arc::new(SseConnector::new(&config).unwrap());
    let manager = ProgressStreamManager::new(connector, Arc::new(StaticToken::new("Bearer s3cret")), config);

    let (tx, mut rx) = mpsc::unbounded_channel();
    let _sub = manager
        .subscribe_to_project_progress("17", move |update| {
            let _ = tx.send(update.clone());
        })
        .unwrap();

    let structured = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(structured.project_id, "17");
    assert_eq!(structured.status.as_deref(), Some("IN_PROGRESS"));
    assert_eq!(structured.progress_percentage, Some(25.0));

    let text = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(text.messages.len(), 1);
    assert_eq!(text.messages[0].content, "Parts ordered");

    let unnamed = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(unnamed.project_id, "17");
    assert_eq!(unnamed.progress_percentage, Some(50.0));

    let requests = backend.requests();
    let first = &requests[0];
    assert_eq!(first.path_id, "17");
    assert_eq!(first.token.as_deref(), Some("s3cret"));
    assert_eq!(first.last_event_id, None);
}

#[tokio::test]
async fn ended_streams_reconnect_with_the_last_event_id() {
    let (config, backend) = spawn_backend().await;
    let connector = Arc::new(SseConnector::new(&config).unwrap());
    let manager = ProgressStreamManager::new(connector, Arc::new(NoToken), config);

    let statuses = Arc::new(Mutex::new(Vec::new()));
    let s = Arc::clone(&statuses);
    let _watch = manager
        .subscribe_to_connection_status("17", move |status| s.lock().unwrap().push(status))
        .unwrap();
    let _sub = manager.subscribe_to_project_progress("17", |_| {}).unwrap();

    // The server's `retry: 50ms` overrides the one-minute default.
    eventually(|| {
        let seen = statuses.lock().unwrap();
        seen.len() > 4 && seen[4..].contains(&ConnectionStatus::Connected)
    })
    .await;

    let requests = backend.requests();
    assert!(requests.len() >= 2);
    assert_eq!(requests[1].last_event_id.as_deref(), Some("3"));

    let statuses = statuses.lock().unwrap();
    assert_eq!(
        statuses[..4],
        [
            ConnectionStatus::Disconnected,
            ConnectionStatus::Connecting,
            ConnectionStatus::Connected,
            ConnectionStatus::Error,
        ]
    );
}

#[tokio::test]
async fn rejected_streams_report_the_status_and_stay_closed() {
    let (config, backend) = spawn_backend().await;
    let connector = Arc::new(SseConnector::new(&config).unwrap());
    let manager = ProgressStreamManager::new(connector, Arc::new(StaticToken::new("expired")), config);

    let (tx, mut rx) = mpsc::unbounded_channel();
    let _sub = manager
        .subscribe_to_project_progress_with_error(
            "17",
            |_| panic!("no update expected"),
            move |error| {
                let _ = tx.send(error.clone());
            },
        )
        .unwrap();

    let error = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert_eq!(error, TransportError::Status(401));
    assert_eq!(manager.connection_status("17"), ConnectionStatus::Error);

    sleep(Duration::from_millis(200)).await;
    assert_eq!(backend.requests().len(), 1);
}

#[tokio::test]
async fn wrong_content_type_is_fatal() {
    let (config, _backend) = spawn_backend().await;
    let connector = SseConnector::new(&config).unwrap();
    let mut url = config.base_url().clone();
    url.set_path("/api/plain");

    let listeners = Arc::new(autoshop_realtime::transport::EventListeners::new());
    let (tx, mut rx) = mpsc::unbounded_channel();
    listeners.set_onerror(Some(Arc::new(move |error: &TransportError| {
        let _ = tx.send(error.clone());
    })));
    let source = connector.connect(url, listeners);

    let error = timeout(WAIT, rx.recv()).await.unwrap().unwrap();
    assert!(matches!(error, TransportError::ContentType(ref ct) if ct.starts_with("text/plain")));
    eventually(|| source.ready_state() == autoshop_realtime::transport::ReadyState::Closed).await;
}

#[tokio::test]
async fn notification_feed_over_http() {
    let (config, backend) = spawn_backend().await;
    let connector = Arc::new(SseConnector::new(&config).unwrap());
    let manager = NotificationStreamManager::new(connector, Arc::new(StaticToken::new("abc")), config);

    let feed = NotificationFeed::start(&manager, "7").unwrap();
    eventually(|| feed.snapshot().len() == 2).await;

    let records = feed.snapshot();
    assert_eq!(records[0].message, "Your car is ready for pickup");
    assert_eq!(records[0].kind, "message");
    assert_eq!(records[1].id, "41");
    assert_eq!(records[1].message_id.as_deref(), Some("m-41"));
    assert_eq!(feed.unread_count(), 2);

    feed.stop();
    let seen = backend.requests();
    assert_eq!(seen[0].path_id, "7");
    assert_eq!(seen[0].token.as_deref(), Some("abc"));
}
