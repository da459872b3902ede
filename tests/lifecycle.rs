//! Lifecycle tests against a scripted in-memory transport.

use bytes::Bytes;
use courier::{
    Backoff, Client, DeserializationError, Deserializer, Error, ErrorHandler, Outcome, Output,
    Request, RetryPolicy, StandardRetryPolicy, Transport, TransportError, TransportErrorKind,
    TransportEvent, TransportStream,
};
use futures::stream::{self, StreamExt};
use http::header::CONTENT_TYPE;
use http::{HeaderMap, HeaderValue, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// What the transport was asked to send.
#[derive(Debug, Clone)]
struct Captured {
    method: http::Method,
    uri: String,
    headers: HeaderMap,
    body: Bytes,
}

/// Replays one scripted event list per opened attempt. Once the scripts run
/// out every attempt hangs until dropped.
#[derive(Clone, Default)]
struct Scripted {
    scripts: Arc<Mutex<VecDeque<Vec<TransportEvent>>>>,
    opened: Arc<AtomicUsize>,
    captured: Arc<Mutex<Vec<Captured>>>,
}

impl Scripted {
    fn new(scripts: impl IntoIterator<Item = Vec<TransportEvent>>) -> Self {
        Self {
            scripts: Arc::new(Mutex::new(scripts.into_iter().collect())),
            ..Self::default()
        }
    }

    fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    fn captured(&self) -> Vec<Captured> {
        self.captured.lock().unwrap().clone()
    }
}

impl Transport for Scripted {
    fn open(&self, request: http::Request<Bytes>) -> TransportStream {
        self.opened.fetch_add(1, Ordering::SeqCst);
        let (parts, body) = request.into_parts();
        self.captured.lock().unwrap().push(Captured {
            method: parts.method,
            uri: parts.uri.to_string(),
            headers: parts.headers,
            body,
        });
        match self.scripts.lock().unwrap().pop_front() {
            Some(events) => stream::iter(events).boxed(),
            None => stream::pending().boxed(),
        }
    }
}

fn head(status: u16, content_type: Option<&str>) -> TransportEvent {
    let mut headers = HeaderMap::new();
    if let Some(content_type) = content_type {
        headers.insert(CONTENT_TYPE, HeaderValue::from_str(content_type).unwrap());
    }
    TransportEvent::Head {
        status: StatusCode::from_u16(status).unwrap(),
        headers,
    }
}

fn chunk(bytes: &'static str) -> TransportEvent {
    TransportEvent::Data(Bytes::from_static(bytes.as_bytes()))
}

fn json_ok(body: &'static str) -> Vec<TransportEvent> {
    vec![
        head(200, Some("application/json")),
        chunk(body),
        TransportEvent::Completed,
    ]
}

fn failed(kind: TransportErrorKind) -> Vec<TransportEvent> {
    vec![TransportEvent::Failed(TransportError::new(kind, "scripted"))]
}

fn client(transport: &Scripted) -> courier::ClientBuilder {
    Client::builder()
        .base_url("https://api.test/v1/")
        .unwrap()
        .transport(transport.clone())
}

/// Retries everything, counting how often it was asked.
struct Counting {
    max: usize,
    delay: Duration,
    asked: Arc<AtomicUsize>,
}

impl RetryPolicy for Counting {
    fn max_retry_count(&self) -> usize {
        self.max
    }

    fn should_retry(&self, _error: &Error, _attempt: usize) -> bool {
        self.asked.fetch_add(1, Ordering::SeqCst);
        true
    }

    fn retry_delay(&self, _error: &Error, _attempt: usize) -> Duration {
        self.delay
    }
}

#[derive(Debug, Deserialize, PartialEq)]
struct Created {
    id: u64,
}

#[tokio::test]
async fn test_post_json_scenario() {
    init_tracing();
    let transport = Scripted::new([json_ok(r#"{"id":1}"#)]);
    let client = client(&transport).build().unwrap();

    let request = Request::<Created>::post("items")
        .with_json(&json!({ "name": "widget" }))
        .unwrap();
    let response = client.execute(request).await.unwrap();

    assert_eq!(response.data(), Some(&Created { id: 1 }));
    assert!(response.error().is_none());
    assert_eq!(response.attempts(), 1);
    assert_eq!(
        response.url().map(|u| u.to_string()).as_deref(),
        Some("https://api.test/v1/items")
    );

    let sent = transport.captured();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].method, http::Method::POST);
    assert_eq!(sent[0].uri, "https://api.test/v1/items");
    assert_eq!(sent[0].headers[CONTENT_TYPE], "application/json");
    assert_eq!(sent[0].body.as_ref(), br#"{"name":"widget"}"#);
}

#[tokio::test]
async fn test_timeouts_then_success() {
    let transport = Scripted::new([
        failed(TransportErrorKind::Timeout),
        failed(TransportErrorKind::Timeout),
        json_ok(r#"{"id":3}"#),
    ]);
    let client = client(&transport)
        .retry_policy(StandardRetryPolicy::builder().max_retry_count(3).build())
        .build()
        .unwrap();

    let response = client.get::<Created>("items/3").await;

    assert_eq!(transport.opened(), 3);
    assert!(response.error().is_none());
    assert_eq!(response.attempts(), 3);
    assert_eq!(response.data(), Some(&Created { id: 3 }));
}

#[tokio::test]
async fn test_retry_bound_and_single_callback() {
    const MAX: usize = 4;
    let transport = Scripted::new((0..MAX + 2).map(|_| failed(TransportErrorKind::Connect)));
    let asked = Arc::new(AtomicUsize::new(0));
    let client = client(&transport)
        .retry_policy(Counting {
            max: MAX,
            delay: Duration::ZERO,
            asked: asked.clone(),
        })
        .build()
        .unwrap();

    let calls = Arc::new(Mutex::new(Vec::new()));
    let calls_clone = calls.clone();
    let request = Request::<Created>::get("items").on_complete(move |response| {
        calls_clone.lock().unwrap().push(response);
    });
    assert!(client.send(request).await.is_none());

    assert_eq!(transport.opened(), MAX);
    // The budget check comes first on the last attempt
    assert_eq!(asked.load(Ordering::SeqCst), MAX - 1);

    let calls = calls.lock().unwrap();
    assert_eq!(calls.len(), 1);
    match calls[0].error() {
        Some(Error::NoRetryBudget {
            attempts,
            last_error,
        }) => {
            assert_eq!(*attempts, MAX);
            assert_eq!(
                last_error.transport_error().map(|e| e.kind()),
                Some(TransportErrorKind::Connect)
            );
        }
        other => panic!("Expected NoRetryBudget, got {:?}", other),
    }
}

#[tokio::test]
async fn test_single_attempt_failure_is_not_wrapped() {
    let transport = Scripted::new([failed(TransportErrorKind::Connect)]);
    let client = client(&transport).build().unwrap();

    let response = client.get::<Created>("items").await;

    assert_eq!(transport.opened(), 1);
    assert!(matches!(response.error(), Some(Error::Transport(_))));
    assert!(response.output().is_none());
}

#[tokio::test]
async fn test_retry_starts_from_empty_buffer() {
    let transport = Scripted::new([
        vec![
            head(200, Some("application/json")),
            chunk("{\"id\":"),
            TransportEvent::Failed(TransportError::new(TransportErrorKind::Body, "reset")),
        ],
        vec![
            head(200, Some("application/json")),
            chunk("{\"i"),
            chunk(""),
            chunk("d\":"),
            chunk("42}"),
            TransportEvent::Completed,
        ],
    ]);
    let client = client(&transport)
        .retry_policy(StandardRetryPolicy::builder().max_retry_count(2).build())
        .build()
        .unwrap();

    let response = client.get::<Created>("items/42").await;

    assert_eq!(response.raw_bytes().as_ref(), b"{\"id\":42}");
    assert_eq!(response.data(), Some(&Created { id: 42 }));
    assert_eq!(response.attempts(), 2);
    // Connections are gone, only the response holds the request
    assert_eq!(Arc::strong_count(response.request()), 1);
    assert_eq!(response.request().path(), "items/42");
}

#[tokio::test]
async fn test_transport_error_after_success_head_is_overridden() {
    let transport = Scripted::new([vec![
        head(200, Some("application/json")),
        chunk(r#"{"id":5}"#),
        TransportEvent::Failed(TransportError::new(TransportErrorKind::Body, "trailer lost")),
    ]]);
    let client = client(&transport).build().unwrap();

    let response = client.get::<Created>("items/5").await;

    assert!(response.error().is_none());
    assert_eq!(response.data(), Some(&Created { id: 5 }));
}

#[tokio::test]
async fn test_cancellation_bypasses_policy() {
    let transport = Scripted::default();
    let asked = Arc::new(AtomicUsize::new(0));
    let client = client(&transport)
        .retry_policy(Counting {
            max: 5,
            delay: Duration::ZERO,
            asked: asked.clone(),
        })
        .build()
        .unwrap();

    let handle = client.send(Request::<Created>::get("hang"));
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!handle.is_finished());
    handle.cancel();

    let response = handle.await.unwrap();
    assert_eq!(response.error(), Some(&Error::Cancelled));
    assert_eq!(response.attempts(), 1);
    assert_eq!(asked.load(Ordering::SeqCst), 0);
    assert_eq!(transport.opened(), 1);
}

#[tokio::test]
async fn test_cancellation_during_retry_delay() {
    let transport = Scripted::new([failed(TransportErrorKind::Connect)]);
    let client = client(&transport)
        .retry_policy(Counting {
            max: 3,
            delay: Duration::from_secs(30),
            asked: Arc::new(AtomicUsize::new(0)),
        })
        .build()
        .unwrap();

    let handle = client.send(Request::<Created>::get("items"));
    let token = handle.cancellation_token();
    tokio::time::sleep(Duration::from_millis(50)).await;
    token.cancel();

    let response = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("cancellation should end the retry delay")
        .unwrap();
    assert_eq!(response.error(), Some(&Error::Cancelled));
    assert_eq!(transport.opened(), 1);
    assert_eq!(response.url().map(|u| u.path()), Some("/v1/items"));
}

#[tokio::test]
async fn test_client_timeout_applies_per_attempt() {
    let transport = Scripted::default();
    let client = client(&transport)
        .timeout(Duration::from_millis(30))
        .retry_policy(
            StandardRetryPolicy::builder()
                .max_retry_count(2)
                .backoff(Backoff::None)
                .build(),
        )
        .build()
        .unwrap();

    let response = client.get::<Created>("slow").await;

    assert_eq!(transport.opened(), 2);
    assert!(response.error().is_some_and(Error::is_timeout));
    assert!(matches!(
        response.error(),
        Some(Error::NoRetryBudget { attempts: 2, .. })
    ));
}

#[tokio::test]
async fn test_stream_without_terminal_event_fails() {
    let transport = Scripted::new([vec![chunk("partial")]]);
    let client = client(&transport).build().unwrap();

    let response = client.get::<String>("cut").await;

    assert_eq!(response.status(), None);
    assert_eq!(response.raw_string(), "partial");
    assert_eq!(
        response
            .error()
            .and_then(Error::transport_error)
            .map(|e| e.kind()),
        Some(TransportErrorKind::Protocol)
    );
}

struct Lines;

impl Deserializer for Lines {
    fn deserialize(&self, bytes: &[u8]) -> Result<Value, DeserializationError> {
        let text =
            std::str::from_utf8(bytes).map_err(|e| DeserializationError::new(e.to_string()))?;
        Ok(Value::Array(
            text.lines().map(|line| Value::String(line.to_owned())).collect(),
        ))
    }
}

#[tokio::test]
async fn test_registered_deserializer_is_dispatched() {
    let transport = Scripted::new([vec![
        head(200, Some("Text/Lines; charset=utf-8")),
        chunk("alpha\nbeta\n"),
        TransportEvent::Completed,
    ]]);
    let client = client(&transport)
        .register_deserializer("text/lines", Lines)
        .build()
        .unwrap();

    let response = client.get::<Vec<String>>("names").await;

    assert_eq!(
        response.data(),
        Some(&vec!["alpha".to_string(), "beta".to_string()])
    );
}

#[tokio::test]
async fn test_missing_content_type_is_sniffed() {
    let transport = Scripted::new([
        vec![head(200, None), chunk("[1, 2, 3]"), TransportEvent::Completed],
        vec![head(200, None), chunk("plain words"), TransportEvent::Completed],
    ]);
    let client = client(&transport).build().unwrap();

    let numbers = client.get::<Vec<u32>>("numbers").await;
    assert_eq!(numbers.data(), Some(&vec![1, 2, 3]));

    let words = client.get::<Vec<u32>>("words").await;
    assert_eq!(words.output(), Some(&Output::Text("plain words".to_string())));
}

#[tokio::test]
async fn test_wire_form_of_request() {
    let transport = Scripted::new([vec![head(204, None), TransportEvent::Completed]]);
    let client = client(&transport)
        .default_header("X-Token", "default")
        .unwrap()
        .build()
        .unwrap();

    let request = Request::<Value>::put("https://other.test/upload")
        .with_body_string("from string")
        .with_body_bytes(&b"from bytes"[..])
        .with_content_type("application/octet-stream")
        .with_header("X-Token", "first")
        .unwrap()
        .with_header("x-token", "second")
        .unwrap();
    client.execute(request).await.unwrap();

    let sent = &transport.captured()[0];
    assert_eq!(sent.method, http::Method::PUT);
    assert_eq!(sent.uri, "https://other.test/upload");
    assert_eq!(sent.body.as_ref(), b"from bytes");
    assert_eq!(sent.headers[CONTENT_TYPE], "application/octet-stream");
    let tokens: Vec<_> = sent.headers.get_all("x-token").iter().collect();
    assert_eq!(tokens, vec!["second"]);
}

#[derive(Clone, Default)]
struct Recording {
    surfaced: Arc<Mutex<Vec<(String, Option<u16>, usize)>>>,
}

impl ErrorHandler for Recording {
    fn should_surface_error(&self, outcome: &Outcome<'_>) -> bool {
        outcome.is_failure() && !matches!(outcome.error, Some(Error::Cancelled))
    }

    fn surface_error(&self, outcome: &Outcome<'_>) {
        self.surfaced.lock().unwrap().push((
            outcome.path.to_owned(),
            outcome.status.map(|s| s.as_u16()),
            outcome.attempts,
        ));
    }
}

/// Surfaces server errors with the `message` field of their JSON body.
#[derive(Clone, Default)]
struct BodyMessages {
    asked: Arc<AtomicUsize>,
    surfaced: Arc<Mutex<Vec<String>>>,
}

impl ErrorHandler for BodyMessages {
    fn should_surface_error(&self, outcome: &Outcome<'_>) -> bool {
        self.asked.fetch_add(1, Ordering::SeqCst);
        outcome.status.is_some_and(|s| s.is_server_error())
    }

    fn error_message(&self, outcome: &Outcome<'_>) -> String {
        serde_json::from_slice::<Value>(outcome.raw_bytes)
            .ok()
            .and_then(|body| body["message"].as_str().map(str::to_owned))
            .unwrap_or_else(|| outcome.raw_string.to_owned())
    }

    fn surface_error(&self, outcome: &Outcome<'_>) {
        let message = self.error_message(outcome);
        self.surfaced.lock().unwrap().push(message);
    }
}

#[tokio::test]
async fn test_server_error_without_retry_is_surfaced_from_body() {
    let transport = Scripted::new([vec![
        head(500, Some("application/json")),
        chunk(r#"{"message":"db down"}"#),
        TransportEvent::Completed,
    ]]);
    let handler = BodyMessages::default();
    let client = client(&transport)
        .error_handler(handler.clone())
        .build()
        .unwrap();

    let response = client.get::<Value>("jobs").await;

    assert_eq!(response.status(), Some(StatusCode::INTERNAL_SERVER_ERROR));
    assert!(response.error().is_none());
    assert_eq!(handler.asked.load(Ordering::SeqCst), 1);
    assert_eq!(*handler.surfaced.lock().unwrap(), vec!["db down".to_string()]);
}

#[tokio::test]
async fn test_error_handler_is_asked_about_successes() {
    let transport = Scripted::new([json_ok(r#"{"id":2}"#)]);
    let handler = BodyMessages::default();
    let client = client(&transport)
        .error_handler(handler.clone())
        .build()
        .unwrap();

    let response = client.get::<Created>("items/2").await;

    assert!(response.is_success());
    assert_eq!(handler.asked.load(Ordering::SeqCst), 1);
    assert!(handler.surfaced.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_error_handler_sees_failures_only() {
    let transport = Scripted::new([
        json_ok(r#"{"id":1}"#),
        vec![head(503, None), chunk("down"), TransportEvent::Completed],
    ]);
    let recording = Recording::default();
    let client = client(&transport)
        .retry_policy(StandardRetryPolicy::builder().max_retry_count(1).build())
        .error_handler(recording.clone())
        .build()
        .unwrap();

    let ok = client.get::<Created>("fine").await;
    assert!(ok.is_success());
    let failed = client.get::<Created>("broken").await;
    assert_eq!(failed.raw_string(), "down");

    let surfaced = recording.surfaced.lock().unwrap();
    assert_eq!(*surfaced, vec![("broken".to_string(), Some(503), 1)]);
}

#[tokio::test]
async fn test_concurrent_requests_share_client() {
    let transport = Scripted::new((0..8).map(|_| json_ok(r#"{"id":8}"#)));
    let client = client(&transport).build().unwrap();

    let handles: Vec<_> = (0..8)
        .map(|i| client.send(Request::<Created>::get(format!("items/{}", i))))
        .collect();

    for handle in handles {
        let response = handle.await.unwrap();
        assert_eq!(response.data(), Some(&Created { id: 8 }));
    }
    assert_eq!(transport.opened(), 8);
}
