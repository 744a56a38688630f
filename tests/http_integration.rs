//! HTTP frontend integration tests
//!
//! Drives the axum router through `tower::ServiceExt::oneshot` with the
//! in-memory remote, and runs one live server to check the self-ping chain.

use a3s_relay::{
    build_app, AppState, HttpPinger, KeepaliveScheduler, MemoryConnector, Pinger, RelaySession,
    Result,
};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tower::ServiceExt;

struct ChannelPinger {
    tx: mpsc::UnboundedSender<String>,
}

#[async_trait]
impl Pinger for ChannelPinger {
    async fn ping(&self, url: &str) -> Result<()> {
        let _ = self.tx.send(url.to_string());
        Ok(())
    }
}

struct Harness {
    app: Router,
    state: AppState,
    connector: MemoryConnector,
    pings: mpsc::UnboundedReceiver<String>,
}

fn harness(period_secs: f64) -> Harness {
    let connector = MemoryConnector::new();
    let session = Arc::new(RelaySession::new(connector.clone()));
    let (tx, pings) = mpsc::unbounded_channel();
    let keepalive = Arc::new(KeepaliveScheduler::new(period_secs, ChannelPinger { tx }));
    let state = AppState::new(session, keepalive);

    Harness {
        app: build_app(state.clone()),
        state,
        connector,
        pings,
    }
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, axum::http::HeaderMap, String) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, headers, String::from_utf8(body.to_vec()).unwrap())
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header(header::HOST, "relay.test")
        .body(Body::empty())
        .unwrap()
}

fn post_json(body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn post_form(body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/configure")
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body(Body::from(body.to_string()))
        .unwrap()
}

// ─── Health & status ─────────────────────────────────────────────

#[tokio::test]
async fn test_health_is_constant() {
    let h = harness(0.0);
    let (status, _, body) = send(&h.app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "App is running fine :)");
}

#[tokio::test]
async fn test_status_page_unconfigured() {
    let h = harness(0.0);
    let (status, headers, body) = send(&h.app, get("/")).await;

    assert_eq!(status, StatusCode::OK);
    assert!(headers[header::CONTENT_TYPE]
        .to_str()
        .unwrap()
        .starts_with("text/html"));
    assert!(body.contains("unconfigured"));
    assert!(body.contains("relay.test"));
    assert!(body.contains("action=\"/configure\""));
}

// ─── Configure & webhook ─────────────────────────────────────────

#[tokio::test]
async fn test_webhook_before_configure_is_server_error() {
    let h = harness(0.0);
    let (status, _, body) = send(&h.app, post_json(r#"{"text":"hi"}"#)).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body.contains("unconfigured"));
}

#[tokio::test]
async fn test_configure_then_echo() {
    let h = harness(0.0);

    let (status, headers, _) = send(
        &h.app,
        post_form("url=https%3A%2F%2Frelay.example.com%2F&token=123%3AABC"),
    )
    .await;
    assert_eq!(status, StatusCode::SEE_OTHER);
    assert_eq!(headers[header::LOCATION], "/");
    assert!(h.state.session.is_running());
    assert_eq!(
        h.connector.endpoint().registrations(),
        vec!["https://relay.example.com/"]
    );

    let (_, _, page) = send(&h.app, get("/")).await;
    assert!(page.contains("running"));
    assert!(!page.contains("action=\"/configure\""));

    let update = r#"{"update_id":1,"message":{"message_id":2,"chat":{"id":3},"text":"hi"}}"#;
    let (status, _, body) = send(&h.app, post_json(update)).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.is_empty());

    let replies = h
        .connector
        .endpoint()
        .wait_for_replies(1, Duration::from_secs(5))
        .await;
    assert_eq!(replies[0].chat_id, 3);
    assert_eq!(replies[0].text, "hi");
}

#[tokio::test]
async fn test_configure_failure_shown_on_status_page() {
    let h = harness(0.0);
    h.connector.endpoint().set_fail_registration(true);

    let (status, _, _) = send(&h.app, post_form("url=http%3A%2F%2Fa&token=t")).await;
    assert_eq!(status, StatusCode::SEE_OTHER);
    assert!(!h.state.session.is_running());

    let (_, _, page) = send(&h.app, get("/")).await;
    assert!(page.contains("Configuration failed"));

    h.connector.endpoint().set_fail_registration(false);
    send(&h.app, post_form("url=http%3A%2F%2Fa&token=t&passphrase=")).await;
    let (_, _, page) = send(&h.app, get("/")).await;
    assert!(!page.contains("Configuration failed"));
    assert!(h.state.last_error().is_none());
}

#[tokio::test]
async fn test_webhook_rejects_non_json() {
    let h = harness(0.0);
    send(&h.app, post_form("url=http%3A%2F%2Fa&token=t")).await;

    let (status, _, _) = send(&h.app, post_json("not json")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

// ─── Keepalive ───────────────────────────────────────────────────

#[tokio::test]
async fn test_ping_arms_with_request_url() {
    let mut h = harness(0.05);

    let (status, _, body) = send(&h.app, get("/ping")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.is_empty());
    assert!(h.state.keepalive.is_armed());

    let url = tokio::time::timeout(Duration::from_secs(5), h.pings.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(url, "http://relay.test/ping");
}

#[tokio::test]
async fn test_ping_with_keepalive_disabled() {
    let mut h = harness(0.0);
    let (status, _, _) = send(&h.app, get("/ping")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(!h.state.keepalive.is_armed());

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(h.pings.try_recv().is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_live_self_ping_chain() {
    let connector = MemoryConnector::new();
    let session = Arc::new(RelaySession::new(connector));
    let keepalive = Arc::new(KeepaliveScheduler::new(
        0.05,
        HttpPinger::new(Duration::from_secs(2)),
    ));

    let hits = Arc::new(AtomicUsize::new(0));
    let counter = hits.clone();
    let app = build_app(AppState::new(session, keepalive.clone())).layer(
        axum::middleware::from_fn(move |req: axum::extract::Request, next: axum::middleware::Next| {
            let counter = counter.clone();
            async move {
                if req.uri().path() == "/ping" {
                    counter.fetch_add(1, Ordering::SeqCst);
                }
                next.run(req).await
            }
        }),
    );

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    reqwest::get(format!("http://{}/ping", addr))
        .await
        .unwrap()
        .error_for_status()
        .unwrap();

    // Each fired ping lands on /ping and re-arms the next one
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert!(
        hits.load(Ordering::SeqCst) >= 3,
        "chain should have hopped several times, saw {}",
        hits.load(Ordering::SeqCst)
    );

    keepalive.shutdown().await;
    let after_shutdown = hits.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(hits.load(Ordering::SeqCst), after_shutdown);
    assert!(!keepalive.is_armed());

    server.abort();
}
