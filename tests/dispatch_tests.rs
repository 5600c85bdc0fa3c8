//! End-to-end dispatch tests.
//!
//! Each test stands up real origin servers on loopback ports and drives
//! the dispatcher directly, checking what the client sees and what the
//! counters record.

use bytes::Bytes;
use fulcrum::health::Breaker;
use fulcrum::pool::{Backend, BackendPool};
use fulcrum::proxy::Dispatcher;
use http_body_util::{BodyExt, Full};
use hyper::{Request, Response, StatusCode};
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpListener};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;
use url::Url;

/// Spawn a plain HTTP origin that always answers with the given status
/// line and body, counting the requests it serves.
fn start_origin(status_line: &'static str, body: &'static str) -> (SocketAddr, Arc<AtomicU32>) {
    let listener = TcpListener::bind("127.0.0.1:0").expect("failed to bind origin");
    let addr = listener.local_addr().unwrap();
    let hits = Arc::new(AtomicU32::new(0));
    let count = Arc::clone(&hits);

    thread::spawn(move || {
        for mut stream in listener.incoming().flatten() {
            count.fetch_add(1, Ordering::SeqCst);

            // Consume the request head; these tests send small requests.
            let mut buf = [0u8; 4096];
            let _ = stream.read(&mut buf);

            let response = format!(
                "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                status_line,
                body.len(),
                body
            );
            let _ = stream.write_all(response.as_bytes());
        }
    });

    (addr, hits)
}

/// A loopback address with nothing listening on it.
fn dead_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").expect("failed to bind");
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr
}

fn make_backend(name: &str, addr: SocketAddr) -> Arc<Backend> {
    Arc::new(Backend::new(
        name.to_string(),
        Url::parse(&format!("http://{addr}")).unwrap(),
    ))
}

fn make_dispatcher(backends: &[Arc<Backend>]) -> (Dispatcher, Arc<BackendPool>) {
    let mut pool = BackendPool::new();
    for backend in backends {
        pool.add(Arc::clone(backend), 1);
    }
    let pool = Arc::new(pool);
    let breaker = Breaker::new(Arc::clone(&pool));
    (Dispatcher::new(Arc::clone(&pool), breaker), pool)
}

fn get_request() -> Request<Full<Bytes>> {
    Request::builder()
        .uri("/")
        .header("host", "fulcrum.test")
        .body(Full::new(Bytes::new()))
        .unwrap()
}

fn client_addr() -> SocketAddr {
    "127.0.0.1:40000".parse().unwrap()
}

async fn body_string(response: Response<fulcrum::proxy::ProxiedBody>) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8_lossy(&bytes).to_string()
}

#[tokio::test]
async fn test_proxies_to_live_origin() {
    let (addr, hits) = start_origin("200 OK", "hello from a");
    let a = make_backend("a", addr);
    let (dispatcher, _pool) = make_dispatcher(&[Arc::clone(&a)]);

    let response = dispatcher.dispatch(get_request(), client_addr()).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, "hello from a");
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    assert_eq!(a.total_requests(), 1);
    assert_eq!(a.failed_requests(), 0);
    assert_eq!(a.active_connections(), 0);
    assert!(a.is_alive());
}

#[tokio::test]
async fn test_transport_failover() {
    // A refuses connections, B serves. The client must still get a 200.
    let a = make_backend("a", dead_addr());
    let (addr_b, hits_b) = start_origin("200 OK", "hello from b");
    let b = make_backend("b", addr_b);
    let (dispatcher, _pool) = make_dispatcher(&[Arc::clone(&a), Arc::clone(&b)]);

    let response = dispatcher.dispatch(get_request(), client_addr()).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, "hello from b");
    assert_eq!(hits_b.load(Ordering::SeqCst), 1);

    assert_eq!(a.failed_requests(), 1);
    assert!(!a.is_alive());
    assert_eq!(b.total_requests(), 1);
    assert!(b.is_alive());

    // The retry rides the original guard; nothing leaks either way.
    assert_eq!(a.active_connections(), 0);
    assert_eq!(b.active_connections(), 0);
}

#[tokio::test]
async fn test_exhausted_retries() {
    // Every backend refuses connections.
    let a = make_backend("a", dead_addr());
    let b = make_backend("b", dead_addr());
    let c = make_backend("c", dead_addr());
    let (dispatcher, _pool) =
        make_dispatcher(&[Arc::clone(&a), Arc::clone(&b), Arc::clone(&c)]);

    let response = dispatcher.dispatch(get_request(), client_addr()).await;

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body_string(response).await, "[all backends failed]");

    for backend in [&a, &b, &c] {
        assert_eq!(backend.failed_requests(), 1);
        assert_eq!(backend.total_requests(), 1);
        assert!(!backend.is_alive());
        assert_eq!(backend.active_connections(), 0);
    }
}

#[tokio::test]
async fn test_server_error_streams_without_retry() {
    // A received 5xx is authoritative: it reaches the client and feeds
    // the breaker, but is never retried.
    let (addr, hits) = start_origin("500 Internal Server Error", "boom");
    let a = make_backend("a", addr);
    let (dispatcher, _pool) = make_dispatcher(&[Arc::clone(&a)]);

    let response = dispatcher.dispatch(get_request(), client_addr()).await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body_string(response).await, "boom");
    assert_eq!(hits.load(Ordering::SeqCst), 1);

    assert_eq!(a.failed_requests(), 0);
    assert_eq!(a.consecutive_failures(), 1);
    assert!(a.is_alive());
}

#[tokio::test]
async fn test_breaker_trips_through_dispatcher() {
    let (addr, hits) = start_origin("500 Internal Server Error", "boom");
    let a = make_backend("a", addr);
    let (dispatcher, _pool) = make_dispatcher(&[Arc::clone(&a)]);

    for _ in 0..3 {
        let response = dispatcher.dispatch(get_request(), client_addr()).await;
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        // Drain the body so the connection guard releases.
        let _ = body_string(response).await;
    }

    assert_eq!(hits.load(Ordering::SeqCst), 3);
    assert_eq!(a.consecutive_failures(), 3);
    assert!(!a.is_alive());

    // With the only backend dead, the next request is refused up front.
    let response = dispatcher.dispatch(get_request(), client_addr()).await;
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body_string(response).await, "Service not available");
    assert_eq!(hits.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_request_body_reaches_origin() {
    // An origin that echoes back whatever bytes follow the blank line.
    let listener = TcpListener::bind("127.0.0.1:0").expect("failed to bind origin");
    let addr = listener.local_addr().unwrap();

    thread::spawn(move || {
        for mut stream in listener.incoming().flatten() {
            let mut buf = vec![0u8; 8192];
            let n = stream.read(&mut buf).unwrap_or(0);
            let request = String::from_utf8_lossy(&buf[..n]).to_string();
            let payload = request
                .split_once("\r\n\r\n")
                .map(|(_, body)| body.to_string())
                .unwrap_or_default();

            let response = format!(
                "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                payload.len(),
                payload
            );
            let _ = stream.write_all(response.as_bytes());
        }
    });

    let a = make_backend("a", addr);
    let (dispatcher, _pool) = make_dispatcher(&[a]);

    let req = Request::builder()
        .method("POST")
        .uri("/submit")
        .header("host", "fulcrum.test")
        .header("content-length", "7")
        .body(Full::new(Bytes::from_static(b"payload")))
        .unwrap();

    let response = dispatcher.dispatch(req, client_addr()).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_string(response).await, "payload");
}

#[tokio::test]
async fn test_counters_balance_across_sequential_requests() {
    let (addr_a, _) = start_origin("200 OK", "a");
    let (addr_b, _) = start_origin("200 OK", "b");
    let a = make_backend("a", addr_a);
    let b = make_backend("b", addr_b);
    let (dispatcher, _pool) = make_dispatcher(&[Arc::clone(&a), Arc::clone(&b)]);

    let total = 6;
    for _ in 0..total {
        let response = dispatcher.dispatch(get_request(), client_addr()).await;
        assert_eq!(response.status(), StatusCode::OK);
        let _ = body_string(response).await;
    }

    // All healthy: every accepted request is counted exactly once and
    // nothing fails.
    assert_eq!(a.total_requests() + b.total_requests(), total);
    assert_eq!(a.failed_requests() + b.failed_requests(), 0);
    assert_eq!(a.active_connections(), 0);
    assert_eq!(b.active_connections(), 0);
}
