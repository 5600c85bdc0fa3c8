//! HTTP/1.1 forwarding to a single origin.
//!
//! One call is one attempt against one backend. Everything that fails
//! before a status line arrives is a [`ForwardError`] and retryable by
//! the dispatcher; once a status has been received the response is
//! authoritative and streamed to the client as-is.

use crate::pool::Backend;
use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::header::{HeaderValue, CONNECTION, HOST, TRANSFER_ENCODING};
use hyper::http::request::Parts;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

/// Connect timeout for a forwarding attempt.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Transport-level forwarding error, raised before any status reached
/// the client.
#[derive(Debug, thiserror::Error)]
pub enum ForwardError {
    #[error("origin URL has no usable host")]
    InvalidOrigin,

    #[error("failed to connect to origin: {0}")]
    Connect(#[from] std::io::Error),

    #[error("connect to origin timed out")]
    ConnectTimeout,

    #[error("origin HTTP error: {0}")]
    Http(#[from] hyper::Error),
}

/// Forward one request attempt to `backend` and return its streamed
/// response.
///
/// The request line is rewritten to origin-form, `Host` is rewritten to
/// the origin, and the standard forwarding headers are added. The body
/// is the already-materialized inbound payload, replayable across
/// attempts.
pub async fn forward(
    backend: &Backend,
    parts: &Parts,
    body: Bytes,
) -> Result<Response<Incoming>, ForwardError> {
    let host = backend.url.host_str().ok_or(ForwardError::InvalidOrigin)?;
    let port = backend
        .url
        .port_or_known_default()
        .ok_or(ForwardError::InvalidOrigin)?;

    let stream = match timeout(CONNECT_TIMEOUT, TcpStream::connect((host, port))).await {
        Ok(Ok(stream)) => {
            let _ = stream.set_nodelay(true);
            stream
        }
        Ok(Err(e)) => return Err(ForwardError::Connect(e)),
        Err(_) => return Err(ForwardError::ConnectTimeout),
    };

    let io = TokioIo::new(stream);
    let (mut sender, conn) = hyper::client::conn::http1::handshake(io).await?;

    // Drive the connection; its errors surface through send_request.
    tokio::spawn(async move {
        if let Err(e) = conn.await {
            debug!(error = %e, "origin connection closed with error");
        }
    });

    let req = build_origin_request(backend, parts, body);
    let response = sender.send_request(req).await?;

    Ok(response)
}

/// Rebuild the client request for the origin: origin-form URI, rewritten
/// `Host`, forwarding headers, and the replayable body.
fn build_origin_request(backend: &Backend, parts: &Parts, body: Bytes) -> Request<Full<Bytes>> {
    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");

    let mut req = Request::new(Full::new(body));
    *req.method_mut() = parts.method.clone();
    *req.uri_mut() = path_and_query
        .parse()
        .unwrap_or_else(|_| "/".parse().unwrap());
    *req.headers_mut() = parts.headers.clone();

    let headers = req.headers_mut();

    let inbound_host = parts.headers.get(HOST).cloned();

    if let Ok(value) = HeaderValue::from_str(&origin_host(backend)) {
        headers.insert(HOST, value.clone());
        headers.insert("x-origin-host", value);
    }

    if let Some(value) = inbound_host {
        headers.insert("x-forwarded-host", value);
    }

    // Hop-by-hop headers do not survive re-framing: the body is sent
    // with a known length on a fresh connection.
    headers.remove(TRANSFER_ENCODING);
    headers.remove(CONNECTION);

    req
}

/// The origin's `Host` header value: host, plus the port when the URL
/// carries one explicitly.
fn origin_host(backend: &Backend) -> String {
    let host = backend.url.host_str().unwrap_or_default();
    match backend.url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    fn make_backend(url: &str) -> Backend {
        Backend::new("a".to_string(), Url::parse(url).unwrap())
    }

    fn inbound_parts(uri: &str, host: &str) -> Parts {
        let (parts, _body) = Request::builder()
            .uri(uri)
            .header("host", host)
            .header("user-agent", "fulcrum-test")
            .body(())
            .unwrap()
            .into_parts();
        parts
    }

    #[test]
    fn test_origin_request_rewrites_host_and_uri() {
        let backend = make_backend("http://10.0.0.1:9001");
        let parts = inbound_parts("/api/items?page=2", "fulcrum.example");

        let req = build_origin_request(&backend, &parts, Bytes::new());

        assert_eq!(req.uri(), "/api/items?page=2");
        assert_eq!(req.headers()[HOST], "10.0.0.1:9001");
        assert_eq!(req.headers()["x-origin-host"], "10.0.0.1:9001");
        assert_eq!(req.headers()["x-forwarded-host"], "fulcrum.example");
        assert_eq!(req.headers()["user-agent"], "fulcrum-test");
    }

    #[test]
    fn test_origin_host_omits_default_port() {
        let backend = make_backend("http://origin.internal");
        assert_eq!(origin_host(&backend), "origin.internal");

        let backend = make_backend("http://origin.internal:8080");
        assert_eq!(origin_host(&backend), "origin.internal:8080");
    }

    #[test]
    fn test_origin_request_defaults_empty_path() {
        let backend = make_backend("http://10.0.0.1:9001");
        let parts = inbound_parts("/", "fulcrum.example");

        let req = build_origin_request(&backend, &parts, Bytes::new());
        assert_eq!(req.uri(), "/");
    }

    #[test]
    fn test_origin_request_strips_hop_by_hop_headers() {
        let backend = make_backend("http://10.0.0.1:9001");
        let (parts, _body) = Request::builder()
            .uri("/")
            .header("host", "fulcrum.example")
            .header("transfer-encoding", "chunked")
            .header("connection", "keep-alive")
            .body(())
            .unwrap()
            .into_parts();

        let req = build_origin_request(&backend, &parts, Bytes::from_static(b"payload"));
        assert!(req.headers().get(TRANSFER_ENCODING).is_none());
        assert!(req.headers().get(CONNECTION).is_none());
    }
}
