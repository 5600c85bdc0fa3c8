//! Per-request dispatch: selection, accounting, and transport retries.
//!
//! The dispatcher picks the least-loaded live backend for each incoming
//! request and falls back to weighted round-robin when a transport
//! failure forces a rebind. Round-robin on retry guarantees forward
//! progress across the ring even when connection counters are skewed by
//! the failure itself.

use crate::health::Breaker;
use crate::pool::{BackendPool, ConnectionGuard};
use crate::proxy::forwarder;
use crate::util::RequestId;
use bytes::Bytes;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::{Body, Frame, SizeHint};
use hyper::{Request, Response, StatusCode};
use std::net::SocketAddr;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Upper bound on the per-request retry counter.
pub const MAX_ATTEMPTS: usize = 3;

/// Pause before rebinding a failed request to another backend.
const RETRY_BACKOFF: Duration = Duration::from_millis(10);

/// Selects a backend per request, keeps the counters honest, and
/// retries transport failures on another origin.
#[derive(Clone)]
pub struct Dispatcher {
    pool: Arc<BackendPool>,
    breaker: Breaker,
}

impl Dispatcher {
    pub fn new(pool: Arc<BackendPool>, breaker: Breaker) -> Self {
        Self { pool, breaker }
    }

    /// Handle one client request end to end.
    ///
    /// Retries are transport-only: once any status has been received
    /// from an origin it is streamed back verbatim, and 5xx handling is
    /// left to the breaker.
    pub async fn dispatch<B>(&self, req: Request<B>, client_addr: SocketAddr) -> Response<ProxiedBody>
    where
        B: Body,
    {
        let request_id = RequestId::next();
        let started = Instant::now();
        let method = req.method().clone();
        let path = req.uri().path().to_string();

        let Some(peer) = self.pool.next_least_connections() else {
            warn!(
                request_id = %request_id,
                client = %client_addr,
                "no live backends for incoming request"
            );
            return plain_response(StatusCode::SERVICE_UNAVAILABLE, "Service not available");
        };

        // The guard pairs this increment with exactly one decrement, on
        // whatever path the request leaves through. Retry attempts ride
        // the same guard; replacement peers are never counted.
        let guard = peer.begin_request();

        // Materialize the inbound body once so the request can be
        // replayed against a different backend after a transport
        // failure. Response bodies are never buffered.
        let (parts, body) = req.into_parts();
        let body = match body.collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(_) => {
                warn!(
                    request_id = %request_id,
                    client = %client_addr,
                    "failed to read request body from client"
                );
                return plain_response(StatusCode::BAD_REQUEST, "failed to read request body");
            }
        };

        let mut attempts: usize = 0;
        let mut target = Arc::clone(&peer);

        loop {
            match forwarder::forward(&target, &parts, body.clone()).await {
                Ok(response) => {
                    let status = response.status();
                    self.breaker.observe(target.url.as_str(), status.as_u16());

                    info!(
                        request_id = %request_id,
                        client = %client_addr,
                        backend = %target.name,
                        method = %method,
                        path = %path,
                        status = status.as_u16(),
                        duration_ms = started.elapsed().as_millis() as u64,
                        "request proxied"
                    );

                    let (head, incoming) = response.into_parts();
                    return Response::from_parts(
                        head,
                        ProxiedBody::streamed(incoming.boxed(), guard),
                    );
                }
                Err(e) => {
                    warn!(
                        request_id = %request_id,
                        backend = %target.name,
                        url = %target.url,
                        error = %e,
                        "transport error forwarding to backend"
                    );

                    target.record_failure();
                    self.pool.mark_status(target.url.as_str(), false);

                    if attempts >= MAX_ATTEMPTS {
                        return plain_response(
                            StatusCode::SERVICE_UNAVAILABLE,
                            "[all backends failed]",
                        );
                    }

                    // Backpressure against tight failure loops.
                    tokio::time::sleep(RETRY_BACKOFF).await;

                    let Some(next) = self.pool.next_round_robin() else {
                        return plain_response(
                            StatusCode::SERVICE_UNAVAILABLE,
                            "[all backends failed]",
                        );
                    };

                    attempts += 1;
                    next.record_request();

                    info!(
                        request_id = %request_id,
                        backend = %next.name,
                        attempt = attempts,
                        "retrying request on another backend"
                    );

                    target = next;
                }
            }
        }
    }
}

/// Response body returned by the dispatcher.
///
/// Wraps the streamed origin body (or a generated error body) together
/// with the originating backend's connection guard, so the
/// active-connections slot is released only when streaming finishes,
/// including when the client goes away mid-stream.
pub struct ProxiedBody {
    inner: BoxBody<Bytes, hyper::Error>,
    _guard: Option<ConnectionGuard>,
}

impl ProxiedBody {
    fn streamed(inner: BoxBody<Bytes, hyper::Error>, guard: ConnectionGuard) -> Self {
        Self {
            inner,
            _guard: Some(guard),
        }
    }

    fn fixed(bytes: Bytes) -> Self {
        Self {
            inner: Full::new(bytes).map_err(|never| match never {}).boxed(),
            _guard: None,
        }
    }
}

impl Body for ProxiedBody {
    type Data = Bytes;
    type Error = hyper::Error;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Bytes>, hyper::Error>>> {
        Pin::new(&mut self.inner).poll_frame(cx)
    }

    fn is_end_stream(&self) -> bool {
        self.inner.is_end_stream()
    }

    fn size_hint(&self) -> SizeHint {
        self.inner.size_hint()
    }
}

fn plain_response(status: StatusCode, message: &'static str) -> Response<ProxiedBody> {
    Response::builder()
        .status(status)
        .header("content-type", "text/plain")
        .body(ProxiedBody::fixed(Bytes::from_static(message.as_bytes())))
        .unwrap()
}
