//! Introspection HTTP server.
//!
//! Serves live backend state on a fixed out-of-band port:
//! `GET /?format=json` returns the JSON snapshot array (the stable
//! contract); anything else gets a self-refreshing HTML view.

use crate::dashboard::snapshot::{snapshot, BackendSnapshot};
use crate::pool::BackendPool;
use bytes::Bytes;
use http_body_util::Full;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{debug, error, info};

/// Fixed port for the introspection endpoint.
pub const DASHBOARD_PORT: u16 = 8081;

/// Dashboard HTTP server over a read-only pool handle.
pub struct DashboardServer {
    pool: Arc<BackendPool>,
}

impl DashboardServer {
    pub fn new(pool: Arc<BackendPool>) -> Self {
        Self { pool }
    }

    /// Run the dashboard server until shutdown.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        let addr = SocketAddr::from(([0, 0, 0, 0], DASHBOARD_PORT));
        let listener = match TcpListener::bind(addr).await {
            Ok(listener) => listener,
            Err(e) => {
                error!(error = %e, address = %addr, "failed to bind dashboard server");
                return;
            }
        };

        info!(address = %addr, "dashboard server started");

        loop {
            tokio::select! {
                accept_result = listener.accept() => {
                    match accept_result {
                        Ok((stream, _addr)) => {
                            let pool = Arc::clone(&self.pool);

                            tokio::spawn(async move {
                                let io = TokioIo::new(stream);
                                let service = service_fn(move |req| {
                                    let pool = Arc::clone(&pool);
                                    async move { handle_request(req, &pool) }
                                });

                                if let Err(e) = http1::Builder::new()
                                    .serve_connection(io, service)
                                    .await
                                {
                                    debug!(error = %e, "dashboard connection error");
                                }
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "failed to accept dashboard connection");
                        }
                    }
                }

                _ = shutdown.recv() => {
                    info!("dashboard server shutting down");
                    break;
                }
            }
        }
    }
}

/// Handle one dashboard request.
fn handle_request(
    req: Request<hyper::body::Incoming>,
    pool: &BackendPool,
) -> Result<Response<Full<Bytes>>, Infallible> {
    if req.method() != Method::GET {
        return Ok(Response::builder()
            .status(StatusCode::METHOD_NOT_ALLOWED)
            .body(Full::new(Bytes::from("Method not allowed\n")))
            .unwrap());
    }

    let snapshots = snapshot(pool);

    let response = if wants_json(req.uri().query()) {
        match serde_json::to_vec(&snapshots) {
            Ok(body) => Response::builder()
                .status(StatusCode::OK)
                .header("content-type", "application/json")
                .body(Full::new(Bytes::from(body)))
                .unwrap(),
            Err(e) => {
                error!(error = %e, "failed to encode snapshot");
                Response::builder()
                    .status(StatusCode::INTERNAL_SERVER_ERROR)
                    .body(Full::new(Bytes::from("Failed to encode snapshot\n")))
                    .unwrap()
            }
        }
    } else {
        Response::builder()
            .status(StatusCode::OK)
            .header("content-type", "text/html; charset=utf-8")
            .body(Full::new(Bytes::from(render_html(&snapshots))))
            .unwrap()
    };

    Ok(response)
}

/// True when the query string selects the JSON form.
fn wants_json(query: Option<&str>) -> bool {
    query.is_some_and(|q| q.split('&').any(|pair| pair == "format=json"))
}

/// Render the HTML dashboard. The layout is informational only; the
/// JSON form is the contract.
fn render_html(snapshots: &[BackendSnapshot]) -> String {
    let mut rows = String::new();

    for snap in snapshots {
        let badge = if snap.alive {
            r#"<span class="badge up">UP</span>"#
        } else {
            r#"<span class="badge down">DOWN</span>"#
        };

        rows.push_str(&format!(
            "<tr><td>{}</td><td>{}</td><td>{}</td>\
             <td>{}</td><td>{}</td><td>{}</td><td>{:.2}%</td></tr>\n",
            escape_html(&snap.name),
            escape_html(&snap.url),
            badge,
            snap.active_connections,
            snap.total_requests,
            snap.failed_requests,
            snap.error_rate(),
        ));
    }

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta http-equiv="refresh" content="2">
<title>fulcrum</title>
<style>
body {{ font-family: monospace; background: #10141c; color: #d8dee9; padding: 24px; }}
h1 {{ border-bottom: 2px solid #d8dee9; padding-bottom: 8px; }}
table {{ border-collapse: collapse; width: 100%; }}
th, td {{ text-align: left; padding: 6px 14px; border-bottom: 1px solid #2c3442; }}
.badge {{ padding: 2px 8px; border-radius: 4px; font-weight: bold; }}
.up {{ color: #57d993; border: 1px solid #57d993; }}
.down {{ color: #e06c75; border: 1px solid #e06c75; }}
.footer {{ margin-top: 24px; color: #6b7686; }}
a {{ color: #61afef; }}
</style>
</head>
<body>
<h1>fulcrum</h1>
<table>
<tr><th>Backend</th><th>URL</th><th>Status</th>
<th>Active</th><th>Total</th><th>Failed</th><th>Error rate</th></tr>
{rows}</table>
<div class="footer"><a href="?format=json">View raw JSON</a></div>
</body>
</html>
"#
    )
}

fn escape_html(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
