//! Demo origin server for exercising the load balancer locally.
//!
//! Run a few of these on different ports, point `config.json` at them,
//! and watch the dashboard spread traffic.

use anyhow::{Context, Result};
use bytes::Bytes;
use clap::Parser;
use http_body_util::Full;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

use fulcrum::util::{init_logging, LogFormat};

/// Minimal HTTP origin that identifies itself in every response.
#[derive(Parser, Debug)]
#[command(name = "origin")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Port to listen on
    #[arg(short, long, default_value_t = 5001)]
    port: u16,

    /// Name reported in responses
    #[arg(short, long, default_value = "origin")]
    name: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging("info", LogFormat::Pretty);

    let addr = SocketAddr::from(([127, 0, 0, 1], cli.port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind origin on {addr}"))?;

    let name = Arc::new(cli.name);
    let port = cli.port;

    info!(name = %name, listen = %addr, "origin listening");

    loop {
        let (stream, client_addr) = listener
            .accept()
            .await
            .context("failed to accept connection")?;
        let name = Arc::clone(&name);

        tokio::spawn(async move {
            let io = TokioIo::new(stream);
            let service = service_fn(move |req: Request<hyper::body::Incoming>| {
                let name = Arc::clone(&name);
                async move {
                    info!(
                        name = %name,
                        client = %client_addr,
                        method = %req.method(),
                        path = %req.uri().path(),
                        "received request"
                    );

                    let body = format!("Hello from {name} (port {port})\n");
                    Ok::<_, Infallible>(Response::new(Full::new(Bytes::from(body))))
                }
            });

            let _ = http1::Builder::new().serve_connection(io, service).await;
        });
    }
}
