//! Load balancer listener.
//!
//! Accepts client connections and serves each over HTTP/1.1, handing
//! every request to the dispatcher.

use crate::proxy::Dispatcher;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::SocketAddr;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Frontend listener that accepts client connections.
pub struct LbListener {
    listener: TcpListener,
    dispatcher: Dispatcher,
}

impl LbListener {
    /// Bind the listening socket.
    pub async fn bind(addr: SocketAddr, dispatcher: Dispatcher) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;

        info!(listen = %addr, "load balancer listener bound");

        Ok(Self {
            listener,
            dispatcher,
        })
    }

    /// The bound address, useful when binding port 0.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until shutdown.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        loop {
            tokio::select! {
                accept_result = self.listener.accept() => {
                    match accept_result {
                        Ok((stream, client_addr)) => {
                            self.handle_connection(stream, client_addr);
                        }
                        Err(e) => {
                            error!(error = %e, "failed to accept connection");
                        }
                    }
                }

                _ = shutdown.recv() => {
                    info!("load balancer listener shutting down");
                    break;
                }
            }
        }
    }

    /// Serve one client connection on its own task.
    fn handle_connection(&self, stream: TcpStream, client_addr: SocketAddr) {
        if let Err(e) = stream.set_nodelay(true) {
            warn!(error = %e, "failed to set TCP_NODELAY on client connection");
        }

        let dispatcher = self.dispatcher.clone();

        tokio::spawn(async move {
            let io = TokioIo::new(stream);
            let service = service_fn(move |req| {
                let dispatcher = dispatcher.clone();
                async move { Ok::<_, Infallible>(dispatcher.dispatch(req, client_addr).await) }
            });

            if let Err(e) = http1::Builder::new()
                .keep_alive(true)
                .serve_connection(io, service)
                .await
            {
                debug!(client = %client_addr, error = %e, "client connection ended with error");
            }
        });
    }
}
