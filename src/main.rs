//! fulcrum - A Layer-7 HTTP reverse proxy and load balancer
//!
//! Usage:
//!     fulcrum --config config.json
//!
//! See --help for more options.

use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

use fulcrum::config::load_config;
use fulcrum::dashboard::{DashboardServer, DASHBOARD_PORT};
use fulcrum::frontend::LbListener;
use fulcrum::health::{Breaker, Prober};
use fulcrum::pool::{Backend, BackendPool};
use fulcrum::proxy::Dispatcher;
use fulcrum::util::{init_logging, LogFormat, ShutdownSignal};

/// A Layer-7 HTTP reverse proxy and load balancer.
#[derive(Parser, Debug)]
#[command(name = "fulcrum")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the configuration file
    #[arg(short, long, value_name = "FILE", default_value = "config.json")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL", default_value = "info")]
    log_level: String,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Pretty)]
    log_format: LogFormat,

    /// Validate configuration and exit
    #[arg(long)]
    validate: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    init_logging(&cli.log_level, cli.log_format);

    let config = load_config(&cli.config).with_context(|| {
        format!(
            "failed to load configuration from '{}'",
            cli.config.display()
        )
    })?;

    if cli.validate {
        println!("Configuration is valid.");
        println!("  LB port: {}", config.lb_port);
        println!("  Backends: {}", config.backends.len());
        for entry in &config.backends {
            let resolved = entry.resolve()?;
            println!(
                "    - {} -> {} [weight {}]",
                resolved.name, resolved.url, resolved.weight
            );
        }
        return Ok(());
    }

    // Build the pool once; a backend with weight w occupies w slots.
    let mut pool = BackendPool::new();
    for entry in &config.backends {
        let resolved = entry.resolve().context("invalid backend configuration")?;
        info!(
            name = %resolved.name,
            url = %resolved.url,
            weight = resolved.weight,
            "configured backend"
        );
        pool.add(
            Arc::new(Backend::new(resolved.name, resolved.url)),
            resolved.weight,
        );
    }
    let pool = Arc::new(pool);

    let shutdown = ShutdownSignal::new();
    let breaker = Breaker::new(Arc::clone(&pool));
    let dispatcher = Dispatcher::new(Arc::clone(&pool), breaker);

    tokio::spawn(Prober::new(Arc::clone(&pool)).run(shutdown.subscribe()));

    info!(port = DASHBOARD_PORT, "starting dashboard");
    tokio::spawn(DashboardServer::new(Arc::clone(&pool)).run(shutdown.subscribe()));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.lb_port));
    let listener = LbListener::bind(addr, dispatcher)
        .await
        .with_context(|| format!("failed to bind load balancer listener on {addr}"))?;

    info!(
        listen = %addr,
        backends = pool.backends().len(),
        slots = pool.slot_count(),
        "fulcrum is running"
    );

    let serving = tokio::spawn(listener.run(shutdown.subscribe()));

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("received shutdown signal"),
        Err(e) => error!(error = %e, "failed to listen for shutdown signal"),
    }

    shutdown.trigger();
    let _ = serving.await;

    info!("fulcrum shut down");
    Ok(())
}
