//! Conduit demo server.
//!
//! Serves the correlation-echo service: every request must carry
//! `X-Request-ID`, which is carried through the request context and echoed
//! back.
//!
//! ```text
//! conduit [--config conduit.toml] [--bind 0.0.0.0:8080]
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use conduit::config::{load_config, RuntimeConfig};
use conduit::demo::correlation_service;
use conduit::execution::{Executor, IoExecutor, WorkerExecutor};
use conduit::lifecycle::signals::shutdown_signal;
use conduit::observability::{logging, metrics};
use conduit::transport::tls;
use conduit::HttpServer;

#[derive(Debug, Parser)]
#[command(name = "conduit")]
#[command(about = "HTTP/1.1 and HTTP/2 server with offloaded request stages", long_about = None)]
struct Cli {
    /// TOML configuration file; defaults apply when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override `server.bind_address`.
    #[arg(short, long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => load_config(path)?,
        None => RuntimeConfig::default(),
    };
    if let Some(bind) = cli.bind {
        config.server.bind_address = bind;
    }

    logging::init(&config.observability)?;
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "conduit starting");

    tracing::info!(
        bind_address = %config.server.bind_address,
        max_connections = config.server.max_connections,
        strategy = %config.server.strategy,
        io_threads = config.io.threads,
        worker_threads = config.executor.threads,
        "Configuration loaded"
    );

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr)?,
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let io = Arc::new(IoExecutor::new(&config.io)?);
    let worker: Arc<dyn Executor> = Arc::new(WorkerExecutor::new(&config.executor)?);

    let mut server = HttpServer::new(
        config.server.clone(),
        Arc::clone(&io),
        Arc::clone(&worker),
        correlation_service(),
    );
    if let Some(tls_config) = &config.server.tls {
        server = server.with_tls(tls::load_server_config(tls_config)?);
    }
    let running = server.bind().await?;
    tracing::info!(address = %running.local_addr(), "Listening for connections");

    shutdown_signal().await;
    running.close().await;

    tracing::info!("Shutdown complete");
    Ok(())
}
