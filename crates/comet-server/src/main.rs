//! comet-server binary: configuration, telemetry, startup and shutdown.

use std::time::Duration;

use clap::Parser;
use comet_server::{scheduler, CometServer, ServerConfig};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "comet-server", about = "WebSocket + long-poll message gateway")]
struct Args {
    /// Host to bind.
    #[arg(long, default_value = "127.0.0.1")]
    host: String,

    /// Port to listen on (0 = auto-assign).
    #[arg(long, default_value_t = 8610)]
    port: u16,

    /// Log level (trace, debug, info, warn, error). Overridden by RUST_LOG.
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Path to a JSON config file; flags override host and port.
    #[arg(long)]
    config: Option<std::path::PathBuf>,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(args.log_level.clone()));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let mut config = match &args.config {
        Some(path) => {
            let raw = std::fs::read_to_string(path).expect("failed to read config file");
            serde_json::from_str::<ServerConfig>(&raw).expect("failed to parse config file")
        }
        None => ServerConfig::default(),
    };
    config.host = args.host;
    config.port = args.port;
    if let Err(e) = config.engine.validate() {
        eprintln!("invalid configuration: {e}");
        std::process::exit(2);
    }

    let metrics_handle = comet_server::metrics::install_recorder();
    let server = CometServer::new(config.clone(), metrics_handle);

    let (addr, server_handle) = server.listen().await.expect("failed to bind");
    tracing::info!(addr = %addr, "comet gateway ready");

    let scheduler_handle = tokio::spawn(scheduler::run_scheduler(
        server.registry().clone(),
        config.tick_interval(),
        server.shutdown().token(),
    ));
    server.shutdown().register_task(scheduler_handle);
    server.shutdown().register_task(server_handle);

    wait_for_signal().await;
    tracing::info!("shutdown signal received");

    server
        .shutdown()
        .graceful_shutdown(Some(Duration::from_secs(10)))
        .await;
}

async fn wait_for_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut term = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = term.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}
