//! Serve command implementation.

use crate::demo;
use statewire_engine::RegistryConfig;
use statewire_server::{LiveServer, ServerConfig};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Builds the server configuration from command-line flags.
pub fn config(bind: SocketAddr, ttl_secs: u64, sweep_secs: u64) -> ServerConfig {
    ServerConfig::new(bind).with_registry(
        RegistryConfig::default()
            .with_ttl(Duration::from_secs(ttl_secs))
            .with_sweep_interval(Duration::from_secs(sweep_secs.max(1))),
    )
}

/// Runs the counter demo until interrupted.
pub fn run(
    bind: SocketAddr,
    ttl_secs: u64,
    sweep_secs: u64,
) -> Result<(), Box<dyn std::error::Error>> {
    let config = config(bind, ttl_secs, sweep_secs);
    let server = LiveServer::new(config, Arc::new(demo::handlers())).with_page(demo::CounterPage);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(server.serve_with_shutdown(async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("shutting down"),
            Err(e) => warn!("failed to listen for ctrl-c: {}", e),
        }
    }))?;

    Ok(())
}
