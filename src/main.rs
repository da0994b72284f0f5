//! Dino Run Server
//!
//! Coordination server for multiplayer dino-runner matches.

use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use dino_run::{GameServer, ServerConfig, VERSION};

/// Command-line overrides. Unset flags keep the environment or default value.
#[derive(Parser, Debug)]
#[command(version, about = "Dino Run multiplayer coordination server")]
struct Args {
    /// Address to bind to
    #[arg(long)]
    host: Option<IpAddr>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Maximum connections handled at once
    #[arg(short, long)]
    workers: Option<usize>,

    /// Seconds allowed to receive a complete request
    #[arg(long)]
    read_timeout_secs: Option<u64>,

    /// Directory served for non-game GET requests
    #[arg(long)]
    static_root: Option<PathBuf>,
}

impl Args {
    fn apply(self, mut config: ServerConfig) -> ServerConfig {
        if let Some(host) = self.host {
            config.bind_addr.set_ip(host);
        }
        if let Some(port) = self.port {
            config.bind_addr.set_port(port);
        }
        if let Some(workers) = self.workers.filter(|&n| n > 0) {
            config.max_workers = workers;
        }
        if let Some(secs) = self.read_timeout_secs {
            config.read_timeout = Duration::from_secs(secs);
        }
        if self.static_root.is_some() {
            config.static_root = self.static_root;
        }
        config
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Args::parse().apply(ServerConfig::from_env());
    let bind_addr: SocketAddr = config.bind_addr;

    info!("Dino Run Server v{}", VERSION);
    info!("Worker pool: {}, read timeout: {:?}", config.max_workers, config.read_timeout);
    if let Some(root) = &config.static_root {
        info!("Serving static files from {}", root.display());
    }

    let server = GameServer::new(config);

    let run = server.run();
    tokio::pin!(run);

    let result = tokio::select! {
        result = &mut run => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl+C received, finishing in-flight requests");
            server.shutdown();
            run.await
        }
    };

    if let Err(e) = &result {
        error!("Server on {} failed: {}", bind_addr, e);
    }
    result?;

    Ok(())
}
