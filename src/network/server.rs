//! Coordination Server
//!
//! TCP listener accepting both protocol families on one port. Each accepted
//! connection carries exactly one request and one reply:
//!
//! 1. wait for a free worker slot (bounded pool, excess connections queue),
//! 2. read until the request is complete or the read timeout fires,
//! 3. hand the request to the router once,
//! 4. write the reply and close.
//!
//! A connection that never completes a request is closed without a reply.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, error, info, instrument, warn};

use crate::game::registry::{Registry, RegistryConfig};
use crate::network::framing::{check_complete, Frame};
use crate::network::router::Router;

/// Default listen port.
pub const DEFAULT_PORT: u16 = 55555;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address.
    pub bind_addr: SocketAddr,
    /// Maximum connections handled concurrently.
    pub max_workers: usize,
    /// Time allowed to receive a complete request.
    pub read_timeout: Duration,
    /// Largest request accepted, in bytes.
    pub max_request_bytes: usize,
    /// How often statistics are logged.
    pub stats_interval: Duration,
    /// Directory served for non-game GET paths.
    pub static_root: Option<PathBuf>,
    /// Lobby and liveness rules.
    pub registry: RegistryConfig,
    /// Server version string.
    pub version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            max_workers: 50,
            read_timeout: Duration::from_secs(5),
            max_request_bytes: 64 * 1024,
            stats_interval: Duration::from_secs(30),
            static_root: None,
            registry: RegistryConfig::default(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl ServerConfig {
    /// Create config from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            bind_addr: std::env::var("DINO_BIND_ADDR")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.bind_addr),
            max_workers: std::env::var("DINO_MAX_WORKERS")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|&n| n > 0)
                .unwrap_or(defaults.max_workers),
            read_timeout: std::env::var("DINO_READ_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.read_timeout),
            static_root: std::env::var("DINO_STATIC_ROOT").ok().map(PathBuf::from),
            ..defaults
        }
    }
}

/// Game server errors.
#[derive(Debug, thiserror::Error)]
pub enum GameServerError {
    /// Failed to bind to address.
    #[error("Failed to bind {addr}: {source}")]
    BindFailed {
        /// Requested address.
        addr: SocketAddr,
        /// Underlying error.
        source: std::io::Error,
    },

    /// Listener I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Why a connection produced no request.
#[derive(Debug, thiserror::Error)]
enum ReadError {
    #[error("request exceeds {0} bytes")]
    TooLarge(usize),

    #[error("connection closed before a complete request")]
    Closed,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// The coordination server.
pub struct GameServer {
    /// Server configuration.
    config: ServerConfig,
    /// Request router (owns the registry).
    router: Arc<Router>,
    /// Worker slots.
    workers: Arc<Semaphore>,
    /// Total worker slots, reclaimed on shutdown.
    worker_slots: u32,
    /// Shutdown signal. Late subscribers still observe it.
    shutdown_tx: watch::Sender<bool>,
    /// Process start, for uptime.
    started_at: Instant,
}

impl GameServer {
    /// Create a new server.
    pub fn new(config: ServerConfig) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        let worker_slots = u32::try_from(config.max_workers.max(1)).unwrap_or(u32::MAX);
        let router = Router::new(
            Registry::new(config.registry.clone()),
            config.static_root.clone(),
        );

        Self {
            workers: Arc::new(Semaphore::new(worker_slots as usize)),
            worker_slots,
            router: Arc::new(router),
            config,
            shutdown_tx,
            started_at: Instant::now(),
        }
    }

    /// Bind the configured address and run until shutdown.
    pub async fn run(&self) -> Result<(), GameServerError> {
        let addr = self.config.bind_addr;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| GameServerError::BindFailed { addr, source })?;
        self.run_with_listener(listener).await
    }

    /// Run on an already-bound listener until shutdown.
    #[instrument(skip(self, listener))]
    pub async fn run_with_listener(&self, listener: TcpListener) -> Result<(), GameServerError> {
        info!("Dino Run server v{} listening on {}", self.config.version, listener.local_addr()?);
        info!("Max concurrent connections: {}", self.config.max_workers);

        let stats_handle = tokio::spawn(Self::run_stats_loop(
            self.router.clone(),
            self.config.stats_interval,
            self.started_at,
        ));

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            // Take a worker slot before accepting so excess clients wait in the backlog.
            let permit = tokio::select! {
                permit = self.workers.clone().acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
                _ = shutdown_requested(&mut shutdown_rx) => {
                    info!("Shutdown signal received");
                    break;
                }
            };

            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            debug!("New connection from {}", addr);
                            self.handle_connection(stream, addr, permit);
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_requested(&mut shutdown_rx) => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        drop(listener);
        stats_handle.abort();

        // In-flight connections hold a slot until their reply is written.
        let in_flight = self.worker_slots as usize - self.workers.available_permits();
        if in_flight > 0 {
            info!("Waiting for {} in-flight connection(s)", in_flight);
        }
        let _ = self.workers.acquire_many(self.worker_slots).await;
        info!("Server stopped");
        Ok(())
    }

    /// Serve one connection on a worker task.
    fn handle_connection(&self, mut stream: TcpStream, addr: SocketAddr, permit: OwnedSemaphorePermit) {
        let router = self.router.clone();
        let read_timeout = self.config.read_timeout;
        let max_bytes = self.config.max_request_bytes;

        tokio::spawn(async move {
            let _permit = permit;

            let request = match timeout(read_timeout, read_request(&mut stream, max_bytes)).await {
                Ok(Ok(request)) => request,
                Ok(Err(ReadError::Closed)) => {
                    debug!("Client {} closed without a complete request", addr);
                    return;
                }
                Ok(Err(e)) => {
                    warn!("Dropping client {}: {}", addr, e);
                    return;
                }
                Err(_) => {
                    warn!("Timeout for client {}", addr);
                    return;
                }
            };

            #[cfg(feature = "debug-tracing")]
            debug!("Request from {}: {:?}", addr, request);

            let reply = router.handle(&request).await;
            if let Err(e) = stream.write_all(&reply.into_bytes()).await {
                warn!("Failed to send reply to {}: {}", addr, e);
                return;
            }
            let _ = stream.shutdown().await;
            debug!("Connection closed for {}", addr);
        });
    }

    /// Log server statistics at a fixed interval.
    async fn run_stats_loop(router: Arc<Router>, every: Duration, started_at: Instant) {
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        // The first tick fires immediately.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let players = router.player_count().await;
            info!(
                "Server stats - active players: {}, total requests: {}, uptime: {:.1}s",
                players,
                router.request_count(),
                started_at.elapsed().as_secs_f64(),
            );
        }
    }

    /// Stop accepting connections. `run` returns once in-flight
    /// connections have been answered.
    pub fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
    }

    /// The request router.
    pub fn router(&self) -> &Arc<Router> {
        &self.router
    }

    /// Free worker slots.
    pub fn available_workers(&self) -> usize {
        self.workers.available_permits()
    }
}

/// Resolve once shutdown has been signalled, including before this call.
async fn shutdown_requested(rx: &mut watch::Receiver<bool>) {
    while !*rx.borrow_and_update() {
        if rx.changed().await.is_err() {
            return;
        }
    }
}

/// Read until one complete request has been buffered.
async fn read_request(stream: &mut TcpStream, max_bytes: usize) -> Result<String, ReadError> {
    let mut buf = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];

    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(ReadError::Closed);
        }
        buf.extend_from_slice(&chunk[..n]);

        match check_complete(&buf, max_bytes) {
            Frame::Complete(len) => {
                buf.truncate(len);
                return Ok(String::from_utf8_lossy(&buf).into_owned());
            }
            Frame::TooLarge => return Err(ReadError::TooLarge(max_bytes)),
            Frame::Incomplete if buf.len() > max_bytes => {
                return Err(ReadError::TooLarge(max_bytes));
            }
            Frame::Incomplete => {}
        }
    }
}
