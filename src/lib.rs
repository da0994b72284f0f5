//! # Dino Run Coordination Server
//!
//! Multiplayer backend for a side-scrolling dino runner. Clients register,
//! mark themselves ready, stream positions and scores, report game over and
//! poll the shared game state. The server decides when the match starts, who
//! won, when idle players are dropped, and when the session resets.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   DINO RUN SERVER                            │
//! ├─────────────────────────────────────────────────────────────┤
//! │  game/           - Session state (no I/O)                    │
//! │  ├── player.rs   - Player ids, phases, positions             │
//! │  └── registry.rs - Lobby, winner, liveness, reset            │
//! │                                                              │
//! │  network/        - Networking                                │
//! │  ├── framing.rs  - When a request is complete                │
//! │  ├── protocol.rs - Line commands, HTTP requests, replies     │
//! │  ├── http.rs     - HTTP responses, static files              │
//! │  ├── router.rs   - Request dispatch onto the registry        │
//! │  └── server.rs   - TCP listener, worker pool, timeouts       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Concurrency
//!
//! The registry sits behind a single async mutex owned by the router. Each
//! request takes the lock once, so every operation is atomic with respect to
//! the others, and liveness and reset checks run inside the same critical
//! section as the operation that triggered them.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod game;
pub mod network;

// Re-export commonly used types
pub use game::{GameSnapshot, Player, PlayerId, PlayerPhase, Registry, RegistryConfig};
pub use network::{GameServer, GameServerError, Router, ServerConfig, DEFAULT_PORT};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
