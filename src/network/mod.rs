//! Network Layer
//!
//! TCP server speaking two request families on one port: newline-terminated
//! line commands and HTTP-style requests. Every connection carries one request
//! and one reply. All game state lives in `game/` behind the router.

pub mod framing;
pub mod http;
pub mod protocol;
pub mod router;
pub mod server;

pub use http::{HttpResponse, StaticFiles};
pub use protocol::{GameCommand, HttpRequest, ProtocolError, Request, ServerMessage};
pub use router::{Reply, Router};
pub use server::{GameServer, GameServerError, ServerConfig, DEFAULT_PORT};
