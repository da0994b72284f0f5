//! Game Logic Module
//!
//! Lobby and session state for a shared dino-runner match. Pure state, no I/O.
//! Every time-dependent operation takes the current instant from the caller.
//!
//! ## Module Structure
//!
//! - `player`: Player ids, phases and reported positions
//! - `registry`: Player registry, lobby start, winner and reset rules

pub mod player;
pub mod registry;

// Re-export key types
pub use player::{Player, PlayerId, PlayerPhase, PlayerUpdate, Winner};
pub use registry::{GameSnapshot, Registry, RegistryConfig, RegistryError};
