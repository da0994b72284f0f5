//! Player Definitions
//!
//! Identifier, lobby phase and per-player record owned by the registry.

use std::fmt;
use std::num::NonZeroU32;
use std::str::FromStr;
use std::time::Instant;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

// =============================================================================
// PLAYER ID
// =============================================================================

/// Small positive player identifier, unique within the current session.
///
/// Travels as a decimal string on the wire (`"1"`, `"2"`, ...). Implements
/// `Ord` so that registry maps iterate in ascending id order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PlayerId(NonZeroU32);

impl PlayerId {
    /// The first id handed out in a session.
    pub const FIRST: PlayerId = PlayerId(NonZeroU32::MIN);

    /// Create from a raw value. Returns `None` for zero.
    pub fn new(raw: u32) -> Option<Self> {
        NonZeroU32::new(raw).map(Self)
    }

    /// Get the raw numeric value.
    pub fn get(self) -> u32 {
        self.0.get()
    }

    /// The next id up.
    pub fn successor(self) -> Self {
        Self(self.0.saturating_add(1))
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Error returned when text is not a positive integer id.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid player id '{0}'")]
pub struct InvalidPlayerId(pub String);

impl FromStr for PlayerId {
    type Err = InvalidPlayerId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse::<u32>()
            .ok()
            .and_then(PlayerId::new)
            .ok_or_else(|| InvalidPlayerId(s.to_string()))
    }
}

impl Serialize for PlayerId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PlayerId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        // Clients send the id either as it was handed out ("3") or as a number.
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(u32),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Number(n) => PlayerId::new(n)
                .ok_or_else(|| serde::de::Error::custom(InvalidPlayerId(n.to_string()))),
            Raw::Text(s) => s.parse().map_err(serde::de::Error::custom),
        }
    }
}

// =============================================================================
// PLAYER PHASE
// =============================================================================

/// Where a player is in the lobby/session lifecycle.
///
/// Phases only move forward (`Waiting` → `Ready` → `Playing` → `GameOver`)
/// until the whole session is reset.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlayerPhase {
    /// Registered, not yet ready.
    #[default]
    Waiting,
    /// Ready, waiting for the rest of the lobby.
    Ready,
    /// Running.
    Playing,
    /// Crashed out; final score recorded.
    GameOver,
}

// =============================================================================
// PLAYER
// =============================================================================

/// Per-frame state pushed by a client.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PlayerUpdate {
    /// Horizontal position.
    pub x: f64,
    /// Vertical position.
    pub y: f64,
    /// Mid-jump.
    pub is_jumping: bool,
    /// Ducking.
    pub is_ducking: bool,
    /// Current running score.
    pub score: u64,
}

/// A registered player.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Player {
    /// Lifecycle phase.
    #[serde(rename = "state")]
    pub phase: PlayerPhase,
    /// Latest score (final score once game over).
    pub score: u64,
    /// Horizontal position.
    pub x: f64,
    /// Vertical position.
    pub y: f64,
    /// Mid-jump.
    pub is_jumping: bool,
    /// Ducking.
    pub is_ducking: bool,
    /// Most recent interaction, used for liveness reaping.
    #[serde(skip)]
    pub last_seen: Instant,
}

impl Player {
    /// Create a freshly registered player.
    pub fn new(now: Instant) -> Self {
        Self {
            phase: PlayerPhase::Waiting,
            score: 0,
            x: 0.0,
            y: 0.0,
            is_jumping: false,
            is_ducking: false,
            last_seen: now,
        }
    }

    /// Apply a client update. A game-over player's final score is frozen.
    pub fn apply_update(&mut self, update: &PlayerUpdate, now: Instant) {
        self.x = update.x;
        self.y = update.y;
        self.is_jumping = update.is_jumping;
        self.is_ducking = update.is_ducking;
        if self.phase != PlayerPhase::GameOver {
            self.score = update.score;
        }
        self.last_seen = now;
    }

    /// Check if the player is still running.
    #[inline]
    pub fn is_playing(&self) -> bool {
        self.phase == PlayerPhase::Playing
    }
}

/// The declared winner of a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Winner {
    /// Winning player.
    pub id: PlayerId,
    /// Winning score.
    pub score: u64,
}
