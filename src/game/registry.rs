//! Player Registry & Session State Machine
//!
//! Owns every player and the single process-wide session. Each public
//! operation is one atomic step; callers serialize access by holding the
//! registry behind a single lock (see `network::router`).
//!
//! The registry never reads the system clock: the current instant is passed
//! in, which keeps liveness and grace-period behavior reproducible in tests.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, error, info};

use crate::game::player::{Player, PlayerId, PlayerPhase, PlayerUpdate, Winner};

/// Timing and lobby rules for the registry.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Players unseen for longer than this are reaped.
    pub liveness_window: Duration,
    /// Delay after a winner is declared before the session resets.
    pub grace_period: Duration,
    /// Minimum lobby size before an all-ready lobby starts.
    pub min_players: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            liveness_window: Duration::from_secs(15),
            grace_period: Duration::from_secs(10),
            min_players: 2,
        }
    }
}

/// Session-wide fields.
#[derive(Debug, Clone, Default)]
struct Session {
    started: bool,
    winner: Option<Winner>,
    game_over_time: Option<Instant>,
}

/// Point-in-time view returned to polling clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GameSnapshot {
    /// Whether the session has started.
    pub game_started: bool,
    /// Declared winner, if any.
    pub winner: Option<Winner>,
    /// All registered players by id.
    pub all_players: BTreeMap<PlayerId, Player>,
}

/// Registry faults. These indicate a broken internal invariant, never bad
/// client input.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// Winner evaluation ran with nobody to choose from.
    #[error("no game-over players to choose a winner from")]
    NoWinnerCandidates,
}

/// The player registry.
#[derive(Debug)]
pub struct Registry {
    config: RegistryConfig,
    players: BTreeMap<PlayerId, Player>,
    session: Session,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new(RegistryConfig::default())
    }
}

impl Registry {
    /// Create an empty registry.
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            config,
            players: BTreeMap::new(),
            session: Session::default(),
        }
    }

    /// Register a new player under the smallest unused id.
    pub fn register(&mut self, now: Instant) -> PlayerId {
        // Ids are dense from 1 upwards in a BTreeMap, so the first gap is
        // the first key that does not match its position.
        let mut id = PlayerId::FIRST;
        for taken in self.players.keys() {
            if *taken != id {
                break;
            }
            id = id.successor();
        }

        self.players.insert(id, Player::new(now));
        info!("Player {} registered", id);
        id
    }

    /// Mark a waiting player ready, then start the session if the whole
    /// lobby is ready. Unknown ids are ignored.
    pub fn set_ready(&mut self, id: PlayerId, now: Instant) {
        let Some(player) = self.players.get_mut(&id) else {
            debug!("set_ready for unknown player {}", id);
            return;
        };

        player.last_seen = now;
        if player.phase == PlayerPhase::Waiting {
            player.phase = PlayerPhase::Ready;
            info!("Player {} is ready", id);
        }

        self.try_start();
    }

    /// Overwrite a player's position, flags and score. Unknown ids are
    /// ignored.
    pub fn update_state(&mut self, id: PlayerId, update: &PlayerUpdate, now: Instant) {
        match self.players.get_mut(&id) {
            Some(player) => player.apply_update(update, now),
            None => debug!("update for unknown player {}", id),
        }
    }

    /// Record a playing player's final score. Once nobody is left playing,
    /// the winner is declared.
    pub fn report_game_over(
        &mut self,
        id: PlayerId,
        final_score: u64,
        now: Instant,
    ) -> Result<(), RegistryError> {
        let Some(player) = self.players.get_mut(&id) else {
            debug!("game_over for unknown player {}", id);
            return Ok(());
        };
        if !player.is_playing() {
            debug!("game_over ignored for player {} in phase {:?}", id, player.phase);
            return Ok(());
        }

        player.phase = PlayerPhase::GameOver;
        player.score = final_score;
        player.last_seen = now;
        info!("Player {} is game over with final score {}", id, final_score);

        self.evaluate_winner(now)
    }

    /// Poll the session on behalf of `requester`.
    ///
    /// Counts as a liveness signal for the requester. Resets the session once
    /// the post-game grace period has elapsed, and otherwise reaps players
    /// that have gone quiet.
    pub fn snapshot(
        &mut self,
        requester: PlayerId,
        now: Instant,
    ) -> Result<GameSnapshot, RegistryError> {
        if let Some(player) = self.players.get_mut(&requester) {
            player.last_seen = now;
        }

        if let Some(ended) = self.session.game_over_time {
            if now.saturating_duration_since(ended) > self.config.grace_period {
                info!("Grace period elapsed after winner; resetting session");
                self.reset();
                return Ok(self.view());
            }
        }

        self.reap(now)?;
        Ok(self.view())
    }

    /// Clear all players and restore the session to its initial state.
    pub fn reset(&mut self) {
        self.players.clear();
        self.session = Session::default();
    }

    /// Number of registered players.
    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    /// Whether the session has started.
    pub fn is_started(&self) -> bool {
        self.session.started
    }

    /// Declared winner, if any.
    pub fn winner(&self) -> Option<Winner> {
        self.session.winner
    }

    /// Look up a player.
    pub fn get_player(&self, id: &PlayerId) -> Option<&Player> {
        self.players.get(id)
    }

    fn view(&self) -> GameSnapshot {
        GameSnapshot {
            game_started: self.session.started,
            winner: self.session.winner,
            all_players: self.players.clone(),
        }
    }

    /// Start the session when enough players are present and all are ready.
    fn try_start(&mut self) {
        let all_ready = self.players.values().all(|p| p.phase == PlayerPhase::Ready);
        if self.players.len() < self.config.min_players || !all_ready {
            return;
        }

        self.session.started = true;
        for player in self.players.values_mut() {
            player.phase = PlayerPhase::Playing;
        }
        info!("Game is starting with {} players", self.players.len());
    }

    /// Declare a winner once nobody is playing. No-op if already declared.
    fn evaluate_winner(&mut self, now: Instant) -> Result<(), RegistryError> {
        if self.session.winner.is_some() || self.players.values().any(Player::is_playing) {
            return Ok(());
        }

        // Strictly-greater comparison over ascending ids keeps the lowest id on ties.
        let mut best: Option<Winner> = None;
        for (id, player) in &self.players {
            if player.phase != PlayerPhase::GameOver {
                continue;
            }
            if best.map_or(true, |b| player.score > b.score) {
                best = Some(Winner { id: *id, score: player.score });
            }
        }

        let Some(winner) = best else {
            error!("Winner evaluation found no game-over players");
            return Err(RegistryError::NoWinnerCandidates);
        };

        self.session.winner = Some(winner);
        self.session.game_over_time = Some(now);
        info!("Winner is player {} with score {}", winner.id, winner.score);
        Ok(())
    }

    /// Remove players unseen for longer than the liveness window.
    fn reap(&mut self, now: Instant) -> Result<(), RegistryError> {
        let window = self.config.liveness_window;
        let before = self.players.len();
        self.players
            .retain(|_, p| now.saturating_duration_since(p.last_seen) <= window);

        let removed = before - self.players.len();
        if removed == 0 {
            return Ok(());
        }
        info!("Reaped {} inactive player(s)", removed);

        if self.players.is_empty() {
            info!("All players gone; resetting session");
            self.session = Session::default();
            return Ok(());
        }

        if !self.session.started {
            self.try_start();
        } else if self.players.values().any(|p| p.phase == PlayerPhase::GameOver) {
            self.evaluate_winner(now)?;
        }
        Ok(())
    }
}
