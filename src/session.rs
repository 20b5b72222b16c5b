mod battle;
mod state;
mod worker;

use std::{sync::Arc, time::Instant};

use log::{debug, info};
use parking_lot::Mutex as SyncMutex;
use shakmaty::{Color, Role, Square};
use tokio::sync::Mutex;

use crate::{
    config::{EngineConfig, SessionSettings},
    error::SessionError,
    pgn::{self, PgnPlayers},
    position::GamePosition,
};

use state::SessionState;
pub use state::{
    BattleEnd, BattleStatus, BattleView, EngineHealth, EngineTaskStatus, EngineView,
    GameSnapshot, LastMove, Mode, MoveOutcome, PieceView, ResultView, SelectOutcome, Side,
};
pub use worker::EngineTask;

/// One client's game: position, mode, engine and battle, behind one lock.
///
/// The lock is only ever held for bookkeeping. Engine searches and battle
/// pacing run on spawned tasks that re-take it to commit their results.
pub struct GameSession {
    id: String,
    settings: Arc<SessionSettings>,
    state: Mutex<SessionState>,
    last_seen: SyncMutex<Instant>,
}

impl GameSession {
    pub fn new(id: impl Into<String>, settings: Arc<SessionSettings>) -> GameSession {
        let config = settings.engine_defaults;
        GameSession {
            id: id.into(),
            settings,
            state: Mutex::new(SessionState::new(config)),
            last_seen: SyncMutex::new(Instant::now()),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn touch(&self) {
        *self.last_seen.lock() = Instant::now();
    }

    pub fn last_seen(&self) -> Instant {
        *self.last_seen.lock()
    }

    /// Current snapshot. A completed or failed engine task is reported by
    /// exactly one call and reads as idle afterwards.
    pub async fn get_state(&self) -> GameSnapshot {
        let mut state = self.state.lock().await;
        let snapshot = state.snapshot(&self.id);
        state.acknowledge_task();
        snapshot
    }

    /// Selects, deselects, reselects, or completes a move by clicking `square`.
    pub async fn select_square(&self, square: Square) -> Result<SelectOutcome, SessionError> {
        let outcome = self.state.lock().await.select(square)?;
        if let SelectOutcome::Moved { outcome } = &outcome {
            info!("[{}] player played {}", self.id, outcome.played);
        }
        Ok(outcome)
    }

    pub async fn apply_move(
        &self,
        from: Square,
        to: Square,
        promotion: Option<Role>,
    ) -> Result<MoveOutcome, SessionError> {
        let outcome = self
            .state
            .lock()
            .await
            .apply_human_move(from, to, promotion)?;
        info!("[{}] player played {}", self.id, outcome.played);
        Ok(outcome)
    }

    /// Takes back the last move, and in player-vs-engine games also the
    /// engine's reply when the undo policy asks for it.
    pub async fn undo(&self) -> Result<Vec<String>, SessionError> {
        let undone = self.state.lock().await.undo(self.settings.undo)?;
        info!("[{}] took back {}", self.id, undone.join(" "));
        Ok(undone)
    }

    /// Kicks off the engine's reply when it is the engine's turn and replies
    /// are automatic. Returns `None` when nothing was started.
    pub async fn auto_reply(self: &Arc<Self>) -> Option<EngineTask> {
        if !self.settings.auto_reply || !self.state.lock().await.engine_to_move() {
            return None;
        }
        match self.request_engine_move().await {
            Ok(task) => Some(task),
            Err(e) => {
                debug!("[{}] no automatic engine reply: {e}", self.id);
                None
            }
        }
    }

    pub async fn set_mode(&self, mode: Mode) -> Result<(), SessionError> {
        let mut state = self.state.lock().await;
        state.ensure_idle()?;
        if state.mode != mode {
            info!("[{}] mode {:?} -> {mode:?}", self.id, state.mode);
        }
        state.mode = mode;
        state.selection = None;
        Ok(())
    }

    /// Updates skill and think time, clamping both into range. The running
    /// engine is discarded when its options changed, so the next request
    /// starts one with the new settings.
    pub async fn set_engine_config(
        &self,
        skill_level: Option<i64>,
        think_time: Option<f64>,
    ) -> Result<EngineConfig, SessionError> {
        let (config, retired) = {
            let mut state = self.state.lock().await;
            state.ensure_idle()?;
            let mut config = state.config;
            if let Some(skill_level) = skill_level {
                config = config.with_skill_level(skill_level);
            }
            if let Some(think_time) = think_time {
                config = config.with_think_time(think_time);
            }
            let retired = if config.engine_options() != state.config.engine_options() {
                state.engine_health = EngineHealth::NotStarted;
                state.adapter.take()
            } else {
                None
            };
            state.config = config;
            (config, retired)
        };

        info!(
            "[{}] engine settings: skill {}, {:.1}s per move",
            self.id,
            config.skill_level(),
            config.think_time_secs()
        );
        if let Some(adapter) = retired {
            adapter.close().await;
        }
        Ok(config)
    }

    pub async fn new_game(&self) -> Result<(), SessionError> {
        let mut state = self.state.lock().await;
        state.ensure_idle()?;
        state.replace_position(GamePosition::new());
        info!("[{}] new game", self.id);
        Ok(())
    }

    /// Replaces the game with the position described by `fen`. Nothing
    /// changes when the FEN is rejected.
    pub async fn set_position(&self, fen: &str) -> Result<(), SessionError> {
        let mut state = self.state.lock().await;
        state.ensure_idle()?;
        let position = GamePosition::from_fen(fen)?;
        state.replace_position(position);
        info!("[{}] position set to {}", self.id, fen.trim());
        Ok(())
    }

    pub async fn get_fen(&self) -> String {
        self.state.lock().await.position.fen()
    }

    pub async fn export_pgn(&self) -> String {
        let state = self.state.lock().await;
        let engine = "Engine";
        let player = "Player";
        let players = match state.mode {
            Mode::PlayerVsPlayer => PgnPlayers::new(player, player),
            Mode::EngineVsEngine => PgnPlayers::new(engine, engine),
            Mode::PlayerVsEngine if state.human == Color::White => PgnPlayers::new(player, engine),
            Mode::PlayerVsEngine => PgnPlayers::new(engine, player),
        };
        pgn::export(&state.position, &players, &pgn::today())
    }

    /// Replaces the game with an imported one. The file is replayed on the
    /// side first, so a bad move anywhere leaves the current game untouched.
    pub async fn import_pgn(&self, text: &str) -> Result<(), SessionError> {
        let mut state = self.state.lock().await;
        state.ensure_idle()?;
        let position = pgn::import(text)?;
        info!(
            "[{}] loaded a game of {} moves",
            self.id,
            position.ply_count()
        );
        state.replace_position(position);
        Ok(())
    }

    /// Closes the session for good: stops the battle and the engine process.
    /// Later operations fail with `InvalidState`.
    pub async fn shutdown(&self) {
        let adapter = {
            let mut state = self.state.lock().await;
            if state.closed {
                return;
            }
            state.closed = true;
            state.battle.request_stop();
            state.adapter.take()
        };
        if let Some(adapter) = adapter {
            adapter.close().await;
        }
        info!("[{}] session closed", self.id);
    }
}
