use std::sync::Arc;

use log::{info, warn};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use super::{
    GameSession, Mode,
    state::{BattleEnd, BattleStatus, Requester},
};
use crate::error::SessionError;

impl GameSession {
    /// Lets the engine play both sides until the game ends, the battle is
    /// stopped, or the engine keeps failing.
    pub async fn start_battle(self: &Arc<Self>) -> Result<(), SessionError> {
        let (id, cancel) = {
            let mut state = self.state.lock().await;
            state.ensure_open()?;
            if state.battle.is_running() {
                return Err(SessionError::invalid_state("a battle is already running"));
            }
            if state.mode != Mode::EngineVsEngine {
                return Err(SessionError::invalid_state(
                    "battles need engine-vs-engine mode",
                ));
            }
            if state.position.is_game_over() {
                return Err(SessionError::invalid_state("the game is over"));
            }
            if state.task.is_thinking() {
                return Err(SessionError::Busy);
            }
            let cancel = CancellationToken::new();
            (state.battle.begin(cancel.clone()), cancel)
        };

        info!("[{}] battle {id} started", self.id);
        tokio::spawn(Arc::clone(self).run_battle(id, cancel));
        Ok(())
    }

    /// Asks a running battle to stop. A move already being computed is
    /// still played. Does nothing when no battle runs.
    pub async fn stop_battle(&self) {
        if self.state.lock().await.battle.request_stop() {
            info!("[{}] battle stop requested", self.id);
        }
    }

    pub async fn battle_status(&self) -> BattleStatus {
        if self.state.lock().await.battle.is_running() {
            BattleStatus::Running
        } else {
            BattleStatus::Stopped
        }
    }

    async fn run_battle(self: Arc<Self>, id: u64, cancel: CancellationToken) {
        let limits = self.settings.battle;
        let mut failures = 0;
        let mut plies = 0;

        let end = loop {
            tokio::select! {
                _ = cancel.cancelled() => break BattleEnd::Cancelled,
                _ = sleep(limits.pace) => {}
            }

            let task = match self.spawn_engine_move(Requester::Battle).await {
                Ok(task) => task,
                // stopped between the pace sleep and the admission
                Err(_) if cancel.is_cancelled() => break BattleEnd::Cancelled,
                Err(error) => break BattleEnd::Failed { error },
            };
            // an in-flight move is never cut short, only the next one is skipped
            match task.wait().await {
                Ok(outcome) => {
                    failures = 0;
                    plies += 1;
                    if let Some(result) = outcome.result {
                        break BattleEnd::GameOver {
                            result: result.token,
                        };
                    }
                }
                Err(SessionError::EngineStopped | SessionError::Stale) => {
                    break BattleEnd::Cancelled;
                }
                Err(error) => {
                    failures += 1;
                    warn!(
                        "[{}] battle move failed ({failures}/{}): {error}",
                        self.id, limits.max_retries
                    );
                    if failures > limits.max_retries {
                        break BattleEnd::Failed {
                            error: SessionError::BattleFailed(failures),
                        };
                    }
                }
            }

            if cancel.is_cancelled() {
                break BattleEnd::Cancelled;
            }
            if plies >= limits.max_plies {
                break BattleEnd::PlyLimit { plies };
            }
        };

        info!("[{}] battle {id} ended: {end:?}", self.id);
        self.state.lock().await.battle.end(Some(id), end);
    }
}
