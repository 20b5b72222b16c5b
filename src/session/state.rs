use std::sync::Arc;

use log::{info, warn};
use serde::{Deserialize, Serialize};
use shakmaty::{CastlingMode, Color, File, Move, Rank, Role, Square, uci::UciMove};
use tokio_util::sync::CancellationToken;

use crate::{
    config::{EngineConfig, SessionSettings, UndoPolicy},
    engine::{EngineAdapter, SearchRequest},
    error::SessionError,
    position::{EndReason, GamePosition, GameResult},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    PlayerVsEngine,
    PlayerVsPlayer,
    EngineVsEngine,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    White,
    Black,
}

impl From<Color> for Side {
    fn from(color: Color) -> Self {
        match color {
            Color::White => Side::White,
            Color::Black => Side::Black,
        }
    }
}

/// What a polling client sees of the engine computation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum EngineTaskStatus {
    Idle,
    Thinking,
    Completed { best_move: String },
    Failed { error: SessionError },
}

impl EngineTaskStatus {
    pub fn is_thinking(&self) -> bool {
        matches!(self, EngineTaskStatus::Thinking)
    }

    /// Terminal states are reported once, then read back as idle.
    fn acknowledge(&mut self) {
        if matches!(
            self,
            EngineTaskStatus::Completed { .. } | EngineTaskStatus::Failed { .. }
        ) {
            *self = EngineTaskStatus::Idle;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BattleStatus {
    Stopped,
    Running,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum BattleEnd {
    GameOver { result: String },
    Cancelled,
    PlyLimit { plies: u32 },
    Failed { error: SessionError },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineHealth {
    NotStarted,
    Ready,
    Offline,
}

struct BattleRun {
    id: u64,
    cancel: CancellationToken,
}

#[derive(Default)]
pub(crate) struct BattleState {
    run: Option<BattleRun>,
    last_end: Option<BattleEnd>,
    started: u64,
}

impl BattleState {
    pub(crate) fn is_running(&self) -> bool {
        self.run.is_some()
    }

    pub(crate) fn begin(&mut self, cancel: CancellationToken) -> u64 {
        self.started += 1;
        self.run = Some(BattleRun {
            id: self.started,
            cancel,
        });
        self.last_end = None;
        self.started
    }

    pub(crate) fn stop_requested(&self) -> bool {
        self.run.as_ref().is_some_and(|run| run.cancel.is_cancelled())
    }

    /// Signals the running battle to stop after its in-flight move.
    pub(crate) fn request_stop(&mut self) -> bool {
        match &self.run {
            Some(run) => {
                run.cancel.cancel();
                true
            }
            None => false,
        }
    }

    /// Ends the battle `id` (or whichever runs when `id` is `None`).
    pub(crate) fn end(&mut self, id: Option<u64>, end: BattleEnd) -> bool {
        match &self.run {
            Some(run) if id.is_none_or(|id| id == run.id) => {
                run.cancel.cancel();
                self.run = None;
                self.last_end = Some(end);
                true
            }
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResultView {
    pub token: String,
    pub winner: Option<Side>,
    pub reason: EndReason,
}

impl From<GameResult> for ResultView {
    fn from(result: GameResult) -> Self {
        ResultView {
            token: result.token().to_string(),
            winner: result.winner.map(Side::from),
            reason: result.reason,
        }
    }
}

/// The effect of a committed move.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MoveOutcome {
    pub played: String,
    pub result: Option<ResultView>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SelectOutcome {
    Selected { square: Option<String> },
    Moved { outcome: MoveOutcome },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PieceView {
    pub piece: char,
    pub color: Side,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LastMove {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BattleView {
    pub status: BattleStatus,
    pub stop_requested: bool,
    pub last_end: Option<BattleEnd>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EngineView {
    pub status: EngineHealth,
    pub skill_level: u8,
    pub time_limit: f64,
}

/// Read-only copy of a session, safe to hand out after the lock is gone.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GameSnapshot {
    pub session_id: String,
    /// Ranks from the 8th down to the 1st, files a to h.
    pub board: Vec<Vec<Option<PieceView>>>,
    pub turn: Side,
    pub fen: String,
    pub moves: Vec<String>,
    pub last_move: Option<LastMove>,
    pub selected_square: Option<String>,
    pub highlights: Vec<String>,
    pub mode: Mode,
    pub player_color: Side,
    pub game_over: bool,
    pub result: Option<ResultView>,
    pub engine_task: EngineTaskStatus,
    pub battle: BattleView,
    pub engine: EngineView,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Requester {
    Client,
    Battle,
}

/// Identifies the position an engine search started from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Ticket {
    epoch: u64,
    fen: String,
}

/// Everything behind a session's lock.
pub(crate) struct SessionState {
    pub(crate) position: GamePosition,
    /// Bumped whenever the position is replaced or rewound.
    epoch: u64,
    pub(crate) mode: Mode,
    pub(crate) human: Color,
    pub(crate) config: EngineConfig,
    pub(crate) selection: Option<Square>,
    pub(crate) task: EngineTaskStatus,
    pub(crate) battle: BattleState,
    pub(crate) adapter: Option<Arc<EngineAdapter>>,
    pub(crate) engine_health: EngineHealth,
    pub(crate) closed: bool,
}

impl SessionState {
    pub(crate) fn new(config: EngineConfig) -> SessionState {
        SessionState {
            position: GamePosition::new(),
            epoch: 0,
            mode: Mode::PlayerVsEngine,
            human: Color::White,
            config,
            selection: None,
            task: EngineTaskStatus::Idle,
            battle: BattleState::default(),
            adapter: None,
            engine_health: EngineHealth::NotStarted,
            closed: false,
        }
    }

    pub(crate) fn ensure_open(&self) -> Result<(), SessionError> {
        if self.closed {
            return Err(SessionError::invalid_state("session is closed"));
        }
        Ok(())
    }

    /// An engine task or battle is in flight.
    pub(crate) fn is_busy(&self) -> bool {
        self.task.is_thinking() || self.battle.is_running()
    }

    pub(crate) fn ensure_idle(&self) -> Result<(), SessionError> {
        self.ensure_open()?;
        if self.is_busy() {
            return Err(SessionError::Busy);
        }
        Ok(())
    }

    fn human_to_move(&self) -> bool {
        match self.mode {
            Mode::PlayerVsPlayer => true,
            Mode::PlayerVsEngine => self.position.turn() == self.human,
            Mode::EngineVsEngine => false,
        }
    }

    /// Whether the engine should answer now without being asked.
    pub(crate) fn engine_to_move(&self) -> bool {
        self.mode == Mode::PlayerVsEngine
            && self.position.turn() != self.human
            && !self.position.is_game_over()
    }

    fn movable_piece_at(&self, square: Square) -> bool {
        self.human_to_move()
            && self
                .position
                .piece_at(square)
                .is_some_and(|piece| piece.color == self.position.turn())
    }

    /// Replaces the position wholesale.
    pub(crate) fn replace_position(&mut self, position: GamePosition) {
        self.position = position;
        self.epoch += 1;
        self.selection = None;
        self.task = EngineTaskStatus::Idle;
    }

    pub(crate) fn select(&mut self, square: Square) -> Result<SelectOutcome, SessionError> {
        self.ensure_open()?;
        if self.position.is_game_over() || !self.human_to_move() {
            return Err(SessionError::InvalidSelection);
        }
        if self.task.is_thinking() {
            return Err(SessionError::Busy);
        }

        if let Some(selected) = self.selection {
            if selected == square {
                self.selection = None;
                return Ok(SelectOutcome::Selected { square: None });
            }
            if let Some(legal) = self.position.legal_move(selected, square, None) {
                let outcome = self.commit_move(legal);
                return Ok(SelectOutcome::Moved { outcome });
            }
        }

        self.selection = self.movable_piece_at(square).then_some(square);
        Ok(SelectOutcome::Selected {
            square: self.selection.map(|sq| sq.to_string()),
        })
    }

    pub(crate) fn apply_human_move(
        &mut self,
        from: Square,
        to: Square,
        promotion: Option<Role>,
    ) -> Result<MoveOutcome, SessionError> {
        self.ensure_open()?;
        if self.position.is_game_over() {
            return Err(SessionError::invalid_state("the game is over"));
        }
        let rejected = || {
            let suffix = promotion.map(|role| role.char().to_string()).unwrap_or_default();
            SessionError::IllegalMove(format!("{from}{to}{suffix}"))
        };
        if !self.human_to_move() {
            return Err(rejected());
        }
        let legal = self
            .position
            .legal_move(from, to, promotion)
            .ok_or_else(rejected)?;
        Ok(self.commit_move(legal))
    }

    /// The single place a move lands in the position, for humans and engines.
    fn commit_move(&mut self, legal: Move) -> MoveOutcome {
        let played = legal.to_uci(CastlingMode::Standard).to_string();
        self.position.play(legal);
        self.selection = None;

        let result = self.position.outcome();
        if let Some(result) = result {
            // a finished game cannot keep a battle running
            self.battle.end(
                None,
                BattleEnd::GameOver {
                    result: result.token().to_string(),
                },
            );
        }
        MoveOutcome {
            played,
            result: result.map(ResultView::from),
        }
    }

    pub(crate) fn undo(&mut self, policy: UndoPolicy) -> Result<Vec<String>, SessionError> {
        self.ensure_idle()?;
        if self.position.ply_count() == 0 {
            return Err(SessionError::invalid_state("there is no move to undo"));
        }

        let mut undone = Vec::new();
        undone.extend(self.position.undo());
        if self.mode == Mode::PlayerVsEngine
            && policy == UndoPolicy::ReturnToHuman
            && self.position.turn() != self.human
        {
            undone.extend(self.position.undo());
        }
        let undone: Vec<String> = undone
            .into_iter()
            .map(|played| played.to_uci(CastlingMode::Standard).to_string())
            .collect();

        self.epoch += 1;
        self.selection = None;
        Ok(undone)
    }

    pub(crate) fn admit_engine_move(&self, requester: Requester) -> Result<(), SessionError> {
        self.ensure_open()?;
        if self.task.is_thinking() {
            return Err(SessionError::Busy);
        }
        match requester {
            Requester::Client if self.battle.is_running() => return Err(SessionError::Busy),
            Requester::Battle if !self.battle.is_running() || self.battle.stop_requested() => {
                return Err(SessionError::EngineStopped);
            }
            _ => {}
        }
        if self.position.is_game_over() {
            return Err(SessionError::invalid_state("the game is over"));
        }
        match self.mode {
            Mode::PlayerVsPlayer => Err(SessionError::invalid_state(
                "there is no engine in player-vs-player games",
            )),
            Mode::PlayerVsEngine if self.position.turn() == self.human => Err(
                SessionError::invalid_state("it is the player's turn, not the engine's"),
            ),
            _ => Ok(()),
        }
    }

    /// The session's engine, created on first demand.
    pub(crate) fn engine_adapter(
        &mut self,
        label: &str,
        settings: &SessionSettings,
    ) -> Arc<EngineAdapter> {
        let config = self.config;
        self.adapter
            .get_or_insert_with(|| {
                Arc::new(EngineAdapter::new(
                    label,
                    settings.engine.clone(),
                    config.engine_options(),
                    settings.handshake_timeout,
                    settings.grace,
                ))
            })
            .clone()
    }

    pub(crate) fn search_request(&self) -> SearchRequest {
        SearchRequest {
            start_fen: self.position.start_fen().to_string(),
            moves: self.position.moves(),
            position: self.position.chess().clone(),
            think_time: self.config.think_time(),
        }
    }

    pub(crate) fn ticket(&self) -> Ticket {
        Ticket {
            epoch: self.epoch,
            fen: self.position.fen(),
        }
    }

    /// Lands an engine result, unless the position moved on in the meantime.
    pub(crate) fn commit_engine_move(
        &mut self,
        label: &str,
        ticket: &Ticket,
        searched: Result<UciMove, SessionError>,
    ) -> Result<MoveOutcome, SessionError> {
        if self.closed {
            self.task = EngineTaskStatus::Idle;
            return Err(SessionError::EngineStopped);
        }
        if *ticket != self.ticket() {
            warn!("[{label}] discarding engine result for an outdated position");
            self.task = EngineTaskStatus::Failed {
                error: SessionError::Stale,
            };
            return Err(SessionError::Stale);
        }

        let checked = searched.and_then(|best| {
            self.engine_health = EngineHealth::Ready;
            self.position
                .legal_uci(&best)
                .ok_or_else(|| SessionError::IllegalMove(format!("engine suggested {best}")))
        });
        match checked {
            Ok(legal) => {
                let outcome = self.commit_move(legal);
                info!("[{label}] engine played {}", outcome.played);
                self.task = EngineTaskStatus::Completed {
                    best_move: outcome.played.clone(),
                };
                Ok(outcome)
            }
            Err(error) => {
                warn!("[{label}] engine move failed: {error}");
                if error.is_engine_fault() {
                    self.engine_health = EngineHealth::Offline;
                }
                self.task = EngineTaskStatus::Failed {
                    error: error.clone(),
                };
                Err(error)
            }
        }
    }

    pub(crate) fn snapshot(&self, session_id: &str) -> GameSnapshot {
        let board = Rank::ALL
            .iter()
            .rev()
            .map(|&rank| {
                File::ALL
                    .iter()
                    .map(|&file| {
                        self.position
                            .piece_at(Square::from_coords(file, rank))
                            .map(|piece| PieceView {
                                piece: if piece.color == Color::White {
                                    piece.role.char().to_ascii_uppercase()
                                } else {
                                    piece.role.char()
                                },
                                color: piece.color.into(),
                            })
                    })
                    .collect()
            })
            .collect();

        let result = self.position.outcome();
        GameSnapshot {
            session_id: session_id.to_string(),
            board,
            turn: self.position.turn().into(),
            fen: self.position.fen(),
            moves: self.position.moves(),
            last_move: self.position.last_move().map(|m| LastMove {
                from: m.from().map(|sq| sq.to_string()).unwrap_or_default(),
                to: m.to().to_string(),
            }),
            selected_square: self.selection.map(|sq| sq.to_string()),
            highlights: self
                .selection
                .map(|sq| {
                    self.position
                        .destinations(sq)
                        .iter()
                        .map(|target| target.to_string())
                        .collect()
                })
                .unwrap_or_default(),
            mode: self.mode,
            player_color: self.human.into(),
            game_over: result.is_some(),
            result: result.map(ResultView::from),
            engine_task: self.task.clone(),
            battle: BattleView {
                status: if self.battle.is_running() {
                    BattleStatus::Running
                } else {
                    BattleStatus::Stopped
                },
                stop_requested: self.battle.stop_requested(),
                last_end: self.battle.last_end.clone(),
            },
            engine: EngineView {
                status: self.engine_health,
                skill_level: self.config.skill_level(),
                time_limit: self.config.think_time_secs(),
            },
        }
    }

    pub(crate) fn acknowledge_task(&mut self) {
        self.task.acknowledge();
    }
}
