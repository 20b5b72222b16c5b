use std::str::FromStr;

use serde::Serialize;
use shakmaty::{
    CastlingMode, Chess, Color, EnPassantMode, Move, Piece, Position, Role, Square, fen::Fen,
    uci::UciMove,
};

use crate::error::SessionError;

/// Halfmove clock at which the game is drawn without a claim.
const SEVENTY_FIVE_MOVE_RULE: u32 = 150;
const FIVEFOLD_REPETITION: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EndReason {
    Checkmate,
    Stalemate,
    InsufficientMaterial,
    SeventyFiveMoveRule,
    FivefoldRepetition,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GameResult {
    pub winner: Option<Color>,
    pub reason: EndReason,
}

impl GameResult {
    /// PGN result token.
    pub fn token(&self) -> &'static str {
        match self.winner {
            Some(Color::White) => "1-0",
            Some(Color::Black) => "0-1",
            None => "1/2-1/2",
        }
    }
}

#[derive(Debug, Clone)]
struct Ply {
    played: Move,
    uci: String,
    /// Position before the move, restored verbatim on undo.
    before: Chess,
    /// Repetition key of `before`.
    key: String,
}

/// A chess position together with where it started and how it got here.
///
/// Values are replaced wholesale by the session (new game, set position,
/// import); only `play` and `undo` change them incrementally.
#[derive(Debug, Clone)]
pub struct GamePosition {
    start: Chess,
    start_fen: String,
    current: Chess,
    plies: Vec<Ply>,
}

impl Default for GamePosition {
    fn default() -> Self {
        Self::new()
    }
}

impl GamePosition {
    pub fn new() -> Self {
        Self::starting_from(Chess::new())
    }

    /// Parses a six-field FEN into a detached position. Nothing is mutated on
    /// failure, which is what lets `set_position` validate before committing.
    pub fn from_fen(fen: &str) -> Result<Self, SessionError> {
        let parsed =
            Fen::from_str(fen.trim()).map_err(|e| SessionError::InvalidFen(e.to_string()))?;
        let position: Chess = parsed
            .into_position(CastlingMode::Standard)
            .map_err(|e| SessionError::InvalidFen(e.to_string()))?;
        Ok(Self::starting_from(position))
    }

    fn starting_from(position: Chess) -> Self {
        let start_fen = fen_of(&position);
        Self {
            start: position.clone(),
            start_fen,
            current: position,
            plies: Vec::new(),
        }
    }

    pub fn chess(&self) -> &Chess {
        &self.current
    }

    pub fn fen(&self) -> String {
        fen_of(&self.current)
    }

    pub fn start_fen(&self) -> &str {
        &self.start_fen
    }

    pub fn starts_from_standard_position(&self) -> bool {
        self.start_fen == fen_of(&Chess::new())
    }

    pub fn turn(&self) -> Color {
        self.current.turn()
    }

    pub fn piece_at(&self, square: Square) -> Option<Piece> {
        self.current.board().piece_at(square)
    }

    pub fn ply_count(&self) -> usize {
        self.plies.len()
    }

    /// Coordinate notation of every applied move, oldest first.
    pub fn moves(&self) -> Vec<String> {
        self.plies.iter().map(|ply| ply.uci.clone()).collect()
    }

    pub fn last_move(&self) -> Option<Move> {
        self.plies.last().map(|ply| ply.played)
    }

    /// Resolves a from/to pair (plus optional promotion) to a legal move.
    /// A pawn reaching the last rank without a promotion piece becomes a queen.
    pub fn legal_move(&self, from: Square, to: Square, promotion: Option<Role>) -> Option<Move> {
        let candidate = |promotion| UciMove::Normal {
            from,
            to,
            promotion,
        }
        .to_move(&self.current)
        .ok();

        match promotion {
            Some(role) => candidate(Some(role)),
            None => candidate(None).or_else(|| candidate(Some(Role::Queen))),
        }
    }

    /// Validates a move as reported by an engine or read from a file.
    pub fn legal_uci(&self, uci: &UciMove) -> Option<Move> {
        uci.to_move(&self.current).ok()
    }

    /// Legal destinations of the piece standing on `from`, for highlighting.
    pub fn destinations(&self, from: Square) -> Vec<Square> {
        let mut targets: Vec<Square> = self
            .current
            .legal_moves()
            .iter()
            .filter(|m| m.from() == Some(from))
            .map(|m| m.to())
            .collect();
        targets.sort();
        targets.dedup();
        targets
    }

    /// Applies a move that was obtained from `legal_move`/`legal_uci` on this
    /// very position.
    pub fn play(&mut self, legal: Move) {
        let before = self.current.clone();
        let key = repetition_key(&before);
        self.current.play_unchecked(legal);
        self.plies.push(Ply {
            played: legal,
            uci: legal.to_uci(CastlingMode::Standard).to_string(),
            before,
            key,
        });
    }

    /// Pops the most recent move and restores the position before it.
    pub fn undo(&mut self) -> Option<Move> {
        let ply = self.plies.pop()?;
        self.current = ply.before;
        Some(ply.played)
    }

    pub fn outcome(&self) -> Option<GameResult> {
        let position = &self.current;
        if position.is_checkmate() {
            return Some(GameResult {
                winner: Some(position.turn().other()),
                reason: EndReason::Checkmate,
            });
        }
        let draw = |reason| Some(GameResult {
            winner: None,
            reason,
        });
        if position.is_stalemate() {
            return draw(EndReason::Stalemate);
        }
        if position.is_insufficient_material() {
            return draw(EndReason::InsufficientMaterial);
        }
        if position.halfmoves() >= SEVENTY_FIVE_MOVE_RULE {
            return draw(EndReason::SeventyFiveMoveRule);
        }
        let key = repetition_key(position);
        let seen = 1 + self.plies.iter().filter(|ply| ply.key == key).count();
        if seen >= FIVEFOLD_REPETITION {
            return draw(EndReason::FivefoldRepetition);
        }
        None
    }

    pub fn is_game_over(&self) -> bool {
        self.outcome().is_some()
    }
}

fn fen_of(position: &Chess) -> String {
    Fen::from_position(position, EnPassantMode::Legal).to_string()
}

/// Placement, side to move, castling rights and en passant square: the
/// fields that decide whether two positions repeat.
fn repetition_key(position: &Chess) -> String {
    fen_of(position)
        .split_whitespace()
        .take(4)
        .collect::<Vec<_>>()
        .join(" ")
}
