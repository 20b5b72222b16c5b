use serde::{Serialize, Serializer, ser::SerializeStruct};
use thiserror::Error;

use crate::engine::EngineError;

/// Everything a session operation can be refused or fail with. None of these
/// end the serving process; they are reported to the caller next to the
/// (unchanged) game snapshot.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("illegal move: {0}")]
    IllegalMove(String),
    #[error("invalid selection")]
    InvalidSelection,
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("an engine move or battle is in progress")]
    Busy,
    #[error("engine unavailable: {0}")]
    EngineUnavailable(String),
    #[error("engine did not answer within its time budget")]
    EngineTimeout,
    #[error("engine crashed: {0}")]
    EngineCrashed(String),
    #[error("engine was stopped")]
    EngineStopped,
    #[error("engine result discarded, the position changed while it was thinking")]
    Stale,
    #[error("battle stopped after {0} consecutive engine failures")]
    BattleFailed(u32),
    #[error("corrupt game file: {0}")]
    CorruptGameFile(String),
    #[error("invalid FEN: {0}")]
    InvalidFen(String),
}

impl SessionError {
    pub fn invalid_state(reason: impl Into<String>) -> Self {
        SessionError::InvalidState(reason.into())
    }

    /// Stable machine-readable code, used by clients to tell failures apart.
    pub fn code(&self) -> &'static str {
        match self {
            SessionError::IllegalMove(_) => "illegal_move",
            SessionError::InvalidSelection => "invalid_selection",
            SessionError::InvalidState(_) => "invalid_state",
            SessionError::Busy => "busy",
            SessionError::EngineUnavailable(_) => "engine_unavailable",
            SessionError::EngineTimeout => "engine_timeout",
            SessionError::EngineCrashed(_) => "engine_crashed",
            SessionError::EngineStopped => "engine_stopped",
            SessionError::Stale => "stale",
            SessionError::BattleFailed(_) => "battle_failed",
            SessionError::CorruptGameFile(_) => "corrupt_game_file",
            SessionError::InvalidFen(_) => "invalid_fen",
        }
    }

    /// Failures after which the engine process can no longer be trusted.
    pub fn is_engine_fault(&self) -> bool {
        matches!(
            self,
            SessionError::EngineUnavailable(_)
                | SessionError::EngineCrashed(_)
                | SessionError::EngineTimeout
        )
    }
}

impl From<EngineError> for SessionError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::Unavailable(reason) => SessionError::EngineUnavailable(reason),
            EngineError::Timeout => SessionError::EngineTimeout,
            EngineError::Crashed(reason) => SessionError::EngineCrashed(reason),
            EngineError::Protocol(reason) => {
                SessionError::EngineCrashed(format!("protocol violation: {reason}"))
            }
            EngineError::Stopped => SessionError::EngineStopped,
        }
    }
}

impl Serialize for SessionError {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut body = serializer.serialize_struct("SessionError", 2)?;
        body.serialize_field("code", self.code())?;
        body.serialize_field("message", &self.to_string())?;
        body.end()
    }
}
