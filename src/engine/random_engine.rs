use super::{Engine, EngineError, EngineOptions, SearchRequest};
use async_trait::async_trait;
use rand::{Rng, rng};
use shakmaty::{CastlingMode, Position, uci::UciMove};

/// Plays a uniformly random legal move, instantly. Stands in for a real
/// engine when no binary is configured.
pub struct RandomEngine;

impl RandomEngine {
    pub fn new() -> RandomEngine {
        RandomEngine
    }
}

#[async_trait]
impl Engine for RandomEngine {
    async fn configure(&mut self, _options: &EngineOptions) -> Result<(), EngineError> {
        Ok(())
    }

    async fn search(&mut self, request: &SearchRequest) -> Result<UciMove, EngineError> {
        let legals = request.position.legal_moves();
        if legals.is_empty() {
            return Err(EngineError::Protocol(
                "asked to move in a finished game".to_string(),
            ));
        }
        let pick = rng().random_range(0..legals.len());

        Ok(legals[pick].to_uci(CastlingMode::Standard))
    }

    async fn quit(&mut self) -> Result<(), EngineError> {
        Ok(())
    }

    fn name(&self) -> &str {
        "random mover"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shakmaty::Chess;
    use std::time::Duration;

    fn request(position: Chess) -> SearchRequest {
        SearchRequest {
            start_fen: super::super::uci_protocol::STARTPOS_FEN.to_string(),
            moves: Vec::new(),
            position,
            think_time: Duration::from_millis(100),
        }
    }

    #[tokio::test]
    async fn always_answers_with_a_legal_move() {
        let mut engine = RandomEngine::new();
        let position = Chess::new();
        for _ in 0..20 {
            let uci = engine.search(&request(position.clone())).await.unwrap();
            assert!(uci.to_move(&position).is_ok());
        }
    }
}
