pub mod adapter;
mod random_engine;
mod uci_engine;
pub mod uci_protocol;

use std::{path::PathBuf, time::Duration};

use async_trait::async_trait;
use random_engine::RandomEngine;
use shakmaty::{Chess, uci::UciMove};
use thiserror::Error;
use uci_engine::UciEngine;

pub use adapter::EngineAdapter;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("engine unavailable: {0}")]
    Unavailable(String),
    #[error("engine timeout")]
    Timeout,
    #[error("engine crashed: {0}")]
    Crashed(String),
    #[error("engine protocol error: {0}")]
    Protocol(String),
    #[error("engine stopped")]
    Stopped,
}

/// Resolved executable plus its arguments. Finding the binary is the
/// caller's business.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineCommand {
    pub path: PathBuf,
    pub args: Vec<String>,
}

/// What kind of engine a session launches on demand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineSpec {
    Uci(EngineCommand),
    /// In-process engine playing random legal moves.
    Random,
}

/// Options sent to the engine during configuration. Changing any of them
/// requires a fresh process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineOptions {
    pub skill_level: u8,
    pub hash_mb: u32,
    pub threads: u32,
}

/// One search: the game from its start plus the current position, so engines
/// can choose whichever representation they need.
#[derive(Debug, Clone)]
pub struct SearchRequest {
    pub start_fen: String,
    pub moves: Vec<String>,
    pub position: Chess,
    pub think_time: Duration,
}

#[async_trait]
pub trait Engine: Send {
    async fn configure(&mut self, options: &EngineOptions) -> Result<(), EngineError>;

    async fn search(&mut self, request: &SearchRequest) -> Result<UciMove, EngineError>;

    async fn quit(&mut self) -> Result<(), EngineError>;

    fn name(&self) -> &str;
}

pub async fn launch(
    spec: &EngineSpec,
    options: &EngineOptions,
    handshake_timeout: Duration,
) -> Result<Box<dyn Engine>, EngineError> {
    let mut engine: Box<dyn Engine> = match spec {
        EngineSpec::Uci(command) => Box::new(UciEngine::spawn(command, handshake_timeout).await?),
        EngineSpec::Random => Box::new(RandomEngine::new()),
    };
    // a process that cannot even take its options counts as unavailable
    match tokio::time::timeout(handshake_timeout, engine.configure(options)).await {
        Ok(Ok(())) => Ok(engine),
        Ok(Err(e)) => {
            let _ = engine.quit().await;
            Err(EngineError::Unavailable(format!("configuration failed: {e}")))
        }
        Err(_) => {
            let _ = engine.quit().await;
            Err(EngineError::Unavailable(
                "no readyok after configuration".to_string(),
            ))
        }
    }
}
