use std::{process::Stdio, str::FromStr, time::Duration};

use async_trait::async_trait;
use log::{debug, info, warn};
use shakmaty::uci::UciMove;
use tokio::{
    io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines},
    process::{Child, ChildStdin, ChildStdout, Command},
    time::timeout,
};

use super::{
    Engine, EngineCommand, EngineError, EngineOptions, SearchRequest,
    uci_protocol::{self, UciMessage},
};

const QUIT_TIMEOUT: Duration = Duration::from_secs(1);

/// An external engine process spoken to over stdin/stdout.
pub struct UciEngine {
    name: String,
    child: Child,
    stdin: ChildStdin,
    stdout: Lines<BufReader<ChildStdout>>,
}

impl UciEngine {
    /// Launches the process and waits for `uciok`.
    pub async fn spawn(
        command: &EngineCommand,
        handshake_timeout: Duration,
    ) -> Result<UciEngine, EngineError> {
        let mut child = Command::new(&command.path)
            .args(&command.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                EngineError::Unavailable(format!("cannot launch {}: {e}", command.path.display()))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| EngineError::Unavailable("engine stdin not captured".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| EngineError::Unavailable("engine stdout not captured".to_string()))?;

        let mut engine = UciEngine {
            name: command.path.display().to_string(),
            child,
            stdin,
            stdout: BufReader::new(stdout).lines(),
        };

        match timeout(handshake_timeout, engine.handshake()).await {
            Ok(Ok(())) => {
                info!("engine {} ready", engine.name);
                Ok(engine)
            }
            Ok(Err(e)) => Err(EngineError::Unavailable(format!("handshake failed: {e}"))),
            Err(_) => Err(EngineError::Unavailable(format!(
                "{} did not answer the uci handshake within {:?}",
                engine.name, handshake_timeout
            ))),
        }
    }

    async fn handshake(&mut self) -> Result<(), EngineError> {
        self.send("uci").await?;
        loop {
            match self.read_message().await? {
                UciMessage::IdName(name) => self.name = name,
                UciMessage::UciOk => return Ok(()),
                _ => {}
            }
        }
    }

    async fn send(&mut self, command: &str) -> Result<(), EngineError> {
        debug!("{} <- {command}", self.name);
        self.stdin
            .write_all(format!("{command}\n").as_bytes())
            .await
            .map_err(|e| EngineError::Crashed(format!("write failed: {e}")))?;
        self.stdin
            .flush()
            .await
            .map_err(|e| EngineError::Crashed(format!("flush failed: {e}")))
    }

    async fn read_message(&mut self) -> Result<UciMessage, EngineError> {
        loop {
            let line = self
                .stdout
                .next_line()
                .await
                .map_err(|e| EngineError::Crashed(format!("read failed: {e}")))?
                .ok_or_else(|| EngineError::Crashed("engine closed its output".to_string()))?;
            if let Some(message) = uci_protocol::parse_line(&line) {
                return Ok(message);
            }
        }
    }
}

#[async_trait]
impl Engine for UciEngine {
    async fn configure(&mut self, options: &EngineOptions) -> Result<(), EngineError> {
        for command in uci_protocol::setoption_commands(options) {
            self.send(&command).await?;
        }
        self.send("isready").await?;
        loop {
            if self.read_message().await? == UciMessage::ReadyOk {
                break;
            }
        }
        self.send("ucinewgame").await
    }

    async fn search(&mut self, request: &SearchRequest) -> Result<UciMove, EngineError> {
        self.send(&uci_protocol::position_command(
            &request.start_fen,
            &request.moves,
        ))
        .await?;
        self.send(&uci_protocol::go_command(request.think_time))
            .await?;

        loop {
            match self.read_message().await? {
                UciMessage::BestMove { best_move, .. } => {
                    return UciMove::from_str(&best_move).map_err(|_| {
                        EngineError::Protocol(format!("unusable bestmove {best_move}"))
                    });
                }
                UciMessage::Info {
                    depth: Some(depth),
                    score: Some(score),
                    ..
                } => debug!("{} depth {depth} score {score:?}", self.name),
                _ => {}
            }
        }
    }

    async fn quit(&mut self) -> Result<(), EngineError> {
        // a dead process cannot take "quit", killing it is enough
        let _ = self.send("quit").await;
        if timeout(QUIT_TIMEOUT, self.child.wait()).await.is_err() {
            warn!("engine {} ignored quit, killing it", self.name);
            self.child
                .start_kill()
                .map_err(|e| EngineError::Crashed(format!("kill failed: {e}")))?;
        }
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}
