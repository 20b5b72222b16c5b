use std::time::Duration;

use log::{info, warn};
use parking_lot::Mutex as SyncMutex;
use shakmaty::uci::UciMove;
use tokio::{sync::Mutex, time::timeout};
use tokio_util::sync::CancellationToken;

use super::{Engine, EngineError, EngineOptions, EngineSpec, SearchRequest, launch};

/// Owns at most one engine process for one session.
///
/// The process is launched by `start` and thrown away on any failure; it is
/// never restarted behind the caller's back, so the next `start` always
/// applies the options this adapter was built with.
pub struct EngineAdapter {
    label: String,
    spec: EngineSpec,
    options: EngineOptions,
    handshake_timeout: Duration,
    grace: Duration,
    engine: Mutex<Option<Box<dyn Engine>>>,
    // replaced by every stop() so later calls are not born cancelled
    stop_signal: SyncMutex<CancellationToken>,
    // never replaced: once closed, the adapter launches nothing again
    closed: CancellationToken,
}

impl EngineAdapter {
    pub fn new(
        label: impl Into<String>,
        spec: EngineSpec,
        options: EngineOptions,
        handshake_timeout: Duration,
        grace: Duration,
    ) -> EngineAdapter {
        EngineAdapter {
            label: label.into(),
            spec,
            options,
            handshake_timeout,
            grace,
            engine: Mutex::new(None),
            stop_signal: SyncMutex::new(CancellationToken::new()),
            closed: CancellationToken::new(),
        }
    }

    pub fn options(&self) -> EngineOptions {
        self.options
    }

    /// A token cancelled by the next `stop` or by `close`.
    fn stop_token(&self) -> CancellationToken {
        let current = self.stop_signal.lock().clone();
        if self.closed.is_cancelled() {
            current.cancel();
        }
        current
    }

    /// Launches and configures the engine unless it is already running.
    pub async fn start(&self) -> Result<(), EngineError> {
        let stopped = self.stop_token();
        if stopped.is_cancelled() {
            return Err(EngineError::Stopped);
        }
        let mut slot = tokio::select! {
            _ = stopped.cancelled() => return Err(EngineError::Stopped),
            slot = self.engine.lock() => slot,
        };
        if slot.is_some() {
            return Ok(());
        }

        let engine = tokio::select! {
            _ = stopped.cancelled() => return Err(EngineError::Stopped),
            launched = launch(&self.spec, &self.options, self.handshake_timeout) => launched,
        };
        match engine {
            Ok(engine) => {
                info!(
                    "[{}] engine {} started (skill {}, hash {} MB, {} thread(s))",
                    self.label,
                    engine.name(),
                    self.options.skill_level,
                    self.options.hash_mb,
                    self.options.threads
                );
                *slot = Some(engine);
                Ok(())
            }
            Err(e) => {
                warn!("[{}] engine failed to start: {e}", self.label);
                Err(e)
            }
        }
    }

    /// Searches `request` for at most its think time plus the grace margin.
    /// Blocks the calling task only; callers must not hold a session lock.
    pub async fn best_move(&self, request: &SearchRequest) -> Result<UciMove, EngineError> {
        let stopped = self.stop_token();
        if stopped.is_cancelled() {
            return Err(EngineError::Stopped);
        }
        let mut slot = tokio::select! {
            _ = stopped.cancelled() => return Err(EngineError::Stopped),
            slot = self.engine.lock() => slot,
        };
        let engine = slot
            .as_mut()
            .ok_or_else(|| EngineError::Unavailable("engine not started".to_string()))?;

        let budget = request.think_time + self.grace;
        let searched = tokio::select! {
            _ = stopped.cancelled() => return Err(EngineError::Stopped),
            searched = timeout(budget, engine.search(request)) => searched,
        };

        let failure = match searched {
            Ok(Ok(best)) => return Ok(best),
            Ok(Err(e)) => e,
            Err(_) => EngineError::Timeout,
        };
        warn!(
            "[{}] discarding engine after failed search: {failure}",
            self.label
        );
        if let Some(mut engine) = slot.take() {
            let _ = engine.quit().await;
        }
        Err(failure)
    }

    /// Terminates the process. Safe to call repeatedly and while `best_move`
    /// is in flight, which then fails with `EngineError::Stopped`.
    pub async fn stop(&self) {
        let previous = std::mem::replace(&mut *self.stop_signal.lock(), CancellationToken::new());
        previous.cancel();
        self.release().await;
    }

    /// Stops the engine for good. Later `start` and `best_move` calls, and
    /// any still in flight, fail with `EngineError::Stopped`.
    pub async fn close(&self) {
        self.closed.cancel();
        self.stop_signal.lock().cancel();
        self.release().await;
    }

    async fn release(&self) {
        let engine = self.engine.lock().await.take();
        if let Some(mut engine) = engine {
            if let Err(e) = engine.quit().await {
                warn!("[{}] engine did not quit cleanly: {e}", self.label);
            }
            info!("[{}] engine stopped", self.label);
        }
    }
}
