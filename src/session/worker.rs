use std::sync::Arc;

use log::debug;
use tokio::task::JoinHandle;

use super::{
    GameSession,
    state::{MoveOutcome, Requester},
};
use crate::error::SessionError;

/// Handle on one engine move running in the background.
///
/// Dropping it does not cancel the move; the result still lands in the
/// session and shows up in its snapshot.
pub struct EngineTask {
    handle: JoinHandle<Result<MoveOutcome, SessionError>>,
}

impl EngineTask {
    pub async fn wait(self) -> Result<MoveOutcome, SessionError> {
        match self.handle.await {
            Ok(outcome) => outcome,
            Err(e) => Err(SessionError::EngineCrashed(format!(
                "engine worker aborted: {e}"
            ))),
        }
    }
}

impl GameSession {
    /// Asks the engine for a move on the current position. Returns as soon
    /// as the search is started; the snapshot reports it as thinking until
    /// the move is committed or the attempt fails.
    pub async fn request_engine_move(self: &Arc<Self>) -> Result<EngineTask, SessionError> {
        self.spawn_engine_move(Requester::Client).await
    }

    pub(super) async fn spawn_engine_move(
        self: &Arc<Self>,
        requester: Requester,
    ) -> Result<EngineTask, SessionError> {
        let (adapter, request, ticket) = {
            let mut state = self.state.lock().await;
            state.admit_engine_move(requester)?;
            let adapter = state.engine_adapter(&self.id, &self.settings);
            let request = state.search_request();
            let ticket = state.ticket();
            state.task = super::EngineTaskStatus::Thinking;
            (adapter, request, ticket)
        };
        debug!(
            "[{}] engine thinking for {:?} after {} moves",
            self.id,
            request.think_time,
            request.moves.len()
        );

        let session = Arc::clone(self);
        let handle = tokio::spawn(async move {
            let searched = match adapter.start().await {
                Ok(()) => adapter.best_move(&request).await,
                Err(e) => Err(e),
            };
            let mut state = session.state.lock().await;
            state.commit_engine_move(&session.id, &ticket, searched.map_err(SessionError::from))
        });
        Ok(EngineTask { handle })
    }
}
