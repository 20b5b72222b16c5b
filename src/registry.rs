use std::{
    collections::HashMap,
    sync::Arc,
    time::{Duration, Instant},
};

use futures::future::join_all;
use log::{debug, info};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{config::SessionSettings, session::GameSession};

/// All live sessions, keyed by the identifier handed to clients.
pub struct SessionRegistry {
    settings: Arc<SessionSettings>,
    sessions: Mutex<HashMap<String, Arc<GameSession>>>,
    idle_timeout: Duration,
}

impl SessionRegistry {
    pub fn new(settings: SessionSettings, idle_timeout: Duration) -> SessionRegistry {
        SessionRegistry {
            settings: Arc::new(settings),
            sessions: Mutex::new(HashMap::new()),
            idle_timeout,
        }
    }

    pub fn new_session_id() -> String {
        Uuid::new_v4().to_string()
    }

    /// Returns the session for `id`, creating it when unknown. A missing id
    /// gets a fresh one. Two calls racing on the same new id share one session.
    pub async fn get_or_create(&self, id: Option<&str>) -> Arc<GameSession> {
        let id = id
            .map(str::to_string)
            .unwrap_or_else(Self::new_session_id);
        let mut sessions = self.sessions.lock().await;
        let session = sessions
            .entry(id)
            .or_insert_with_key(|id| {
                info!("[{id}] new session");
                Arc::new(GameSession::new(id.clone(), Arc::clone(&self.settings)))
            })
            .clone();
        session.touch();
        session
    }

    pub async fn get(&self, id: &str) -> Option<Arc<GameSession>> {
        let session = self.sessions.lock().await.get(id).cloned()?;
        session.touch();
        Some(session)
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Shuts down and forgets sessions untouched since before `now - idle_timeout`.
    pub async fn evict_idle(&self, now: Instant) -> usize {
        let evicted: Vec<Arc<GameSession>> = {
            let mut sessions = self.sessions.lock().await;
            let idle: Vec<String> = sessions
                .iter()
                .filter(|(_, session)| {
                    now.saturating_duration_since(session.last_seen()) >= self.idle_timeout
                })
                .map(|(id, _)| id.clone())
                .collect();
            idle.iter().filter_map(|id| sessions.remove(id)).collect()
        };

        let count = evicted.len();
        join_all(evicted.iter().map(|session| session.shutdown())).await;
        if count > 0 {
            info!("evicted {count} idle session(s)");
        }
        count
    }

    /// Evicts idle sessions every `interval` until `cancel` fires.
    pub async fn run_reaper(self: Arc<Self>, cancel: CancellationToken, interval: Duration) {
        debug!("session reaper running every {interval:?}");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {
                    self.evict_idle(Instant::now()).await;
                }
            }
        }
        debug!("session reaper stopped");
    }

    /// Closes every session. Used when the server goes down.
    pub async fn shutdown(&self) {
        let sessions: Vec<Arc<GameSession>> =
            self.sessions.lock().await.drain().map(|(_, s)| s).collect();
        info!("shutting down {} session(s)", sessions.len());
        join_all(sessions.iter().map(|session| session.shutdown())).await;
    }
}
