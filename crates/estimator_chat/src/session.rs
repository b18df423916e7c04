//! Chat session manager.
//!
//! Sessions live in memory, keyed by id. Each submitted message runs one graph
//! traversal on a spawned task over a copy of the session's state; the copy is
//! committed back only when the traversal completes.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::Instant;
use tracing::{debug, error, info};

use crate::error::{ChatError, ChatResult};
use crate::graph::ConversationGraph;
use crate::state::ConversationState;
use crate::types::{SessionId, TranscriptEntry, TurnEvent};

/// One chat session
#[derive(Debug)]
pub struct Session {
    pub id: SessionId,
    /// Checkpointed graph state
    pub state: ConversationState,
    /// What the user sees in the chat pane
    pub transcript: Vec<TranscriptEntry>,
    pub created_at: DateTime<Utc>,
    last_active: Instant,
    running: Option<AbortHandle>,
    turn_seq: u64,
    /// Set once the session has left the store
    closed: bool,
}

impl Session {
    fn new(id: SessionId) -> Self {
        Self {
            id,
            state: ConversationState::new(),
            transcript: Vec::new(),
            created_at: Utc::now(),
            last_active: Instant::now(),
            running: None,
            turn_seq: 0,
            closed: false,
        }
    }

    fn touch(&mut self) {
        self.last_active = Instant::now();
    }

    /// Whether a turn is in flight
    pub fn is_running(&self) -> bool {
        self.running.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    fn abort_running(&mut self) {
        if let Some(handle) = self.running.take() {
            handle.abort();
        }
    }

    fn is_idle(&self, timeout: Duration) -> bool {
        !self.is_running() && self.last_active.elapsed() >= timeout
    }

    fn close(&mut self) {
        self.abort_running();
        self.closed = true;
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            id: self.id.clone(),
            transcript: self.transcript.clone(),
            canvas: self.state.canvas.read().to_string(),
            created_at: self.created_at,
        }
    }
}

/// Serializable view of a session for the UI
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub id: SessionId,
    pub transcript: Vec<TranscriptEntry>,
    pub canvas: String,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
}

/// Keyed map of live sessions
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: RwLock<HashMap<SessionId, Arc<Mutex<Session>>>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn create(&self) -> SessionId {
        let id = uuid::Uuid::new_v4().to_string();
        self.sessions
            .write()
            .await
            .insert(id.clone(), Arc::new(Mutex::new(Session::new(id.clone()))));
        info!("Created session {}", id);
        id
    }

    pub async fn get(&self, id: &str) -> ChatResult<Arc<Mutex<Session>>> {
        self.sessions
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| ChatError::SessionNotFound(id.to_string()))
    }

    /// Remove a session, aborting its in-flight turn
    pub async fn remove(&self, id: &str) -> ChatResult<()> {
        let session = self
            .sessions
            .write()
            .await
            .remove(id)
            .ok_or_else(|| ChatError::SessionNotFound(id.to_string()))?;
        session.lock().await.close();
        info!("Ended session {}", id);
        Ok(())
    }

    /// Drop sessions idle for at least `timeout`. Sessions with a turn in
    /// flight are kept. Returns how many were evicted.
    pub async fn evict_idle(&self, timeout: Duration) -> usize {
        let candidates: Vec<(SessionId, Arc<Mutex<Session>>)> = self
            .sessions
            .read()
            .await
            .iter()
            .map(|(id, session)| (id.clone(), Arc::clone(session)))
            .collect();

        let mut idle = Vec::new();
        for (id, session) in candidates {
            if session.lock().await.is_idle(timeout) {
                idle.push(id);
            }
        }
        if idle.is_empty() {
            return 0;
        }

        // A message may have arrived since the scan; check again before removing
        let mut sessions = self.sessions.write().await;
        let mut evicted = 0;
        for id in idle {
            let Some(session) = sessions.get(&id).cloned() else {
                continue;
            };
            let mut session = session.lock().await;
            if !session.is_idle(timeout) {
                debug!("Session {} became active, keeping it", id);
                continue;
            }
            session.close();
            sessions.remove(&id);
            evicted += 1;
        }

        if evicted > 0 {
            info!("Evicted {} idle sessions", evicted);
        }
        evicted
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }
}

/// Main chat session manager
pub struct ChatManager {
    store: Arc<SessionStore>,
    graph: Arc<ConversationGraph>,
}

impl ChatManager {
    pub fn new(graph: ConversationGraph) -> Self {
        Self {
            store: Arc::new(SessionStore::new()),
            graph: Arc::new(graph),
        }
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub async fn create_session(&self) -> SessionId {
        self.store.create().await
    }

    /// Get the current transcript and canvas of a session
    pub async fn get_session(&self, session_id: &str) -> ChatResult<SessionSnapshot> {
        let session = self.store.get(session_id).await?;
        let session = session.lock().await;
        Ok(session.snapshot())
    }

    pub async fn end_session(&self, session_id: &str) -> ChatResult<()> {
        self.store.remove(session_id).await
    }

    /// Start a turn and return its event stream.
    ///
    /// A turn already running in the session is aborted and never commits.
    /// The stream ends with `Done` or `Error`, or just closes if the turn was
    /// cancelled.
    pub async fn send_message(
        &self,
        session_id: &str,
        content: &str,
    ) -> ChatResult<mpsc::UnboundedReceiver<TurnEvent>> {
        let session = self.store.get(session_id).await?;
        self.start_turn(session, content).await
    }

    async fn start_turn(
        &self,
        session_arc: Arc<Mutex<Session>>,
        content: &str,
    ) -> ChatResult<mpsc::UnboundedReceiver<TurnEvent>> {
        let mut session = session_arc.lock().await;
        // Evicted or ended while this call waited for the lock
        if session.closed {
            return Err(ChatError::SessionNotFound(session.id.clone()));
        }

        if session.is_running() {
            info!("Aborting in-flight turn of session {}", session.id);
        }
        session.abort_running();
        session.touch();
        session.turn_seq += 1;
        session.transcript.push(TranscriptEntry::user(content));

        let seq = session.turn_seq;
        let mut working = session.state.clone();
        let graph = Arc::clone(&self.graph);
        let task_session = Arc::clone(&session_arc);
        let id = session.id.clone();
        let content = content.to_string();
        let (tx, rx) = mpsc::unbounded_channel();

        info!("Starting turn {} of session {}", seq, id);
        let handle = tokio::spawn(async move {
            let result = graph.run_turn(&mut working, &content, &tx).await;

            let mut session = task_session.lock().await;
            if session.turn_seq != seq {
                debug!("Turn {} of session {} was superseded", seq, id);
                return;
            }
            session.running = None;
            session.touch();

            match result {
                Ok(outcome) => {
                    session.state = working;
                    session
                        .transcript
                        .push(TranscriptEntry::assistant(outcome.response.clone()));
                    let _ = tx.send(TurnEvent::Done {
                        response: outcome.response,
                        canvas: outcome.canvas,
                    });
                }
                Err(e) if e.is_cancelled() => {
                    info!("Turn {} of session {} cancelled", seq, id);
                }
                Err(e) => {
                    error!("Turn {} of session {} failed: {}", seq, id, e);
                    let _ = tx.send(TurnEvent::Error {
                        message: e.to_string(),
                    });
                }
            }
        });
        session.running = Some(handle.abort_handle());

        Ok(rx)
    }

    /// Periodically evict sessions idle for `idle_timeout`
    pub fn spawn_idle_sweeper(&self, idle_timeout: Duration) -> JoinHandle<()> {
        let store = Arc::clone(&self.store);
        let period = (idle_timeout / 4).clamp(Duration::from_secs(1), Duration::from_secs(60));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                store.evict_idle(idle_timeout).await;
            }
        })
    }
}
