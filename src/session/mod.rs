//! Session store and per-execution event bus.
//!
//! Sessions are in-memory only: conversation history (bounded), an
//! optional approved plan, and activity timestamps for TTL eviction. The
//! HTTP layer mutates sessions; the orchestrator only reads them.

mod events;

pub use events::{Event, EventBus, EventCallback, EventType};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

use crate::llm::{ChatMessage, Role};

/// History is trimmed back to this many messages...
const HISTORY_TRIM_TO: usize = 16;
/// ...whenever it would exceed this many.
const HISTORY_MAX: usize = 20;
/// Sessions are evicted this long after their last activity.
const SESSION_TTL: Duration = Duration::from_secs(30 * 60);
/// How often the sweeper looks for expired sessions.
const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// A client-identified conversational context.
#[derive(Debug, Clone)]
pub struct Session {
    pub history: Vec<ChatMessage>,
    pub approved_plan: Option<String>,
    pub created_at: Instant,
    pub last_activity: Instant,
}

impl Session {
    fn new() -> Self {
        let now = Instant::now();
        Self {
            history: Vec::new(),
            approved_plan: None,
            created_at: now,
            last_activity: now,
        }
    }
}

/// Process-wide session map with TTL eviction.
pub struct SessionStore {
    sessions: RwLock<HashMap<String, Session>>,
}

impl SessionStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            sessions: RwLock::new(HashMap::new()),
        })
    }

    /// Append a message, creating the session if needed. History never
    /// exceeds its cap: on overflow only the most recent messages are kept.
    pub async fn append_message(&self, session_id: &str, role: Role, content: impl Into<String>) {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .entry(session_id.to_string())
            .or_insert_with(Session::new);
        session.history.push(ChatMessage {
            role,
            content: content.into(),
        });
        if session.history.len() > HISTORY_MAX {
            let excess = session.history.len() - HISTORY_TRIM_TO;
            session.history.drain(..excess);
        }
        session.last_activity = Instant::now();
    }

    /// Promote a plan to drive subsequent builder invocations.
    pub async fn approve_plan(&self, session_id: &str, plan: impl Into<String>) {
        let mut sessions = self.sessions.write().await;
        let session = sessions
            .entry(session_id.to_string())
            .or_insert_with(Session::new);
        session.approved_plan = Some(plan.into());
        session.last_activity = Instant::now();
    }

    pub async fn approved_plan(&self, session_id: &str) -> Option<String> {
        let sessions = self.sessions.read().await;
        sessions
            .get(session_id)
            .and_then(|s| s.approved_plan.clone())
    }

    pub async fn get(&self, session_id: &str) -> Option<Session> {
        self.sessions.read().await.get(session_id).cloned()
    }

    pub async fn touch(&self, session_id: &str) {
        let mut sessions = self.sessions.write().await;
        if let Some(session) = sessions.get_mut(session_id) {
            session.last_activity = Instant::now();
        }
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Remove sessions idle past the TTL. Returns how many were evicted.
    pub async fn evict_expired(&self) -> usize {
        self.evict_idle(SESSION_TTL).await
    }

    async fn evict_idle(&self, ttl: Duration) -> usize {
        let mut sessions = self.sessions.write().await;
        let before = sessions.len();
        sessions.retain(|_, session| session.last_activity.elapsed() < ttl);
        let evicted = before - sessions.len();
        if evicted > 0 {
            tracing::debug!(evicted, "evicted expired sessions");
        }
        evicted
    }

    /// Spawn the background TTL sweeper.
    pub fn spawn_sweeper(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(SWEEP_INTERVAL);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                store.evict_expired().await;
            }
        })
    }
}
