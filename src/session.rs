//! Per-session chat history.
//!
//! Each browser session (identified by a UUID carried in a cookie) owns a
//! [`ChatHistory`]: a ring buffer of the most recent turns, capped at
//! `max_exchanges` question/answer pairs. Sessions untouched for longer
//! than the idle timeout are dropped the next time the store is accessed.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

use crate::config::SessionConfig;
use crate::models::ChatTurn;

#[derive(Debug, Clone)]
pub struct ChatHistory {
    turns: VecDeque<ChatTurn>,
    max_turns: usize,
}

impl ChatHistory {
    pub fn new(max_exchanges: usize) -> Self {
        let max_turns = max_exchanges * 2;
        Self {
            turns: VecDeque::with_capacity(max_turns),
            max_turns,
        }
    }

    /// Append a question and its answer, evicting the oldest turns.
    pub fn push_exchange(&mut self, user: ChatTurn, assistant: ChatTurn) {
        self.turns.push_back(user);
        self.turns.push_back(assistant);
        while self.turns.len() > self.max_turns {
            self.turns.pop_front();
        }
    }

    pub fn turns(&self) -> Vec<ChatTurn> {
        self.turns.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }
}

struct Session {
    history: ChatHistory,
    last_seen: Instant,
}

pub struct SessionStore {
    sessions: Mutex<HashMap<Uuid, Session>>,
    max_exchanges: usize,
    idle_timeout: Duration,
}

impl SessionStore {
    pub fn new(config: &SessionConfig) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            max_exchanges: config.max_exchanges,
            idle_timeout: Duration::from_secs(config.idle_timeout_secs),
        }
    }

    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    fn purge_idle(&self, sessions: &mut HashMap<Uuid, Session>, now: Instant) {
        let before = sessions.len();
        sessions.retain(|_, s| now.duration_since(s.last_seen) <= self.idle_timeout);
        let purged = before - sessions.len();
        if purged > 0 {
            debug!(purged, "expired idle chat sessions");
        }
    }

    /// Prior turns for `id`, oldest first. Unknown sessions have none.
    pub async fn history(&self, id: Uuid) -> Vec<ChatTurn> {
        let now = Instant::now();
        let mut sessions = self.sessions.lock().await;
        self.purge_idle(&mut sessions, now);
        match sessions.get_mut(&id) {
            Some(session) => {
                session.last_seen = now;
                session.history.turns()
            }
            None => Vec::new(),
        }
    }

    /// Append an exchange to `id`'s history, creating the session if needed.
    pub async fn record(&self, id: Uuid, user: ChatTurn, assistant: ChatTurn) {
        let now = Instant::now();
        let mut sessions = self.sessions.lock().await;
        self.purge_idle(&mut sessions, now);
        let session = sessions.entry(id).or_insert_with(|| Session {
            history: ChatHistory::new(self.max_exchanges),
            last_seen: now,
        });
        session.last_seen = now;
        session.history.push_exchange(user, assistant);
    }

    /// Forget `id`'s history. Returns whether the session existed.
    pub async fn reset(&self, id: Uuid) -> bool {
        self.sessions.lock().await.remove(&id).is_some()
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }
}
