//! Session registry
//!
//! Owns every live session: its conversation memory and calculator state.
//! Each session is a single logical actor. `SessionHandle::begin_turn`
//! serializes turns per session, while different sessions run concurrently.
//! State is held in memory only and discarded on reset or idle expiry.

use crate::calculator::CalculatorState;
use crate::error::OrchestrationError;
use crate::memory::{ConversationMemory, DomainVocabulary};
use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tracing::{debug, info};
use uuid::Uuid;

const MAX_SESSION_ID_LEN: usize = 128;

/// Everything a session owns
#[derive(Debug, Clone)]
pub struct SessionState {
    pub memory: ConversationMemory,
    pub calculator: CalculatorState,
    pub created_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
}

pub struct SessionHandle {
    id: String,
    turn_lock: Arc<Mutex<()>>,
    /// Set under the turn lock once the handle has left the registry
    closed: AtomicBool,
    state: RwLock<SessionState>,
}

/// Held for the duration of one turn; dropping it admits the next turn
pub struct TurnGuard {
    _guard: OwnedMutexGuard<()>,
}

impl SessionHandle {
    fn new(id: String, memory: ConversationMemory) -> Self {
        let now = Utc::now();
        Self {
            id,
            turn_lock: Arc::new(Mutex::new(())),
            closed: AtomicBool::new(false),
            state: RwLock::new(SessionState {
                memory,
                calculator: CalculatorState::Inactive,
                created_at: now,
                last_active: now,
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Wait until no other turn is in flight for this session
    pub async fn begin_turn(&self) -> TurnGuard {
        TurnGuard {
            _guard: self.turn_lock.clone().lock_owned().await,
        }
    }

    /// The turn lock, unless a turn is already in flight
    pub fn try_begin_turn(&self) -> Option<TurnGuard> {
        self.turn_lock
            .clone()
            .try_lock_owned()
            .ok()
            .map(|guard| TurnGuard { _guard: guard })
    }

    pub fn is_busy(&self) -> bool {
        self.turn_lock.try_lock().is_err()
    }

    /// Mark the handle dead. Callers hold its `TurnGuard`, so a turn queued
    /// behind them observes the flag once it gets the lock.
    pub fn close(&self, _turn: &TurnGuard) {
        self.closed.store(true, Ordering::SeqCst);
    }

    /// A closed handle is no longer in the registry; reload before using it
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Copy of the current state; no lock is held afterwards
    pub async fn snapshot(&self) -> SessionState {
        self.state.read().await.clone()
    }

    /// Apply a turn's results. The only write path into session state.
    pub async fn commit<F, T>(&self, apply: F) -> T
    where
        F: FnOnce(&mut SessionState) -> T,
    {
        let mut state = self.state.write().await;
        state.last_active = Utc::now();
        apply(&mut state)
    }

    pub async fn touch(&self) {
        self.state.write().await.last_active = Utc::now();
    }

    pub async fn idle_for(&self) -> Duration {
        let last = self.state.read().await.last_active;
        (Utc::now() - last).to_std().unwrap_or(Duration::ZERO)
    }
}

/// Session registry capability
#[async_trait]
pub trait MemoryStore: Send + Sync {
    /// Existing session, or a new one (fresh id when none is given)
    async fn load_or_create(&self, session_id: Option<&str>) -> Result<Arc<SessionHandle>>;

    async fn get(&self, session_id: &str) -> Result<Arc<SessionHandle>>;

    /// Close and destroy a session. The caller holds its turn guard.
    /// Returns whether the handle was still registered.
    async fn remove(&self, handle: &SessionHandle, turn: &TurnGuard) -> bool;

    /// Drop sessions idle for longer than `max_idle`; busy sessions are kept
    async fn evict_idle(&self, max_idle: Duration) -> usize;

    async fn len(&self) -> usize;
}

pub fn validate_session_id(session_id: &str) -> Result<()> {
    let valid = !session_id.is_empty()
        && session_id.len() <= MAX_SESSION_ID_LEN
        && session_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(OrchestrationError::InvalidSessionId(session_id.chars().take(32).collect()))
    }
}

pub struct InMemorySessionStore {
    sessions: RwLock<HashMap<String, Arc<SessionHandle>>>,
    memory_capacity: usize,
    vocabulary: Arc<DomainVocabulary>,
}

impl InMemorySessionStore {
    pub fn new(memory_capacity: usize, vocabulary: Arc<DomainVocabulary>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            memory_capacity,
            vocabulary,
        }
    }
}

#[async_trait]
impl MemoryStore for InMemorySessionStore {
    async fn load_or_create(&self, session_id: Option<&str>) -> Result<Arc<SessionHandle>> {
        let id = match session_id {
            Some(id) => {
                validate_session_id(id)?;
                id.to_string()
            }
            None => Uuid::new_v4().to_string(),
        };

        if let Some(handle) = self.sessions.read().await.get(&id).cloned() {
            handle.touch().await;
            return Ok(handle);
        }

        let mut sessions = self.sessions.write().await;
        let handle = sessions
            .entry(id.clone())
            .or_insert_with(|| {
                info!(session_id = %id, "Session created");
                Arc::new(SessionHandle::new(
                    id.clone(),
                    ConversationMemory::new(self.memory_capacity, self.vocabulary.clone()),
                ))
            })
            .clone();
        Ok(handle)
    }

    async fn get(&self, session_id: &str) -> Result<Arc<SessionHandle>> {
        validate_session_id(session_id)?;
        self.sessions
            .read()
            .await
            .get(session_id)
            .cloned()
            .ok_or_else(|| OrchestrationError::SessionNotFound(session_id.to_string()))
    }

    async fn remove(&self, handle: &SessionHandle, turn: &TurnGuard) -> bool {
        let mut sessions = self.sessions.write().await;
        handle.close(turn);

        // Only the registered handle for this id; a closed one may have been replaced
        let registered = sessions
            .get(handle.id())
            .map_or(false, |current| std::ptr::eq(current.as_ref(), handle));
        if registered {
            sessions.remove(handle.id());
            info!(session_id = %handle.id(), "Session destroyed");
        }
        registered
    }

    async fn evict_idle(&self, max_idle: Duration) -> usize {
        let mut sessions = self.sessions.write().await;

        let mut expired = Vec::new();
        for (id, handle) in sessions.iter() {
            let Some(turn) = handle.try_begin_turn() else {
                continue;
            };
            if handle.idle_for().await > max_idle {
                handle.close(&turn);
                expired.push(id.clone());
            }
        }

        for id in &expired {
            sessions.remove(id);
            debug!(session_id = %id, "Idle session evicted");
        }
        if !expired.is_empty() {
            info!(evicted = expired.len(), "Idle sessions evicted");
        }
        expired.len()
    }

    async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }
}
