//! Session management for cal-concierge.
//!
//! Each session owns one [`SlotState`]. A turn checks the session out,
//! which holds the session's lock until the turn is done, so two messages
//! for the same session run one after the other while different sessions
//! run in parallel. Sessions idle longer than the TTL are dropped, and the
//! least recently active one makes room when the store is full.

use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use crate::error::SessionError;
use crate::types::SlotState;

fn now_millis() -> u64 {
    chrono::Utc::now().timestamp_millis() as u64
}

/// Configuration for the session store.
#[derive(Debug, Clone)]
pub struct SessionStoreConfig {
    /// Idle time after which a session is dropped
    pub ttl: Duration,
    /// Maximum live sessions
    pub max_sessions: usize,
}

impl Default for SessionStoreConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(3600),
            max_sessions: 1000,
        }
    }
}

/// A conversation session.
#[derive(Debug)]
pub struct Session {
    pub id: String,
    /// Creation timestamp (Unix milliseconds)
    pub created_at: u64,
    /// Last activity timestamp (Unix milliseconds)
    last_activity: AtomicU64,
    state: Arc<Mutex<SlotState>>,
}

impl Session {
    fn new(id: String, state: SlotState) -> Self {
        let now = now_millis();
        Self {
            id,
            created_at: now,
            last_activity: AtomicU64::new(now),
            state: Arc::new(Mutex::new(state)),
        }
    }

    pub fn last_activity(&self) -> u64 {
        self.last_activity.load(Ordering::SeqCst)
    }

    /// Check if the session has been idle longer than `ttl`.
    pub fn is_expired(&self, ttl: Duration) -> bool {
        let idle = now_millis().saturating_sub(self.last_activity());
        u128::from(idle) > ttl.as_millis()
    }

    /// Update the last activity timestamp.
    pub fn touch(&self) {
        self.last_activity.store(now_millis(), Ordering::SeqCst);
    }

    /// Whether a turn currently holds this session.
    pub fn is_checked_out(&self) -> bool {
        self.state.try_lock().is_err()
    }
}

/// Exclusive access to a session's state for the length of a turn.
///
/// Dropping it releases the session and marks it active.
pub struct Checkout {
    session: Arc<Session>,
    state: OwnedMutexGuard<SlotState>,
    created: bool,
}

impl Checkout {
    pub fn id(&self) -> &str {
        &self.session.id
    }

    /// Whether this checkout created the session.
    pub fn created(&self) -> bool {
        self.created
    }
}

impl Deref for Checkout {
    type Target = SlotState;

    fn deref(&self) -> &SlotState {
        &self.state
    }
}

impl DerefMut for Checkout {
    fn deref_mut(&mut self) -> &mut SlotState {
        &mut self.state
    }
}

impl Drop for Checkout {
    fn drop(&mut self) {
        self.session.touch();
    }
}

/// Bounded, time-evicting map from session id to state.
pub struct SessionStore {
    sessions: RwLock<HashMap<String, Arc<Session>>>,
    config: SessionStoreConfig,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::with_config(SessionStoreConfig::default())
    }

    pub fn with_config(config: SessionStoreConfig) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            config,
        }
    }

    pub fn config(&self) -> &SessionStoreConfig {
        &self.config
    }

    /// Store `state` under a fresh id and return the id.
    pub async fn create(&self, state: SlotState) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        let mut sessions = self.sessions.write().await;
        self.make_room(&mut sessions);
        sessions.insert(id.clone(), Arc::new(Session::new(id.clone(), state)));
        tracing::info!(session_id = %id, "session created");
        id
    }

    /// Check out `id`, creating it from `init` if absent or expired.
    pub async fn checkout_or_create<F>(&self, id: &str, init: F) -> Checkout
    where
        F: FnOnce() -> SlotState,
    {
        let (session, created) = {
            let mut sessions = self.sessions.write().await;
            let live = sessions
                .get(id)
                .filter(|s| !s.is_expired(self.config.ttl))
                .cloned();
            match live {
                Some(session) => (session, false),
                None => {
                    if sessions.remove(id).is_some() {
                        tracing::info!(session_id = %id, "session expired");
                    }
                    self.make_room(&mut sessions);
                    let session = Arc::new(Session::new(id.to_string(), init()));
                    sessions.insert(id.to_string(), session.clone());
                    tracing::info!(session_id = %id, "session created");
                    (session, true)
                }
            }
        };

        let state = session.state.clone().lock_owned().await;
        Checkout { session, state, created }
    }

    /// Check out an existing session.
    pub async fn checkout(&self, id: &str) -> Result<Checkout, SessionError> {
        let session = self.live(id).await?;
        let state = session.state.clone().lock_owned().await;
        Ok(Checkout { session, state, created: false })
    }

    /// Copy of a session's state. Waits for a running turn to finish.
    pub async fn snapshot(&self, id: &str) -> Result<SlotState, SessionError> {
        let session = self.live(id).await?;
        let state = session.state.lock().await;
        Ok(state.clone())
    }

    /// Remove a session. Returns whether it existed.
    pub async fn remove(&self, id: &str) -> bool {
        let removed = self.sessions.write().await.remove(id).is_some();
        if removed {
            tracing::info!(session_id = %id, "session deleted");
        }
        removed
    }

    /// Drop every expired session and return their ids.
    pub async fn cleanup_expired(&self) -> Vec<String> {
        let mut sessions = self.sessions.write().await;
        let expired: Vec<String> = sessions
            .values()
            .filter(|s| s.is_expired(self.config.ttl))
            .map(|s| s.id.clone())
            .collect();

        for id in &expired {
            sessions.remove(id);
            tracing::info!(session_id = %id, "session expired");
        }
        expired
    }

    /// Info on all live sessions, most recently active first.
    pub async fn list(&self) -> Vec<SessionInfo> {
        let sessions = self.sessions.read().await;
        let mut infos: Vec<SessionInfo> = sessions
            .values()
            .filter(|s| !s.is_expired(self.config.ttl))
            .map(|s| SessionInfo::from(s.as_ref()))
            .collect();
        infos.sort_by(|a, b| b.last_activity.cmp(&a.last_activity));
        infos
    }

    /// Get the number of stored sessions.
    pub async fn count(&self) -> usize {
        self.sessions.read().await.len()
    }

    async fn live(&self, id: &str) -> Result<Arc<Session>, SessionError> {
        let session = self
            .sessions
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or(SessionError::NotFound)?;

        if session.is_expired(self.config.ttl) {
            self.sessions.write().await.remove(id);
            tracing::info!(session_id = %id, "session expired");
            return Err(SessionError::Expired);
        }
        Ok(session)
    }

    /// Ensure one free place: drop expired entries, then the least
    /// recently active idle one if still full.
    ///
    /// Sessions with a turn in progress are never evicted, so the store
    /// may briefly exceed capacity when every session is busy.
    fn make_room(&self, sessions: &mut HashMap<String, Arc<Session>>) {
        if sessions.len() < self.config.max_sessions {
            return;
        }
        sessions.retain(|_, s| s.is_checked_out() || !s.is_expired(self.config.ttl));

        while sessions.len() >= self.config.max_sessions.max(1) {
            let Some(oldest) = sessions
                .values()
                .filter(|s| !s.is_checked_out())
                .min_by_key(|s| s.last_activity())
                .map(|s| s.id.clone())
            else {
                tracing::warn!(sessions = sessions.len(), "every session is busy, exceeding capacity");
                break;
            };
            sessions.remove(&oldest);
            tracing::info!(session_id = %oldest, "session evicted at capacity");
        }
    }
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Session information for API responses.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SessionInfo {
    pub id: String,
    /// Creation timestamp
    pub created_at: u64,
    /// Last activity timestamp
    pub last_activity: u64,
}

impl From<&Session> for SessionInfo {
    fn from(session: &Session) -> Self {
        Self {
            id: session.id.clone(),
            created_at: session.created_at,
            last_activity: session.last_activity(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::join_all;

    fn store(ttl: Duration, max_sessions: usize) -> SessionStore {
        SessionStore::with_config(SessionStoreConfig { ttl, max_sessions })
    }

    #[tokio::test]
    async fn test_checkout_or_create() {
        let store = SessionStore::new();

        {
            let mut first = store.checkout_or_create("abc", || SlotState::new("cal")).await;
            assert!(first.created());
            first.begin_turn("hello");
        }

        let second = store.checkout_or_create("abc", || SlotState::new("other")).await;
        assert!(!second.created());
        assert_eq!(second.calendar_id, "cal");
        assert_eq!(second.history.len(), 1);
        drop(second);

        assert_eq!(store.count().await, 1);
    }

    #[tokio::test]
    async fn test_missing_session_is_not_created() {
        let store = SessionStore::new();
        assert_eq!(store.snapshot("nope").await.unwrap_err(), SessionError::NotFound);
        assert!(store.checkout("nope").await.is_err());
        assert!(!store.remove("nope").await);
        assert_eq!(store.count().await, 0);
    }

    #[tokio::test]
    async fn test_create_and_remove() {
        let store = SessionStore::new();
        let id = store.create(SlotState::new("cal")).await;

        assert_eq!(store.snapshot(&id).await.unwrap().calendar_id, "cal");
        assert!(store.remove(&id).await);
        assert_eq!(store.snapshot(&id).await.unwrap_err(), SessionError::NotFound);
    }

    #[tokio::test]
    async fn test_expiry() {
        let store = store(Duration::from_millis(20), 10);
        let id = store.create(SlotState::new("cal")).await;
        let other = store.create(SlotState::new("cal")).await;

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(store.snapshot(&id).await.unwrap_err(), SessionError::Expired);

        let expired = store.cleanup_expired().await;
        assert_eq!(expired, vec![other]);
        assert_eq!(store.count().await, 0);
    }

    #[tokio::test]
    async fn test_capacity_evicts_least_recent() {
        let store = store(Duration::from_secs(3600), 2);
        let a = store.create(SlotState::new("cal")).await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        let b = store.create(SlotState::new("cal")).await;
        tokio::time::sleep(Duration::from_millis(5)).await;

        // Touch `a` so `b` becomes the oldest
        drop(store.checkout(&a).await.unwrap());
        tokio::time::sleep(Duration::from_millis(5)).await;

        let c = store.create(SlotState::new("cal")).await;
        assert_eq!(store.count().await, 2);
        assert!(store.snapshot(&a).await.is_ok());
        assert!(store.snapshot(&b).await.is_err());
        assert!(store.snapshot(&c).await.is_ok());
    }

    #[tokio::test]
    async fn test_capacity_spares_session_mid_turn() {
        let store = store(Duration::from_secs(3600), 2);
        let busy = store.create(SlotState::new("cal")).await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        let idle = store.create(SlotState::new("cal")).await;

        // `busy` is the least recently active but holds its lock
        let mut turn = store.checkout(&busy).await.unwrap();
        let fresh = store.create(SlotState::new("cal")).await;

        let ids: Vec<String> = store.list().await.into_iter().map(|i| i.id).collect();
        assert!(ids.contains(&busy));
        assert!(ids.contains(&fresh));
        assert!(!ids.contains(&idle));

        turn.begin_turn("still here");
        drop(turn);
        assert_eq!(store.snapshot(&busy).await.unwrap().history.len(), 1);
    }

    #[tokio::test]
    async fn test_same_session_turns_are_serialized() {
        let store = Arc::new(SessionStore::new());
        let id = store.create(SlotState::new("cal")).await;

        let turns = (0..10).map(|i| {
            let store = store.clone();
            let id = id.clone();
            async move {
                let mut state = store.checkout(&id).await.unwrap();
                let seen = state.history.len();
                tokio::time::sleep(Duration::from_millis(2)).await;
                state.begin_turn(&format!("message {}", i));
                assert_eq!(state.history.len(), seen + 1);
            }
        });
        join_all(turns).await;

        assert_eq!(store.snapshot(&id).await.unwrap().history.len(), 10);
    }

    #[tokio::test]
    async fn test_list_sessions() {
        let store = SessionStore::new();
        let a = store.create(SlotState::new("cal")).await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        let b = store.create(SlotState::new("cal")).await;

        let ids: Vec<String> = store.list().await.into_iter().map(|i| i.id).collect();
        assert_eq!(ids, vec![b, a]);
    }
}
