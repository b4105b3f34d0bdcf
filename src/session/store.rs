//! Session records and their store.

use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use uuid::Uuid;

use crate::mcp::McpConnection;

/// Default idle timeout (30 minutes).
pub const DEFAULT_SESSION_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// One live HTTP session: an id bound to exactly one protocol handler.
#[derive(Debug)]
pub struct Session {
    inner: Arc<SessionInner>,
}

#[derive(Debug)]
struct SessionInner {
    /// Opaque session identifier.
    id: String,
    /// Handler every request on this session is routed to.
    connection: Arc<McpConnection>,
    /// Last activity time.
    last_activity: Mutex<Instant>,
}

impl Clone for Session {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Session {
    /// Bind `connection` to `id`.
    pub fn new(id: impl Into<String>, connection: Arc<McpConnection>) -> Self {
        Self {
            inner: Arc::new(SessionInner {
                id: id.into(),
                connection,
                last_activity: Mutex::new(Instant::now()),
            }),
        }
    }

    /// Mint a fresh random (UUID v4) session identifier.
    pub fn generate_id() -> String {
        Uuid::new_v4().to_string()
    }

    /// Get the session ID.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// The bound protocol handler.
    pub fn connection(&self) -> &Arc<McpConnection> {
        &self.inner.connection
    }

    /// Update the last activity timestamp.
    pub fn touch(&self) {
        let mut guard = self
            .inner
            .last_activity
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *guard = Instant::now();
    }

    /// Time since the last request on this session.
    pub fn idle_for(&self) -> Duration {
        let last = *self
            .inner
            .last_activity
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        Instant::now().saturating_duration_since(last)
    }

    /// Check if the session has been idle longer than `timeout`.
    #[must_use]
    pub fn is_expired_with_timeout(&self, timeout: Duration) -> bool {
        self.idle_for() > timeout
    }

}

/// Concurrency-safe map from session id to [`Session`].
///
/// Cloning shares the underlying map; each HTTP server owns its own store.
#[derive(Debug, Clone, Default)]
pub struct SessionStore {
    inner: Arc<RwLock<HashMap<String, Session>>>,
}

impl SessionStore {
    /// Create a new session store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `session` unless its id is already taken.
    ///
    /// Returns `false` (and keeps the existing record) on a duplicate id.
    pub async fn insert(&self, session: Session) -> bool {
        let mut guard = self.inner.write().await;
        match guard.entry(session.id().to_string()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(session);
                true
            }
        }
    }

    /// Get a session by ID and mark it active.
    pub async fn get(&self, id: &str) -> Option<Session> {
        let guard = self.inner.read().await;
        let session = guard.get(id).cloned();
        drop(guard);
        if let Some(s) = &session {
            s.touch();
        }
        session
    }

    /// Remove a session by ID.
    pub async fn remove(&self, id: &str) -> Option<Session> {
        self.inner.write().await.remove(id)
    }

    /// Get the number of active sessions.
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    /// Check if there are no sessions.
    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Remove sessions that have been inactive longer than the timeout.
    ///
    /// Returns the number of sessions removed.
    pub async fn cleanup_expired(&self, timeout: Duration) -> usize {
        let mut guard = self.inner.write().await;
        let before = guard.len();
        guard.retain(|_, session| !session.is_expired_with_timeout(timeout));
        before - guard.len()
    }

    /// Periodically evict idle sessions until the returned task is aborted.
    pub fn spawn_reaper(&self, every: Duration, timeout: Duration) -> JoinHandle<()> {
        let store = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let removed = store.cleanup_expired(timeout).await;
                if removed > 0 {
                    tracing::info!(
                        name: "session.evicted",
                        count = removed,
                        "Evicted idle sessions"
                    );
                }
            }
        })
    }

    /// List all session IDs.
    pub async fn list_ids(&self) -> Vec<String> {
        self.inner.read().await.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mcp::tools::tests::FakeUpstream;
    use crate::mcp::{Dispatcher, McpServerConfig};

    fn session(id: &str) -> Session {
        let conn = McpConnection::new(
            McpServerConfig::default_for_binary("test", "0.0.0"),
            Dispatcher::new(Arc::new(FakeUpstream::default())),
            Some(id.to_string()),
        );
        Session::new(id, Arc::new(conn))
    }

    #[tokio::test]
    async fn test_session_store() {
        let store = SessionStore::new();
        assert!(store.is_empty().await);

        let s = session("a");
        assert!(store.insert(s.clone()).await);
        assert_eq!(store.len().await, 1);

        let retrieved = store.get("a").await.unwrap();
        assert!(Arc::ptr_eq(retrieved.connection(), s.connection()));

        store.remove("a").await;
        assert!(store.is_empty().await);
        assert!(store.get("a").await.is_none());
    }

    #[tokio::test]
    async fn duplicate_id_keeps_first_handler() {
        let store = SessionStore::new();
        let first = session("dup");
        assert!(store.insert(first.clone()).await);
        assert!(!store.insert(session("dup")).await);

        let got = store.get("dup").await.unwrap();
        assert!(Arc::ptr_eq(got.connection(), first.connection()));
    }

    #[test]
    fn generated_ids_are_unique() {
        let a = Session::generate_id();
        let b = Session::generate_id();
        assert_ne!(a, b);
        assert_eq!(a.len(), 36);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_sessions_expire_and_active_ones_survive() {
        let store = SessionStore::new();
        store.insert(session("idle")).await;
        store.insert(session("busy")).await;

        tokio::time::advance(Duration::from_secs(20 * 60)).await;
        store.get("busy").await;
        tokio::time::advance(Duration::from_secs(15 * 60)).await;

        let removed = store.cleanup_expired(DEFAULT_SESSION_TIMEOUT).await;
        assert_eq!(removed, 1);
        assert_eq!(store.list_ids().await, vec!["busy".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn reaper_evicts_in_background() {
        let store = SessionStore::new();
        store.insert(session("x")).await;

        let reaper = store.spawn_reaper(Duration::from_secs(60), Duration::from_secs(120));
        tokio::time::sleep(Duration::from_secs(200)).await;
        assert!(store.is_empty().await);
        reaper.abort();
    }
}
