//! Locked registries for sessions and saved snapshots
//!
//! Each collection is guarded by a single mutual-exclusion lock used for
//! every structural mutation. Reads that need a consistent multi-entry view
//! take the same lock and return an owned snapshot, so iteration never races
//! with concurrent inserts or removals. The lock itself never escapes, and
//! no caller holds it across an engine call.

use super::{SavedSession, Session};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Canonical map of session id to session
#[derive(Default)]
pub struct SessionRegistry {
    inner: Mutex<HashMap<String, Arc<Session>>>,
}

impl SessionRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a session under its id.
    ///
    /// Returns the session back if the id is already occupied; at most one
    /// live session may exist per id.
    pub fn put(&self, session: Arc<Session>) -> Result<(), Arc<Session>> {
        let mut inner = self.inner.lock();
        if inner.contains_key(session.id()) {
            return Err(session);
        }
        inner.insert(session.id().to_string(), session);
        Ok(())
    }

    /// Look up a session by id
    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.inner.lock().get(id).cloned()
    }

    /// Remove and return a session.
    ///
    /// Idempotent: removing an absent id is a no-op yielding `None`.
    pub fn remove(&self, id: &str) -> Option<Arc<Session>> {
        self.inner.lock().remove(id)
    }

    /// Point-in-time copy of all entries
    pub fn list(&self) -> Vec<Arc<Session>> {
        self.inner.lock().values().cloned().collect()
    }

    /// Number of registered sessions
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Whether the registry is empty
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Whether an id is registered
    pub fn contains(&self, id: &str) -> bool {
        self.inner.lock().contains_key(id)
    }
}

/// Store of saved-session snapshots, independent of live sessions
#[derive(Default)]
pub struct SavedSessionStore {
    inner: Mutex<HashMap<String, Arc<SavedSession>>>,
}

impl SavedSessionStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a snapshot under its id
    pub fn put(&self, saved: Arc<SavedSession>) {
        self.inner.lock().insert(saved.id.clone(), saved);
    }

    /// Look up a snapshot by id
    pub fn get(&self, id: &str) -> Option<Arc<SavedSession>> {
        self.inner.lock().get(id).cloned()
    }

    /// Remove a snapshot; absent ids are a no-op
    pub fn remove(&self, id: &str) -> Option<Arc<SavedSession>> {
        self.inner.lock().remove(id)
    }

    /// Point-in-time copy of all snapshots
    pub fn list(&self) -> Vec<Arc<SavedSession>> {
        self.inner.lock().values().cloned().collect()
    }

    /// Number of stored snapshots
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// Whether the store is empty
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testkit::ScriptedEngine;
    use crate::engine::{BrowserEngine, ContextOptions, LaunchOptions, Viewport};

    async fn scripted_session(id: &str) -> Arc<Session> {
        let engine = ScriptedEngine::new();
        let session = engine.launch(&LaunchOptions::default()).await.unwrap();
        let browser = session.new_browser().await.unwrap();
        let context = browser.new_context(&ContextOptions::default()).await.unwrap();
        let page = context.new_page().await.unwrap();
        Arc::new(Session::new(
            id.to_string(),
            session,
            browser,
            context,
            page,
            Viewport::new(1280, 720),
            "https://example.com".to_string(),
        ))
    }

    #[tokio::test]
    async fn test_put_get_remove() {
        let registry = SessionRegistry::new();
        let session = scripted_session("s1").await;

        registry.put(Arc::clone(&session)).unwrap();
        assert!(registry.contains("s1"));
        assert_eq!(registry.get("s1").unwrap().id(), "s1");

        let removed = registry.remove("s1").unwrap();
        assert_eq!(removed.id(), "s1");
        assert!(registry.get("s1").is_none());
    }

    #[tokio::test]
    async fn test_remove_absent_is_noop() {
        let registry = SessionRegistry::new();
        assert!(registry.remove("missing").is_none());
        // And again: removal is idempotent.
        assert!(registry.remove("missing").is_none());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_id_rejected() {
        let registry = SessionRegistry::new();
        registry.put(scripted_session("dup").await).unwrap();
        assert!(registry.put(scripted_session("dup").await).is_err());
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_inserts_yield_distinct_entries() {
        let registry = Arc::new(SessionRegistry::new());

        let mut handles = Vec::new();
        for i in 0..16 {
            let registry = Arc::clone(&registry);
            handles.push(tokio::spawn(async move {
                let session = scripted_session(&format!("s{i}")).await;
                registry.put(session).unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let listed = registry.list();
        assert_eq!(listed.len(), 16);
        let mut ids: Vec<_> = listed.iter().map(|s| s.id().to_string()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 16);
    }

    #[tokio::test]
    async fn test_list_is_a_snapshot() {
        let registry = SessionRegistry::new();
        registry.put(scripted_session("a").await).unwrap();

        let snapshot = registry.list();
        registry.remove("a");

        // The snapshot is unaffected by the later removal.
        assert_eq!(snapshot.len(), 1);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_saved_store_roundtrip() {
        let store = SavedSessionStore::new();
        store.put(Arc::new(SavedSession {
            id: "saved-1".to_string(),
            name: "Example".to_string(),
            url: "https://example.com".to_string(),
            title: "Example Domain".to_string(),
            screenshot: None,
            saved_at: chrono::Utc::now(),
        }));

        assert_eq!(store.len(), 1);
        assert_eq!(store.get("saved-1").unwrap().name, "Example");
        assert!(store.get("saved-2").is_none());
        assert!(store.remove("saved-1").is_some());
        assert!(store.remove("saved-1").is_none());
    }
}
