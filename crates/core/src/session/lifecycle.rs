//! Session lifecycle: create, destroy, save, restore
//!
//! The lifecycle manager is the only component that acquires or releases
//! engine handles. Creation fixes the viewport, navigates with a bounded
//! timeout, and re-asserts the viewport afterwards (navigation may reset
//! it); nothing is registered unless every step succeeds. Teardown always
//! releases handles in reverse-acquisition order.

use crate::config::Config;
use crate::engine::{
    BrowserEngine, BrowserHandle, ContextHandle, ContextOptions, EngineSession, LaunchOptions,
    PageHandle, Viewport,
};
use crate::session::{SavedSession, SavedSessionStore, Session, SessionRegistry};
use crate::{Error, Result};
use base64::Engine as _;
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Creates, saves, restores, and tears down browser sessions
pub struct LifecycleManager {
    engine: Arc<dyn BrowserEngine>,
    registry: Arc<SessionRegistry>,
    saved: Arc<SavedSessionStore>,
    config: Arc<Config>,
    launch_options: LaunchOptions,
    context_options: ContextOptions,
}

impl LifecycleManager {
    /// Create a lifecycle manager over the given engine and registries
    pub fn new(
        engine: Arc<dyn BrowserEngine>,
        registry: Arc<SessionRegistry>,
        saved: Arc<SavedSessionStore>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            engine,
            registry,
            saved,
            config,
            launch_options: LaunchOptions::default(),
            context_options: ContextOptions::default(),
        }
    }

    /// Override the engine launch options
    pub fn with_launch_options(mut self, options: LaunchOptions) -> Self {
        self.launch_options = options;
        self
    }

    /// The session registry this manager populates
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// The saved-session store this manager populates
    pub fn saved(&self) -> &Arc<SavedSessionStore> {
        &self.saved
    }

    /// Create a new isolated session and navigate it to `url`.
    ///
    /// On any failure the partially acquired handles are released and no
    /// session is registered.
    pub async fn create(&self, url: &str) -> Result<Arc<Session>> {
        let id = Uuid::new_v4().to_string();
        info!(session_id = %id, url = %url, "creating browser session");

        let engine_session = self
            .engine
            .launch(&self.launch_options)
            .await
            .map_err(|e| Error::CreationFailed(format!("engine launch: {e}")))?;

        let (browser, context, page) = match self.open_page(&*engine_session, url).await {
            Ok(handles) => handles,
            Err(e) => {
                if let Err(shutdown_err) = engine_session.shutdown().await {
                    warn!(session_id = %id, "engine shutdown after failed create: {shutdown_err}");
                }
                return Err(Error::CreationFailed(e.to_string()));
            }
        };

        let session = Arc::new(Session::new(
            id.clone(),
            engine_session,
            browser,
            context,
            page,
            self.viewport(),
            url.to_string(),
        ));

        if self.registry.put(Arc::clone(&session)).is_err() {
            session.close_handles().await;
            return Err(Error::CreationFailed(format!("duplicate session id {id}")));
        }

        info!(session_id = %id, "browser session created");
        Ok(session)
    }

    /// Destroy a session: remove it from the registry, then close its
    /// engine handles.
    ///
    /// Idempotent: destroying an absent id is a no-op and touches no
    /// engine handle. Returns whether a session was actually removed.
    pub async fn destroy(&self, id: &str) -> bool {
        let Some(session) = self.registry.remove(id) else {
            return false;
        };
        info!(session_id = %id, "destroying browser session");
        session.close_handles().await;
        true
    }

    /// Destroy every registered session (graceful shutdown path)
    pub async fn destroy_all(&self) -> usize {
        let sessions = self.registry.list();
        let mut destroyed = 0;
        for session in sessions {
            if self.destroy(session.id()).await {
                destroyed += 1;
            }
        }
        destroyed
    }

    /// Capture a snapshot of a live session into the saved-session store.
    ///
    /// The snapshot gets a fresh id; its name defaults to the session URL.
    pub async fn save(&self, id: &str, name: Option<String>) -> Result<Arc<SavedSession>> {
        let session = self
            .registry
            .get(id)
            .ok_or_else(|| Error::SessionNotFound(id.to_string()))?;

        let page = session.page();
        let screenshot =
            tokio::time::timeout(self.config.screenshot_timeout(), page.screenshot())
                .await
                .map_err(|_| Error::Engine("screenshot timed out".into()))??;
        let title = page.title().await.unwrap_or_default();

        let saved = Arc::new(SavedSession {
            id: Uuid::new_v4().to_string(),
            name: name.unwrap_or_else(|| session.url()),
            url: session.url(),
            title,
            screenshot: Some(base64::engine::general_purpose::STANDARD.encode(&screenshot)),
            saved_at: Utc::now(),
        });

        self.saved.put(Arc::clone(&saved));
        info!(session_id = %id, saved_id = %saved.id, "session saved");
        Ok(saved)
    }

    /// Create a brand-new session from a stored snapshot's URL.
    ///
    /// The snapshot is read-only; the new session gets an unrelated id.
    pub async fn restore(&self, saved_id: &str) -> Result<Arc<Session>> {
        let saved = self
            .saved
            .get(saved_id)
            .ok_or_else(|| Error::SavedSessionNotFound(saved_id.to_string()))?;

        let session = self.create(&saved.url).await?;
        info!(saved_id = %saved_id, session_id = %session.id(), "session restored");
        Ok(session)
    }

    fn viewport(&self) -> Viewport {
        Viewport::new(self.config.viewport_width, self.config.viewport_height)
    }

    /// Acquire browser, context, and page, then run the initial navigation,
    /// releasing whatever was acquired if a later step fails.
    async fn open_page(
        &self,
        engine_session: &dyn EngineSession,
        url: &str,
    ) -> Result<(
        Box<dyn BrowserHandle>,
        Box<dyn ContextHandle>,
        Arc<dyn PageHandle>,
    )> {
        let browser = engine_session.new_browser().await?;

        let context = match browser.new_context(&self.context_options).await {
            Ok(context) => context,
            Err(e) => {
                let _ = browser.close().await;
                return Err(e);
            }
        };

        match self.prepare_page(&*context, url).await {
            Ok(page) => Ok((browser, context, page)),
            Err(e) => {
                let _ = context.close().await;
                let _ = browser.close().await;
                Err(e)
            }
        }
    }

    async fn prepare_page(&self, context: &dyn ContextHandle, url: &str) -> Result<Arc<dyn PageHandle>> {
        let page = context.new_page().await?;
        let viewport = self.viewport();

        page.set_viewport(viewport).await?;

        tokio::time::timeout(self.config.navigation_timeout(), page.navigate(url))
            .await
            .map_err(|_| Error::NavigationFailed(format!("navigation to {url} timed out")))??;

        // Navigation may have reset the surface; pin it back down.
        page.set_viewport(viewport).await?;

        Ok(page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testkit::ScriptedEngine;

    fn manager(engine: &ScriptedEngine) -> LifecycleManager {
        LifecycleManager::new(
            Arc::new(engine.clone()),
            Arc::new(SessionRegistry::new()),
            Arc::new(SavedSessionStore::new()),
            Arc::new(Config::default()),
        )
    }

    #[tokio::test]
    async fn test_create_registers_session() {
        let engine = ScriptedEngine::new();
        let manager = manager(&engine);

        let session = manager.create("https://example.com").await.unwrap();
        assert_eq!(session.url(), "https://example.com");
        assert_eq!(session.viewport(), Viewport::new(1280, 720));
        assert!(manager.registry().contains(session.id()));

        let log = engine.log();
        assert_eq!(log.navigations, vec!["https://example.com"]);
        // Viewport is asserted before navigation and re-asserted after.
        assert_eq!(log.viewports.len(), 2);
    }

    #[tokio::test]
    async fn test_create_failure_registers_nothing() {
        let engine = ScriptedEngine::new();
        engine.script(|b| b.fail_navigation = true);
        let manager = manager(&engine);

        let result = manager.create("https://example.com").await;
        assert!(matches!(result, Err(Error::CreationFailed(_))));
        assert!(manager.registry().is_empty());
        // The partially launched engine instance was shut down again.
        assert!(engine.log().close_order.contains(&"engine"));
    }

    #[tokio::test]
    async fn test_launch_failure_is_creation_failed() {
        let engine = ScriptedEngine::new();
        engine.script(|b| b.fail_launch = true);
        let manager = manager(&engine);

        let result = manager.create("https://example.com").await;
        assert!(matches!(result, Err(Error::CreationFailed(_))));
        assert!(manager.registry().is_empty());
    }

    #[tokio::test]
    async fn test_destroy_is_idempotent() {
        let engine = ScriptedEngine::new();
        let manager = manager(&engine);
        let session = manager.create("https://example.com").await.unwrap();
        let id = session.id().to_string();
        drop(session);

        assert!(manager.destroy(&id).await);
        let closes_after_first = engine.log().close_order.len();

        // Second destroy: no-op, no further engine calls.
        assert!(!manager.destroy(&id).await);
        assert_eq!(engine.log().close_order.len(), closes_after_first);
        assert_eq!(
            engine.log().close_order,
            vec!["context", "browser", "engine"]
        );
    }

    #[tokio::test]
    async fn test_save_and_restore() {
        let engine = ScriptedEngine::new();
        engine.script(|b| b.title = "Example Domain".to_string());
        let manager = manager(&engine);

        let session = manager.create("https://example.com").await.unwrap();
        let saved = manager.save(session.id(), None).await.unwrap();
        assert_eq!(saved.url, "https://example.com");
        assert_eq!(saved.name, "https://example.com");
        assert_eq!(saved.title, "Example Domain");
        assert!(saved.screenshot.is_some());

        let restored = manager.restore(&saved.id).await.unwrap();
        assert_ne!(restored.id(), session.id());
        assert_eq!(restored.url(), "https://example.com");
        assert_eq!(manager.registry().len(), 2);
    }

    #[tokio::test]
    async fn test_save_named_snapshot() {
        let engine = ScriptedEngine::new();
        let manager = manager(&engine);
        let session = manager.create("https://example.com").await.unwrap();

        let saved = manager
            .save(session.id(), Some("my tab".to_string()))
            .await
            .unwrap();
        assert_eq!(saved.name, "my tab");
    }

    #[tokio::test]
    async fn test_save_missing_session() {
        let engine = ScriptedEngine::new();
        let manager = manager(&engine);
        let result = manager.save("missing", None).await;
        assert!(matches!(result, Err(Error::SessionNotFound(_))));
    }

    #[tokio::test]
    async fn test_restore_missing_snapshot() {
        let engine = ScriptedEngine::new();
        let manager = manager(&engine);
        let result = manager.restore("missing").await;
        assert!(matches!(result, Err(Error::SavedSessionNotFound(_))));
    }

    #[tokio::test]
    async fn test_destroy_all() {
        let engine = ScriptedEngine::new();
        let manager = manager(&engine);
        manager.create("https://a.example").await.unwrap();
        manager.create("https://b.example").await.unwrap();

        assert_eq!(manager.destroy_all().await, 2);
        assert!(manager.registry().is_empty());
    }
}
