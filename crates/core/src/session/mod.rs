//! Session state and registries

pub mod lifecycle;
pub mod registry;

pub use lifecycle::LifecycleManager;
pub use registry::{SavedSessionStore, SessionRegistry};

use crate::engine::{BrowserHandle, ContextHandle, EngineSession, PageHandle, Viewport};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// One isolated, addressable browser execution context
///
/// A session owns the full chain of engine handles it was created from; the
/// lifecycle manager closes them in reverse-acquisition order on destroy.
/// The id is immutable once assigned and at most one live engine instance
/// exists per id (the registry rejects double insertion).
pub struct Session {
    id: String,
    engine: Box<dyn EngineSession>,
    browser: Box<dyn BrowserHandle>,
    context: Box<dyn ContextHandle>,
    page: Arc<dyn PageHandle>,
    viewport: Viewport,
    created_at: DateTime<Utc>,
    created_instant: Instant,
    state: Mutex<SessionState>,
}

/// Mutable per-session fields, guarded by one lock
struct SessionState {
    url: String,
    last_activity: Instant,
    last_activity_at: DateTime<Utc>,
}

impl Session {
    /// Assemble a session from freshly acquired engine handles
    pub fn new(
        id: String,
        engine: Box<dyn EngineSession>,
        browser: Box<dyn BrowserHandle>,
        context: Box<dyn ContextHandle>,
        page: Arc<dyn PageHandle>,
        viewport: Viewport,
        url: String,
    ) -> Self {
        let now = Instant::now();
        Self {
            id,
            engine,
            browser,
            context,
            page,
            viewport,
            created_at: Utc::now(),
            created_instant: now,
            state: Mutex::new(SessionState {
                url,
                last_activity: now,
                last_activity_at: Utc::now(),
            }),
        }
    }

    /// Session id
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The page this session renders and interacts with
    pub fn page(&self) -> Arc<dyn PageHandle> {
        Arc::clone(&self.page)
    }

    /// Fixed viewport dimensions
    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    /// Creation timestamp
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Currently stored URL
    pub fn url(&self) -> String {
        self.state.lock().url.clone()
    }

    /// Record a successful navigation
    pub fn set_url(&self, url: impl Into<String>) {
        self.state.lock().url = url.into();
    }

    /// Last-activity timestamp
    pub fn last_activity_at(&self) -> DateTime<Utc> {
        self.state.lock().last_activity_at
    }

    /// Record activity now; `last_activity` never moves backwards
    pub fn touch(&self) {
        let mut state = self.state.lock();
        state.last_activity = Instant::now();
        state.last_activity_at = Utc::now();
    }

    /// Time since creation
    pub fn age(&self) -> Duration {
        self.created_instant.elapsed()
    }

    /// Time since the last successful interaction
    pub fn idle(&self) -> Duration {
        self.state.lock().last_activity.elapsed()
    }

    /// Close every engine handle in reverse-acquisition order.
    ///
    /// Called by the lifecycle manager after the session has been removed
    /// from the registry; per-handle failures are reported but do not stop
    /// the remaining closes.
    pub(crate) async fn close_handles(&self) {
        if let Err(e) = self.context.close().await {
            tracing::warn!(session_id = %self.id, "error closing context: {e}");
        }
        if let Err(e) = self.browser.close().await {
            tracing::warn!(session_id = %self.id, "error closing browser: {e}");
        }
        if let Err(e) = self.engine.shutdown().await {
            tracing::warn!(session_id = %self.id, "error stopping engine: {e}");
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("url", &self.url())
            .field("viewport", &self.viewport)
            .field("created_at", &self.created_at)
            .finish()
    }
}

/// A point-in-time snapshot saved from a live session
///
/// Snapshots are immutable once stored and live independently of the
/// session they were taken from.
#[derive(Debug, Clone)]
pub struct SavedSession {
    /// Snapshot id (fresh, unrelated to the source session id)
    pub id: String,
    /// Display name (defaults to the session URL)
    pub name: String,
    /// URL the restore operation will open
    pub url: String,
    /// Page title at save time
    pub title: String,
    /// Base64-encoded PNG screenshot taken at save time
    pub screenshot: Option<String>,
    /// When the snapshot was taken
    pub saved_at: DateTime<Utc>,
}
