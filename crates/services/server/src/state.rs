//! Shared server state

use periscope_core::{Config, ExecutionBridge, LifecycleManager, SavedSessionStore, SessionRegistry};
use periscope_webrtc::SignalingManager;
use std::sync::Arc;

/// State shared across all request handlers
#[derive(Clone)]
pub struct AppState {
    /// Execution bridge; every engine-touching handler goes through it
    pub bridge: Arc<ExecutionBridge>,
    /// Live session registry
    pub registry: Arc<SessionRegistry>,
    /// Saved-session store
    pub saved: Arc<SavedSessionStore>,
    /// Session lifecycle operations
    pub lifecycle: Arc<LifecycleManager>,
    /// Signaling and peer connection table
    pub signaling: Arc<SignalingManager>,
    /// Orchestrator configuration
    pub config: Arc<Config>,
}
