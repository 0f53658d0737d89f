//! HTTP surface
//!
//! JSON endpoints for session lifecycle, signaling, and health. Request
//! handlers never touch an engine handle directly: every engine-touching
//! operation is one execution-bridge task, awaited with the bridge's call
//! deadline. Responses always carry a `status` or `error` field.

use crate::state::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use base64::Engine as _;
use chrono::{DateTime, SecondsFormat, Utc};
use periscope_core::{Error as CoreError, Session};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::error;

/// Build the router with all endpoints
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/sessions", post(create_session).get(list_sessions))
        .route("/sessions/saved", get(list_saved_sessions))
        .route("/sessions/:id", delete(delete_session))
        .route("/sessions/:id/save", post(save_session))
        .route("/sessions/:id/restore", post(restore_session))
        .route("/webrtc/offer", post(webrtc_offer))
        .route("/webrtc/candidate", post(webrtc_candidate))
        .with_state(state)
        .layer(
            tower::ServiceBuilder::new()
                .layer(tower_http::trace::TraceLayer::new_for_http())
                .layer(tower_http::cors::CorsLayer::permissive()),
        )
}

/// Error body shared by every endpoint
#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: String,
}

type ApiError = (StatusCode, Json<ErrorResponse>);

fn api_error(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

/// Map core errors onto HTTP status codes
fn map_core_error(e: CoreError) -> ApiError {
    let status = if e.is_not_found() {
        StatusCode::NOT_FOUND
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };
    api_error(status, e.to_string())
}

/// Run an engine-touching operation on the bridge, flattening the two error
/// layers (bridge failure, operation failure)
async fn bridged<T, F, Fut>(state: &AppState, task: F) -> Result<T, CoreError>
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: std::future::Future<Output = Result<T, CoreError>> + 'static,
    T: Send + 'static,
{
    state.bridge.submit(task).await.and_then(|inner| inner)
}

fn iso(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Micros, true)
}

// ---------------------------------------------------------------------------
// Sessions
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
struct CreateSessionRequest {
    url: Option<String>,
}

/// POST /sessions - create an isolated browser session
async fn create_session(
    State(state): State<AppState>,
    body: Option<Json<CreateSessionRequest>>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let url = body
        .and_then(|Json(request)| request.url)
        .unwrap_or_else(|| state.config.default_url.clone());

    let lifecycle = Arc::clone(&state.lifecycle);
    let session = {
        let url = url.clone();
        bridged(&state, move || async move { lifecycle.create(&url).await })
            .await
            .map_err(|e| {
                error!("session creation failed: {e}");
                map_core_error(e)
            })?
    };

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "session_id": session.id(),
            "url": url,
            "status": "created",
        })),
    ))
}

#[derive(Debug, Serialize)]
struct SessionEntry {
    session_id: String,
    url: String,
    title: String,
    created_at: String,
    last_activity: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    screenshot: Option<String>,
    status: &'static str,
}

/// GET /sessions - list live sessions with best-effort title and thumbnail
async fn list_sessions(State(state): State<AppState>) -> Json<Value> {
    let mut entries = Vec::new();
    for session in state.registry.list() {
        entries.push(enrich_session(&state, &session).await);
    }
    Json(json!({ "sessions": entries }))
}

/// Fetch title and thumbnail for one listing entry; a failure degrades the
/// entry to `status:"error"` instead of failing the whole listing
async fn enrich_session(state: &AppState, session: &Arc<Session>) -> SessionEntry {
    let page = session.page();
    let screenshot_timeout = state.config.screenshot_timeout();

    let enriched = bridged(state, move || async move {
        let title = page.title().await?;
        // Thumbnail failures are tolerated; the entry stays active.
        let screenshot = match tokio::time::timeout(screenshot_timeout, page.screenshot()).await {
            Ok(Ok(png)) => Some(base64::engine::general_purpose::STANDARD.encode(&png)),
            _ => None,
        };
        Ok::<_, CoreError>((title, screenshot))
    })
    .await;

    let (title, screenshot, status) = match enriched {
        Ok((title, screenshot)) => (title, screenshot, "active"),
        Err(e) => {
            error!(session_id = %session.id(), "session enrichment failed: {e}");
            ("Error loading title".to_string(), None, "error")
        }
    };

    SessionEntry {
        session_id: session.id().to_string(),
        url: session.url(),
        title,
        created_at: iso(session.created_at()),
        last_activity: iso(session.last_activity_at()),
        screenshot,
        status,
    }
}

/// DELETE /sessions/:id - destroy a session; idempotent
async fn delete_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let lifecycle = Arc::clone(&state.lifecycle);
    state
        .bridge
        .submit(move || async move { lifecycle.destroy(&id).await })
        .await
        .map_err(map_core_error)?;

    Ok(Json(json!({ "status": "deleted" })))
}

#[derive(Debug, Default, Deserialize)]
struct SaveSessionRequest {
    name: Option<String>,
}

/// POST /sessions/:id/save - snapshot a live session
async fn save_session(
    State(state): State<AppState>,
    Path(id): Path<String>,
    body: Option<Json<SaveSessionRequest>>,
) -> Result<Json<Value>, ApiError> {
    let name = body.and_then(|Json(request)| request.name);

    let lifecycle = Arc::clone(&state.lifecycle);
    let saved = bridged(&state, move || async move {
        lifecycle.save(&id, name).await
    })
    .await
    .map_err(map_core_error)?;

    Ok(Json(json!({
        "status": "saved",
        "saved_id": saved.id,
        "saved_at": iso(saved.saved_at),
    })))
}

/// GET /sessions/saved - list stored snapshots
async fn list_saved_sessions(State(state): State<AppState>) -> Json<Value> {
    let saved_tabs: Vec<Value> = state
        .saved
        .list()
        .into_iter()
        .map(|saved| {
            json!({
                "id": saved.id,
                "name": saved.name,
                "url": saved.url,
                "title": saved.title,
                "saved_at": iso(saved.saved_at),
                "screenshot": saved.screenshot,
            })
        })
        .collect();

    Json(json!({ "saved_tabs": saved_tabs }))
}

/// POST /sessions/:id/restore - open a new session from a snapshot
async fn restore_session(
    State(state): State<AppState>,
    Path(saved_id): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let lifecycle = Arc::clone(&state.lifecycle);
    let session = bridged(&state, move || async move {
        lifecycle.restore(&saved_id).await
    })
    .await
    .map_err(map_core_error)?;

    Ok(Json(json!({
        "status": "restored",
        "session_id": session.id(),
        "url": session.url(),
    })))
}

// ---------------------------------------------------------------------------
// Signaling
// ---------------------------------------------------------------------------

/// POST /webrtc/offer - negotiate a peer connection for a session
async fn webrtc_offer(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    let (Some(session_id), Some(sdp), Some(_sdp_type)) = (
        body["session_id"].as_str().map(str::to_string),
        body["sdp"].as_str().map(str::to_string),
        body["type"].as_str(),
    ) else {
        return Err(api_error(
            StatusCode::BAD_REQUEST,
            "Missing required fields",
        ));
    };

    let signaling = Arc::clone(&state.signaling);
    let answer = state
        .bridge
        .submit(move || async move { signaling.handle_offer(&session_id, sdp).await })
        .await
        .map_err(map_core_error)?
        .map_err(|e| match e {
            periscope_webrtc::Error::InvalidSession(_) => {
                api_error(StatusCode::BAD_REQUEST, "Invalid session_id")
            }
            other => {
                error!("offer failed: {other}");
                api_error(StatusCode::INTERNAL_SERVER_ERROR, other.to_string())
            }
        })?;

    Ok(Json(json!({
        "sdp": answer.sdp,
        "type": answer.sdp_type,
        "pc_id": answer.pc_id,
    })))
}

/// POST /webrtc/candidate - apply a trickled ICE candidate
async fn webrtc_candidate(
    State(state): State<AppState>,
    Json(body): Json<Value>,
) -> Result<Json<Value>, ApiError> {
    let Some(pc_id) = body["pc_id"].as_str().map(str::to_string) else {
        return Err(api_error(StatusCode::BAD_REQUEST, "Missing pc_id or candidate"));
    };
    let candidate = body["candidate"].clone();
    if candidate.is_null() {
        return Err(api_error(StatusCode::BAD_REQUEST, "Missing pc_id or candidate"));
    }

    let signaling = Arc::clone(&state.signaling);
    let outcome = state
        .bridge
        .submit(move || async move { signaling.handle_candidate(&pc_id, candidate).await })
        .await
        .map_err(map_core_error)?
        .map_err(|e| {
            error!("candidate failed: {e}");
            api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        })?;

    Ok(Json(json!({ "status": outcome.as_str() })))
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

/// GET /health - liveness and table sizes
async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "sessions": state.registry.len(),
        "connections": state.signaling.count(),
        "saved_sessions": state.saved.len(),
        "worker_alive": state.bridge.is_alive(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use periscope_core::engine::testkit::ScriptedEngine;
    use periscope_core::{
        Config, ExecutionBridge, LifecycleManager, SavedSessionStore, SessionRegistry,
    };
    use periscope_webrtc::{SignalingManager, WebRtcTransportConfig};
    use std::time::Duration;
    use tower::ServiceExt;

    fn test_state(engine: &ScriptedEngine) -> AppState {
        let config = Arc::new(Config::default());
        let bridge = ExecutionBridge::start(Duration::from_secs(10)).unwrap();
        let registry = Arc::new(SessionRegistry::new());
        let saved = Arc::new(SavedSessionStore::new());
        let lifecycle = Arc::new(LifecycleManager::new(
            Arc::new(engine.clone()),
            Arc::clone(&registry),
            Arc::clone(&saved),
            Arc::clone(&config),
        ));
        let signaling = SignalingManager::new(
            Arc::clone(&registry),
            Arc::clone(&config),
            WebRtcTransportConfig::default(),
        );
        AppState {
            bridge,
            registry,
            saved,
            lifecycle,
            signaling,
            config,
        }
    }

    fn app(engine: &ScriptedEngine) -> (Router, AppState) {
        let state = test_state(engine);
        (build_router(state.clone()), state)
    }

    async fn request(router: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(value) => builder
                .header("content-type", "application/json")
                .body(Body::from(value.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    #[tokio::test]
    async fn test_health_reports_counts() {
        let engine = ScriptedEngine::new();
        let (router, _state) = app(&engine);

        let (status, body) = request(&router, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["sessions"], 0);
        assert_eq!(body["connections"], 0);
        assert_eq!(body["saved_sessions"], 0);
        assert_eq!(body["worker_alive"], true);
    }

    #[tokio::test]
    async fn test_create_then_list() {
        let engine = ScriptedEngine::new();
        engine.script(|b| b.title = "Example Domain".to_string());
        let (router, state) = app(&engine);

        let (status, body) = request(
            &router,
            "POST",
            "/sessions",
            Some(json!({"url": "https://example.com"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["status"], "created");
        assert_eq!(body["url"], "https://example.com");
        let session_id = body["session_id"].as_str().unwrap().to_string();
        assert!(state.registry.contains(&session_id));

        let (status, body) = request(&router, "GET", "/sessions", None).await;
        assert_eq!(status, StatusCode::OK);
        let sessions = body["sessions"].as_array().unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0]["session_id"], session_id.as_str());
        assert_eq!(sessions[0]["url"], "https://example.com");
        assert_eq!(sessions[0]["status"], "active");
        assert_eq!(sessions[0]["title"], "Example Domain");
        assert!(sessions[0]["screenshot"].is_string());
    }

    #[tokio::test]
    async fn test_create_without_body_uses_default_url() {
        let engine = ScriptedEngine::new();
        let (router, _state) = app(&engine);

        let (status, body) = request(&router, "POST", "/sessions", None).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["url"], "https://example.com");
    }

    #[tokio::test]
    async fn test_create_failure_returns_500() {
        let engine = ScriptedEngine::new();
        engine.script(|b| b.fail_launch = true);
        let (router, state) = app(&engine);

        let (status, body) = request(&router, "POST", "/sessions", None).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["error"].as_str().unwrap().contains("creation failed"));
        assert!(state.registry.is_empty());
    }

    #[tokio::test]
    async fn test_enrichment_failure_degrades_entry() {
        let engine = ScriptedEngine::new();
        let (router, _state) = app(&engine);
        request(&router, "POST", "/sessions", None).await;

        engine.script(|b| b.fail_screenshot = true);
        let (_, body) = request(&router, "GET", "/sessions", None).await;
        let entry = &body["sessions"][0];
        // Thumbnail failure alone keeps the entry active, just without one.
        assert_eq!(entry["status"], "active");
        assert!(entry.get("screenshot").is_none());
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let engine = ScriptedEngine::new();
        let (router, _state) = app(&engine);
        let (_, body) = request(&router, "POST", "/sessions", None).await;
        let id = body["session_id"].as_str().unwrap().to_string();

        let (status, body) = request(&router, "DELETE", &format!("/sessions/{id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "deleted");
        let closes_after_first = engine.log().close_order.len();

        let (status, body) = request(&router, "DELETE", &format!("/sessions/{id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "deleted");
        // Second delete performed no engine call.
        assert_eq!(engine.log().close_order.len(), closes_after_first);
    }

    #[tokio::test]
    async fn test_delete_unknown_session_is_a_noop() {
        let engine = ScriptedEngine::new();
        let (router, state) = app(&engine);
        request(&router, "POST", "/sessions", None).await;

        let (status, body) = request(&router, "DELETE", "/sessions/not-a-session", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "deleted");
        // The registry is unchanged.
        assert_eq!(state.registry.len(), 1);
    }

    #[tokio::test]
    async fn test_save_and_restore_flow() {
        let engine = ScriptedEngine::new();
        let (router, state) = app(&engine);
        let (_, body) = request(&router, "POST", "/sessions", None).await;
        let id = body["session_id"].as_str().unwrap().to_string();

        let (status, body) = request(
            &router,
            "POST",
            &format!("/sessions/{id}/save"),
            Some(json!({"name": "my tab"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "saved");
        let saved_id = body["saved_id"].as_str().unwrap().to_string();

        let (status, body) = request(&router, "GET", "/sessions/saved", None).await;
        assert_eq!(status, StatusCode::OK);
        let tabs = body["saved_tabs"].as_array().unwrap();
        assert_eq!(tabs.len(), 1);
        assert_eq!(tabs[0]["id"], saved_id.as_str());
        assert_eq!(tabs[0]["name"], "my tab");

        let (status, body) = request(
            &router,
            "POST",
            &format!("/sessions/{saved_id}/restore"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "restored");
        let new_id = body["session_id"].as_str().unwrap();
        assert_ne!(new_id, id);
        assert_eq!(state.registry.len(), 2);
    }

    #[tokio::test]
    async fn test_save_unknown_session_is_404() {
        let engine = ScriptedEngine::new();
        let (router, _state) = app(&engine);

        let (status, body) =
            request(&router, "POST", "/sessions/missing/save", Some(json!({}))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].as_str().unwrap().contains("not found"));
    }

    #[tokio::test]
    async fn test_restore_unknown_snapshot_is_404() {
        let engine = ScriptedEngine::new();
        let (router, _state) = app(&engine);

        let (status, _body) = request(&router, "POST", "/sessions/missing/restore", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_offer_with_missing_fields_is_400() {
        let engine = ScriptedEngine::new();
        let (router, _state) = app(&engine);

        let (status, body) = request(
            &router,
            "POST",
            "/webrtc/offer",
            Some(json!({"session_id": "x"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Missing required fields");
    }

    #[tokio::test]
    async fn test_offer_for_unknown_session_is_400() {
        let engine = ScriptedEngine::new();
        let (router, _state) = app(&engine);

        let (status, body) = request(
            &router,
            "POST",
            "/webrtc/offer",
            Some(json!({"session_id": "missing", "sdp": "v=0", "type": "offer"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Invalid session_id");
    }

    #[tokio::test]
    async fn test_offer_negotiates_peer_connection() {
        let engine = ScriptedEngine::new();
        let (router, state) = app(&engine);
        let (_, body) = request(&router, "POST", "/sessions", None).await;
        let session_id = body["session_id"].as_str().unwrap().to_string();

        // Client-side offer, as a browser viewer would produce.
        let mut media_engine = webrtc::api::media_engine::MediaEngine::default();
        media_engine.register_default_codecs().unwrap();
        let api = webrtc::api::APIBuilder::new()
            .with_media_engine(media_engine)
            .build();
        let client = api.new_peer_connection(Default::default()).await.unwrap();
        client.create_data_channel("control", None).await.unwrap();
        let offer = client.create_offer(None).await.unwrap();
        client.set_local_description(offer.clone()).await.unwrap();

        let (status, body) = request(
            &router,
            "POST",
            "/webrtc/offer",
            Some(json!({"session_id": session_id, "sdp": offer.sdp, "type": "offer"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["type"], "answer");
        assert!(!body["sdp"].as_str().unwrap().is_empty());
        let pc_id = body["pc_id"].as_str().unwrap().to_string();

        let info = state.signaling.get_info(&pc_id).unwrap();
        assert!(matches!(
            info.state,
            periscope_webrtc::PeerState::New | periscope_webrtc::PeerState::Connecting
        ));

        let (_, health) = request(&router, "GET", "/health", None).await;
        assert_eq!(health["connections"], 1);

        state.signaling.remove_peer(&pc_id).await;
    }

    #[tokio::test]
    async fn test_candidate_for_unknown_connection_is_ignored() {
        let engine = ScriptedEngine::new();
        let (router, _state) = app(&engine);

        let (status, body) = request(
            &router,
            "POST",
            "/webrtc/candidate",
            Some(json!({"pc_id": "missing", "candidate": {"candidate": "candidate:0"}})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ignored");
    }

    #[tokio::test]
    async fn test_candidate_missing_fields_is_400() {
        let engine = ScriptedEngine::new();
        let (router, _state) = app(&engine);

        let (status, _body) = request(
            &router,
            "POST",
            "/webrtc/candidate",
            Some(json!({"pc_id": "x"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
