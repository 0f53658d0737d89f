//! Interaction protocol handler
//!
//! Decodes one command per data-channel message, validates it against the
//! bound session and its viewport, drives the page, and replies with a
//! structured acknowledgement or failure. Replies are only written while
//! the channel is open; a closed channel drops them silently. No failure in
//! here escapes to tear down the channel task.

use crate::protocol::{ControlMessage, ControlReply};
use crate::Result;
use async_trait::async_trait;
use periscope_core::{Config, Error as CoreError, Session, SessionRegistry};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Settle delay between moving the pointer and pressing the button
const CLICK_SETTLE: Duration = Duration::from_millis(50);

/// Deadline for the document-interactive wait preceding a click
const CLICK_LOAD_WAIT: Duration = Duration::from_secs(5);

/// Where a handler writes its replies
///
/// The production implementation wraps the peer's data channel; tests use a
/// recording fake.
#[async_trait]
pub trait ReplySink: Send + Sync {
    /// Whether the channel is still open
    async fn is_open(&self) -> bool;

    /// Write one reply
    async fn send(&self, reply: &ControlReply) -> Result<()>;
}

/// Handles interaction commands for one session's data channel
pub struct InteractionHandler {
    session_id: String,
    registry: Arc<SessionRegistry>,
    config: Arc<Config>,
}

impl InteractionHandler {
    /// Create a handler bound to a session id
    pub fn new(session_id: String, registry: Arc<SessionRegistry>, config: Arc<Config>) -> Self {
        Self {
            session_id,
            registry,
            config,
        }
    }

    /// Process one raw data-channel message
    pub async fn handle(&self, raw: &[u8], sink: &dyn ReplySink) {
        let message = match ControlMessage::from_bytes(raw) {
            Ok(message) => message,
            Err(e) => {
                warn!(session_id = %self.session_id, "undecodable control message: {e}");
                self.reply(
                    sink,
                    &ControlReply::Error {
                        message: format!("invalid message: {e}"),
                    },
                )
                .await;
                return;
            }
        };

        let Some(session) = self.registry.get(&self.session_id) else {
            // Echo the correlation id so the caller can match the failure
            // even though the session is gone.
            self.reply(
                sink,
                &ControlReply::click_failure(message.correlation_id(), "Session not found"),
            )
            .await;
            return;
        };

        session.touch();
        debug!(session_id = %self.session_id, event = message.event_name(), "handling interaction");

        match message {
            ControlMessage::Click { id, x, y } => {
                let click_id = id.unwrap_or_else(|| "unknown".to_string());
                let reply = self.click(&session, &click_id, x, y).await;
                self.reply(sink, &reply).await;
            }
            ControlMessage::Type { text } => {
                let reply = match session.page().type_text(&text).await {
                    Ok(()) => ControlReply::Ack {
                        event: "type".to_string(),
                    },
                    Err(e) => ControlReply::Error {
                        message: e.to_string(),
                    },
                };
                self.reply(sink, &reply).await;
            }
            ControlMessage::Scroll { delta_y } => {
                let reply = match session.page().scroll_by(delta_y).await {
                    Ok(()) => ControlReply::Ack {
                        event: "scroll".to_string(),
                    },
                    Err(e) => ControlReply::Error {
                        message: e.to_string(),
                    },
                };
                self.reply(sink, &reply).await;
            }
            ControlMessage::Navigate { url } => {
                let reply = match session.page().navigate(&url).await {
                    Ok(()) => {
                        session.set_url(&url);
                        info!(session_id = %self.session_id, url = %url, "navigated");
                        ControlReply::Ack {
                            event: "navigate".to_string(),
                        }
                    }
                    Err(e) => ControlReply::Error {
                        message: format!("navigation failed: {e}"),
                    },
                };
                self.reply(sink, &reply).await;
            }
            ControlMessage::Screenshot => {
                let reply = match self.capture_artifact(&session).await {
                    Ok(filename) => ControlReply::ScreenshotSaved { filename },
                    Err(e) => ControlReply::Error {
                        message: format!("screenshot failed: {e}"),
                    },
                };
                self.reply(sink, &reply).await;
            }
        }
    }

    /// Validate and perform a click, distinguishing lookup failures from
    /// click failures
    async fn click(&self, session: &Session, click_id: &str, x: i32, y: i32) -> ControlReply {
        let page = session.page();
        let viewport = session.viewport();

        if let Err(e) = page.wait_for_load(CLICK_LOAD_WAIT).await {
            return ControlReply::click_failure(click_id, format!("page not ready: {e}"));
        }
        // Pin the surface back to the dimensions the client is rendering;
        // navigations in between may have reset it.
        if let Err(e) = page.set_viewport(viewport).await {
            return ControlReply::click_failure(click_id, format!("viewport assert: {e}"));
        }

        if !viewport.contains(x, y) {
            // Rejected before any element lookup or click reaches the engine.
            let error = CoreError::OutOfBounds {
                x,
                y,
                width: viewport.width,
                height: viewport.height,
            };
            return ControlReply::click_failure(click_id, error.to_string());
        }

        let element = match page.element_at(x, y).await {
            Ok(Some(element)) => element,
            Ok(None) => {
                let error = CoreError::ElementNotFound { x, y };
                return ControlReply::click_failure(click_id, error.to_string());
            }
            Err(e) => {
                return ControlReply::click_failure(click_id, format!("element probe: {e}"));
            }
        };

        // Pointer into place, brief settle, then the press.
        if let Err(e) = page.mouse_move(x, y).await {
            return ControlReply::click_failure(click_id, format!("Click failed at ({x}, {y}): {e}"));
        }
        tokio::time::sleep(CLICK_SETTLE).await;

        match page.click(x, y).await {
            Ok(()) => {
                info!(session_id = %self.session_id, x, y, "click performed");
                ControlReply::click_success(click_id, element)
            }
            // Engine click errors already carry the coordinates.
            Err(e) => ControlReply::click_failure(click_id, e.to_string()),
        }
    }

    /// Capture a screenshot and persist it under the artifacts directory
    async fn capture_artifact(&self, session: &Session) -> Result<String> {
        let png = session.page().screenshot().await?;
        let filename = format!(
            "session_{}_{}.png",
            self.session_id,
            chrono::Utc::now().timestamp()
        );
        let path = PathBuf::from(&self.config.artifacts_dir).join(&filename);
        tokio::fs::write(&path, &png)
            .await
            .map_err(periscope_core::Error::from)?;
        info!(session_id = %self.session_id, path = %path.display(), "screenshot artifact saved");
        Ok(filename)
    }

    /// Write a reply if the channel is still open; drop it otherwise
    async fn reply(&self, sink: &dyn ReplySink, reply: &ControlReply) {
        if !sink.is_open().await {
            debug!(session_id = %self.session_id, "channel closed, dropping reply");
            return;
        }
        if let Err(e) = sink.send(reply).await {
            warn!(session_id = %self.session_id, "failed to send reply: {e}");
        }
    }
}
