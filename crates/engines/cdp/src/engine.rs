//! Engine-boundary implementation over the DevTools protocol
//!
//! Handle mapping: engine session = one browser process + its WebSocket;
//! browser = browser-level command scope; context = an isolated
//! `browserContextId`; page = an attached target session. Teardown disposes
//! the context, closes the browser, then kills the process, the reverse of
//! acquisition.

use crate::connection::CdpConnection;
use crate::process::BrowserProcess;
use async_trait::async_trait;
use bytes::Bytes;
use base64::Engine as _;
use periscope_core::engine::{
    BrowserEngine, BrowserHandle, ContextHandle, ContextOptions, ElementInfo, EngineSession,
    LaunchOptions, PageHandle, Viewport,
};
use periscope_core::{Error, Result};
use serde_json::{json, Value};
use std::path::PathBuf;
use std::time::Duration;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

/// Internal wait for the document to become interactive after a navigation
const NAVIGATION_WAIT: Duration = Duration::from_secs(30);

/// Launches one browser process per engine instance
pub struct CdpEngine {
    binary: PathBuf,
}

impl CdpEngine {
    /// Create an engine over the given Chromium-family binary
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

#[async_trait]
impl BrowserEngine for CdpEngine {
    async fn launch(&self, options: &LaunchOptions) -> Result<Box<dyn EngineSession>> {
        let process = BrowserProcess::launch(&self.binary, options).await?;
        let conn = CdpConnection::connect(&process.ws_url).await?;
        Ok(Box::new(CdpEngineSession {
            process: Mutex::new(Some(process)),
            conn,
        }))
    }
}

struct CdpEngineSession {
    process: Mutex<Option<BrowserProcess>>,
    conn: Arc<CdpConnection>,
}

#[async_trait]
impl EngineSession for CdpEngineSession {
    async fn new_browser(&self) -> Result<Box<dyn BrowserHandle>> {
        Ok(Box::new(CdpBrowser {
            conn: Arc::clone(&self.conn),
        }))
    }

    async fn shutdown(&self) -> Result<()> {
        if let Some(mut process) = self.process.lock().await.take() {
            process.kill().await;
        }
        Ok(())
    }
}

struct CdpBrowser {
    conn: Arc<CdpConnection>,
}

#[async_trait]
impl BrowserHandle for CdpBrowser {
    async fn new_context(&self, options: &ContextOptions) -> Result<Box<dyn ContextHandle>> {
        let result = self
            .conn
            .send("Target.createBrowserContext", json!({}), None)
            .await?;
        let context_id = result["browserContextId"]
            .as_str()
            .ok_or_else(|| Error::Engine("createBrowserContext returned no id".into()))?
            .to_string();
        debug!(context_id = %context_id, "created browser context");

        Ok(Box::new(CdpContext {
            conn: Arc::clone(&self.conn),
            context_id,
            options: options.clone(),
        }))
    }

    async fn close(&self) -> Result<()> {
        // Best effort; shutdown will kill the process regardless.
        let _ = self.conn.send("Browser.close", json!({}), None).await;
        Ok(())
    }
}

struct CdpContext {
    conn: Arc<CdpConnection>,
    context_id: String,
    options: ContextOptions,
}

#[async_trait]
impl ContextHandle for CdpContext {
    async fn new_page(&self) -> Result<Arc<dyn PageHandle>> {
        let result = self
            .conn
            .send(
                "Target.createTarget",
                json!({"url": "about:blank", "browserContextId": self.context_id}),
                None,
            )
            .await?;
        let target_id = result["targetId"]
            .as_str()
            .ok_or_else(|| Error::Engine("createTarget returned no id".into()))?
            .to_string();

        let result = self
            .conn
            .send(
                "Target.attachToTarget",
                json!({"targetId": target_id, "flatten": true}),
                None,
            )
            .await?;
        let session_id = result["sessionId"]
            .as_str()
            .ok_or_else(|| Error::Engine("attachToTarget returned no session".into()))?
            .to_string();

        let page = CdpPage {
            conn: Arc::clone(&self.conn),
            session_id,
        };
        page.prepare(&self.options).await?;
        Ok(Arc::new(page))
    }

    async fn close(&self) -> Result<()> {
        self.conn
            .send(
                "Target.disposeBrowserContext",
                json!({"browserContextId": self.context_id}),
                None,
            )
            .await?;
        Ok(())
    }
}

struct CdpPage {
    conn: Arc<CdpConnection>,
    session_id: String,
}

impl CdpPage {
    fn session(&self) -> Option<&str> {
        Some(&self.session_id)
    }

    /// Enable the domains the page operations rely on and apply context
    /// options
    async fn prepare(&self, options: &ContextOptions) -> Result<()> {
        self.conn.send("Page.enable", json!({}), self.session()).await?;
        self.conn
            .send("Runtime.enable", json!({}), self.session())
            .await?;
        self.conn
            .send(
                "Emulation.setUserAgentOverride",
                json!({
                    "userAgent": options.user_agent,
                    "acceptLanguage": options.accept_language,
                }),
                self.session(),
            )
            .await?;
        if options.ignore_https_errors {
            self.conn
                .send(
                    "Security.setIgnoreCertificateErrors",
                    json!({"ignore": true}),
                    self.session(),
                )
                .await?;
        }
        Ok(())
    }

    /// Evaluate an expression and return its JSON value
    async fn evaluate(&self, expression: &str) -> Result<Value> {
        let result = self
            .conn
            .send(
                "Runtime.evaluate",
                json!({"expression": expression, "returnByValue": true}),
                self.session(),
            )
            .await?;
        if let Some(exception) = result.get("exceptionDetails") {
            return Err(Error::Engine(format!("script threw: {exception}")));
        }
        Ok(result["result"]["value"].clone())
    }
}

#[async_trait]
impl PageHandle for CdpPage {
    async fn navigate(&self, url: &str) -> Result<()> {
        let receiver = self.conn.subscribe();
        let result = self
            .conn
            .send("Page.navigate", json!({"url": url}), self.session())
            .await
            .map_err(|e| Error::NavigationFailed(e.to_string()))?;

        if let Some(error_text) = result["errorText"].as_str() {
            if !error_text.is_empty() {
                return Err(Error::NavigationFailed(format!("{url}: {error_text}")));
            }
        }

        self.conn
            .wait_for_event(
                receiver,
                "Page.domContentEventFired",
                self.session(),
                NAVIGATION_WAIT,
            )
            .await
            .map_err(|e| Error::NavigationFailed(e.to_string()))?;
        Ok(())
    }

    async fn set_viewport(&self, viewport: Viewport) -> Result<()> {
        self.conn
            .send(
                "Emulation.setDeviceMetricsOverride",
                json!({
                    "width": viewport.width,
                    "height": viewport.height,
                    "deviceScaleFactor": 1,
                    "mobile": false,
                }),
                self.session(),
            )
            .await?;
        Ok(())
    }

    async fn screenshot(&self) -> Result<Bytes> {
        let result = self
            .conn
            .send(
                "Page.captureScreenshot",
                json!({"format": "png"}),
                self.session(),
            )
            .await?;
        let data = result["data"]
            .as_str()
            .ok_or_else(|| Error::Engine("captureScreenshot returned no data".into()))?;
        let png = base64::engine::general_purpose::STANDARD
            .decode(data)
            .map_err(|e| Error::Engine(format!("screenshot decode: {e}")))?;
        Ok(Bytes::from(png))
    }

    async fn title(&self) -> Result<String> {
        let value = self.evaluate("document.title").await?;
        Ok(value.as_str().unwrap_or_default().to_string())
    }

    async fn wait_for_load(&self, timeout: Duration) -> Result<()> {
        let receiver = self.conn.subscribe();
        let state = self.evaluate("document.readyState").await?;
        match state.as_str() {
            Some("interactive") | Some("complete") => Ok(()),
            _ => {
                self.conn
                    .wait_for_event(
                        receiver,
                        "Page.domContentEventFired",
                        self.session(),
                        timeout,
                    )
                    .await?;
                Ok(())
            }
        }
    }

    async fn element_at(&self, x: i32, y: i32) -> Result<Option<ElementInfo>> {
        let value = self.evaluate(&element_at_script(x, y)).await?;
        if value.is_null() {
            return Ok(None);
        }
        let info: ElementInfo = serde_json::from_value(value)
            .map_err(|e| Error::Engine(format!("element probe shape: {e}")))?;
        Ok(Some(info))
    }

    async fn mouse_move(&self, x: i32, y: i32) -> Result<()> {
        self.conn
            .send(
                "Input.dispatchMouseEvent",
                json!({"type": "mouseMoved", "x": x, "y": y}),
                self.session(),
            )
            .await?;
        Ok(())
    }

    async fn click(&self, x: i32, y: i32) -> Result<()> {
        for kind in ["mousePressed", "mouseReleased"] {
            self.conn
                .send(
                    "Input.dispatchMouseEvent",
                    json!({
                        "type": kind,
                        "x": x,
                        "y": y,
                        "button": "left",
                        "clickCount": 1,
                    }),
                    self.session(),
                )
                .await
                .map_err(|e| Error::ClickFailed {
                    x,
                    y,
                    reason: e.to_string(),
                })?;
        }
        Ok(())
    }

    async fn type_text(&self, text: &str) -> Result<()> {
        self.conn
            .send("Input.insertText", json!({"text": text}), self.session())
            .await?;
        Ok(())
    }

    async fn scroll_by(&self, delta_y: i32) -> Result<()> {
        self.evaluate(&format!("window.scrollBy(0, {delta_y})"))
            .await?;
        Ok(())
    }
}

/// Script probing the topmost element at a viewport point.
///
/// Shapes its return value to deserialize directly into [`ElementInfo`];
/// `className` is forced to a string because SVG elements expose an
/// `SVGAnimatedString` there.
fn element_at_script(x: i32, y: i32) -> String {
    format!(
        r#"(() => {{
            const el = document.elementFromPoint({x}, {y});
            if (!el) return null;
            const r = el.getBoundingClientRect();
            return {{
                tagName: el.tagName,
                id: el.id || '',
                className: typeof el.className === 'string' ? el.className : '',
                rect: {{ left: r.left, top: r.top, width: r.width, height: r.height }}
            }};
        }})()"#
    )
}
