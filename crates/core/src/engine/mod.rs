//! Browser Automation Engine boundary
//!
//! Periscope does not render pages or speak a devtools protocol itself; it
//! orchestrates an external engine through the traits below. An engine
//! instance is launched per session (full isolation) and yields a chain of
//! handles (engine session, browser, context, page) that are torn down in
//! reverse order.
//!
//! Implementations live elsewhere (`periscope-engine-cdp` in production,
//! [`testkit`] in tests). All engine calls are expected to be routed through
//! the execution bridge so they run on its single worker.

#[cfg(any(test, feature = "testkit"))]
pub mod testkit;

use crate::Result;
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Options applied when launching an engine instance
#[derive(Debug, Clone)]
pub struct LaunchOptions {
    /// Run without a visible window
    pub headless: bool,
    /// Extra command-line switches passed to the browser binary
    pub extra_args: Vec<String>,
}

impl Default for LaunchOptions {
    fn default() -> Self {
        Self {
            headless: true,
            extra_args: vec![
                "--no-sandbox".to_string(),
                "--disable-setuid-sandbox".to_string(),
                "--disable-dev-shm-usage".to_string(),
                "--disable-blink-features=AutomationControlled".to_string(),
                "--disable-gpu".to_string(),
                "--no-first-run".to_string(),
                "--no-default-browser-check".to_string(),
            ],
        }
    }
}

/// Options applied when creating an isolated browsing context
#[derive(Debug, Clone)]
pub struct ContextOptions {
    /// User agent presented to sites
    pub user_agent: String,
    /// Accept certificate errors instead of failing navigations
    pub ignore_https_errors: bool,
    /// Value sent as the Accept-Language header
    pub accept_language: String,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self {
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                         (KHTML, like Gecko) Chrome/91.0.4472.124 Safari/537.36"
                .to_string(),
            ignore_https_errors: true,
            accept_language: "en-US,en;q=0.9".to_string(),
        }
    }
}

/// Fixed pixel dimensions of a session's rendering surface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Viewport {
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
}

impl Viewport {
    /// Create a viewport
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Whether a point lies inside `[0, width] x [0, height]`
    pub fn contains(&self, x: i32, y: i32) -> bool {
        x >= 0 && y >= 0 && x <= self.width as i32 && y <= self.height as i32
    }
}

/// Bounding box of an element, in CSS pixels
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    /// Distance from the viewport's left edge
    pub left: f64,
    /// Distance from the viewport's top edge
    pub top: f64,
    /// Box width
    pub width: f64,
    /// Box height
    pub height: f64,
}

/// Element resolved at a viewport point
///
/// Echoed back to interaction-protocol callers so they can identify what a
/// click landed on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementInfo {
    /// Element tag name (upper case, as the DOM reports it)
    #[serde(rename = "tagName")]
    pub tag_name: String,
    /// Element id attribute (empty when absent)
    pub id: String,
    /// Element class attribute (empty when absent)
    #[serde(rename = "className")]
    pub class_name: String,
    /// Client bounding rectangle
    pub rect: BoundingBox,
}

/// Entry point: launches engine instances
///
/// One engine instance is launched per session; the provider itself is a
/// long-lived factory shared by the lifecycle manager.
#[async_trait]
pub trait BrowserEngine: Send + Sync {
    /// Launch a fresh engine instance
    async fn launch(&self, options: &LaunchOptions) -> Result<Box<dyn EngineSession>>;
}

/// One running engine instance (e.g. a browser process plus its control
/// connection)
#[async_trait]
pub trait EngineSession: Send + Sync {
    /// Open the browser-level handle
    async fn new_browser(&self) -> Result<Box<dyn BrowserHandle>>;

    /// Stop the engine instance, releasing the underlying process
    async fn shutdown(&self) -> Result<()>;
}

/// Browser-level handle: creates isolated contexts
#[async_trait]
pub trait BrowserHandle: Send + Sync {
    /// Create an isolated browsing context
    async fn new_context(&self, options: &ContextOptions) -> Result<Box<dyn ContextHandle>>;

    /// Close the browser
    async fn close(&self) -> Result<()>;
}

/// Isolated browsing context: creates pages
#[async_trait]
pub trait ContextHandle: Send + Sync {
    /// Open a new page in this context
    async fn new_page(&self) -> Result<Arc<dyn PageHandle>>;

    /// Close the context and every page in it
    async fn close(&self) -> Result<()>;
}

/// One page: the surface sessions render, capture, and interact with
#[async_trait]
pub trait PageHandle: Send + Sync {
    /// Navigate to a URL, returning once the document is interactive
    async fn navigate(&self, url: &str) -> Result<()>;

    /// Force the rendering surface to the given dimensions
    async fn set_viewport(&self, viewport: Viewport) -> Result<()>;

    /// Capture a PNG screenshot of the current viewport
    async fn screenshot(&self) -> Result<Bytes>;

    /// Current document title
    async fn title(&self) -> Result<String>;

    /// Wait until the current document is interactive, bounded by `timeout`
    async fn wait_for_load(&self, timeout: Duration) -> Result<()>;

    /// Resolve the topmost element at a viewport point, if any
    async fn element_at(&self, x: i32, y: i32) -> Result<Option<ElementInfo>>;

    /// Move the pointer to a viewport point
    async fn mouse_move(&self, x: i32, y: i32) -> Result<()>;

    /// Press and release the primary button at a viewport point
    async fn click(&self, x: i32, y: i32) -> Result<()>;

    /// Type text through the keyboard
    async fn type_text(&self, text: &str) -> Result<()>;

    /// Scroll the document vertically by a relative delta
    async fn scroll_by(&self, delta_y: i32) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_viewport_contains() {
        let vp = Viewport::new(1280, 720);
        assert!(vp.contains(0, 0));
        assert!(vp.contains(1280, 720));
        assert!(vp.contains(640, 360));
        assert!(!vp.contains(-1, 0));
        assert!(!vp.contains(0, -1));
        assert!(!vp.contains(1281, 0));
        assert!(!vp.contains(0, 721));
        assert!(!vp.contains(5000, 5000));
    }

    #[test]
    fn test_element_info_wire_names() {
        let info = ElementInfo {
            tag_name: "BUTTON".to_string(),
            id: "submit".to_string(),
            class_name: "btn primary".to_string(),
            rect: BoundingBox {
                left: 10.0,
                top: 20.0,
                width: 100.0,
                height: 30.0,
            },
        };
        let json = serde_json::to_value(&info).unwrap();
        assert_eq!(json["tagName"], "BUTTON");
        assert_eq!(json["className"], "btn primary");
        assert_eq!(json["rect"]["left"], 10.0);
    }
}
