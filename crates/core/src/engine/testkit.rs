//! Scripted in-memory engine for tests
//!
//! `ScriptedEngine` implements the full engine boundary without a browser.
//! Behaviour (failures, the element under the pointer, the screenshot
//! payload) is scriptable per test, and every call is counted so tests can
//! assert which engine operations ran, e.g. that an out-of-bounds click
//! never reached the engine, or that a double destroy closed handles once.

use super::{
    BoundingBox, BrowserEngine, BrowserHandle, ContextHandle, ContextOptions, ElementInfo,
    EngineSession, LaunchOptions, PageHandle, Viewport,
};
use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// Scriptable behaviour shared by every handle the engine hands out
#[derive(Debug, Clone)]
pub struct Behavior {
    /// Fail `BrowserEngine::launch`
    pub fail_launch: bool,
    /// Fail `PageHandle::navigate`
    pub fail_navigation: bool,
    /// Fail `PageHandle::screenshot`
    pub fail_screenshot: bool,
    /// Fail `PageHandle::click`
    pub fail_click: bool,
    /// Element reported by `element_at` (None = nothing under the pointer)
    pub element: Option<ElementInfo>,
    /// PNG returned by `screenshot`
    pub screenshot_png: Bytes,
    /// Title reported by `title`
    pub title: String,
}

impl Default for Behavior {
    fn default() -> Self {
        Self {
            fail_launch: false,
            fail_navigation: false,
            fail_screenshot: false,
            fail_click: false,
            element: Some(ElementInfo {
                tag_name: "BODY".to_string(),
                id: String::new(),
                class_name: String::new(),
                rect: BoundingBox {
                    left: 0.0,
                    top: 0.0,
                    width: 1280.0,
                    height: 720.0,
                },
            }),
            screenshot_png: encode_png(4, 4),
            title: "Scripted Page".to_string(),
        }
    }
}

/// Counters and traces recorded across all handles of one engine
#[derive(Debug, Default, Clone)]
pub struct CallLog {
    /// Engine instances launched
    pub launches: usize,
    /// Navigations attempted (URLs, in order)
    pub navigations: Vec<String>,
    /// Screenshot captures attempted
    pub screenshots: usize,
    /// Element probes attempted
    pub element_probes: usize,
    /// Pointer moves attempted
    pub mouse_moves: usize,
    /// Clicks attempted
    pub clicks: usize,
    /// Text typed (in order)
    pub typed: Vec<String>,
    /// Scroll deltas applied (in order)
    pub scrolls: Vec<i32>,
    /// Viewport assertions applied (in order)
    pub viewports: Vec<Viewport>,
    /// Close/shutdown calls in the order they arrived
    pub close_order: Vec<&'static str>,
}

/// Shared mutable state behind one scripted engine
#[derive(Default)]
struct Shared {
    behavior: Mutex<Behavior>,
    log: Mutex<CallLog>,
}

/// Scripted implementation of [`BrowserEngine`]
#[derive(Clone, Default)]
pub struct ScriptedEngine {
    shared: Arc<Shared>,
}

impl ScriptedEngine {
    /// Create a scripted engine with default (all-succeed) behaviour
    pub fn new() -> Self {
        Self::default()
    }

    /// Mutate the scripted behaviour
    pub fn script(&self, f: impl FnOnce(&mut Behavior)) {
        f(&mut self.shared.behavior.lock());
    }

    /// Snapshot the call log
    pub fn log(&self) -> CallLog {
        self.shared.log.lock().clone()
    }
}

#[async_trait]
impl BrowserEngine for ScriptedEngine {
    async fn launch(&self, _options: &LaunchOptions) -> Result<Box<dyn EngineSession>> {
        if self.shared.behavior.lock().fail_launch {
            return Err(Error::Engine("scripted launch failure".into()));
        }
        self.shared.log.lock().launches += 1;
        Ok(Box::new(ScriptedSession {
            shared: Arc::clone(&self.shared),
        }))
    }
}

struct ScriptedSession {
    shared: Arc<Shared>,
}

#[async_trait]
impl EngineSession for ScriptedSession {
    async fn new_browser(&self) -> Result<Box<dyn BrowserHandle>> {
        Ok(Box::new(ScriptedBrowser {
            shared: Arc::clone(&self.shared),
        }))
    }

    async fn shutdown(&self) -> Result<()> {
        self.shared.log.lock().close_order.push("engine");
        Ok(())
    }
}

struct ScriptedBrowser {
    shared: Arc<Shared>,
}

#[async_trait]
impl BrowserHandle for ScriptedBrowser {
    async fn new_context(&self, _options: &ContextOptions) -> Result<Box<dyn ContextHandle>> {
        Ok(Box::new(ScriptedContext {
            shared: Arc::clone(&self.shared),
        }))
    }

    async fn close(&self) -> Result<()> {
        self.shared.log.lock().close_order.push("browser");
        Ok(())
    }
}

struct ScriptedContext {
    shared: Arc<Shared>,
}

#[async_trait]
impl ContextHandle for ScriptedContext {
    async fn new_page(&self) -> Result<Arc<dyn PageHandle>> {
        Ok(Arc::new(ScriptedPage {
            shared: Arc::clone(&self.shared),
        }))
    }

    async fn close(&self) -> Result<()> {
        self.shared.log.lock().close_order.push("context");
        Ok(())
    }
}

/// Scripted page handle; also usable directly in tests that bypass the
/// lifecycle manager
pub struct ScriptedPage {
    shared: Arc<Shared>,
}

impl ScriptedPage {
    /// A standalone page sharing the given engine's script and log
    pub fn of(engine: &ScriptedEngine) -> Arc<Self> {
        Arc::new(Self {
            shared: Arc::clone(&engine.shared),
        })
    }
}

#[async_trait]
impl PageHandle for ScriptedPage {
    async fn navigate(&self, url: &str) -> Result<()> {
        if self.shared.behavior.lock().fail_navigation {
            return Err(Error::NavigationFailed(format!(
                "scripted navigation failure: {url}"
            )));
        }
        self.shared.log.lock().navigations.push(url.to_string());
        Ok(())
    }

    async fn set_viewport(&self, viewport: Viewport) -> Result<()> {
        self.shared.log.lock().viewports.push(viewport);
        Ok(())
    }

    async fn screenshot(&self) -> Result<Bytes> {
        self.shared.log.lock().screenshots += 1;
        let behavior = self.shared.behavior.lock();
        if behavior.fail_screenshot {
            return Err(Error::Engine("scripted screenshot failure".into()));
        }
        Ok(behavior.screenshot_png.clone())
    }

    async fn title(&self) -> Result<String> {
        Ok(self.shared.behavior.lock().title.clone())
    }

    async fn wait_for_load(&self, _timeout: Duration) -> Result<()> {
        Ok(())
    }

    async fn element_at(&self, _x: i32, _y: i32) -> Result<Option<ElementInfo>> {
        self.shared.log.lock().element_probes += 1;
        Ok(self.shared.behavior.lock().element.clone())
    }

    async fn mouse_move(&self, _x: i32, _y: i32) -> Result<()> {
        self.shared.log.lock().mouse_moves += 1;
        Ok(())
    }

    async fn click(&self, x: i32, y: i32) -> Result<()> {
        self.shared.log.lock().clicks += 1;
        if self.shared.behavior.lock().fail_click {
            return Err(Error::ClickFailed {
                x,
                y,
                reason: "scripted click failure".into(),
            });
        }
        Ok(())
    }

    async fn type_text(&self, text: &str) -> Result<()> {
        self.shared.log.lock().typed.push(text.to_string());
        Ok(())
    }

    async fn scroll_by(&self, delta_y: i32) -> Result<()> {
        self.shared.log.lock().scrolls.push(delta_y);
        Ok(())
    }
}

/// Encode a small solid-color PNG usable as a scripted screenshot
pub fn encode_png(width: u32, height: u32) -> Bytes {
    let img = image::RgbImage::from_pixel(width, height, image::Rgb([0, 128, 255]));
    let mut out = std::io::Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(img)
        .write_to(&mut out, image::ImageFormat::Png)
        .expect("in-memory png encode");
    Bytes::from(out.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_engine_records_calls() {
        let engine = ScriptedEngine::new();
        let session = engine.launch(&LaunchOptions::default()).await.unwrap();
        let browser = session.new_browser().await.unwrap();
        let context = browser.new_context(&ContextOptions::default()).await.unwrap();
        let page = context.new_page().await.unwrap();

        page.navigate("https://example.com").await.unwrap();
        page.click(10, 10).await.unwrap();
        page.scroll_by(-120).await.unwrap();

        context.close().await.unwrap();
        browser.close().await.unwrap();
        session.shutdown().await.unwrap();

        let log = engine.log();
        assert_eq!(log.navigations, vec!["https://example.com"]);
        assert_eq!(log.clicks, 1);
        assert_eq!(log.scrolls, vec![-120]);
        assert_eq!(log.close_order, vec!["context", "browser", "engine"]);
    }

    #[tokio::test]
    async fn test_scripted_failures() {
        let engine = ScriptedEngine::new();
        engine.script(|b| b.fail_launch = true);
        assert!(engine.launch(&LaunchOptions::default()).await.is_err());

        engine.script(|b| {
            b.fail_launch = false;
            b.fail_navigation = true;
        });
        let session = engine.launch(&LaunchOptions::default()).await.unwrap();
        let browser = session.new_browser().await.unwrap();
        let context = browser.new_context(&ContextOptions::default()).await.unwrap();
        let page = context.new_page().await.unwrap();
        assert!(page.navigate("https://example.com").await.is_err());
        // Failed navigations are not recorded
        assert!(engine.log().navigations.is_empty());
    }

    #[test]
    fn test_encode_png_is_decodable() {
        let png = encode_png(8, 8);
        let img = image::load_from_memory(&png).unwrap();
        assert_eq!(img.width(), 8);
        assert_eq!(img.height(), 8);
    }
}
