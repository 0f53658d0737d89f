//! Chrome DevTools Protocol implementation of the Periscope browser-engine
//! boundary
//!
//! `CdpEngine` launches one headless Chromium process per engine instance,
//! drives it over the DevTools WebSocket, and maps the boundary traits onto
//! protocol domains: isolated contexts are `browserContextId`s, pages are
//! attached target sessions, input goes through `Input.dispatchMouseEvent`
//! and `Input.insertText`, capture through `Page.captureScreenshot`.

pub mod connection;
pub mod engine;
pub mod process;
mod wire;

pub use connection::CdpConnection;
pub use engine::CdpEngine;
pub use process::BrowserProcess;
