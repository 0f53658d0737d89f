//! Periscope HTTP server
//!
//! Wires the orchestration core, the CDP engine, and the WebRTC transport
//! behind the JSON API: session lifecycle, saved snapshots, signaling, and
//! health. The binary entry point lives in `main.rs`; the router and state
//! are exposed here so they can be driven in tests.

pub mod routes;
pub mod state;

pub use routes::build_router;
pub use state::AppState;
