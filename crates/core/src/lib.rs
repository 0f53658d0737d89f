//! Periscope core: session orchestration for isolated, remotely-viewable
//! browser execution contexts
//!
//! This crate owns the pieces every other Periscope crate builds on:
//!
//! - [`session::SessionRegistry`] / [`session::SavedSessionStore`]: the
//!   process-wide, lock-guarded collections of live sessions and saved
//!   snapshots
//! - [`bridge::ExecutionBridge`]: the single dedicated worker that runs
//!   every engine-touching operation as a cooperative task
//! - [`session::LifecycleManager`]: creation, teardown, save and restore
//!   of sessions against the engine boundary
//! - [`engine`]: the Browser Automation Engine boundary traits (the engine
//!   itself is an external collaborator; `periscope-engine-cdp` is the
//!   production implementation)
//! - [`janitor::Janitor`]: periodic reclamation of expired sessions and
//!   dead peer connections

pub mod bridge;
pub mod config;
pub mod engine;
pub mod error;
pub mod janitor;
pub mod session;

pub use bridge::ExecutionBridge;
pub use config::Config;
pub use error::{Error, Result};
pub use janitor::{Janitor, PeerSweeper, SweepReport};
pub use session::{LifecycleManager, SavedSession, SavedSessionStore, Session, SessionRegistry};
