//! Error types for the Periscope core

use thiserror::Error;

/// Result type alias for Periscope core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types that can occur while orchestrating sessions
#[derive(Debug, Error)]
pub enum Error {
    /// Operation referenced a session id that is not registered
    #[error("Session not found: {0}")]
    SessionNotFound(String),

    /// Operation referenced a saved-session id that is not stored
    #[error("Saved session not found: {0}")]
    SavedSessionNotFound(String),

    /// Engine launch or initial navigation failed; no session was registered
    #[error("Session creation failed: {0}")]
    CreationFailed(String),

    /// Interaction coordinates fell outside the session viewport
    #[error("Coordinates ({x}, {y}) outside viewport ({width}x{height})")]
    OutOfBounds {
        /// Requested x coordinate
        x: i32,
        /// Requested y coordinate
        y: i32,
        /// Viewport width
        width: u32,
        /// Viewport height
        height: u32,
    },

    /// No element exists at the queried point
    #[error("No element found at position ({x}, {y})")]
    ElementNotFound {
        /// Probed x coordinate
        x: i32,
        /// Probed y coordinate
        y: i32,
    },

    /// The click itself failed after the element lookup succeeded
    #[error("Click failed at ({x}, {y}): {reason}")]
    ClickFailed {
        /// Click x coordinate
        x: i32,
        /// Click y coordinate
        y: i32,
        /// Underlying engine message
        reason: String,
    },

    /// A navigation issued after validation failed in the engine
    #[error("Navigation failed: {0}")]
    NavigationFailed(String),

    /// A bridge call exceeded its deadline; the task may still complete
    #[error("Bridge call timed out after {timeout_ms}ms")]
    BridgeTimeout {
        /// Deadline that elapsed, in milliseconds
        timeout_ms: u64,
    },

    /// The bridge worker is gone (shutdown or failed to start)
    #[error("Bridge unavailable: {0}")]
    BridgeUnavailable(String),

    /// Browser Automation Engine call failed
    #[error("Engine error: {0}")]
    Engine(String),

    /// Configuration file or value error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether this error means "the referenced thing does not exist".
    ///
    /// Not-found errors surface as 404/no-op responses and are never fatal.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::SessionNotFound(_) | Error::SavedSessionNotFound(_)
        )
    }
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::Other(err.to_string())
    }
}
