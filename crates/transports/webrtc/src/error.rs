//! Error types for the WebRTC transport

use thiserror::Error;

/// Result type alias for transport operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types raised while signaling or streaming
#[derive(Debug, Error)]
pub enum Error {
    /// An offer referenced a session id that is not registered
    #[error("Invalid session: {0}")]
    InvalidSession(String),

    /// SDP parse or negotiation failure
    #[error("SDP error: {0}")]
    SdpError(String),

    /// ICE candidate parse or application failure
    #[error("ICE candidate error: {0}")]
    IceCandidateError(String),

    /// Media track creation or write failure
    #[error("Media track error: {0}")]
    MediaTrackError(String),

    /// Data channel failure
    #[error("Data channel error: {0}")]
    DataChannelError(String),

    /// Underlying transport library failure
    #[error("WebRTC error: {0}")]
    WebRtcError(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Error propagated from the orchestration core
    #[error(transparent)]
    Core(#[from] periscope_core::Error),
}
