//! WebRTC transport for Periscope
//!
//! Binds live browser sessions to remote viewers: signaling (offer/answer +
//! ICE) per peer connection, a screen-streaming pipeline writing to the
//! outbound video track, and the data-channel interaction protocol driving
//! the session's page. SDP negotiation internals, ICE transport, and media
//! encoding belong to the `webrtc` crate; this crate orchestrates them.

pub mod config;
pub mod error;
pub mod interaction;
pub mod peer;
pub mod protocol;
pub mod streaming;

pub use config::{TurnServerConfig, WebRtcTransportConfig};
pub use error::{Error, Result};
pub use interaction::{InteractionHandler, ReplySink};
pub use peer::{CandidateOutcome, OfferAnswer, PeerConnection, PeerInfo, PeerState, SignalingManager};
pub use protocol::{ControlMessage, ControlReply};
pub use streaming::{FrameClock, FrameSink, StreamFrame, StreamPipeline, TrackFrameSink};
