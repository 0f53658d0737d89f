//! Peer connection management

pub mod connection;
pub mod manager;

pub use connection::{PeerConnection, PeerState};
pub use manager::{CandidateOutcome, OfferAnswer, PeerInfo, SignalingManager};
