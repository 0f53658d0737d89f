//! WebRTC peer connection wrapper
//!
//! Wraps one `webrtc::RTCPeerConnection` with the state machine the
//! orchestrator tracks (`new -> connecting -> connected -> {failed | closed}`)
//! and the operations signaling needs: answer an offer, apply candidates,
//! attach the outbound video track, bind the data channel, close.

use crate::config::WebRtcTransportConfig;
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info};
use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::{MediaEngine, MIME_TYPE_VP8};
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTCRtpCodecCapability;
use webrtc::rtp_transceiver::rtp_sender::RTCRtpSender;
use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
use webrtc::track::track_local::TrackLocal;

/// Connection state as tracked by the orchestrator
///
/// `Failed` and `Closed` are terminal; entries in a terminal state are
/// reaped and never resurrected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    /// Initial state, negotiation not yet complete
    New,
    /// Transport negotiation in progress
    Connecting,
    /// Connection established
    Connected,
    /// Connection failed (terminal)
    Failed,
    /// Connection closed (terminal)
    Closed,
}

impl PeerState {
    /// Whether this state is terminal
    pub fn is_terminal(&self) -> bool {
        matches!(self, PeerState::Failed | PeerState::Closed)
    }

    /// Lowercase wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            PeerState::New => "new",
            PeerState::Connecting => "connecting",
            PeerState::Connected => "connected",
            PeerState::Failed => "failed",
            PeerState::Closed => "closed",
        }
    }
}

type TerminalHook = Box<dyn Fn(PeerState) + Send + Sync>;

/// One negotiated transport connection bound to a session
pub struct PeerConnection {
    id: String,
    state: Arc<Mutex<PeerState>>,
    peer_connection: Arc<RTCPeerConnection>,
    created_at: DateTime<Utc>,
    video_sender: Mutex<Option<Arc<RTCRtpSender>>>,
    terminal_hook: Arc<Mutex<Option<TerminalHook>>>,
}

impl PeerConnection {
    /// Create a peer connection with default codecs and interceptors
    pub async fn new(id: String, config: &WebRtcTransportConfig) -> Result<Self> {
        let mut media_engine = MediaEngine::default();
        media_engine
            .register_default_codecs()
            .map_err(|e| Error::WebRtcError(format!("failed to register codecs: {e}")))?;

        let interceptor_registry =
            register_default_interceptors(Default::default(), &mut media_engine)
                .map_err(|e| Error::WebRtcError(format!("failed to register interceptors: {e}")))?;

        let api = webrtc::api::APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(interceptor_registry)
            .build();

        let ice_servers: Vec<RTCIceServer> = config
            .stun_servers
            .iter()
            .map(|url| RTCIceServer {
                urls: vec![url.clone()],
                ..Default::default()
            })
            .chain(config.turn_servers.iter().map(|turn| {
                #[allow(clippy::needless_update)]
                RTCIceServer {
                    urls: vec![turn.url.clone()],
                    username: turn.username.clone(),
                    credential: turn.credential.clone(),
                    ..Default::default()
                }
            }))
            .collect();

        let peer_connection = Arc::new(
            api.new_peer_connection(RTCConfiguration {
                ice_servers,
                ..Default::default()
            })
            .await
            .map_err(|e| Error::WebRtcError(format!("failed to create peer connection: {e}")))?,
        );

        let state = Arc::new(Mutex::new(PeerState::New));
        let terminal_hook: Arc<Mutex<Option<TerminalHook>>> = Arc::new(Mutex::new(None));

        // Mirror transport state transitions and notify the owner when the
        // connection reaches a terminal state.
        let state_mirror = Arc::clone(&state);
        let hook_mirror = Arc::clone(&terminal_hook);
        let id_mirror = id.clone();
        peer_connection.on_peer_connection_state_change(Box::new(
            move |raw: RTCPeerConnectionState| {
                let new_state = match raw {
                    RTCPeerConnectionState::New => Some(PeerState::New),
                    RTCPeerConnectionState::Connecting => Some(PeerState::Connecting),
                    RTCPeerConnectionState::Connected => Some(PeerState::Connected),
                    RTCPeerConnectionState::Failed => Some(PeerState::Failed),
                    RTCPeerConnectionState::Disconnected | RTCPeerConnectionState::Closed => {
                        Some(PeerState::Closed)
                    }
                    _ => None,
                };

                if let Some(new_state) = new_state {
                    let old_state = {
                        let mut guard = state_mirror.lock();
                        let old = *guard;
                        // Terminal states stick; late transport callbacks
                        // must not resurrect a reaped connection.
                        if !old.is_terminal() {
                            *guard = new_state;
                        }
                        old
                    };
                    if old_state != new_state && !old_state.is_terminal() {
                        debug!(
                            pc_id = %id_mirror,
                            "peer state transition: {old_state:?} -> {new_state:?}"
                        );
                        if new_state.is_terminal() {
                            if let Some(hook) = hook_mirror.lock().as_ref() {
                                hook(new_state);
                            }
                        }
                    }
                }
                Box::pin(async {})
            },
        ));

        Ok(Self {
            id,
            state,
            peer_connection,
            created_at: Utc::now(),
            video_sender: Mutex::new(None),
            terminal_hook,
        })
    }

    /// The connection id
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Current mirrored state
    pub fn state(&self) -> PeerState {
        *self.state.lock()
    }

    /// Creation timestamp
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Register the hook invoked once when the connection turns terminal
    pub fn on_terminal(&self, hook: impl Fn(PeerState) + Send + Sync + 'static) {
        *self.terminal_hook.lock() = Some(Box::new(hook));
    }

    /// Register the data-channel-open handler.
    ///
    /// Must be called before [`Self::answer`] so a channel negotiated in the
    /// offer is never missed.
    pub fn on_data_channel<F>(&self, handler: F)
    where
        F: Fn(Arc<RTCDataChannel>) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>>
            + Send
            + Sync
            + 'static,
    {
        self.peer_connection.on_data_channel(Box::new(handler));
    }

    /// Attach the outbound screen track
    pub async fn add_video_track(&self) -> Result<Arc<TrackLocalStaticSample>> {
        let track = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: MIME_TYPE_VP8.to_string(),
                clock_rate: crate::streaming::VIDEO_CLOCK_RATE,
                ..Default::default()
            },
            format!("screen-{}", self.id),
            format!("periscope-{}", self.id),
        ));

        let sender = self
            .peer_connection
            .add_track(Arc::clone(&track) as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .map_err(|e| Error::MediaTrackError(format!("failed to add video track: {e}")))?;

        // Retained so the transport does not clean the track up under us.
        *self.video_sender.lock() = Some(sender);

        debug!(pc_id = %self.id, "video track attached");
        Ok(track)
    }

    /// Apply a remote offer and produce the local answer SDP
    pub async fn answer(&self, offer_sdp: String) -> Result<String> {
        let offer = RTCSessionDescription::offer(offer_sdp)
            .map_err(|e| Error::SdpError(format!("invalid offer: {e}")))?;

        self.peer_connection
            .set_remote_description(offer)
            .await
            .map_err(|e| Error::SdpError(format!("failed to set remote description: {e}")))?;

        let answer = self
            .peer_connection
            .create_answer(None)
            .await
            .map_err(|e| Error::SdpError(format!("failed to create answer: {e}")))?;

        self.peer_connection
            .set_local_description(answer)
            .await
            .map_err(|e| Error::SdpError(format!("failed to set local description: {e}")))?;

        let local = self
            .peer_connection
            .local_description()
            .await
            .ok_or_else(|| Error::SdpError("no local description after answer".to_string()))?;

        debug!(pc_id = %self.id, "answer created");
        Ok(local.sdp)
    }

    /// Apply a remote ICE candidate
    pub async fn add_ice_candidate(&self, candidate: RTCIceCandidateInit) -> Result<()> {
        self.peer_connection
            .add_ice_candidate(candidate)
            .await
            .map_err(|e| Error::IceCandidateError(format!("failed to add candidate: {e}")))
    }

    /// Close the transport connection
    pub async fn close(&self) -> Result<()> {
        info!(pc_id = %self.id, "closing peer connection");
        *self.state.lock() = PeerState::Closed;
        self.peer_connection
            .close()
            .await
            .map_err(|e| Error::WebRtcError(format!("failed to close connection: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_new_connection_starts_in_new_state() {
        let pc = PeerConnection::new("pc-test".to_string(), &WebRtcTransportConfig::default())
            .await
            .unwrap();
        assert_eq!(pc.id(), "pc-test");
        assert_eq!(pc.state(), PeerState::New);
    }

    #[tokio::test]
    async fn test_add_video_track() {
        let pc = PeerConnection::new("pc-test".to_string(), &WebRtcTransportConfig::default())
            .await
            .unwrap();
        pc.add_video_track().await.unwrap();
        assert!(pc.video_sender.lock().is_some());
    }

    #[tokio::test]
    async fn test_close_is_terminal() {
        let pc = PeerConnection::new("pc-test".to_string(), &WebRtcTransportConfig::default())
            .await
            .unwrap();
        pc.close().await.unwrap();
        assert_eq!(pc.state(), PeerState::Closed);
        assert!(pc.state().is_terminal());
    }

    #[test]
    fn test_state_names() {
        assert_eq!(PeerState::New.as_str(), "new");
        assert_eq!(PeerState::Connecting.as_str(), "connecting");
        assert_eq!(PeerState::Connected.as_str(), "connected");
        assert_eq!(PeerState::Failed.as_str(), "failed");
        assert_eq!(PeerState::Closed.as_str(), "closed");
        assert!(!PeerState::Connected.is_terminal());
        assert!(PeerState::Failed.is_terminal());
    }
}
