//! Signaling & peer connection management
//!
//! Owns the process-wide table of peer connections. `handle_offer`
//! negotiates one connection per offer: it requires a live session, attaches
//! the streaming track, binds the interaction protocol to the data channel,
//! and produces the SDP answer. Terminal state transitions (observed
//! asynchronously from the transport) and the janitor's periodic sweep both
//! feed the same locked removal path, so reaping is idempotent whichever
//! side gets there first.

use crate::config::WebRtcTransportConfig;
use crate::interaction::{InteractionHandler, ReplySink};
use crate::peer::{PeerConnection, PeerState};
use crate::protocol::ControlReply;
use crate::streaming::{StreamPipeline, TrackFrameSink};
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use periscope_core::{Config, PeerSweeper, SessionRegistry};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;
use webrtc::data_channel::data_channel_state::RTCDataChannelState;
use webrtc::data_channel::RTCDataChannel;
use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit;

/// Answer returned to a signaling caller
#[derive(Debug, Clone, Serialize)]
pub struct OfferAnswer {
    /// Local SDP answer
    pub sdp: String,
    /// SDP type, always `answer`
    #[serde(rename = "type")]
    pub sdp_type: String,
    /// Id of the created peer connection
    pub pc_id: String,
}

/// Result of applying a remote candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateOutcome {
    /// Candidate applied (or tolerated as malformed and dropped)
    Added,
    /// The peer connection is unknown; candidates legitimately arrive
    /// before or after a connection exists, so this is not an error
    Ignored,
}

impl CandidateOutcome {
    /// Wire name for the HTTP response
    pub fn as_str(&self) -> &'static str {
        match self {
            CandidateOutcome::Added => "added",
            CandidateOutcome::Ignored => "ignored",
        }
    }
}

/// Summary of one tracked peer connection
#[derive(Debug, Clone)]
pub struct PeerInfo {
    /// Peer connection id
    pub pc_id: String,
    /// Bound session id
    pub session_id: String,
    /// Current state
    pub state: PeerState,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

struct PeerEntry {
    session_id: String,
    created_at: DateTime<Utc>,
    connection: Arc<PeerConnection>,
    stream_task: Mutex<Option<JoinHandle<()>>>,
}

/// Negotiates peer connections and owns their table
pub struct SignalingManager {
    peers: Mutex<HashMap<String, Arc<PeerEntry>>>,
    registry: Arc<SessionRegistry>,
    config: Arc<Config>,
    transport_config: WebRtcTransportConfig,
}

impl SignalingManager {
    /// Create a manager over the given session registry
    pub fn new(
        registry: Arc<SessionRegistry>,
        config: Arc<Config>,
        transport_config: WebRtcTransportConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            peers: Mutex::new(HashMap::new()),
            registry,
            config,
            transport_config,
        })
    }

    /// Number of tracked peer connections
    pub fn count(&self) -> usize {
        self.peers.lock().len()
    }

    /// Summary of one peer connection
    pub fn get_info(&self, pc_id: &str) -> Option<PeerInfo> {
        self.peers.lock().get(pc_id).map(|entry| PeerInfo {
            pc_id: pc_id.to_string(),
            session_id: entry.session_id.clone(),
            state: entry.connection.state(),
            created_at: entry.created_at,
        })
    }

    /// Point-in-time copy of all peer connection summaries
    pub fn list_infos(&self) -> Vec<PeerInfo> {
        self.peers
            .lock()
            .iter()
            .map(|(pc_id, entry)| PeerInfo {
                pc_id: pc_id.clone(),
                session_id: entry.session_id.clone(),
                state: entry.connection.state(),
                created_at: entry.created_at,
            })
            .collect()
    }

    /// Accept a remote offer for a session.
    ///
    /// Requires a live session; creates the transport connection, attaches
    /// one streaming track, binds the interaction handler to the data
    /// channel, and answers. The streaming pipeline starts immediately and
    /// runs until the connection is reaped.
    pub async fn handle_offer(
        self: &Arc<Self>,
        session_id: &str,
        offer_sdp: String,
    ) -> Result<OfferAnswer> {
        let session = self
            .registry
            .get(session_id)
            .ok_or_else(|| Error::InvalidSession(session_id.to_string()))?;

        let pc_id = Uuid::new_v4().to_string();
        info!(pc_id = %pc_id, session_id = %session_id, "handling offer");

        let connection = Arc::new(
            PeerConnection::new(pc_id.clone(), &self.transport_config).await?,
        );

        // Everything below must be wired before the remote description is
        // applied, or the channel-open and state events can be missed.
        let track = connection.add_video_track().await?;

        let handler = Arc::new(InteractionHandler::new(
            session_id.to_string(),
            Arc::clone(&self.registry),
            Arc::clone(&self.config),
        ));
        connection.on_data_channel(move |channel| {
            let handler = Arc::clone(&handler);
            Box::pin(async move {
                info!(label = %channel.label(), "data channel opened");
                let sink = Arc::new(DataChannelSink {
                    channel: Arc::clone(&channel),
                });
                let channel_for_messages = Arc::clone(&channel);
                channel_for_messages.on_message(Box::new(move |message| {
                    let handler = Arc::clone(&handler);
                    let sink = Arc::clone(&sink);
                    Box::pin(async move {
                        handler.handle(&message.data, sink.as_ref()).await;
                    })
                }));
            })
        });

        let manager = Arc::downgrade(self);
        let hook_pc_id = pc_id.clone();
        connection.on_terminal(move |state| {
            let Some(manager) = manager.upgrade() else {
                return;
            };
            let pc_id = hook_pc_id.clone();
            debug!(pc_id = %pc_id, state = state.as_str(), "terminal state observed");
            tokio::spawn(async move {
                manager.remove_peer(&pc_id).await;
            });
        });

        let answer_sdp = match connection.answer(offer_sdp).await {
            Ok(sdp) => sdp,
            Err(e) => {
                let _ = connection.close().await;
                return Err(e);
            }
        };

        let pipeline = StreamPipeline::new(
            session.page(),
            TrackFrameSink::new(track),
            session.viewport(),
            self.config.frame_interval(),
            self.config.screenshot_timeout(),
        );
        let stream_task = tokio::spawn(pipeline.run());

        self.peers.lock().insert(
            pc_id.clone(),
            Arc::new(PeerEntry {
                session_id: session_id.to_string(),
                created_at: Utc::now(),
                connection,
                stream_task: Mutex::new(Some(stream_task)),
            }),
        );

        info!(pc_id = %pc_id, "offer answered");
        Ok(OfferAnswer {
            sdp: answer_sdp,
            sdp_type: "answer".to_string(),
            pc_id,
        })
    }

    /// Apply a remote ICE candidate to a tracked connection.
    ///
    /// Unknown ids yield a soft [`CandidateOutcome::Ignored`]; malformed or
    /// unappliable candidates are logged and dropped without failing.
    pub async fn handle_candidate(
        &self,
        pc_id: &str,
        candidate: serde_json::Value,
    ) -> Result<CandidateOutcome> {
        let entry = match self.peers.lock().get(pc_id) {
            Some(entry) => Arc::clone(entry),
            None => {
                debug!(pc_id = %pc_id, "candidate for unknown connection ignored");
                return Ok(CandidateOutcome::Ignored);
            }
        };

        let init: RTCIceCandidateInit = match serde_json::from_value(candidate) {
            Ok(init) => init,
            Err(e) => {
                warn!(pc_id = %pc_id, "malformed candidate dropped: {e}");
                return Ok(CandidateOutcome::Added);
            }
        };

        if let Err(e) = entry.connection.add_ice_candidate(init).await {
            warn!(pc_id = %pc_id, "candidate not applied: {e}");
        }
        Ok(CandidateOutcome::Added)
    }

    /// Remove one peer connection: drop it from the table, stop its stream,
    /// close its transport.
    ///
    /// Shared by the terminal-state observer, the janitor sweep, and
    /// shutdown; removing an absent id is a no-op, so the paths never race
    /// destructively.
    pub async fn remove_peer(&self, pc_id: &str) -> bool {
        let Some(entry) = self.peers.lock().remove(pc_id) else {
            return false;
        };
        info!(pc_id = %pc_id, "removing peer connection");

        if let Some(task) = entry.stream_task.lock().take() {
            task.abort();
        }
        if let Err(e) = entry.connection.close().await {
            warn!(pc_id = %pc_id, "error closing connection: {e}");
        }
        true
    }

    /// Close and remove every tracked connection (shutdown path)
    pub async fn remove_all(&self) -> usize {
        let pc_ids: Vec<String> = self.peers.lock().keys().cloned().collect();
        let mut removed = 0;
        for pc_id in pc_ids {
            if self.remove_peer(&pc_id).await {
                removed += 1;
            }
        }
        removed
    }
}

#[async_trait]
impl PeerSweeper for SignalingManager {
    async fn sweep_dead_peers(&self) -> usize {
        // Snapshot terminal candidates under the lock, close outside it.
        let dead: Vec<String> = self
            .peers
            .lock()
            .iter()
            .filter(|(_, entry)| entry.connection.state().is_terminal())
            .map(|(pc_id, _)| pc_id.clone())
            .collect();

        let mut removed = 0;
        for pc_id in dead {
            if self.remove_peer(&pc_id).await {
                removed += 1;
            }
        }
        removed
    }
}

/// Reply sink over the peer's data channel
struct DataChannelSink {
    channel: Arc<RTCDataChannel>,
}

#[async_trait]
impl ReplySink for DataChannelSink {
    async fn is_open(&self) -> bool {
        self.channel.ready_state() == RTCDataChannelState::Open
    }

    async fn send(&self, reply: &ControlReply) -> Result<()> {
        let text = reply.to_json()?;
        self.channel
            .send_text(text)
            .await
            .map_err(|e| Error::DataChannelError(format!("send failed: {e}")))?;
        Ok(())
    }
}
