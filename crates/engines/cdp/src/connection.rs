//! DevTools WebSocket connection
//!
//! One connection per engine instance. A writer task serializes outbound
//! commands; a reader task matches responses to pending oneshot waiters by
//! id and fans events out on a broadcast channel. Events are filtered by
//! method and session id at the waiter.

use crate::wire::{Command, Envelope, Event};
use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use periscope_core::{Error, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, trace, warn};

/// Deadline applied to every individual DevTools command
const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Capacity of the event fan-out buffer; slow waiters lag rather than block
/// the reader
const EVENT_BUFFER: usize = 256;

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<Value>>>>>;

/// Client side of one DevTools WebSocket
pub struct CdpConnection {
    outbound: mpsc::UnboundedSender<Message>,
    pending: PendingMap,
    events: broadcast::Sender<Event>,
    next_id: AtomicU64,
}

impl CdpConnection {
    /// Connect to a browser's `webSocketDebuggerUrl`
    pub async fn connect(ws_url: &str) -> Result<Arc<Self>> {
        let (stream, _) = connect_async(ws_url)
            .await
            .map_err(|e| Error::Engine(format!("devtools connect: {e}")))?;
        let (mut sink, mut source) = stream.split();

        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Message>();
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));

        tokio::spawn(async move {
            while let Some(message) = outbound_rx.recv().await {
                if let Err(e) = sink.send(message).await {
                    warn!("devtools write failed: {e}");
                    break;
                }
            }
        });

        let pending_reader = Arc::clone(&pending);
        let events_reader = events.clone();
        tokio::spawn(async move {
            while let Some(frame) = source.next().await {
                let text = match frame {
                    Ok(Message::Text(text)) => text,
                    Ok(Message::Close(_)) | Err(_) => break,
                    Ok(_) => continue,
                };
                let envelope: Envelope = match serde_json::from_str(&text) {
                    Ok(envelope) => envelope,
                    Err(e) => {
                        warn!("unparseable devtools frame: {e}");
                        continue;
                    }
                };

                if let Some(id) = envelope.id {
                    let waiter = pending_reader.lock().remove(&id);
                    if let Some(waiter) = waiter {
                        let outcome = match envelope.error {
                            Some(err) => Err(Error::Engine(format!(
                                "devtools error {}: {}",
                                err.code, err.message
                            ))),
                            None => Ok(envelope.result.unwrap_or(Value::Null)),
                        };
                        let _ = waiter.send(outcome);
                    }
                } else if let Some(method) = envelope.method {
                    trace!(method = %method, "devtools event");
                    let _ = events_reader.send(Event {
                        method,
                        params: envelope.params.unwrap_or(Value::Null),
                        session_id: envelope.session_id,
                    });
                }
            }
            // Connection gone: fail every waiter instead of hanging them.
            let waiters: Vec<_> = pending_reader.lock().drain().collect();
            for (_, waiter) in waiters {
                let _ = waiter.send(Err(Error::Engine("devtools connection closed".into())));
            }
            debug!("devtools reader stopped");
        });

        Ok(Arc::new(Self {
            outbound,
            pending,
            events,
            next_id: AtomicU64::new(1),
        }))
    }

    /// Send a command and await its response
    pub async fn send(
        &self,
        method: &str,
        params: Value,
        session_id: Option<&str>,
    ) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let frame = serde_json::to_string(&Command {
            id,
            method,
            params,
            session_id,
        })?;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(id, tx);

        if self.outbound.send(Message::Text(frame)).is_err() {
            self.pending.lock().remove(&id);
            return Err(Error::Engine("devtools connection closed".into()));
        }

        match tokio::time::timeout(COMMAND_TIMEOUT, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(Error::Engine("devtools connection closed".into())),
            Err(_) => {
                self.pending.lock().remove(&id);
                Err(Error::Engine(format!("devtools command {method} timed out")))
            }
        }
    }

    /// Subscribe to the event stream.
    ///
    /// Subscribe *before* issuing the command whose event you wait for, or
    /// the event may slip past.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    /// Wait on an already-open subscription for a matching event
    pub async fn wait_for_event(
        &self,
        mut receiver: broadcast::Receiver<Event>,
        method: &str,
        session_id: Option<&str>,
        timeout: Duration,
    ) -> Result<Event> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let remaining = deadline
                .checked_duration_since(tokio::time::Instant::now())
                .ok_or_else(|| Error::Engine(format!("timed out waiting for {method}")))?;

            match tokio::time::timeout(remaining, receiver.recv()).await {
                Ok(Ok(event)) => {
                    if event.method == method
                        && (session_id.is_none() || event.session_id.as_deref() == session_id)
                    {
                        return Ok(event);
                    }
                }
                Ok(Err(broadcast::error::RecvError::Lagged(n))) => {
                    warn!("event waiter lagged by {n} frames");
                }
                Ok(Err(broadcast::error::RecvError::Closed)) => {
                    return Err(Error::Engine("devtools connection closed".into()));
                }
                Err(_) => return Err(Error::Engine(format!("timed out waiting for {method}"))),
            }
        }
    }
}
