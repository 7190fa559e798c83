//! WebSocket transport — tokio-tungstenite with automatic reconnect.
//!
//! DESIGN
//! ======
//! One I/O task owns the socket. Callers talk to it through a command
//! channel; inbound traffic splits into two streams:
//! - frames with a `parent_id` resolve the matching pending request
//!   (unmatched acks are dropped),
//! - everything else surfaces as [`TransportEvent::Push`].
//!
//! Reconnect lives here and nowhere else: on connection loss the task
//! re-dials with exponential backoff plus jitter, fails all pending
//! requests, and emits [`TransportEvent::Reconnected`] once a new socket is
//! up. Pending requests carry no timeout; they resolve with
//! [`TransportError::ConnectionLost`] when the socket drops.

use std::collections::HashMap;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use protocol::Frame;
use rand::Rng;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Duration;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::session::{Transport, TransportError, TransportEvent};

const BASE_DELAY_MS: u64 = 500;
const MAX_DELAY_MS: u64 = 30_000;

/// Backoff delay before reconnect attempt `attempt` (1-based). Exponential
/// up to the cap, with a ±10% jitter window.
#[must_use]
pub fn reconnect_delay(attempt: u32) -> Duration {
    let pow = 2u64.saturating_pow(attempt.saturating_sub(1).min(6));
    let delay_ms = BASE_DELAY_MS.saturating_mul(pow).min(MAX_DELAY_MS);
    let jitter_window = (delay_ms / 10).max(1);
    let jitter = rand::rng().random_range(0..=jitter_window * 2);
    Duration::from_millis(delay_ms.saturating_sub(jitter_window).saturating_add(jitter))
}

enum Cmd {
    Request(Frame, oneshot::Sender<Result<Frame, TransportError>>),
    Send(Frame),
    Close,
}

/// Handle to the connection task. Implements [`Transport`].
pub struct WsTransport {
    cmd_tx: mpsc::Sender<Cmd>,
    event_rx: mpsc::Receiver<TransportEvent>,
    task: Option<JoinHandle<()>>,
}

impl WsTransport {
    /// Start a connection task for `url` (e.g. `ws://host:3000/api/ws`).
    /// Dialing happens on the task; failures feed the backoff loop rather
    /// than this call.
    #[must_use]
    pub fn connect(url: impl Into<String>) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let (event_tx, event_rx) = mpsc::channel(256);
        let task = tokio::spawn(run_io(url.into(), cmd_rx, event_tx));
        Self { cmd_tx, event_rx, task: Some(task) }
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn request(&mut self, frame: Frame) -> Result<Frame, TransportError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(Cmd::Request(frame, reply_tx))
            .await
            .map_err(|_| TransportError::Closed)?;
        reply_rx.await.map_err(|_| TransportError::ConnectionLost)?
    }

    async fn send(&mut self, frame: Frame) -> Result<(), TransportError> {
        self.cmd_tx
            .send(Cmd::Send(frame))
            .await
            .map_err(|_| TransportError::Closed)
    }

    async fn next_event(&mut self) -> Option<TransportEvent> {
        self.event_rx.recv().await
    }

    async fn close(&mut self) {
        let _ = self.cmd_tx.send(Cmd::Close).await;
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

// =============================================================================
// I/O TASK
// =============================================================================

async fn run_io(url: String, mut cmd_rx: mpsc::Receiver<Cmd>, event_tx: mpsc::Sender<TransportEvent>) {
    let mut attempt: u32 = 0;
    let mut connected_before = false;

    'outer: loop {
        let stream = match connect_async(&url).await {
            Ok((ws, _)) => {
                attempt = 0;
                ws
            }
            Err(e) => {
                attempt += 1;
                let delay = reconnect_delay(attempt);
                warn!(error = %e, attempt, ?delay, "ws dial failed; backing off");
                tokio::select! {
                    () = tokio::time::sleep(delay) => continue,
                    cmd = cmd_rx.recv() => match cmd {
                        // Requests made while disconnected fail fast.
                        Some(Cmd::Request(_, reply)) => {
                            let _ = reply.send(Err(TransportError::ConnectionLost));
                            continue;
                        }
                        Some(Cmd::Send(_)) => continue,
                        Some(Cmd::Close) | None => break,
                    },
                }
            }
        };

        if connected_before && event_tx.send(TransportEvent::Reconnected).await.is_err() {
            break;
        }
        connected_before = true;

        let (mut sink, mut source) = stream.split();
        let mut pending: HashMap<Uuid, oneshot::Sender<Result<Frame, TransportError>>> = HashMap::new();

        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => match cmd {
                    Some(Cmd::Request(frame, reply)) => {
                        let Ok(json) = serde_json::to_string(&frame) else {
                            let _ = reply.send(Err(TransportError::ConnectionLost));
                            continue;
                        };
                        let id = frame.id;
                        if sink.send(WsMessage::Text(json.into())).await.is_err() {
                            let _ = reply.send(Err(TransportError::ConnectionLost));
                            break;
                        }
                        pending.insert(id, reply);
                    }
                    Some(Cmd::Send(frame)) => {
                        let Ok(json) = serde_json::to_string(&frame) else { continue };
                        if sink.send(WsMessage::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                    Some(Cmd::Close) | None => {
                        let _ = sink.send(WsMessage::Close(None)).await;
                        fail_pending(&mut pending);
                        break 'outer;
                    }
                },
                msg = source.next() => match msg {
                    Some(Ok(WsMessage::Text(text))) => match serde_json::from_str::<Frame>(&text) {
                        Ok(frame) => {
                            if let Some(parent) = frame.parent_id {
                                match pending.remove(&parent) {
                                    Some(reply) => { let _ = reply.send(Ok(frame)); }
                                    None => debug!(%parent, "dropping unmatched ack"),
                                }
                            } else if event_tx.send(TransportEvent::Push(frame)).await.is_err() {
                                break 'outer;
                            }
                        }
                        Err(e) => debug!(error = %e, "dropping unparseable ws frame"),
                    },
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(error = %e, "ws read failed");
                        break;
                    }
                },
            }
        }

        // Connection lost: every in-flight request resolves as lost, then
        // the dial loop takes over.
        fail_pending(&mut pending);
    }

    let _ = event_tx.send(TransportEvent::Closed).await;
}

fn fail_pending(pending: &mut HashMap<Uuid, oneshot::Sender<Result<Frame, TransportError>>>) {
    for (_, reply) in pending.drain() {
        let _ = reply.send(Err(TransportError::ConnectionLost));
    }
}

#[cfg(test)]
#[path = "ws_test.rs"]
mod tests;
