//! The two halves of a viewer session

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, interval_at, timeout};
use tracing::{debug, trace, warn};

use crate::actors::messages::{BroadcastMessage, ClientMessage};

use super::{Frame, SessionSettings, SessionState, SessionStatus, Subscriptions};

/// Upper bound on messages joined into one coalesced frame
const MAX_COALESCED: usize = 64;

/// Why a pump stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum PumpExit {
    /// The hub dropped the outbound queue
    QueueClosed,
    WriteFailed,
    ReadFailed,
    /// No frame arrived within the read deadline
    HeartbeatTimeout,
    Disconnected,
    /// Dropped by the hub for falling behind
    Evicted,
    Forced,
    Aborted,
}

impl fmt::Display for PumpExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            PumpExit::QueueClosed => "outbound queue closed",
            PumpExit::WriteFailed => "write failed",
            PumpExit::ReadFailed => "read failed",
            PumpExit::HeartbeatTimeout => "heartbeat timeout",
            PumpExit::Disconnected => "client disconnected",
            PumpExit::Evicted => "evicted as too slow",
            PumpExit::Forced => "forced shutdown",
            PumpExit::Aborted => "pump aborted",
        };
        f.write_str(reason)
    }
}

/// Write hub messages, control replies and pings to the viewer
pub(super) async fn outbound_pump<W>(
    mut sink: W,
    mut outbound: mpsc::Receiver<Arc<BroadcastMessage>>,
    mut control: mpsc::Receiver<BroadcastMessage>,
    subscriptions: watch::Receiver<Subscriptions>,
    settings: SessionSettings,
    status: Arc<watch::Sender<SessionStatus>>,
) -> PumpExit
where
    W: Sink<Frame> + Unpin,
    W::Error: fmt::Display,
{
    let mut ping = interval_at(Instant::now() + settings.ping_interval, settings.ping_interval);

    loop {
        let frame = tokio::select! {
            message = outbound.recv() => match message {
                Some(first) => {
                    let mut batch = vec![first];
                    if settings.coalesce {
                        while batch.len() < MAX_COALESCED {
                            match outbound.try_recv() {
                                Ok(next) => batch.push(next),
                                Err(_) => break,
                            }
                        }
                    }

                    let text = encode(batch.iter().map(Arc::as_ref), &subscriptions.borrow());
                    match text {
                        Some(text) => Frame::Text(text),
                        None => continue,
                    }
                }
                None => {
                    status.send_modify(|s| s.state = SessionState::Closing);
                    let _ = sink.send(Frame::Close).await;
                    return PumpExit::QueueClosed;
                }
            },

            Some(reply) = control.recv() => {
                match encode(std::iter::once(&reply), &subscriptions.borrow()) {
                    Some(text) => Frame::Text(text),
                    None => continue,
                }
            }

            _ = ping.tick() => {
                trace!("sending ping");
                Frame::Ping(Vec::new())
            }
        };

        if let Err(e) = sink.send(frame).await {
            debug!("write to viewer failed: {}", e);
            return PumpExit::WriteFailed;
        }
    }
}

/// Serialize the messages the viewer is subscribed to, one JSON per line
fn encode<'a>(
    messages: impl Iterator<Item = &'a BroadcastMessage>,
    subscriptions: &Subscriptions,
) -> Option<String> {
    let lines: Vec<String> = messages
        .filter(|message| subscriptions.forwards(message.kind))
        .filter_map(|message| match serde_json::to_string(message) {
            Ok(json) => Some(json),
            Err(e) => {
                warn!("failed to serialize {} message: {}", message.kind, e);
                None
            }
        })
        .collect();

    if lines.is_empty() { None } else { Some(lines.join("\n")) }
}

/// Read frames from the viewer until it leaves or misses the read deadline
pub(super) async fn inbound_pump<R, E>(
    mut stream: R,
    control: mpsc::Sender<BroadcastMessage>,
    subscriptions: watch::Sender<Subscriptions>,
    read_deadline: Duration,
    status: Arc<watch::Sender<SessionStatus>>,
) -> PumpExit
where
    R: Stream<Item = Result<Frame, E>> + Unpin,
    E: fmt::Display,
{
    loop {
        let frame = match timeout(read_deadline, stream.next()).await {
            Err(_) => {
                warn!("no frame within {:?}, closing", read_deadline);
                return PumpExit::HeartbeatTimeout;
            }
            Ok(None) => return PumpExit::Disconnected,
            Ok(Some(Err(e))) => {
                debug!("read from viewer failed: {}", e);
                return PumpExit::ReadFailed;
            }
            Ok(Some(Ok(frame))) => frame,
        };

        status.send_modify(|s| s.last_heartbeat = Utc::now());

        match frame {
            Frame::Text(text) => handle_text(&text, &control, &subscriptions),
            Frame::Close => return PumpExit::Disconnected,
            Frame::Ping(_) | Frame::Pong(_) => trace!("heartbeat frame"),
            Frame::Binary(_) => trace!("ignoring binary frame"),
        }
    }
}

fn handle_text(
    text: &str,
    control: &mpsc::Sender<BroadcastMessage>,
    subscriptions: &watch::Sender<Subscriptions>,
) {
    match ClientMessage::parse(text) {
        Ok(ClientMessage::Ping) => {
            if control.try_send(BroadcastMessage::pong()).is_err() {
                debug!("control queue full, pong dropped");
            }
        }
        Ok(ClientMessage::Subscribe(kinds)) => {
            debug!("subscribing to {:?}", kinds);
            subscriptions.send_modify(|s| s.subscribe(&kinds));
        }
        Ok(ClientMessage::Unsubscribe(kinds)) => {
            debug!("unsubscribing from {:?}", kinds);
            subscriptions.send_modify(|s| s.unsubscribe(&kinds));
        }
        Err(e) => warn!("ignoring malformed client message: {}", e),
    }
}
