//! Viewer sessions
//!
//! A [`ViewerSession`] serves one connected viewer. It registers an outbound
//! queue with the hub and runs two pumps until either side gives up:
//!
//! ```text
//!            hub ──Arc<BroadcastMessage>──> outbound queue ─┐
//!                                                           ├─> outbound pump ──Frame──> sink
//! inbound pump ──pong replies──> control queue ─────────────┘         (pings on a timer)
//!      ^
//!      └──Frame── stream (read deadline renewed by every frame)
//! ```
//!
//! The session is written against `Sink<Frame>` / `Stream<Item = Result<Frame, E>>`
//! so it does not depend on a particular WebSocket library; the HTTP layer
//! adapts its socket type to [`Frame`].
//!
//! ## Teardown
//!
//! Whichever pump ends first aborts the other. The session then unregisters
//! from the hub exactly once and reports [`SessionState::Closed`].

mod pump;

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::{Sink, SinkExt, Stream};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::actors::hub::HubHandle;
use crate::actors::messages::{BroadcastMessage, MessageType};
use crate::config::SessionConfig;

use pump::{PumpExit, inbound_pump, outbound_pump};

/// Capacity of the per-session queue carrying replies to client requests
const CONTROL_CAPACITY: usize = 8;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique viewer identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(u64);

impl SessionId {
    pub fn next() -> Self {
        Self(NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "viewer-{}", self.0)
    }
}

/// Transport-neutral WebSocket frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Text(String),
    Binary(Vec<u8>),
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    Close,
}

/// Lifecycle of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Active,
    Closing,
    Closed,
}

/// Observable state of a session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatus {
    pub state: SessionState,
    pub connected_at: DateTime<Utc>,

    /// When the last frame of any kind arrived from the viewer
    pub last_heartbeat: DateTime<Utc>,
}

/// Message kinds a viewer currently receives
///
/// `connected` and `pong` are delivered regardless.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscriptions(HashSet<MessageType>);

impl Subscriptions {
    pub fn forwards(&self, kind: MessageType) -> bool {
        kind.is_always_delivered() || self.0.contains(&kind)
    }

    pub fn subscribe(&mut self, kinds: &HashSet<MessageType>) {
        self.0.extend(kinds.iter().copied());
    }

    pub fn unsubscribe(&mut self, kinds: &HashSet<MessageType>) {
        self.0.retain(|kind| !kinds.contains(kind));
    }
}

impl Default for Subscriptions {
    fn default() -> Self {
        Self(HashSet::from([MessageType::Metrics, MessageType::SystemStatus]))
    }
}

/// Session tuning
#[derive(Debug, Clone)]
pub struct SessionSettings {
    /// Messages the hub may queue before the viewer counts as slow
    pub outbound_capacity: usize,

    pub ping_interval: Duration,

    /// Read deadline; any inbound frame renews it
    pub pong_timeout: Duration,

    /// Join queued messages into a single newline-separated text frame
    pub coalesce: bool,
}

impl From<&SessionConfig> for SessionSettings {
    fn from(config: &SessionConfig) -> Self {
        Self {
            outbound_capacity: config.outbound_capacity.max(1),
            ping_interval: config.ping_interval(),
            pong_timeout: config.pong_timeout(),
            coalesce: true,
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from(&SessionConfig::default())
    }
}

/// The hub's side of a session: its id, outbound queue and eviction signal
#[derive(Debug)]
pub struct SessionHandle {
    pub id: SessionId,
    outbound: mpsc::Sender<Arc<BroadcastMessage>>,
    evicted: CancellationToken,
}

impl SessionHandle {
    /// Create a handle with a fresh id and the receiving end of its queue
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Arc<BroadcastMessage>>) {
        let (outbound, rx) = mpsc::channel(capacity.max(1));
        (
            Self {
                id: SessionId::next(),
                outbound,
                evicted: CancellationToken::new(),
            },
            rx,
        )
    }

    /// Queue a message without waiting
    pub fn try_send(&self, message: Arc<BroadcastMessage>) -> Result<(), TrySendError<Arc<BroadcastMessage>>> {
        self.outbound.try_send(message)
    }

    /// Tell the session it was dropped by the hub
    ///
    /// The session ends even when its socket write is stalled and the queue
    /// is never drained.
    pub fn evict(&self) {
        self.evicted.cancel();
    }

    /// Fires once the hub has evicted this session
    pub fn eviction(&self) -> CancellationToken {
        self.evicted.clone()
    }
}

/// One connected viewer
pub struct ViewerSession {
    handle: SessionHandle,
    outbound_rx: mpsc::Receiver<Arc<BroadcastMessage>>,
    settings: SessionSettings,
    hub: HubHandle,
    status: Arc<watch::Sender<SessionStatus>>,
}

impl ViewerSession {
    pub fn new(hub: HubHandle, settings: SessionSettings) -> Self {
        let (handle, outbound_rx) = SessionHandle::channel(settings.outbound_capacity);
        let now = Utc::now();
        let (status, _) = watch::channel(SessionStatus {
            state: SessionState::Connecting,
            connected_at: now,
            last_heartbeat: now,
        });

        Self {
            handle,
            outbound_rx,
            settings,
            hub,
            status: Arc::new(status),
        }
    }

    pub fn id(&self) -> SessionId {
        self.handle.id
    }

    /// Watch the session's state and heartbeat
    pub fn status(&self) -> watch::Receiver<SessionStatus> {
        self.status.subscribe()
    }

    /// Serve the viewer until it disconnects, times out, falls behind, or
    /// `force_close` fires
    #[instrument(skip_all, fields(session = %self.handle.id))]
    pub async fn run<W, R, E>(self, mut sink: W, stream: R, force_close: CancellationToken)
    where
        W: Sink<Frame> + Unpin + Send + 'static,
        W::Error: fmt::Display + Send,
        R: Stream<Item = Result<Frame, E>> + Unpin + Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        let Self {
            handle,
            outbound_rx,
            settings,
            hub,
            status,
        } = self;
        let id = handle.id;
        let evicted = handle.eviction();

        if let Err(e) = hub.register(handle).await {
            warn!("hub unavailable, rejecting viewer: {:#}", e);
            let _ = sink.send(Frame::Close).await;
            status.send_modify(|s| s.state = SessionState::Closed);
            return;
        }

        status.send_modify(|s| s.state = SessionState::Active);
        info!("viewer connected");

        let (control_tx, control_rx) = mpsc::channel(CONTROL_CAPACITY);
        let (subscriptions_tx, subscriptions_rx) = watch::channel(Subscriptions::default());

        let mut send_task = tokio::spawn(outbound_pump(
            sink,
            outbound_rx,
            control_rx,
            subscriptions_rx,
            settings.clone(),
            Arc::clone(&status),
        ));
        let mut recv_task = tokio::spawn(inbound_pump(
            stream,
            control_tx,
            subscriptions_tx,
            settings.pong_timeout,
            Arc::clone(&status),
        ));

        let exit = tokio::select! {
            result = &mut send_task => {
                recv_task.abort();
                result.unwrap_or(PumpExit::Aborted)
            }
            result = &mut recv_task => {
                send_task.abort();
                result.unwrap_or(PumpExit::Aborted)
            }
            _ = evicted.cancelled() => {
                send_task.abort();
                recv_task.abort();
                PumpExit::Evicted
            }
            _ = force_close.cancelled() => {
                send_task.abort();
                recv_task.abort();
                PumpExit::Forced
            }
        };

        status.send_modify(|s| s.state = SessionState::Closing);

        if let Err(e) = hub.unregister(id).await {
            debug!("unregister skipped: {:#}", e);
        }

        status.send_modify(|s| s.state = SessionState::Closed);
        info!("viewer disconnected ({})", exit);
    }
}
