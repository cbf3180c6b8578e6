//! HubActor - Fans messages out to every connected viewer
//!
//! The hub owns the viewer registry. All registry changes and broadcasts go
//! through its command channel, so they are applied in one order and no lock
//! is shared with the sessions.
//!
//! ## Slow viewers
//!
//! Delivery never waits. A viewer whose outbound queue is full (or already
//! closed) is removed from the registry on the spot and its session is told
//! to close through the handle's eviction token, so a stalled socket write
//! cannot keep it alive. Other viewers are not affected.
//!
//! ## Message Flow
//!
//! ```text
//! pipeline ──Broadcast──┐
//! sessions ──Register/Unregister──> HubActor ──try_send──> [viewer queues]
//! status timer ─────────┘
//! ```

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use sysinfo::System;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

use crate::session::{SessionHandle, SessionId};

use super::messages::{BroadcastMessage, HubCommand, SystemStatus};

/// Placeholder period when status messages are disabled
const DISABLED_STATUS_PERIOD: Duration = Duration::from_secs(3600);

/// Hub settings
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Host named in status messages
    pub host_id: String,

    /// Period of `system_status` messages; `None` disables them
    pub status_interval: Option<Duration>,
}

/// Actor owning the viewer registry
pub struct HubActor {
    config: HubConfig,
    command_rx: mpsc::Receiver<HubCommand>,
    sessions: HashMap<SessionId, SessionHandle>,
    cancel: CancellationToken,
    started: Instant,
    broadcast_count: u64,
}

impl HubActor {
    pub fn new(config: HubConfig, command_rx: mpsc::Receiver<HubCommand>, cancel: CancellationToken) -> Self {
        Self {
            config,
            command_rx,
            sessions: HashMap::new(),
            cancel,
            started: Instant::now(),
            broadcast_count: 0,
        }
    }

    /// Run until cancelled or every handle is dropped
    ///
    /// On exit all viewer queues are closed, which ends every session.
    #[instrument(skip(self), fields(host = %self.config.host_id))]
    pub async fn run(mut self) {
        debug!("starting hub actor");

        let status_enabled = self.config.status_interval.is_some();
        let period = self.config.status_interval.unwrap_or(DISABLED_STATUS_PERIOD);
        let mut status_ticker = interval_at(Instant::now() + period, period);

        loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    debug!("cancellation requested");
                    break;
                }

                cmd = self.command_rx.recv() => match cmd {
                    Some(cmd) => self.handle_command(cmd),
                    None => {
                        debug!("all hub handles dropped");
                        break;
                    }
                },

                _ = status_ticker.tick(), if status_enabled => {
                    let message = BroadcastMessage::system_status(&self.system_status());
                    self.broadcast(Arc::new(message));
                }
            }
        }

        let remaining = self.sessions.len();
        self.sessions.clear();
        info!(
            "hub stopped, closed {} viewer queues after {} broadcasts",
            remaining, self.broadcast_count
        );
    }

    fn handle_command(&mut self, cmd: HubCommand) {
        match cmd {
            HubCommand::Register { session } => self.register(session),

            HubCommand::Unregister { id } => {
                if self.sessions.remove(&id).is_some() {
                    debug!("unregistered {} ({} viewers)", id, self.sessions.len());
                } else {
                    trace!("{} already removed", id);
                }
            }

            HubCommand::Broadcast { message } => self.broadcast(message),

            HubCommand::ViewerCount { respond_to } => {
                let _ = respond_to.send(self.sessions.len());
            }
        }
    }

    fn register(&mut self, session: SessionHandle) {
        let id = session.id;

        if let Err(e) = session.try_send(Arc::new(BroadcastMessage::connected(id))) {
            warn!("could not greet {}: {}", id, e);
            return;
        }

        self.sessions.insert(id, session);
        debug!("registered {} ({} viewers)", id, self.sessions.len());
    }

    /// Offer the message to every viewer, evicting the ones that cannot take it
    fn broadcast(&mut self, message: Arc<BroadcastMessage>) {
        self.broadcast_count += 1;

        let mut evicted = Vec::new();
        for (id, session) in &self.sessions {
            match session.try_send(Arc::clone(&message)) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    warn!("{} is too slow, disconnecting", id);
                    evicted.push(*id);
                }
                Err(TrySendError::Closed(_)) => {
                    debug!("{} queue closed, removing", id);
                    evicted.push(*id);
                }
            }
        }

        for id in evicted {
            if let Some(session) = self.sessions.remove(&id) {
                session.evict();
            }
        }

        trace!(
            "broadcast {} message to {} viewers",
            message.kind,
            self.sessions.len()
        );
    }

    fn system_status(&self) -> SystemStatus {
        SystemStatus {
            host_id: self.config.host_id.clone(),
            hostname: System::host_name().unwrap_or_else(|| "unknown".to_string()),
            os: System::long_os_version().unwrap_or_else(|| "unknown".to_string()),
            uptime_secs: System::uptime(),
            hub_uptime_secs: self.started.elapsed().as_secs(),
            viewers: self.sessions.len(),
        }
    }
}

/// Handle for talking to the HubActor
#[derive(Clone)]
pub struct HubHandle {
    sender: mpsc::Sender<HubCommand>,
}

impl HubHandle {
    /// Spawn the hub; it stops when `cancel` fires
    pub fn spawn(config: HubConfig, cancel: CancellationToken) -> (Self, JoinHandle<()>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(256);
        let actor = HubActor::new(config, cmd_rx, cancel);
        let task = tokio::spawn(actor.run());
        (Self { sender: cmd_tx }, task)
    }

    pub async fn register(&self, session: SessionHandle) -> Result<()> {
        self.sender
            .send(HubCommand::Register { session })
            .await
            .context("failed to send Register command")
    }

    pub async fn unregister(&self, id: SessionId) -> Result<()> {
        self.sender
            .send(HubCommand::Unregister { id })
            .await
            .context("failed to send Unregister command")
    }

    /// Queue a message for every viewer
    ///
    /// Waits only for room in the hub's command channel, never for viewers.
    pub async fn broadcast(&self, message: BroadcastMessage) -> Result<()> {
        self.sender
            .send(HubCommand::Broadcast {
                message: Arc::new(message),
            })
            .await
            .context("failed to send Broadcast command")
    }

    pub async fn viewer_count(&self) -> Result<usize> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(HubCommand::ViewerCount { respond_to: tx })
            .await
            .context("failed to send ViewerCount command")?;

        rx.await.context("failed to receive response")
    }
}
