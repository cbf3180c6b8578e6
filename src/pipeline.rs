//! Wiring of the sampling pipeline
//!
//! [`Pipeline::start`] spawns the scheduler, the hub, the flush timer, the
//! optional alert dispatcher and the tee that hands each sample to them in
//! sampling order:
//!
//! ```text
//! scheduler ──> tee ──┬──> batch accumulator ──> persistence sink
//!                     ├──> hub ──> viewer sessions
//!                     └──> alert dispatcher ──> alert hook
//! ```
//!
//! ## Shutdown
//!
//! One root token stops the scheduler, which ends the sample stream. The tee
//! then runs the accumulator's final flush. The hub closes every viewer
//! queue; sessions get `shutdown_grace` to finish before a second token
//! force-closes them.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::MetricsSample;
use crate::actors::alert::{AlertHandle, AlertHook};
use crate::actors::batch::BatchAccumulator;
use crate::actors::hub::{HubConfig, HubHandle};
use crate::actors::messages::BroadcastMessage;
use crate::actors::scheduler::SchedulerHandle;
use crate::config::Config;
use crate::sampler::Sampler;
use crate::session::SessionSettings;
use crate::storage::PersistenceSink;

/// A running pipeline
pub struct Pipeline {
    cancel: CancellationToken,
    force_close: CancellationToken,
    sessions: TaskTracker,
    session_settings: SessionSettings,
    shutdown_grace: Duration,
    scheduler: SchedulerHandle,
    hub: HubHandle,
    accumulator: BatchAccumulator,
    tee_task: JoinHandle<()>,
    hub_task: JoinHandle<()>,
    flush_task: JoinHandle<()>,
    alert_task: Option<JoinHandle<()>>,
}

impl Pipeline {
    /// Spawn every pipeline task
    ///
    /// `sampler` carries the host id stamped on each sample.
    #[instrument(skip_all, fields(host = %sampler.host_id()))]
    pub fn start(
        config: &Config,
        sampler: Sampler,
        sink: Arc<dyn PersistenceSink>,
        hook: Option<Arc<dyn AlertHook>>,
    ) -> Self {
        let cancel = CancellationToken::new();
        let host_id = sampler.host_id().to_string();

        let (hub, hub_task) = HubHandle::spawn(
            HubConfig {
                host_id,
                status_interval: config.sessions.status_interval(),
            },
            cancel.child_token(),
        );

        let accumulator = BatchAccumulator::new(sink, config.batching.batch_size);
        let flush_task = tokio::spawn(
            accumulator
                .clone()
                .run(config.batching.flush_interval(), cancel.child_token()),
        );

        let (alerts, alert_task) = match hook {
            Some(hook) => {
                let (handle, task) = AlertHandle::spawn(hook, config.alerts.queue_capacity);
                (Some(handle), Some(task))
            }
            None => (None, None),
        };

        let (scheduler, samples) = SchedulerHandle::spawn(
            sampler,
            config.sampling.interval(),
            config.sampling.channel_capacity,
            cancel.child_token(),
        );

        let tee_task = tokio::spawn(tee(samples, accumulator.clone(), hub.clone(), alerts));

        info!(
            "pipeline started (interval {:?}, batch size {})",
            config.sampling.interval(),
            accumulator.batch_size()
        );

        Self {
            cancel,
            force_close: CancellationToken::new(),
            sessions: TaskTracker::new(),
            session_settings: SessionSettings::from(&config.sessions),
            shutdown_grace: config.sessions.shutdown_grace(),
            scheduler,
            hub,
            accumulator,
            tee_task,
            hub_task,
            flush_task,
            alert_task,
        }
    }

    pub fn hub(&self) -> &HubHandle {
        &self.hub
    }

    pub fn scheduler(&self) -> &SchedulerHandle {
        &self.scheduler
    }

    pub fn accumulator(&self) -> &BatchAccumulator {
        &self.accumulator
    }

    pub fn session_settings(&self) -> &SessionSettings {
        &self.session_settings
    }

    /// Tracker that viewer session tasks must be spawned on
    pub fn sessions(&self) -> &TaskTracker {
        &self.sessions
    }

    /// Fires when remaining sessions must close immediately
    pub fn force_close(&self) -> &CancellationToken {
        &self.force_close
    }

    /// Root token; cancelled when shutdown begins
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancel
    }

    /// Stop sampling, flush, and close all sessions
    #[instrument(skip_all)]
    pub async fn shutdown(self) {
        info!("shutting down pipeline");
        self.cancel.cancel();

        if let Err(e) = self.tee_task.await {
            error!("tee task failed: {}", e);
        }
        if let Err(e) = self.flush_task.await {
            error!("flush timer failed: {}", e);
        }
        if let Err(e) = self.hub_task.await {
            error!("hub task failed: {}", e);
        }

        if let Some(task) = self.alert_task {
            match timeout(self.shutdown_grace, task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("alert dispatcher failed: {}", e),
                Err(_) => warn!("alert dispatcher still busy after {:?}, leaving it", self.shutdown_grace),
            }
        }

        self.sessions.close();
        if timeout(self.shutdown_grace, self.sessions.wait()).await.is_err() {
            warn!(
                "{} sessions still open after {:?}, forcing close",
                self.sessions.len(),
                self.shutdown_grace
            );
            self.force_close.cancel();
            self.sessions.wait().await;
        }

        let stats = self.accumulator.stats();
        info!(
            "pipeline stopped ({} samples persisted, {} discarded)",
            stats.samples_persisted, stats.samples_discarded
        );
    }
}

/// Hand every sample to the accumulator, the hub and the alert queue, in
/// that order
async fn tee(
    mut samples: mpsc::Receiver<Arc<MetricsSample>>,
    accumulator: BatchAccumulator,
    hub: HubHandle,
    alerts: Option<AlertHandle>,
) {
    debug!("starting tee");

    while let Some(sample) = samples.recv().await {
        trace!("tee: sample at {}", sample.timestamp);

        accumulator.add(MetricsSample::clone(&sample));

        if let Err(e) = hub.broadcast(BroadcastMessage::metrics(&sample)).await {
            debug!("hub unavailable, sample not broadcast: {:#}", e);
        }

        if let Some(alerts) = &alerts {
            alerts.dispatch(sample);
        }
    }

    debug!("sample stream ended, running final flush");
    accumulator.shutdown().await;
}
