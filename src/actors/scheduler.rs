//! SchedulerActor - Samples the host on a fixed interval
//!
//! The scheduler owns the [`Sampler`] and is the only producer of the
//! pipeline's sample channel.
//!
//! ## Message Flow
//!
//! ```text
//! Timer tick -> Sampler (blocking pool) -> try_send Arc<MetricsSample> -> pipeline
//!     ^
//!     +--- Commands (SampleNow, UpdateInterval, GetStats)
//! ```
//!
//! ## Backpressure
//!
//! The scheduler never waits on its consumer. When the channel is full the
//! newest sample is dropped and counted, so the sampling cadence is kept no
//! matter how slow the rest of the pipeline is.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior, interval, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument, trace, warn};

use crate::MetricsSample;
use crate::sampler::Sampler;

use super::messages::{SchedulerCommand, SchedulerStats};

/// Shortest period the ticker accepts
const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Result of handing one sample to the pipeline
enum Emit {
    Sent,
    Dropped,
    Closed,
}

/// Actor that periodically samples the local host
pub struct SchedulerActor {
    /// Shared with the blocking pool while a sample is taken
    sampler: Arc<Mutex<Sampler>>,

    command_rx: mpsc::Receiver<SchedulerCommand>,

    /// Producer side of the pipeline channel; dropped when the actor stops
    sample_tx: mpsc::Sender<Arc<MetricsSample>>,

    interval_duration: Duration,

    cancel: CancellationToken,

    stats: SchedulerStats,
}

impl SchedulerActor {
    pub fn new(
        sampler: Sampler,
        interval_duration: Duration,
        command_rx: mpsc::Receiver<SchedulerCommand>,
        sample_tx: mpsc::Sender<Arc<MetricsSample>>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            sampler: Arc::new(Mutex::new(sampler)),
            command_rx,
            sample_tx,
            interval_duration: interval_duration.max(MIN_INTERVAL),
            cancel,
            stats: SchedulerStats::default(),
        }
    }

    /// Run the actor's main loop
    ///
    /// The first sample is taken immediately. The loop runs until the
    /// cancellation token fires or the pipeline channel has no consumer left.
    /// Cancellation is observed between samples, so at most one in-flight
    /// sample delays shutdown.
    #[instrument(skip(self), fields(interval = ?self.interval_duration))]
    pub async fn run(mut self) {
        debug!("starting scheduler actor");

        let mut ticker = interval(self.interval_duration);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;

                _ = self.cancel.cancelled() => {
                    debug!("cancellation requested");
                    break;
                }

                _ = ticker.tick() => {
                    if let Emit::Closed = self.tick().await {
                        warn!("sample channel closed, stopping scheduler");
                        break;
                    }
                }

                Some(cmd) = self.command_rx.recv() => {
                    match cmd {
                        SchedulerCommand::SampleNow { respond_to } => {
                            debug!("received SampleNow command");
                            let result = match self.sample().await {
                                Ok(sample) => match self.emit(sample) {
                                    Emit::Closed => Err(anyhow::anyhow!("sample channel closed")),
                                    _ => Ok(()),
                                },
                                Err(e) => {
                                    self.stats.failed += 1;
                                    Err(e)
                                }
                            };
                            let _ = respond_to.send(result);
                        }

                        SchedulerCommand::UpdateInterval { interval } => {
                            let interval = interval.max(MIN_INTERVAL);
                            debug!("updating interval to {:?}", interval);
                            self.interval_duration = interval;
                            ticker = interval_at(Instant::now() + interval, interval);
                            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                        }

                        SchedulerCommand::GetStats { respond_to } => {
                            let _ = respond_to.send(self.stats.clone());
                        }
                    }
                }
            }
        }

        debug!(
            "scheduler actor stopped (emitted: {}, dropped: {}, failed: {})",
            self.stats.emitted, self.stats.dropped, self.stats.failed
        );
    }

    /// Sample once and emit; failures are logged and the loop goes on
    async fn tick(&mut self) -> Emit {
        match self.sample().await {
            Ok(sample) => self.emit(sample),
            Err(e) => {
                self.stats.failed += 1;
                error!("sampling failed: {:#}", e);
                Emit::Dropped
            }
        }
    }

    /// Take one sample on the blocking pool
    ///
    /// Subsystem errors are logged and counted, the sample is still usable.
    async fn sample(&mut self) -> Result<MetricsSample> {
        let sampler = Arc::clone(&self.sampler);
        let result = tokio::task::spawn_blocking(move || {
            sampler.lock().unwrap_or_else(PoisonError::into_inner).sample()
        })
        .await
        .context("sampling task panicked")?;

        let (sample, errors) = result.context("sample failed")?;

        if !errors.is_empty() {
            self.stats.subsystem_errors += errors.len() as u64;
            for e in &errors {
                debug!("partial sample: {}", e);
            }
        }

        Ok(sample)
    }

    fn emit(&mut self, sample: MetricsSample) -> Emit {
        match self.sample_tx.try_send(Arc::new(sample)) {
            Ok(()) => {
                self.stats.emitted += 1;
                trace!("emitted sample #{}", self.stats.emitted);
                Emit::Sent
            }
            Err(TrySendError::Full(_)) => {
                self.stats.dropped += 1;
                warn!(
                    "pipeline channel full, dropping newest sample ({} dropped so far)",
                    self.stats.dropped
                );
                Emit::Dropped
            }
            Err(TrySendError::Closed(_)) => Emit::Closed,
        }
    }
}

/// Handle for controlling a SchedulerActor
#[derive(Clone)]
pub struct SchedulerHandle {
    sender: mpsc::Sender<SchedulerCommand>,
    cancel: CancellationToken,
}

impl SchedulerHandle {
    /// Spawn a new scheduler actor
    ///
    /// Returns the handle and the consumer side of the sample channel, which
    /// holds at most `capacity` samples. The channel ends once the scheduler
    /// stops.
    pub fn spawn(
        sampler: Sampler,
        interval: Duration,
        capacity: usize,
        cancel: CancellationToken,
    ) -> (Self, mpsc::Receiver<Arc<MetricsSample>>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);
        let (sample_tx, sample_rx) = mpsc::channel(capacity.max(1));

        let actor = SchedulerActor::new(sampler, interval, cmd_rx, sample_tx, cancel.clone());

        tokio::spawn(actor.run());

        (
            Self {
                sender: cmd_tx,
                cancel,
            },
            sample_rx,
        )
    }

    /// Take and emit a sample now
    pub async fn sample_now(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SchedulerCommand::SampleNow { respond_to: tx })
            .await
            .context("failed to send SampleNow command")?;

        rx.await.context("failed to receive response")??;
        Ok(())
    }

    /// Restart the ticker with a new period; a zero period is rejected
    pub async fn update_interval(&self, interval: Duration) -> Result<()> {
        if interval.is_zero() {
            anyhow::bail!("sampling interval must be greater than zero");
        }

        self.sender
            .send(SchedulerCommand::UpdateInterval { interval })
            .await
            .context("failed to send UpdateInterval command")?;
        Ok(())
    }

    pub async fn stats(&self) -> Result<SchedulerStats> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SchedulerCommand::GetStats { respond_to: tx })
            .await
            .context("failed to send GetStats command")?;

        rx.await.context("failed to receive response")
    }

    /// Stop sampling; the sample channel ends afterwards
    pub fn stop(&self) {
        self.cancel.cancel();
    }
}
